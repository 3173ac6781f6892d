// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Action synthesis: translate allocation outcomes into concrete actions,
//! pseudo-action ordering hubs, and notification callbacks.

use std::collections::BTreeMap;

use crate::action::Action;
use crate::constraint::{OrderKind, TaskKind};
use crate::ident::{ActionId, NodeId, ResourceId};
use crate::ops::ops_for;
use crate::resource::{ResourceVariant, RscRole};
use crate::working_set::WorkingSet;

/// Mandatory structural edge: gates runnability and propagates
/// mandatory-ness.
const MANDATORY: OrderKind = OrderKind::MANDATORY;

const DEFAULT_TIMEOUT_MS: u32 = 20_000;

/// Synthesizes actions and structural ordering edges for every top-level
/// resource, post-allocation.
pub fn create_actions(ws: &mut WorkingSet) {
    let tops = ws.top_level.clone();
    for rsc in &tops {
        ops_for(&ws.resource(*rsc).variant).create_actions(ws, *rsc);
    }
    for rsc in &tops {
        ops_for(&ws.resource(*rsc).variant).update_ordered_actions(ws, *rsc);
    }
}

/// What a primitive has to do this transition.
#[derive(Default, Debug)]
struct PrimitivePlan {
    demote_on: Vec<NodeId>,
    stop_on: Vec<NodeId>,
    start_on: Option<NodeId>,
    promote_on: Option<NodeId>,
    monitor_on: Option<NodeId>,
    migratable: bool,
}

fn plan_primitive(ws: &WorkingSet, rsc: ResourceId) -> PrimitivePlan {
    let resource = ws.resource(rsc);
    let mut plan = PrimitivePlan {
        migratable: resource.meta.get("allow-migrate").map(String::as_str) == Some("true"),
        ..PrimitivePlan::default()
    };
    if !resource.managed {
        return plan;
    }
    let Some(prim) = resource.as_primitive() else {
        return plan;
    };
    let current_role = if prim.running_on.is_empty() {
        RscRole::Stopped
    } else if prim.role == RscRole::Unknown {
        RscRole::Started
    } else {
        prim.role
    };
    let staying = match (prim.next_node, prim.running_on.first()) {
        (Some(next), Some(&cur)) => next == cur && prim.running_on.len() == 1,
        _ => false,
    };
    let restart_in_place = staying && resource.failed;

    for &node in &prim.running_on {
        let keep = staying && !restart_in_place && Some(node) == prim.next_node;
        if !keep {
            if current_role == RscRole::Promoted {
                plan.demote_on.push(node);
            }
            plan.stop_on.push(node);
        }
    }

    if let Some(next) = prim.next_node {
        let fresh = current_role == RscRole::Stopped || !staying || restart_in_place;
        if fresh {
            plan.start_on = Some(next);
            plan.monitor_on = Some(next);
        }
        if prim.next_role == RscRole::Promoted && (current_role != RscRole::Promoted || fresh) {
            plan.promote_on = Some(next);
        }
        if prim.next_role == RscRole::Unpromoted
            && current_role == RscRole::Promoted
            && staying
            && !restart_in_place
        {
            plan.demote_on.push(next);
        }
    }
    plan
}

/// Emits demote/stop/start/promote/monitor actions for a primitive.
pub(crate) fn create_primitive_actions(ws: &mut WorkingSet, rsc: ResourceId) {
    let plan = plan_primitive(ws, rsc);
    let name = ws.resource(rsc).name.clone();
    let (stop_timeout, start_timeout, ops) = {
        let prim = ws.resource(rsc).as_primitive();
        let ops = prim.map(|p| p.ops.clone()).unwrap_or_default();
        let find = |task: &str| {
            ops.iter()
                .find(|o| o.name == task)
                .map_or(DEFAULT_TIMEOUT_MS, |o| o.timeout_ms)
        };
        (find("stop"), find("start"), ops)
    };

    for node in &plan.demote_on {
        add_action(ws, rsc, &name, TaskKind::Demote, Some(*node), 0, stop_timeout, false);
    }
    for node in &plan.stop_on {
        let id = add_action(ws, rsc, &name, TaskKind::Stop, Some(*node), 0, stop_timeout, false);
        ws.action_mut(id).migrate_runnable = plan.migratable;
    }
    if let Some(node) = plan.start_on {
        let id = add_action(ws, rsc, &name, TaskKind::Start, Some(node), 0, start_timeout, false);
        ws.action_mut(id).migrate_runnable = plan.migratable;
    }
    if let Some(node) = plan.promote_on {
        add_action(ws, rsc, &name, TaskKind::Promote, Some(node), 0, start_timeout, false);
    }
    if let Some(node) = plan.monitor_on {
        for op in &ops {
            if op.name == "monitor" && op.interval_ms > 0 {
                let id = add_action(
                    ws,
                    rsc,
                    &name,
                    TaskKind::Monitor,
                    Some(node),
                    op.interval_ms,
                    op.timeout_ms,
                    false,
                );
                ws.action_mut(id).priority = -1;
            }
        }
    }
}

/// Installs the intra-primitive edges: demote before stop, stop before
/// start, start before promote and recurring monitors.
pub(crate) fn order_primitive(ws: &mut WorkingSet, rsc: ResourceId) {
    let demote = find_task(ws, rsc, TaskKind::Demote);
    let stops = find_all(ws, rsc, TaskKind::Stop);
    let start = find_task(ws, rsc, TaskKind::Start);
    let promote = find_task(ws, rsc, TaskKind::Promote);
    let monitors: Vec<ActionId> = ws
        .actions
        .iter()
        .filter(|a| a.rsc == Some(rsc) && a.task == TaskKind::Monitor && a.interval_ms > 0)
        .map(|a| a.id)
        .collect();

    if let Some(demote) = demote {
        for stop in &stops {
            ws.push_edge(demote, *stop, MANDATORY);
        }
    }
    if let Some(start) = start {
        for stop in &stops {
            ws.push_edge(*stop, start, MANDATORY);
        }
        if let Some(promote) = promote {
            ws.push_edge(start, promote, MANDATORY);
        }
        for monitor in &monitors {
            ws.push_edge(start, *monitor, OrderKind::RUNNABLE_LEFT);
        }
    }
}

/// Creates child actions, then the collective's pseudo hubs (and, for
/// notifying clones, the notification actions around them).
pub(crate) fn create_collective_actions(ws: &mut WorkingSet, rsc: ResourceId) {
    let children = ws.resource(rsc).children().to_vec();
    for child in &children {
        ops_for(&ws.resource(*child).variant).create_actions(ws, *child);
    }
    let name = ws.resource(rsc).name.clone();

    let starts = child_actions(ws, &children, TaskKind::Start);
    let stops = child_actions(ws, &children, TaskKind::Stop);

    if !starts.is_empty() {
        let start_hub = add_pseudo(ws, rsc, &name, TaskKind::Start);
        let running_hub = add_pseudo(ws, rsc, &name, TaskKind::Running);
        fold_pseudo_flags(ws, start_hub, &starts);
        fold_pseudo_flags(ws, running_hub, &starts);
    }
    if !stops.is_empty() {
        let stop_hub = add_pseudo(ws, rsc, &name, TaskKind::Stop);
        let stopped_hub = add_pseudo(ws, rsc, &name, TaskKind::Stopped);
        fold_pseudo_flags(ws, stop_hub, &stops);
        fold_pseudo_flags(ws, stopped_hub, &stops);
    }

    let notify = matches!(&ws.resource(rsc).variant, ResourceVariant::Clone(spec) if spec.notify);
    if notify {
        create_notifications(ws, rsc, &children, !starts.is_empty(), !stops.is_empty());
    }
}

/// Group sequencing plus the shared hub wiring.
pub(crate) fn order_group(ws: &mut WorkingSet, rsc: ResourceId) {
    let children = ws.resource(rsc).children().to_vec();
    for pair in children.windows(2) {
        let (a, b) = (pair[0], pair[1]);
        if let (Some(sa), Some(sb)) = (find_task(ws, a, TaskKind::Start), find_task(ws, b, TaskKind::Start)) {
            ws.push_edge(sa, sb, MANDATORY);
        }
        // Stops run in reverse member order.
        if let (Some(pa), Some(pb)) = (find_task(ws, a, TaskKind::Stop), find_task(ws, b, TaskKind::Stop)) {
            ws.push_edge(pb, pa, MANDATORY);
        }
    }
    order_hubs(ws, rsc, &children);
}

/// Clone hub wiring; instances are unordered among themselves.
pub(crate) fn order_clone(ws: &mut WorkingSet, rsc: ResourceId) {
    let children = ws.resource(rsc).children().to_vec();
    for child in &children {
        ops_for(&ws.resource(*child).variant).update_ordered_actions(ws, *child);
    }
    order_hubs(ws, rsc, &children);
    order_notifications(ws, rsc, &children);
}

/// Wires children into the collective's pseudo hubs and orders a restart:
/// everything stopped before anything starts.
fn order_hubs(ws: &mut WorkingSet, rsc: ResourceId, children: &[ResourceId]) {
    if matches!(ws.resource(rsc).variant, ResourceVariant::Group { .. }) {
        for child in children {
            ops_for(&ws.resource(*child).variant).update_ordered_actions(ws, *child);
        }
    }
    let start_hub = find_task(ws, rsc, TaskKind::Start);
    let running_hub = find_task(ws, rsc, TaskKind::Running);
    let stop_hub = find_task(ws, rsc, TaskKind::Stop);
    let stopped_hub = find_task(ws, rsc, TaskKind::Stopped);

    for child in children {
        if let Some(child_start) = find_task(ws, *child, TaskKind::Start) {
            if let Some(hub) = start_hub {
                ws.push_edge(hub, child_start, MANDATORY);
            }
            if let Some(hub) = running_hub {
                ws.push_edge(child_start, hub, OrderKind::OPTIONAL);
            }
        }
        if let Some(child_stop) = find_task(ws, *child, TaskKind::Stop) {
            if let Some(hub) = stop_hub {
                ws.push_edge(hub, child_stop, MANDATORY);
            }
            if let Some(hub) = stopped_hub {
                ws.push_edge(child_stop, hub, OrderKind::OPTIONAL);
            }
        }
    }
    if let (Some(stopped), Some(start)) = (stopped_hub, start_hub) {
        ws.push_edge(stopped, start, MANDATORY);
    }
}

// ---------------------------------------------------------------------------
// Notifications
// ---------------------------------------------------------------------------

/// The `CRM_meta_notify_*` attribute set attached to every notification
/// action of one clone operation.
fn notify_meta(
    ws: &WorkingSet,
    children: &[ResourceId],
    notify_type: &str,
    operation: &str,
) -> BTreeMap<String, String> {
    let mut active_rsc = Vec::new();
    let mut active_uname = Vec::new();
    let mut stop_rsc = Vec::new();
    let mut stop_uname = Vec::new();
    let mut start_rsc = Vec::new();
    let mut start_uname = Vec::new();
    for child in children {
        let Some(prim) = ws.resource(*child).as_primitive() else {
            continue;
        };
        let name = &ws.resource(*child).name;
        for node in &prim.running_on {
            active_rsc.push(name.clone());
            active_uname.push(ws.node(*node).name.clone());
        }
        let stopping = prim
            .running_on
            .iter()
            .any(|n| prim.next_node != Some(*n) || prim.next_role == RscRole::Stopped);
        if stopping {
            if let Some(node) = prim.running_on.first() {
                stop_rsc.push(name.clone());
                stop_uname.push(ws.node(*node).name.clone());
            }
        }
        if let Some(next) = prim.next_node {
            if !prim.running_on.contains(&next) {
                start_rsc.push(name.clone());
                start_uname.push(ws.node(next).name.clone());
            }
        }
    }
    let mut meta = BTreeMap::new();
    meta.insert("CRM_meta_notify_type".into(), notify_type.to_string());
    meta.insert("CRM_meta_notify_operation".into(), operation.to_string());
    meta.insert("CRM_meta_notify_active_resource".into(), active_rsc.join(" "));
    meta.insert("CRM_meta_notify_active_uname".into(), active_uname.join(" "));
    meta.insert("CRM_meta_notify_stop_resource".into(), stop_rsc.join(" "));
    meta.insert("CRM_meta_notify_stop_uname".into(), stop_uname.join(" "));
    meta.insert("CRM_meta_notify_start_resource".into(), start_rsc.join(" "));
    meta.insert("CRM_meta_notify_start_uname".into(), start_uname.join(" "));
    meta
}

/// Creates the pre/confirmed/post notification pseudo hubs and the
/// per-instance notify calls for a notifying clone.
fn create_notifications(
    ws: &mut WorkingSet,
    rsc: ResourceId,
    children: &[ResourceId],
    starting: bool,
    stopping: bool,
) {
    let name = ws.resource(rsc).name.clone();
    let phases: &[(&str, &str, bool)] = &[
        ("pre_notify_stop", "stop", stopping),
        ("post_notify_stopped", "stop", stopping),
        ("pre_notify_start", "start", starting),
        ("post_notify_running", "start", starting),
    ];
    for (phase, operation, wanted) in phases {
        if !wanted {
            continue;
        }
        let notify_type = if phase.starts_with("pre") { "pre" } else { "post" };
        let meta = notify_meta(ws, children, notify_type, operation);
        let hub = add_named_pseudo(ws, rsc, &format!("{name}_{phase}_0"));
        ws.action_mut(hub).notify_meta = meta.clone();
        let confirmed = add_named_pseudo(ws, rsc, &format!("{name}_confirmed-{phase}_0"));
        ws.action_mut(confirmed).notify_meta = meta.clone();
        // One notify call per instance that is (or was) active.
        for child in children {
            let Some((child_name, node)) = ws.resource(*child).as_primitive().and_then(|p| {
                p.running_on
                    .first()
                    .map(|n| (ws.resource(*child).name.clone(), *n))
            }) else {
                continue;
            };
            let uuid = format!("{child_name}_{phase}_0");
            let id = ws.push_action(Action {
                id: ActionId(0),
                uuid,
                rsc: Some(*child),
                task: TaskKind::Notify,
                on_node: Some(node),
                interval_ms: 0,
                timeout_ms: DEFAULT_TIMEOUT_MS,
                optional: false,
                runnable: true,
                pseudo: false,
                migrate_runnable: false,
                priority: 0,
                notify_meta: meta.clone(),
            });
            ws.push_edge(hub, id, MANDATORY);
            ws.push_edge(id, confirmed, OrderKind::OPTIONAL);
        }
    }
}

/// Orders the notification hubs around the clone's stop/start milestones.
fn order_notifications(ws: &mut WorkingSet, rsc: ResourceId, _children: &[ResourceId]) {
    let name = ws.resource(rsc).name.clone();
    let by_uuid = |ws: &WorkingSet, uuid: &str| -> Option<ActionId> {
        ws.actions.iter().find(|a| a.uuid == uuid).map(|a| a.id)
    };
    let stop_hub = find_task(ws, rsc, TaskKind::Stop);
    let stopped_hub = find_task(ws, rsc, TaskKind::Stopped);
    let start_hub = find_task(ws, rsc, TaskKind::Start);
    let running_hub = find_task(ws, rsc, TaskKind::Running);

    if let (Some(confirmed_pre), Some(stop)) = (
        by_uuid(ws, &format!("{name}_confirmed-pre_notify_stop_0")),
        stop_hub,
    ) {
        ws.push_edge(confirmed_pre, stop, MANDATORY);
    }
    if let (Some(stopped), Some(post)) = (
        stopped_hub,
        by_uuid(ws, &format!("{name}_post_notify_stopped_0")),
    ) {
        ws.push_edge(stopped, post, MANDATORY);
    }
    if let (Some(confirmed_pre), Some(start)) = (
        by_uuid(ws, &format!("{name}_confirmed-pre_notify_start_0")),
        start_hub,
    ) {
        ws.push_edge(confirmed_pre, start, MANDATORY);
    }
    if let (Some(running), Some(post)) = (
        running_hub,
        by_uuid(ws, &format!("{name}_post_notify_running_0")),
    ) {
        ws.push_edge(running, post, MANDATORY);
    }
    // A full restart notifies the stop side before the start side.
    if let (Some(confirmed_post_stop), Some(pre_start)) = (
        by_uuid(ws, &format!("{name}_confirmed-post_notify_stopped_0")),
        by_uuid(ws, &format!("{name}_pre_notify_start_0")),
    ) {
        ws.push_edge(confirmed_post_stop, pre_start, MANDATORY);
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

#[allow(clippy::too_many_arguments)]
fn add_action(
    ws: &mut WorkingSet,
    rsc: ResourceId,
    name: &str,
    task: TaskKind,
    node: Option<NodeId>,
    interval_ms: u32,
    timeout_ms: u32,
    optional: bool,
) -> ActionId {
    ws.push_action(Action {
        id: ActionId(0),
        uuid: Action::format_uuid(name, task, interval_ms),
        rsc: Some(rsc),
        task,
        on_node: node,
        interval_ms,
        timeout_ms,
        optional,
        runnable: true,
        pseudo: false,
        migrate_runnable: false,
        priority: 0,
        notify_meta: BTreeMap::new(),
    })
}

fn add_pseudo(ws: &mut WorkingSet, rsc: ResourceId, name: &str, task: TaskKind) -> ActionId {
    let id = add_action(ws, rsc, name, task, None, 0, 0, false);
    ws.action_mut(id).pseudo = true;
    id
}

fn add_named_pseudo(ws: &mut WorkingSet, rsc: ResourceId, uuid: &str) -> ActionId {
    ws.push_action(Action {
        id: ActionId(0),
        uuid: uuid.to_string(),
        rsc: Some(rsc),
        task: TaskKind::Notify,
        on_node: None,
        interval_ms: 0,
        timeout_ms: 0,
        optional: false,
        runnable: true,
        pseudo: true,
        migrate_runnable: false,
        priority: 0,
        notify_meta: BTreeMap::new(),
    })
}

/// Pseudo hubs are runnable iff at least one child action is runnable and
/// optional iff all child actions are optional.
fn fold_pseudo_flags(ws: &mut WorkingSet, hub: ActionId, child_actions: &[ActionId]) {
    let runnable = child_actions.iter().any(|a| ws.action(*a).runnable);
    let optional = child_actions.iter().all(|a| ws.action(*a).optional);
    let hub_action = ws.action_mut(hub);
    hub_action.runnable = runnable;
    hub_action.optional = optional;
}

pub(crate) fn find_task(ws: &WorkingSet, rsc: ResourceId, task: TaskKind) -> Option<ActionId> {
    ws.find_action(rsc, task)
}

fn find_all(ws: &WorkingSet, rsc: ResourceId, task: TaskKind) -> Vec<ActionId> {
    ws.actions
        .iter()
        .filter(|a| a.rsc == Some(rsc) && a.task == task && a.interval_ms == 0)
        .map(|a| a.id)
        .collect()
}

fn child_actions(ws: &WorkingSet, children: &[ResourceId], task: TaskKind) -> Vec<ActionId> {
    children
        .iter()
        .flat_map(|c| find_all(ws, *c, task))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn action_with(ws: &mut WorkingSet, optional: bool, runnable: bool) -> ActionId {
        let id = add_action(
            ws,
            ResourceId(0),
            "child",
            TaskKind::Start,
            None,
            0,
            0,
            optional,
        );
        ws.action_mut(id).runnable = runnable;
        id
    }

    #[test]
    fn pseudo_hub_is_runnable_iff_any_child_is() {
        let mut ws = WorkingSet::default();
        let a = action_with(&mut ws, false, false);
        let b = action_with(&mut ws, false, true);
        let hub = add_pseudo(&mut ws, ResourceId(1), "grp", TaskKind::Start);
        fold_pseudo_flags(&mut ws, hub, &[a, b]);
        assert!(ws.action(hub).runnable);

        let dead_hub = add_pseudo(&mut ws, ResourceId(1), "grp2", TaskKind::Start);
        fold_pseudo_flags(&mut ws, dead_hub, &[a]);
        assert!(!ws.action(dead_hub).runnable);
    }

    #[test]
    fn pseudo_hub_is_optional_iff_all_children_are() {
        let mut ws = WorkingSet::default();
        let a = action_with(&mut ws, true, true);
        let b = action_with(&mut ws, false, true);
        let hub = add_pseudo(&mut ws, ResourceId(1), "grp", TaskKind::Stop);
        fold_pseudo_flags(&mut ws, hub, &[a, b]);
        assert!(!ws.action(hub).optional, "one mandatory child is enough");

        let idle_hub = add_pseudo(&mut ws, ResourceId(1), "grp2", TaskKind::Stop);
        fold_pseudo_flags(&mut ws, idle_hub, &[a]);
        assert!(ws.action(idle_hub).optional);
    }

    #[test]
    fn hub_uuids_follow_the_milestone_naming() {
        let mut ws = WorkingSet::default();
        let start = add_pseudo(&mut ws, ResourceId(0), "group2", TaskKind::Start);
        let running = add_pseudo(&mut ws, ResourceId(0), "group2", TaskKind::Running);
        assert_eq!(ws.action(start).uuid, "group2_start_0");
        assert_eq!(ws.action(running).uuid, "group2_running_0");
        assert!(ws.action(start).pseudo);
    }
}
