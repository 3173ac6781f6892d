// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Ordering constraint resolution and flag propagation.
//!
//! Configured orderings are late-bound: they name resources and tasks and
//! are resolved here into concrete action edges, interleaving clone
//! instances where requested. Propagation then drives the action flags to
//! a fixpoint. Both rules only ever *clear* `optional` or `runnable`, so
//! the pass is monotone and terminates within `2 × |edges|` flag changes;
//! a worklist keeps it near-linear in practice.

use std::collections::VecDeque;

use crate::constraint::{OrderKind, TaskKind};
use crate::ident::{ActionId, NodeId, ResourceId};
use crate::resource::{ResourceVariant, RscRole};
use crate::working_set::WorkingSet;

/// Resolves every configured ordering into action edges.
pub fn resolve_config_orderings(ws: &mut WorkingSet) {
    let specs = ws.orderings.clone();
    for spec in &specs {
        if try_interleave(ws, spec.first_rsc, spec.first_task, spec.then_rsc, spec.then_task, spec.kind)
        {
            continue;
        }
        let first = milestone_action(ws, spec.first_rsc, spec.first_task, true);
        let then = milestone_action(ws, spec.then_rsc, spec.then_task, false);
        if let (Some(first), Some(then)) = (first, then) {
            ws.push_edge(first, then, spec.kind);
        }
        // Symmetric start orderings imply the reverse stop ordering.
        if !spec.kind.contains(OrderKind::ASYMMETRIC)
            && spec.first_task == TaskKind::Start
            && spec.then_task == TaskKind::Start
        {
            let rev_first = milestone_action(ws, spec.then_rsc, TaskKind::Stop, true);
            let rev_then = milestone_action(ws, spec.first_rsc, TaskKind::Stop, false);
            if let (Some(f), Some(t)) = (rev_first, rev_then) {
                ws.push_edge(f, t, spec.kind);
            }
        }
    }
}

/// Maps a resource/task reference to the concrete action that stands for
/// it. For collectives the `first` side binds to the completion milestone
/// (`running`/`stopped`) and the `then` side to the entry hub.
fn milestone_action(
    ws: &WorkingSet,
    rsc: ResourceId,
    task: TaskKind,
    first_side: bool,
) -> Option<ActionId> {
    let collective = !matches!(ws.resource(rsc).variant, ResourceVariant::Primitive(_));
    let effective = if collective && first_side {
        match task {
            TaskKind::Start => TaskKind::Running,
            TaskKind::Stop => TaskKind::Stopped,
            other => other,
        }
    } else {
        task
    };
    ws.find_action(rsc, effective)
}

/// Pairs instances of two interleaving clones node-by-node.
///
/// Returns `true` when the ordering row was handled per-instance. An instance on
/// the `then` side with no compatible `first` peer on its node is forcibly
/// unassigned whenever the edge kind propagates runnability.
fn try_interleave(
    ws: &mut WorkingSet,
    first_rsc: ResourceId,
    first_task: TaskKind,
    then_rsc: ResourceId,
    then_task: TaskKind,
    kind: OrderKind,
) -> bool {
    let interleaved = matches!(
        (&ws.resource(first_rsc).variant, &ws.resource(then_rsc).variant),
        (ResourceVariant::Clone(_), ResourceVariant::Clone(then_spec)) if then_spec.interleave
    );
    if !interleaved {
        return false;
    }
    let first_instances = ws.resource(first_rsc).children().to_vec();
    let then_instances = ws.resource(then_rsc).children().to_vec();
    for then_inst in then_instances {
        let Some(node) = instance_node(ws, then_inst) else {
            continue;
        };
        let peer = first_instances
            .iter()
            .copied()
            .find(|f| instance_node(ws, *f) == Some(node));
        match peer {
            Some(first_inst) => {
                let first_action = ws.find_action(first_inst, first_task);
                let then_action = ws.find_action(then_inst, then_task);
                if let (Some(f), Some(t)) = (first_action, then_action) {
                    ws.push_edge(f, t, kind);
                }
            }
            None if kind.propagates_runnable() => {
                unassign_instance(ws, then_inst);
            }
            None => {}
        }
    }
    true
}

fn instance_node(ws: &WorkingSet, inst: ResourceId) -> Option<NodeId> {
    ws.resource(inst).as_primitive().and_then(|p| p.next_node)
}

/// Forces an instance back to stopped: no compatible interleave peer
/// exists on its node.
fn unassign_instance(ws: &mut WorkingSet, inst: ResourceId) {
    tracing::warn!(
        resource = %ws.resource(inst).name,
        event = "interleave-unpaired",
        "no compatible peer instance on the chosen node; unassigning"
    );
    if let Some(prim) = ws.resource_mut(inst).as_primitive_mut() {
        prim.next_node = None;
        prim.next_role = RscRole::Stopped;
    }
    let kill: Vec<ActionId> = ws
        .actions
        .iter()
        .filter(|a| a.rsc == Some(inst) && a.task == TaskKind::Start)
        .map(|a| a.id)
        .collect();
    for id in kill {
        ws.action_mut(id).runnable = false;
    }
}

/// Drives action flags to a fixpoint over all ordering edges.
///
/// Rules per edge `(first, then, kind)`:
/// - `IMPLIES_THEN`: a mandatory `first` clears `then.optional`; an
///   unrunnable `then` clears `first.runnable`.
/// - `RUNNABLE_LEFT`: an unrunnable `first` clears `then.runnable`.
/// - `THEN_CANCELS_FIRST`: an unrunnable `then` clears `first.runnable`.
/// - `OPTIONAL` and `SERIALIZE`: ordering only, no propagation.
pub fn propagate(ws: &mut WorkingSet) {
    // action index -> incident edge indices
    let mut incident: Vec<Vec<usize>> = vec![Vec::new(); ws.actions.len()];
    for (idx, edge) in ws.edges.iter().enumerate() {
        incident[edge.first.index()].push(idx);
        incident[edge.then.index()].push(idx);
    }
    let mut queue: VecDeque<usize> = (0..ws.edges.len()).collect();
    let mut queued = vec![true; ws.edges.len()];

    while let Some(idx) = queue.pop_front() {
        queued[idx] = false;
        let edge = ws.edges[idx];
        let first = edge.first;
        let then = edge.then;
        let mut changed: Vec<ActionId> = Vec::new();

        if edge.kind.contains(OrderKind::IMPLIES_THEN) {
            if !ws.action(first).optional && ws.action(first).runnable && ws.action(then).optional
            {
                ws.action_mut(then).optional = false;
                changed.push(then);
            }
            if !ws.action(then).runnable && ws.action(first).runnable {
                ws.action_mut(first).runnable = false;
                changed.push(first);
            }
        }
        if edge.kind.contains(OrderKind::RUNNABLE_LEFT)
            && !ws.action(first).runnable
            && ws.action(then).runnable
        {
            ws.action_mut(then).runnable = false;
            changed.push(then);
        }
        if edge.kind.contains(OrderKind::THEN_CANCELS_FIRST)
            && !ws.action(then).runnable
            && ws.action(first).runnable
        {
            ws.action_mut(first).runnable = false;
            changed.push(first);
        }

        for action in changed {
            for &other in &incident[action.index()] {
                if !queued[other] {
                    queued[other] = true;
                    queue.push_back(other);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::Action;
    use crate::ident::ActionId;
    use std::collections::BTreeMap;

    fn blank_action(uuid: &str, optional: bool, runnable: bool) -> Action {
        Action {
            id: ActionId(0),
            uuid: uuid.to_string(),
            rsc: None,
            task: TaskKind::Start,
            on_node: None,
            interval_ms: 0,
            timeout_ms: 0,
            optional,
            runnable,
            pseudo: false,
            migrate_runnable: false,
            priority: 0,
            notify_meta: BTreeMap::new(),
        }
    }

    #[test]
    fn implies_then_clears_optional_downstream() {
        let mut ws = WorkingSet::default();
        let a = ws.push_action(blank_action("a", false, true));
        let b = ws.push_action(blank_action("b", true, true));
        ws.push_edge(a, b, OrderKind::IMPLIES_THEN);
        propagate(&mut ws);
        assert!(!ws.action(b).optional, "mandatory first forces then");
    }

    #[test]
    fn runnable_left_cascades_through_chains() {
        let mut ws = WorkingSet::default();
        let a = ws.push_action(blank_action("a", false, false));
        let b = ws.push_action(blank_action("b", false, true));
        let c = ws.push_action(blank_action("c", false, true));
        ws.push_edge(a, b, OrderKind::RUNNABLE_LEFT);
        ws.push_edge(b, c, OrderKind::RUNNABLE_LEFT);
        propagate(&mut ws);
        assert!(!ws.action(b).runnable);
        assert!(!ws.action(c).runnable, "unrunnability reaches the chain tail");
    }

    #[test]
    fn implies_then_back_propagates_unrunnable_then() {
        let mut ws = WorkingSet::default();
        let a = ws.push_action(blank_action("a", false, true));
        let b = ws.push_action(blank_action("b", false, false));
        ws.push_edge(a, b, OrderKind::IMPLIES_THEN);
        propagate(&mut ws);
        assert!(
            !ws.action(a).runnable,
            "an unrunnable then cancels its mandatory first"
        );
    }

    #[test]
    fn optional_edges_do_not_propagate() {
        let mut ws = WorkingSet::default();
        let a = ws.push_action(blank_action("a", false, false));
        let b = ws.push_action(blank_action("b", true, true));
        ws.push_edge(a, b, OrderKind::OPTIONAL);
        propagate(&mut ws);
        assert!(ws.action(b).optional);
        assert!(ws.action(b).runnable);
    }
}
