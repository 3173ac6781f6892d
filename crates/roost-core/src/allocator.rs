// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Instance assignment: decide where every primitive runs next.
//!
//! The allocator mutates the working set in place: every primitive ends the
//! run with either `next_node = Some(n)` or an explicit stopped decision,
//! and `Node::count` reflects the managed instances placed on each node.
//! All tie-breaks are deterministic: score descending, then the current
//! node, then lexicographic node uuid.

use std::collections::BTreeMap;

use crate::ident::{NodeId, ResourceId};
use crate::ops::ops_for;
use crate::resource::{Primitive, Resource, ResourceVariant, RscRole};
use crate::score::Score;
use crate::working_set::WorkingSet;

/// Assigns every resource in the working set.
///
/// Top-level resources are visited in descending priority (ties by arena
/// id), matching the order collectives were configured in.
pub fn assign_all(ws: &mut WorkingSet) {
    ws.reset_run_state();
    expand_collectives(ws);
    seed_allowed_maps(ws);
    apply_ticket_revocations(ws);

    let mut order: Vec<ResourceId> = ws.top_level.clone();
    order.sort_by(|a, b| {
        let pa = ws.resource(*a).priority;
        let pb = ws.resource(*b).priority;
        pb.cmp(&pa).then_with(|| a.cmp(b))
    });
    for rsc in order {
        assign(ws, rsc, None);
    }
}

/// Assigns one resource (recursively for collectives), honoring the
/// `allocating` cycle guard: re-entering a resource mid-assignment logs the
/// loop and returns the current decision unchanged.
pub fn assign(ws: &mut WorkingSet, rsc: ResourceId, prefer: Option<NodeId>) -> Option<NodeId> {
    if ws.resource(rsc).allocating {
        tracing::warn!(
            resource = %ws.resource(rsc).name,
            event = "allocation-loop",
            "colocation cycle detected; keeping current assignment"
        );
        return ops_for(&ws.resource(rsc).variant).location(ws, rsc);
    }
    ws.resource_mut(rsc).allocating = true;
    let chosen = ops_for(&ws.resource(rsc).variant).assign(ws, rsc, prefer);
    ws.resource_mut(rsc).allocating = false;
    chosen
}

/// Assigns a primitive. Returns the chosen node, or `None` for an explicit
/// stopped decision.
pub(crate) fn assign_primitive(
    ws: &mut WorkingSet,
    rsc: ResourceId,
    prefer: Option<NodeId>,
) -> Option<NodeId> {
    if !ws.resource(rsc).provisional {
        return primitive_next_node(ws, rsc);
    }

    // Unmanaged and blocked resources are pinned wherever they are.
    if !ws.resource(rsc).managed || ws.resource(rsc).blocked {
        return pin_in_place(ws, rsc);
    }

    if target_role_stops(ws, rsc) {
        return record_stopped(ws, rsc);
    }

    prune_unusable(ws, rsc);
    apply_stickiness(ws, rsc);
    apply_colocations(ws, rsc);

    match choose_node(ws, rsc, prefer) {
        Some(node) => Some(record_assignment(ws, rsc, node)),
        None => {
            tracing::warn!(
                resource = %ws.resource(rsc).name,
                event = "no-allowed-node",
                "no node satisfies placement constraints; stopping"
            );
            record_stopped(ws, rsc)
        }
    }
}

/// Assigns a group: members in configuration order, each pinned to the
/// node chosen for the previous member. A member that cannot follow stops,
/// and so does the rest of the chain.
pub(crate) fn assign_group(
    ws: &mut WorkingSet,
    rsc: ResourceId,
    prefer: Option<NodeId>,
) -> Option<NodeId> {
    let children = ws.resource(rsc).children().to_vec();
    let mut anchor = prefer;
    let mut first_choice = None;
    for (idx, child) in children.iter().enumerate() {
        if idx > 0 {
            match anchor {
                Some(node) => {
                    if let Some(prim) = ws.resource_mut(*child).as_primitive_mut() {
                        let entry = prim.allowed.entry(node).or_insert(Score::ZERO);
                        *entry = entry.plus(Score::INFINITY);
                        // Members may only follow the anchor node.
                        let banned: Vec<NodeId> = prim
                            .allowed
                            .keys()
                            .copied()
                            .filter(|n| *n != node)
                            .collect();
                        for n in banned {
                            prim.allowed.insert(n, Score::NEG_INFINITY);
                        }
                    }
                }
                None => {
                    record_stopped(ws, *child);
                    continue;
                }
            }
        }
        let chosen = assign(ws, *child, anchor);
        if idx == 0 {
            first_choice = chosen;
        }
        anchor = chosen;
    }
    ws.resource_mut(rsc).provisional = false;
    first_choice
}

/// Assigns a clone (or bundle replica set) in two passes.
///
/// The preferred pass keeps healthy running instances on their current
/// node while the per-node optimum `ceil(max_total / available_nodes)` is
/// not exceeded; the free pass places the remaining instances and stops
/// the surplus beyond `max_total`.
pub(crate) fn assign_clone(
    ws: &mut WorkingSet,
    rsc: ResourceId,
    max_total: u32,
    max_per_node: u32,
) -> Option<NodeId> {
    let instances = ws.resource(rsc).children().to_vec();
    let available = u32::try_from(ws.nodes.iter().filter(|n| n.is_available()).count())
        .unwrap_or(0);
    if available == 0 {
        for inst in &instances {
            record_stopped(ws, *inst);
        }
        ws.resource_mut(rsc).provisional = false;
        return None;
    }
    let optimum = max_total.div_ceil(available).min(max_per_node);
    let mut assigned: u32 = 0;

    // Preferred pass: healthy instances keep their node when allowed.
    for inst in &instances {
        if assigned >= max_total {
            break;
        }
        let Some(current) = preferred_current_node(ws, *inst) else {
            continue;
        };
        if sibling_instances_on(ws, rsc, current) >= optimum {
            continue;
        }
        record_assignment(ws, *inst, current);
        assigned += 1;
    }

    // Free pass: place what is still provisional, stop the surplus.
    let mut first_choice = None;
    for inst in &instances {
        if !ws.resource(*inst).provisional {
            if first_choice.is_none() {
                first_choice = primitive_next_node(ws, *inst);
            }
            continue;
        }
        if assigned >= max_total {
            record_stopped(ws, *inst);
            continue;
        }
        let chosen = assign(ws, *inst, None);
        if chosen.is_some() {
            assigned += 1;
            if first_choice.is_none() {
                first_choice = chosen;
            }
        }
    }
    ws.resource_mut(rsc).provisional = false;
    first_choice
}

/// Ranks a promotable clone's placed instances and promotes the top
/// `promoted_max`: composite score is the per-node promotion attribute
/// plus an incumbent bonus for instances already promoted.
pub(crate) fn rank_promotable(ws: &mut WorkingSet, rsc: ResourceId, promoted_max: u32) {
    let instances = ws.resource(rsc).children().to_vec();
    let mut ranked: Vec<(Score, ResourceId)> = Vec::new();
    for inst in &instances {
        let Some(prim) = ws.resource(*inst).as_primitive() else {
            continue;
        };
        let Some(node) = prim.next_node else {
            continue;
        };
        let base = prim.promotion.get(&node).copied().unwrap_or(Score::ZERO);
        let incumbent = if prim.role == RscRole::Promoted {
            Score::new(1)
        } else {
            Score::ZERO
        };
        ranked.push((base.plus(incumbent), *inst));
    }
    ranked.sort_by(|a, b| b.0.cmp(&a.0).then_with(|| a.1.cmp(&b.1)));
    for (idx, (_, inst)) in ranked.iter().enumerate() {
        let role = if idx < promoted_max as usize {
            RscRole::Promoted
        } else {
            RscRole::Unpromoted
        };
        if let Some(prim) = ws.resource_mut(*inst).as_primitive_mut() {
            prim.next_role = role;
        }
    }
}

// ---------------------------------------------------------------------------
// Preparation
// ---------------------------------------------------------------------------

/// Manufactures instance children for every clone and bundle.
fn expand_collectives(ws: &mut WorkingSet) {
    let collectives: Vec<ResourceId> = ws
        .resources
        .iter()
        .filter(|r| {
            matches!(
                r.variant,
                ResourceVariant::Clone(_) | ResourceVariant::Bundle(_)
            )
        })
        .map(|r| r.id)
        .collect();
    for id in collectives {
        let (template, count, existing) = match &ws.resource(id).variant {
            ResourceVariant::Clone(spec) => {
                (spec.template, spec.max_total, spec.instances.len())
            }
            ResourceVariant::Bundle(spec) => (spec.template, spec.replicas, spec.instances.len()),
            _ => continue,
        };
        if existing > 0 {
            continue;
        }
        let mut instances = Vec::new();
        for k in 0..count {
            instances.push(manufacture_instance(ws, id, template, k));
        }
        match &mut ws.resource_mut(id).variant {
            ResourceVariant::Clone(spec) => spec.instances = instances,
            ResourceVariant::Bundle(spec) => spec.instances = instances,
            _ => {}
        }
    }
}

fn manufacture_instance(
    ws: &mut WorkingSet,
    parent: ResourceId,
    template: ResourceId,
    k: u32,
) -> ResourceId {
    let parent_rsc = ws.resource(parent).clone();
    let name = format!("{}:{}", parent_rsc.name, k);
    let managed = parent_rsc.managed;
    let template_rsc = ws.resource(template).clone();
    let observed = ws.observed(&name).cloned().unwrap_or_default();
    let mut prim = template_rsc
        .as_primitive()
        .cloned()
        .unwrap_or_else(|| Primitive {
            class: "ocf".to_string(),
            provider: None,
            agent: String::new(),
            allowed: BTreeMap::new(),
            running_on: Vec::new(),
            role: RscRole::Unknown,
            next_role: RscRole::Unknown,
            next_node: None,
            stickiness: Score::ZERO,
            promotion: BTreeMap::new(),
            ops: Vec::new(),
        });
    prim.running_on = observed.running_on.clone();
    prim.role = observed.role.unwrap_or(RscRole::Stopped);
    prim.next_node = None;
    // Instances inherit the clone's meta (target-role and friends) and the
    // constraint adjacency of both the clone and the template.
    let mut meta = parent_rsc.meta.clone();
    meta.extend(template_rsc.meta.clone());
    let mut this_with = parent_rsc.this_with.clone();
    this_with.extend_from_slice(&template_rsc.this_with);
    let mut with_this = parent_rsc.with_this.clone();
    with_this.extend_from_slice(&template_rsc.with_this);
    ws.push_resource(Resource {
        id: ResourceId(0),
        name,
        parent: Some(parent),
        meta,
        orphan: false,
        managed,
        provisional: true,
        allocating: false,
        failed: observed.failed,
        blocked: false,
        priority: template_rsc.priority,
        variant: ResourceVariant::Primitive(prim),
        this_with,
        with_this,
    })
}

/// Seeds every primitive's allowed map from node weights and location
/// preferences (own and inherited from collective ancestors).
fn seed_allowed_maps(ws: &mut WorkingSet) {
    let node_seed: Vec<(NodeId, Score)> = ws.nodes.iter().map(|n| (n.id, n.weight)).collect();
    let primitives: Vec<ResourceId> = ws
        .resources
        .iter()
        .filter(|r| r.as_primitive().is_some())
        .map(|r| r.id)
        .collect();
    for id in primitives {
        let lineage = ancestor_chain(ws, id);
        let prefs: Vec<(NodeId, Score)> = ws
            .locations
            .iter()
            .filter(|l| lineage.contains(&l.rsc))
            .map(|l| (l.node, l.score))
            .collect();
        if let Some(prim) = ws.resource_mut(id).as_primitive_mut() {
            if prim.allowed.is_empty() {
                for (node, weight) in &node_seed {
                    prim.allowed.insert(*node, *weight);
                }
            }
            for (node, score) in prefs {
                let entry = prim.allowed.entry(node).or_insert(Score::ZERO);
                *entry = entry.plus(score);
            }
        }
    }
}

fn ancestor_chain(ws: &WorkingSet, mut id: ResourceId) -> Vec<ResourceId> {
    let mut chain = vec![id];
    // Instance names inherit the location rows of the clone they expand.
    while let Some(parent) = ws.resource(id).parent {
        chain.push(parent);
        id = parent;
    }
    chain
}

/// Stops every resource constrained to a revoked ticket.
fn apply_ticket_revocations(ws: &mut WorkingSet) {
    let stopped: Vec<ResourceId> = ws
        .tickets
        .iter()
        .filter(|t| t.state == crate::constraint::TicketState::Revoked)
        .flat_map(|t| t.resources.iter().copied())
        .collect();
    for rsc in stopped {
        tracing::warn!(
            resource = %ws.resource(rsc).name,
            event = "ticket-revoked",
            "resource constrained to a revoked ticket; stopping"
        );
        ban_everywhere(ws, rsc);
    }
}

fn ban_everywhere(ws: &mut WorkingSet, rsc: ResourceId) {
    let children = ws.resource(rsc).children().to_vec();
    for child in children {
        ban_everywhere(ws, child);
    }
    if let Some(prim) = ws.resource_mut(rsc).as_primitive_mut() {
        for score in prim.allowed.values_mut() {
            *score = Score::NEG_INFINITY;
        }
        prim.next_role = RscRole::Stopped;
    }
}

// ---------------------------------------------------------------------------
// Primitive assignment internals
// ---------------------------------------------------------------------------

fn primitive_next_node(ws: &WorkingSet, rsc: ResourceId) -> Option<NodeId> {
    ws.resource(rsc).as_primitive().and_then(|p| p.next_node)
}

fn pin_in_place(ws: &mut WorkingSet, rsc: ResourceId) -> Option<NodeId> {
    let (current, role) = ws
        .resource(rsc)
        .as_primitive()
        .map(|p| (p.running_on.first().copied(), p.role))
        .unwrap_or((None, RscRole::Unknown));
    let r = ws.resource_mut(rsc);
    r.provisional = false;
    if let Some(prim) = r.as_primitive_mut() {
        prim.next_node = current;
        prim.next_role = role;
    }
    current
}

fn target_role_stops(ws: &WorkingSet, rsc: ResourceId) -> bool {
    ws.resource(rsc)
        .as_primitive()
        .map(|p| p.next_role == RscRole::Stopped)
        .unwrap_or(false)
        || ws.resource(rsc).meta.get("target-role").map(String::as_str) == Some("Stopped")
}

fn record_stopped(ws: &mut WorkingSet, rsc: ResourceId) -> Option<NodeId> {
    let r = ws.resource_mut(rsc);
    r.provisional = false;
    if let Some(prim) = r.as_primitive_mut() {
        prim.next_node = None;
        prim.next_role = RscRole::Stopped;
    }
    None
}

/// Records a placement. Managed instances increment the node's `count`
/// unconditionally; orphans never do (they only ever take the stopped
/// path, so counting them would only distort managed placement).
fn record_assignment(ws: &mut WorkingSet, rsc: ResourceId, node: NodeId) -> NodeId {
    let (managed, orphan) = {
        let r = ws.resource(rsc);
        (r.managed, r.orphan)
    };
    {
        let r = ws.resource_mut(rsc);
        r.provisional = false;
        if let Some(prim) = r.as_primitive_mut() {
            prim.next_node = Some(node);
            if prim.next_role <= RscRole::Stopped {
                prim.next_role = RscRole::Started;
            }
        }
    }
    if managed && !orphan {
        ws.node_mut(node).count += 1;
    }
    node
}

/// Drops offline and capped nodes to `-INFINITY`. The per-node cap only
/// counts sibling instances of the same clone, never other residents.
fn prune_unusable(ws: &mut WorkingSet, rsc: ResourceId) {
    let cap = clone_per_node_cap(ws, rsc);
    let unusable: Vec<NodeId> = ws
        .resource(rsc)
        .as_primitive()
        .map(|p| {
            p.allowed
                .keys()
                .copied()
                .filter(|n| {
                    let node = ws.node(*n);
                    !node.is_available()
                        || cap.is_some_and(|(parent, c)| {
                            sibling_instances_on(ws, parent, *n) >= c
                        })
                })
                .collect()
        })
        .unwrap_or_default();
    if let Some(prim) = ws.resource_mut(rsc).as_primitive_mut() {
        for node in unusable {
            prim.allowed.insert(node, Score::NEG_INFINITY);
        }
    }
}

fn clone_per_node_cap(ws: &WorkingSet, rsc: ResourceId) -> Option<(ResourceId, u32)> {
    let parent = ws.resource(rsc).parent?;
    match &ws.resource(parent).variant {
        ResourceVariant::Clone(spec) => Some((parent, spec.max_per_node)),
        ResourceVariant::Bundle(_) => Some((parent, 1)),
        _ => None,
    }
}

/// Instances of `parent` already placed on `node` this run.
fn sibling_instances_on(ws: &WorkingSet, parent: ResourceId, node: NodeId) -> u32 {
    let count = ws
        .resources
        .iter()
        .filter(|r| {
            r.parent == Some(parent)
                && r.as_primitive().and_then(|p| p.next_node) == Some(node)
        })
        .count();
    u32::try_from(count).unwrap_or(u32::MAX)
}

/// The current node of a healthy running resource gains `+stickiness`.
fn apply_stickiness(ws: &mut WorkingSet, rsc: ResourceId) {
    if ws.resource(rsc).failed {
        return;
    }
    if let Some(prim) = ws.resource_mut(rsc).as_primitive_mut() {
        if let Some(&current) = prim.running_on.first() {
            let stickiness = prim.stickiness;
            let entry = prim.allowed.entry(current).or_insert(Score::ZERO);
            *entry = entry.plus(stickiness);
        }
    }
}

/// Folds colocation contributions into the allowed map.
fn apply_colocations(ws: &mut WorkingSet, rsc: ResourceId) {
    // "this with": follow primaries that are (or become) assigned.
    let this_with = ws.resource(rsc).this_with.clone();
    for cid in this_with {
        let (primary, score, primary_role) = {
            let c = &ws.colocations[cid.index()];
            (c.primary, c.score, c.primary_role)
        };
        if primary == rsc {
            continue;
        }
        if ws.resource(primary).provisional {
            assign(ws, primary, None);
        }
        let primary_node = primitive_like_location(ws, primary);
        let primary_next_role = ws
            .resource(primary)
            .as_primitive()
            .map(|p| p.next_role)
            .unwrap_or(RscRole::Unknown);
        match primary_node {
            Some(node) => {
                if primary_role != RscRole::Unknown && primary_role != primary_next_role {
                    continue;
                }
                if let Some(prim) = ws.resource_mut(rsc).as_primitive_mut() {
                    if score.is_pos_infinity() {
                        // Mandatory: anywhere but the primary's node is out.
                        let elsewhere: Vec<NodeId> = prim
                            .allowed
                            .keys()
                            .copied()
                            .filter(|n| *n != node)
                            .collect();
                        for n in elsewhere {
                            prim.allowed.insert(n, Score::NEG_INFINITY);
                        }
                    }
                    let entry = prim.allowed.entry(node).or_insert(Score::ZERO);
                    *entry = entry.plus(score);
                }
            }
            None => {
                // A mandatory colocation with a stopped primary bans the
                // dependent everywhere.
                if score.is_pos_infinity() {
                    if let Some(prim) = ws.resource_mut(rsc).as_primitive_mut() {
                        for s in prim.allowed.values_mut() {
                            *s = Score::NEG_INFINITY;
                        }
                    }
                }
            }
        }
    }

    // "with this": dependents pull the primary toward them, but only for
    // positive scores with influence, and never when this resource has
    // failed and is moving anyway.
    if ws.resource(rsc).failed {
        return;
    }
    let with_this = ws.resource(rsc).with_this.clone();
    for cid in with_this {
        let (dependent, score, influence) = {
            let c = &ws.colocations[cid.index()];
            (c.dependent, c.score, c.influence)
        };
        if dependent == rsc || !influence || score <= Score::ZERO {
            continue;
        }
        let Some(dep_current) = ws
            .resource(dependent)
            .as_primitive()
            .and_then(|p| p.running_on.first().copied())
        else {
            continue;
        };
        if let Some(prim) = ws.resource_mut(rsc).as_primitive_mut() {
            let entry = prim.allowed.entry(dep_current).or_insert(Score::ZERO);
            *entry = entry.plus(score);
        }
    }
}

fn primitive_like_location(ws: &WorkingSet, rsc: ResourceId) -> Option<NodeId> {
    match &ws.resource(rsc).variant {
        ResourceVariant::Primitive(p) => p.next_node,
        _ => {
            let first = ws.resource(rsc).children().first().copied()?;
            primitive_like_location(ws, first)
        }
    }
}

/// Highest score wins; ties prefer the explicit `prefer` node, then the
/// current node, then the lexicographically smallest uuid.
fn choose_node(ws: &WorkingSet, rsc: ResourceId, prefer: Option<NodeId>) -> Option<NodeId> {
    let prim = ws.resource(rsc).as_primitive()?;
    let current = prim.running_on.first().copied();
    let mut best: Option<(Score, NodeId)> = None;
    for (&node, &score) in &prim.allowed {
        if score.is_neg_infinity() {
            continue;
        }
        let better = match best {
            None => true,
            Some((best_score, best_node)) => {
                if score != best_score {
                    score > best_score
                } else {
                    tie_rank(ws, node, prefer, current)
                        < tie_rank(ws, best_node, prefer, current)
                }
            }
        };
        if better {
            best = Some((score, node));
        }
    }
    best.map(|(_, node)| node)
}

/// Lower ranks win ties: the preferred node first, the current node next,
/// then uuid order.
fn tie_rank(
    ws: &WorkingSet,
    node: NodeId,
    prefer: Option<NodeId>,
    current: Option<NodeId>,
) -> (u8, String) {
    let class = if Some(node) == prefer {
        0
    } else if Some(node) == current {
        1
    } else {
        2
    };
    (class, ws.node(node).uuid.clone())
}

fn preferred_current_node(ws: &WorkingSet, inst: ResourceId) -> Option<NodeId> {
    let rsc = ws.resource(inst);
    if !rsc.provisional || rsc.failed {
        return None;
    }
    if target_role_stops(ws, inst) {
        return None;
    }
    let prim = rsc.as_primitive()?;
    let current = *prim.running_on.first()?;
    if prim.running_on.len() != 1 {
        return None;
    }
    let score = prim.allowed.get(&current).copied().unwrap_or(Score::ZERO);
    if score.is_neg_infinity() || !ws.node(current).is_available() {
        return None;
    }
    Some(current)
}
