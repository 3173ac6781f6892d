// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Per-variant resource behavior behind one capability trait.
//!
//! Dispatch tables on the resource variants are expressed as a trait with
//! static unit implementations; [`ops_for`] picks the implementation for a
//! variant. The trait surface is exactly the seam the engine needs:
//! assignment, action synthesis, flag queries, location, role state, and
//! structural ordering.

use crate::actions;
use crate::allocator;
use crate::ident::{ActionId, NodeId, ResourceId};
use crate::resource::{ResourceVariant, RscRole};
use crate::working_set::WorkingSet;

/// Effective flags of an action as seen through a resource variant.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct ActionFlags {
    /// The action can execute this transition.
    pub runnable: bool,
    /// The action is not required this transition.
    pub optional: bool,
}

/// Variant-specific behavior of a resource.
pub trait ResourceOps {
    /// Chooses a node (or an explicit stop) for the resource.
    fn assign(&self, ws: &mut WorkingSet, rsc: ResourceId, prefer: Option<NodeId>)
        -> Option<NodeId>;

    /// Synthesizes the actions this resource needs for the transition.
    fn create_actions(&self, ws: &mut WorkingSet, rsc: ResourceId);

    /// Flags of `action` in the context of this resource on `node`.
    fn action_flags(&self, ws: &WorkingSet, action: ActionId, node: Option<NodeId>)
        -> ActionFlags;

    /// The node the resource runs on: currently when `current`, else the
    /// allocator's choice.
    fn location(&self, ws: &WorkingSet, rsc: ResourceId) -> Option<NodeId>;

    /// The role of the resource: observed when `current`, else planned.
    fn state(&self, ws: &WorkingSet, rsc: ResourceId, current: bool) -> RscRole;

    /// Installs the implicit structural ordering edges for this resource.
    fn update_ordered_actions(&self, ws: &mut WorkingSet, rsc: ResourceId);
}

/// Selects the behavior for a variant.
#[must_use]
pub fn ops_for(variant: &ResourceVariant) -> &'static dyn ResourceOps {
    match variant {
        ResourceVariant::Primitive(_) => &PrimitiveOps,
        ResourceVariant::Group { .. } => &GroupOps,
        ResourceVariant::Clone(_) => &CloneOps,
        ResourceVariant::Bundle(_) => &BundleOps,
    }
}

struct PrimitiveOps;
struct GroupOps;
struct CloneOps;
struct BundleOps;

impl ResourceOps for PrimitiveOps {
    fn assign(
        &self,
        ws: &mut WorkingSet,
        rsc: ResourceId,
        prefer: Option<NodeId>,
    ) -> Option<NodeId> {
        allocator::assign_primitive(ws, rsc, prefer)
    }

    fn create_actions(&self, ws: &mut WorkingSet, rsc: ResourceId) {
        actions::create_primitive_actions(ws, rsc);
    }

    fn action_flags(
        &self,
        ws: &WorkingSet,
        action: ActionId,
        _node: Option<NodeId>,
    ) -> ActionFlags {
        let a = ws.action(action);
        ActionFlags {
            runnable: a.runnable,
            optional: a.optional,
        }
    }

    fn location(&self, ws: &WorkingSet, rsc: ResourceId) -> Option<NodeId> {
        ws.resource(rsc).as_primitive().and_then(|p| p.next_node)
    }

    fn state(&self, ws: &WorkingSet, rsc: ResourceId, current: bool) -> RscRole {
        let Some(prim) = ws.resource(rsc).as_primitive() else {
            return RscRole::Unknown;
        };
        if current {
            if prim.running_on.is_empty() {
                RscRole::Stopped
            } else {
                prim.role
            }
        } else {
            prim.next_role
        }
    }

    fn update_ordered_actions(&self, ws: &mut WorkingSet, rsc: ResourceId) {
        actions::order_primitive(ws, rsc);
    }
}

/// Shared collective behavior: groups, clones, and bundles differ in
/// assignment and sequencing but fold flags and report state identically.
fn collective_flags(ws: &WorkingSet, action: ActionId) -> ActionFlags {
    let a = ws.action(action);
    ActionFlags {
        runnable: a.runnable,
        optional: a.optional,
    }
}

fn collective_location(ws: &WorkingSet, rsc: ResourceId) -> Option<NodeId> {
    ws.resource(rsc)
        .children()
        .iter()
        .find_map(|c| ops_for(&ws.resource(*c).variant).location(ws, *c))
}

fn collective_state(ws: &WorkingSet, rsc: ResourceId, current: bool) -> RscRole {
    ws.resource(rsc)
        .children()
        .iter()
        .map(|c| ops_for(&ws.resource(*c).variant).state(ws, *c, current))
        .max()
        .unwrap_or(RscRole::Stopped)
}

impl ResourceOps for GroupOps {
    fn assign(
        &self,
        ws: &mut WorkingSet,
        rsc: ResourceId,
        prefer: Option<NodeId>,
    ) -> Option<NodeId> {
        allocator::assign_group(ws, rsc, prefer)
    }

    fn create_actions(&self, ws: &mut WorkingSet, rsc: ResourceId) {
        actions::create_collective_actions(ws, rsc);
    }

    fn action_flags(
        &self,
        ws: &WorkingSet,
        action: ActionId,
        _node: Option<NodeId>,
    ) -> ActionFlags {
        collective_flags(ws, action)
    }

    fn location(&self, ws: &WorkingSet, rsc: ResourceId) -> Option<NodeId> {
        collective_location(ws, rsc)
    }

    fn state(&self, ws: &WorkingSet, rsc: ResourceId, current: bool) -> RscRole {
        collective_state(ws, rsc, current)
    }

    fn update_ordered_actions(&self, ws: &mut WorkingSet, rsc: ResourceId) {
        actions::order_group(ws, rsc);
    }
}

impl ResourceOps for CloneOps {
    fn assign(
        &self,
        ws: &mut WorkingSet,
        rsc: ResourceId,
        _prefer: Option<NodeId>,
    ) -> Option<NodeId> {
        let (max_total, max_per_node, promotable) = match &ws.resource(rsc).variant {
            ResourceVariant::Clone(spec) => {
                (spec.max_total, spec.max_per_node, spec.promotable)
            }
            _ => return None,
        };
        let chosen = allocator::assign_clone(ws, rsc, max_total, max_per_node);
        if let Some(p) = promotable {
            allocator::rank_promotable(ws, rsc, p.promoted_max);
        }
        chosen
    }

    fn create_actions(&self, ws: &mut WorkingSet, rsc: ResourceId) {
        actions::create_collective_actions(ws, rsc);
    }

    fn action_flags(
        &self,
        ws: &WorkingSet,
        action: ActionId,
        _node: Option<NodeId>,
    ) -> ActionFlags {
        collective_flags(ws, action)
    }

    fn location(&self, ws: &WorkingSet, rsc: ResourceId) -> Option<NodeId> {
        collective_location(ws, rsc)
    }

    fn state(&self, ws: &WorkingSet, rsc: ResourceId, current: bool) -> RscRole {
        collective_state(ws, rsc, current)
    }

    fn update_ordered_actions(&self, ws: &mut WorkingSet, rsc: ResourceId) {
        actions::order_clone(ws, rsc);
    }
}

impl ResourceOps for BundleOps {
    fn assign(
        &self,
        ws: &mut WorkingSet,
        rsc: ResourceId,
        _prefer: Option<NodeId>,
    ) -> Option<NodeId> {
        let replicas = match &ws.resource(rsc).variant {
            ResourceVariant::Bundle(spec) => spec.replicas,
            _ => return None,
        };
        allocator::assign_clone(ws, rsc, replicas, 1)
    }

    fn create_actions(&self, ws: &mut WorkingSet, rsc: ResourceId) {
        actions::create_collective_actions(ws, rsc);
    }

    fn action_flags(
        &self,
        ws: &WorkingSet,
        action: ActionId,
        _node: Option<NodeId>,
    ) -> ActionFlags {
        collective_flags(ws, action)
    }

    fn location(&self, ws: &WorkingSet, rsc: ResourceId) -> Option<NodeId> {
        collective_location(ws, rsc)
    }

    fn state(&self, ws: &WorkingSet, rsc: ResourceId, current: bool) -> RscRole {
        collective_state(ws, rsc, current)
    }

    fn update_ordered_actions(&self, ws: &mut WorkingSet, rsc: ResourceId) {
        actions::order_clone(ws, rsc);
    }
}
