// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Resource model: primitives, groups, clones, and bundles.
//!
//! Variant-specific state lives inside [`ResourceVariant`] payloads so a
//! primitive cannot carry clone fields and vice versa. Shared lifecycle
//! flags (orphan, managed, provisional, allocating, failed, blocked) live on
//! [`Resource`] itself.

use std::collections::BTreeMap;

use crate::ident::{ConstraintId, NodeId, ResourceId};
use crate::score::Score;

/// Role of a resource instance.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Debug)]
pub enum RscRole {
    /// Observed state could not be determined.
    Unknown,
    /// Not running anywhere.
    Stopped,
    /// Running in the plain started role.
    Started,
    /// Running as the unpromoted instance of a promotable clone.
    Unpromoted,
    /// Running as the promoted instance of a promotable clone.
    Promoted,
}

impl RscRole {
    /// Canonical lowercase name used in CIB attributes and graph XML.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            RscRole::Unknown => "Unknown",
            RscRole::Stopped => "Stopped",
            RscRole::Started => "Started",
            RscRole::Unpromoted => "Unpromoted",
            RscRole::Promoted => "Promoted",
        }
    }

    /// Parses a role attribute; unknown text maps to [`RscRole::Unknown`].
    #[must_use]
    pub fn parse(text: &str) -> RscRole {
        match text {
            "Stopped" => RscRole::Stopped,
            "Started" => RscRole::Started,
            "Unpromoted" | "Slave" => RscRole::Unpromoted,
            "Promoted" | "Master" => RscRole::Promoted,
            _ => RscRole::Unknown,
        }
    }
}

/// A recurring operation configured on a primitive (typically `monitor`).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RecurringOp {
    /// Operation name.
    pub name: String,
    /// Interval in milliseconds; zero means non-recurring.
    pub interval_ms: u32,
    /// Per-invocation timeout in milliseconds.
    pub timeout_ms: u32,
}

/// Variant payload of a primitive resource.
#[derive(Clone, Debug)]
pub struct Primitive {
    /// Agent standard (`ocf`, `systemd`, ...).
    pub class: String,
    /// Agent provider, when the standard has one.
    pub provider: Option<String>,
    /// Agent type name.
    pub agent: String,
    /// Allowed-node score map. `-INFINITY` bans, `+INFINITY` requires.
    ///
    /// A `BTreeMap` keyed by arena index keeps iteration order, and with
    /// it every tie-break, deterministic.
    pub allowed: BTreeMap<NodeId, Score>,
    /// Nodes the resource was observed running on.
    pub running_on: Vec<NodeId>,
    /// Observed role.
    pub role: RscRole,
    /// Role decided for the next transition.
    pub next_role: RscRole,
    /// Node chosen by the allocator, when one was.
    pub next_node: Option<NodeId>,
    /// Additive preference for the current location.
    pub stickiness: Score,
    /// Per-node promotion scores for promotable clone instances.
    pub promotion: BTreeMap<NodeId, Score>,
    /// Configured recurring operations.
    pub ops: Vec<RecurringOp>,
}

/// Promotion settings of a promotable clone.
#[derive(Clone, Copy, Debug)]
pub struct PromotableSpec {
    /// How many instances carry the promoted role.
    pub promoted_max: u32,
}

/// Variant payload of a clone resource.
#[derive(Clone, Debug)]
pub struct CloneSpec {
    /// The template primitive the instances are manufactured from.
    pub template: ResourceId,
    /// Instance children, in instance-number order. Empty until the
    /// allocator expands the clone.
    pub instances: Vec<ResourceId>,
    /// Total instances across the cluster (`clone-max`).
    pub max_total: u32,
    /// Instances allowed per node (`clone-node-max`).
    pub max_per_node: u32,
    /// Promotion settings when the clone is promotable.
    pub promotable: Option<PromotableSpec>,
    /// Whether ordering edges against other clones pair per-instance.
    pub interleave: bool,
    /// Whether instances receive pre/post notification calls.
    pub notify: bool,
}

/// Variant payload of a bundle resource.
///
/// A bundle allocates its replica set like an anonymous clone with a
/// per-node cap of one; the container runtime details are opaque here.
#[derive(Clone, Debug)]
pub struct BundleSpec {
    /// The primitive replicated inside the bundle.
    pub template: ResourceId,
    /// Replica children; empty until expanded.
    pub instances: Vec<ResourceId>,
    /// Replica count.
    pub replicas: u32,
    /// Container image reference (informational).
    pub image: String,
}

/// The variant a resource is in. Exactly one; collective variants carry
/// children, primitives never do.
#[derive(Clone, Debug)]
pub enum ResourceVariant {
    /// A single agent-backed resource.
    Primitive(Primitive),
    /// An ordered, colocated sequence of members.
    Group {
        /// Member resources in configuration order.
        children: Vec<ResourceId>,
    },
    /// N instances of a template primitive.
    Clone(CloneSpec),
    /// Container replica set.
    Bundle(BundleSpec),
}

/// A configured (or orphaned) resource in the working set.
#[derive(Clone, Debug)]
pub struct Resource {
    /// Arena index of this resource.
    pub id: ResourceId,
    /// Configuration id.
    pub name: String,
    /// Enclosing collective, if any.
    pub parent: Option<ResourceId>,
    /// Meta attributes (`target-role`, `is-managed`, ...).
    pub meta: BTreeMap<String, String>,
    /// Present in status but no longer in configuration.
    pub orphan: bool,
    /// Whether the cluster may start/stop/move this resource.
    pub managed: bool,
    /// No node chosen yet this run. Flipped off exactly once per run.
    pub provisional: bool,
    /// Held only while a recursive assignment of this resource is on the
    /// stack; doubles as the colocation cycle guard.
    pub allocating: bool,
    /// The resource has a recorded failure that influences placement.
    pub failed: bool,
    /// A failed required stop blocks further actions.
    pub blocked: bool,
    /// Allocation priority; higher allocates earlier.
    pub priority: Score,
    /// Variant payload.
    pub variant: ResourceVariant,
    /// Colocations in which this resource is the dependent ("this with").
    pub this_with: Vec<ConstraintId>,
    /// Colocations in which this resource is the primary ("with this").
    pub with_this: Vec<ConstraintId>,
}

impl Resource {
    /// The primitive payload, when this resource is one.
    #[must_use]
    pub fn as_primitive(&self) -> Option<&Primitive> {
        match &self.variant {
            ResourceVariant::Primitive(p) => Some(p),
            _ => None,
        }
    }

    /// Mutable primitive payload, when this resource is one.
    pub fn as_primitive_mut(&mut self) -> Option<&mut Primitive> {
        match &mut self.variant {
            ResourceVariant::Primitive(p) => Some(p),
            _ => None,
        }
    }

    /// Child list of a collective variant, empty for primitives.
    #[must_use]
    pub fn children(&self) -> &[ResourceId] {
        match &self.variant {
            ResourceVariant::Primitive(_) => &[],
            ResourceVariant::Group { children } => children,
            ResourceVariant::Clone(spec) => &spec.instances,
            ResourceVariant::Bundle(spec) => &spec.instances,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn role_parse_accepts_legacy_names() {
        assert_eq!(RscRole::parse("Master"), RscRole::Promoted);
        assert_eq!(RscRole::parse("Slave"), RscRole::Unpromoted);
        assert_eq!(RscRole::parse("Started"), RscRole::Started);
        assert_eq!(RscRole::parse("???"), RscRole::Unknown);
    }
}
