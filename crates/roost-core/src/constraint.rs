// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Placement and ordering constraints.

use std::ops::BitOr;

use crate::ident::{ConstraintId, ResourceId};
use crate::resource::RscRole;
use crate::score::Score;

/// A colocation edge: place `dependent` relative to `primary`.
///
/// Stored in adjacency lists on both endpoints (`this_with` on the
/// dependent, `with_this` on the primary) for fast traversal. A score of
/// `+INFINITY` is mandatory, `-INFINITY` a mandatory anti-constraint.
#[derive(Clone, Debug)]
pub struct Colocation {
    /// Arena index of this row.
    pub id: ConstraintId,
    /// Configuration id.
    pub name: String,
    /// The resource whose placement follows.
    pub dependent: ResourceId,
    /// The resource whose placement leads.
    pub primary: ResourceId,
    /// Additive score applied to the primary's chosen node.
    pub score: Score,
    /// Role filter on the dependent side (`Unknown` matches any).
    pub dependent_role: RscRole,
    /// Role filter on the primary side (`Unknown` matches any).
    pub primary_role: RscRole,
    /// Whether the dependent's preferences flow back to the primary.
    ///
    /// Positive with-this contributions are only applied when this is set
    /// and the primary is not failed and about to move, which avoids
    /// shuffling a healthy primary to chase its dependents.
    pub influence: bool,
}

/// Ticket grant state.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum TicketState {
    /// The ticket is granted to this cluster.
    Granted,
    /// The ticket is revoked; constrained resources must stop.
    Revoked,
}

/// A cluster-wide ticket and the resources constrained to it.
#[derive(Clone, Debug)]
pub struct Ticket {
    /// Ticket name.
    pub name: String,
    /// Grant state.
    pub state: TicketState,
    /// Resources that may only run while the ticket is granted.
    pub resources: Vec<ResourceId>,
}

/// Bit-set of ordering edge semantics.
///
/// A plain wrapped word rather than an external bitflags dependency; the
/// set is tiny and the operations are three.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Default)]
pub struct OrderKind(u16);

impl OrderKind {
    /// Pure ordering: no runnability or mandatory propagation.
    pub const OPTIONAL: OrderKind = OrderKind(0x01);
    /// A mandatory `first` makes `then` mandatory; an unrunnable `then`
    /// makes `first` unrunnable.
    pub const IMPLIES_THEN: OrderKind = OrderKind(0x02);
    /// An unrunnable `first` makes `then` unrunnable.
    pub const RUNNABLE_LEFT: OrderKind = OrderKind(0x04);
    /// Never run both sides concurrently; no flag propagation.
    pub const SERIALIZE: OrderKind = OrderKind(0x08);
    /// An unrunnable `then` cancels `first`.
    pub const THEN_CANCELS_FIRST: OrderKind = OrderKind(0x10);
    /// The edge only applies in the forward direction.
    pub const ASYMMETRIC: OrderKind = OrderKind(0x20);
    /// The usual mandatory edge: `IMPLIES_THEN | RUNNABLE_LEFT`.
    pub const MANDATORY: OrderKind = OrderKind(0x02 | 0x04);

    /// True when every bit of `other` is set in `self`.
    #[must_use]
    pub fn contains(self, other: OrderKind) -> bool {
        self.0 & other.0 == other.0
    }

    /// True when no bits are set.
    #[must_use]
    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// True when this kind propagates unrunnability from `then` back to
    /// `first` or forward from `first` to `then`.
    #[must_use]
    pub fn propagates_runnable(self) -> bool {
        self.contains(OrderKind::IMPLIES_THEN)
            || self.contains(OrderKind::RUNNABLE_LEFT)
            || self.contains(OrderKind::THEN_CANCELS_FIRST)
    }
}

impl BitOr for OrderKind {
    type Output = OrderKind;

    fn bitor(self, rhs: OrderKind) -> OrderKind {
        OrderKind(self.0 | rhs.0)
    }
}

/// Task names an ordering constraint can reference.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub enum TaskKind {
    /// Start the resource.
    Start,
    /// Stop the resource.
    Stop,
    /// Recurring health probe.
    Monitor,
    /// Promote an unpromoted instance.
    Promote,
    /// Demote a promoted instance.
    Demote,
    /// Notification callback around a collective operation.
    Notify,
    /// Pseudo milestone: the collective finished starting.
    Running,
    /// Pseudo milestone: the collective finished stopping.
    Stopped,
    /// Cancel a recurring operation.
    Cancel,
}

impl TaskKind {
    /// Canonical task name used in action uuids and graph XML.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            TaskKind::Start => "start",
            TaskKind::Stop => "stop",
            TaskKind::Monitor => "monitor",
            TaskKind::Promote => "promote",
            TaskKind::Demote => "demote",
            TaskKind::Notify => "notify",
            TaskKind::Running => "running",
            TaskKind::Stopped => "stopped",
            TaskKind::Cancel => "cancel",
        }
    }

    /// Parses a task name from configuration or graph XML.
    #[must_use]
    pub fn parse(text: &str) -> Option<TaskKind> {
        Some(match text {
            "start" => TaskKind::Start,
            "stop" => TaskKind::Stop,
            "monitor" => TaskKind::Monitor,
            "promote" => TaskKind::Promote,
            "demote" => TaskKind::Demote,
            "notify" => TaskKind::Notify,
            "running" => TaskKind::Running,
            "stopped" => TaskKind::Stopped,
            "cancel" => TaskKind::Cancel,
            _ => return None,
        })
    }
}

/// A configured ordering between two resources' tasks.
///
/// Orderings are late-bound: they name resources and tasks, and are
/// resolved to concrete action edges after action synthesis.
#[derive(Clone, Debug)]
pub struct OrderingSpec {
    /// Arena index of this row.
    pub id: ConstraintId,
    /// Configuration id.
    pub name: String,
    /// Resource on the `first` side.
    pub first_rsc: ResourceId,
    /// Task on the `first` side.
    pub first_task: TaskKind,
    /// Resource on the `then` side.
    pub then_rsc: ResourceId,
    /// Task on the `then` side.
    pub then_task: TaskKind,
    /// Edge semantics.
    pub kind: OrderKind,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn order_kind_bitset_composes() {
        let k = OrderKind::IMPLIES_THEN | OrderKind::RUNNABLE_LEFT;
        assert!(k.contains(OrderKind::IMPLIES_THEN));
        assert!(k.contains(OrderKind::RUNNABLE_LEFT));
        assert!(!k.contains(OrderKind::SERIALIZE));
        assert!(k.propagates_runnable());
        assert!(!OrderKind::OPTIONAL.propagates_runnable());
        assert!(OrderKind::default().is_empty());
    }

    #[test]
    fn task_names_round_trip() {
        for task in [
            TaskKind::Start,
            TaskKind::Stop,
            TaskKind::Monitor,
            TaskKind::Promote,
            TaskKind::Demote,
            TaskKind::Notify,
            TaskKind::Running,
            TaskKind::Stopped,
            TaskKind::Cancel,
        ] {
            assert_eq!(TaskKind::parse(task.as_str()), Some(task));
        }
        assert_eq!(TaskKind::parse("reboot"), None);
    }
}
