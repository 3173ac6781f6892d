// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Actions and the ordering edges between them.

use std::collections::BTreeMap;

use crate::constraint::{OrderKind, TaskKind};
use crate::ident::{ActionId, NodeId, ResourceId};

/// A single step of a transition: one agent operation or pseudo milestone.
#[derive(Clone, Debug)]
pub struct Action {
    /// Arena index of this action.
    pub id: ActionId,
    /// Stable identity string `rsc_task_interval`.
    pub uuid: String,
    /// Resource this action operates on; `None` for cluster-level events.
    pub rsc: Option<ResourceId>,
    /// Task performed.
    pub task: TaskKind,
    /// Target node; pseudo-actions have none.
    pub on_node: Option<NodeId>,
    /// Recurring interval in milliseconds (zero for one-shot tasks).
    pub interval_ms: u32,
    /// Execution timeout in milliseconds.
    pub timeout_ms: u32,
    /// The action is not required this transition. Cleared, never set, by
    /// ordering propagation.
    pub optional: bool,
    /// The action can be executed this transition. Cleared, never set, by
    /// ordering propagation.
    pub runnable: bool,
    /// Logical milestone never handed to an agent.
    pub pseudo: bool,
    /// Hint that a stop/start pair may be fused into a live migration.
    pub migrate_runnable: bool,
    /// Dispatch priority for tie-breaking in the executor.
    pub priority: i32,
    /// `CRM_meta_notify_*` attributes attached to notification actions.
    pub notify_meta: BTreeMap<String, String>,
}

impl Action {
    /// Formats the canonical `rsc_task_interval` uuid.
    #[must_use]
    pub fn format_uuid(rsc_name: &str, task: TaskKind, interval_ms: u32) -> String {
        format!("{}_{}_{}", rsc_name, task.as_str(), interval_ms)
    }
}

/// A directed ordering edge between two actions.
#[derive(Clone, Copy, Debug)]
pub struct ActionEdge {
    /// The action that must complete first.
    pub first: ActionId,
    /// The action that follows.
    pub then: ActionId,
    /// Edge semantics.
    pub kind: OrderKind,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uuid_format_matches_wire_identity() {
        assert_eq!(
            Action::format_uuid("dummy2a", TaskKind::Stop, 0),
            "dummy2a_stop_0"
        );
        assert_eq!(
            Action::format_uuid("db", TaskKind::Monitor, 10_000),
            "db_monitor_10000"
        );
    }
}
