// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! The transition executor: drive one graph to completion or abort.
//!
//! A synapse becomes ready when every input is confirmed. Ready synapses
//! dispatch in descending priority, ascending synapse id within equal
//! priority, so dispatch order is deterministic. Pseudo-events confirm
//! locally without dispatch. In-flight synapses carry absolute deadlines;
//! expiry counts as failure for dependency purposes and aborts the graph.
//! Abort discards pending synapses but never cancels in-flight ones: the
//! agent contract has no cancel, so they drain to completion or timeout.

use std::time::{Duration, Instant};

use roost_core::{GraphAction, GraphActionKind, TransitionGraph};

/// Lifecycle of one synapse inside the executor.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum SynapseState {
    /// Waiting for inputs.
    Pending,
    /// Dispatched; outcome due before the deadline.
    InFlight {
        /// Absolute completion deadline.
        deadline: Instant,
    },
    /// Completed successfully.
    Confirmed,
    /// Completed unsuccessfully.
    Failed,
    /// Deadline passed without an outcome.
    TimedOut,
    /// Discarded by an abort before dispatch.
    Discarded,
}

/// Why a graph was aborted.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum AbortReason {
    /// An action failed with a stop/fence on-fail policy.
    ActionFailed,
    /// The CIB changed mid-transition.
    CibChanged,
    /// The membership changed mid-transition.
    MembershipChanged,
    /// The operator asked for an abort.
    OperatorRequest,
    /// An in-flight action hit its deadline.
    Timeout,
}

/// Where a dispatched action executes.
#[derive(Clone, PartialEq, Eq, Debug)]
pub enum DispatchTarget {
    /// Hand to the local executor.
    Local,
    /// Send an RPC request to the named peer controller.
    Peer(String),
}

/// One dispatch the caller must deliver.
#[derive(Clone, Debug)]
pub struct Dispatch {
    /// Synapse being executed.
    pub synapse: u32,
    /// Execution target.
    pub target: DispatchTarget,
    /// The action to perform.
    pub action: GraphAction,
}

/// Executor progress after recording an outcome.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Progress {
    /// More synapses remain.
    Continue,
    /// Every synapse confirmed; the transition succeeded.
    Complete,
    /// The graph must be aborted for the given reason.
    Abort(AbortReason),
}

/// Summary of an abort: what was thrown away and what is still draining.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AbortSummary {
    /// Reason recorded for the abort.
    pub reason: AbortReason,
    /// Synapses discarded before dispatch.
    pub discarded: Vec<u32>,
    /// Synapses still in flight; they drain, they are not cancelled.
    pub draining: Vec<u32>,
}

/// Drives one transition graph.
#[derive(Debug)]
pub struct TransitionExecutor {
    graph: TransitionGraph,
    local_node: String,
    states: Vec<SynapseState>,
    aborted: Option<AbortReason>,
}

impl TransitionExecutor {
    /// Wraps a graph for execution on the node named `local_node`.
    #[must_use]
    pub fn new(graph: TransitionGraph, local_node: &str) -> Self {
        let states = vec![SynapseState::Pending; graph.synapses.len()];
        Self {
            graph,
            local_node: local_node.to_string(),
            states,
            aborted: None,
        }
    }

    /// The graph under execution.
    #[must_use]
    pub fn graph(&self) -> &TransitionGraph {
        &self.graph
    }

    /// State of one synapse.
    #[must_use]
    pub fn state(&self, synapse: u32) -> SynapseState {
        self.states[synapse as usize]
    }

    /// True once every synapse is confirmed (success) or the abort drain
    /// has finished (no in-flight synapses remain).
    #[must_use]
    pub fn is_settled(&self) -> bool {
        self.states.iter().all(|s| {
            !matches!(s, SynapseState::Pending | SynapseState::InFlight { .. })
        })
    }

    /// True when every synapse confirmed.
    #[must_use]
    pub fn succeeded(&self) -> bool {
        self.aborted.is_none() && self.states.iter().all(|s| *s == SynapseState::Confirmed)
    }

    fn ready(&self) -> Vec<u32> {
        let mut ready: Vec<u32> = self
            .graph
            .synapses
            .iter()
            .filter(|syn| {
                self.states[syn.id as usize] == SynapseState::Pending
                    && syn
                        .inputs
                        .iter()
                        .all(|input| self.states[*input as usize] == SynapseState::Confirmed)
            })
            .map(|syn| syn.id)
            .collect();
        ready.sort_by(|a, b| {
            let pa = self.graph.synapses[*a as usize].priority;
            let pb = self.graph.synapses[*b as usize].priority;
            pb.cmp(&pa).then_with(|| a.cmp(b))
        });
        ready
    }

    /// Confirms ready pseudo-events and dispatches ready concrete actions.
    ///
    /// Call after construction and after every recorded outcome. Returns
    /// the dispatches the caller must deliver; pseudo-events never appear
    /// in the result, they confirm internally.
    pub fn pump(&mut self, now: Instant) -> Vec<Dispatch> {
        let mut dispatches = Vec::new();
        if self.aborted.is_some() {
            return dispatches;
        }
        loop {
            let ready = self.ready();
            if ready.is_empty() {
                break;
            }
            let mut confirmed_any = false;
            for id in ready {
                let synapse = &self.graph.synapses[id as usize];
                if synapse.action.kind == GraphActionKind::PseudoEvent {
                    self.states[id as usize] = SynapseState::Confirmed;
                    confirmed_any = true;
                } else {
                    let timeout = Duration::from_millis(u64::from(
                        synapse.action.timeout_ms.max(1000),
                    ));
                    self.states[id as usize] = SynapseState::InFlight {
                        deadline: now + timeout,
                    };
                    let target = match synapse.action.on_node.as_deref() {
                        Some(node) if node != self.local_node => {
                            DispatchTarget::Peer(node.to_string())
                        }
                        _ => DispatchTarget::Local,
                    };
                    dispatches.push(Dispatch {
                        synapse: id,
                        target,
                        action: synapse.action.clone(),
                    });
                }
            }
            // Confirming pseudos can ready more synapses; dispatching
            // concrete actions cannot (their confirmation is external).
            if !confirmed_any {
                break;
            }
        }
        dispatches
    }

    /// Records an action outcome reported by an executor or peer.
    pub fn record_result(&mut self, synapse: u32, ok: bool) -> Progress {
        let slot = &mut self.states[synapse as usize];
        if !matches!(slot, SynapseState::InFlight { .. }) {
            tracing::warn!(
                synapse,
                event = "stale-action-result",
                "result for a synapse that is not in flight; ignoring"
            );
            return self.progress();
        }
        *slot = if ok {
            SynapseState::Confirmed
        } else {
            SynapseState::Failed
        };
        if ok {
            self.progress()
        } else {
            Progress::Abort(AbortReason::ActionFailed)
        }
    }

    /// Times out in-flight synapses whose deadline has passed. A timeout
    /// counts as a failure and demands an abort.
    pub fn poll_timeouts(&mut self, now: Instant) -> Progress {
        let mut any_expired = false;
        for state in &mut self.states {
            if let SynapseState::InFlight { deadline } = state {
                if *deadline <= now {
                    *state = SynapseState::TimedOut;
                    any_expired = true;
                }
            }
        }
        if any_expired {
            Progress::Abort(AbortReason::Timeout)
        } else {
            self.progress()
        }
    }

    /// Aborts the remainder of the graph: pending synapses are discarded,
    /// in-flight ones drain.
    pub fn abort(&mut self, reason: AbortReason) -> AbortSummary {
        self.aborted = Some(reason);
        let mut discarded = Vec::new();
        let mut draining = Vec::new();
        for (idx, state) in self.states.iter_mut().enumerate() {
            let id = u32::try_from(idx).unwrap_or(u32::MAX);
            match state {
                SynapseState::Pending => {
                    *state = SynapseState::Discarded;
                    discarded.push(id);
                }
                SynapseState::InFlight { .. } => draining.push(id),
                _ => {}
            }
        }
        tracing::warn!(
            ?reason,
            discarded = discarded.len(),
            draining = draining.len(),
            event = "graph-abort",
            "transition aborted"
        );
        AbortSummary {
            reason,
            discarded,
            draining,
        }
    }

    fn progress(&self) -> Progress {
        if self.succeeded() {
            Progress::Complete
        } else {
            Progress::Continue
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use roost_core::{GraphAction, GraphActionKind, Synapse, TransitionGraph};
    use std::collections::BTreeMap;

    fn action(id: u32, kind: GraphActionKind, node: &str, priority: i32) -> Synapse {
        Synapse {
            id,
            priority,
            action: GraphAction {
                action_id: id,
                kind,
                uuid: format!("a{id}"),
                task: "start".into(),
                rsc: Some("r".into()),
                on_node: (kind == GraphActionKind::RscOp).then(|| node.to_string()),
                on_node_uuid: None,
                interval_ms: 0,
                timeout_ms: 5_000,
                attrs: BTreeMap::new(),
            },
            inputs: Vec::new(),
        }
    }

    fn graph(synapses: Vec<Synapse>) -> TransitionGraph {
        TransitionGraph {
            transition_id: 1,
            cluster_delay_ms: 0,
            stonith_timeout_ms: 0,
            failed_stop_offset: String::new(),
            failed_start_offset: String::new(),
            synapses,
        }
    }

    #[test]
    fn dispatch_order_is_priority_desc_then_id_asc() {
        let g = graph(vec![
            action(0, GraphActionKind::RscOp, "alpha", 0),
            action(1, GraphActionKind::RscOp, "alpha", 5),
            action(2, GraphActionKind::RscOp, "alpha", 5),
        ]);
        let mut exec = TransitionExecutor::new(g, "alpha");
        let dispatches = exec.pump(Instant::now());
        let order: Vec<u32> = dispatches.iter().map(|d| d.synapse).collect();
        assert_eq!(order, vec![1, 2, 0]);
    }

    #[test]
    fn pseudo_events_confirm_without_dispatch() {
        let mut hub = action(0, GraphActionKind::PseudoEvent, "", 0);
        hub.action.on_node = None;
        let mut child = action(1, GraphActionKind::RscOp, "alpha", 0);
        child.inputs = vec![0];
        let g = graph(vec![hub, child]);
        let mut exec = TransitionExecutor::new(g, "alpha");
        let dispatches = exec.pump(Instant::now());
        assert_eq!(exec.state(0), SynapseState::Confirmed);
        assert_eq!(dispatches.len(), 1, "only the concrete child dispatches");
        assert_eq!(dispatches[0].synapse, 1);
    }

    #[test]
    fn remote_actions_target_their_peer() {
        let g = graph(vec![
            action(0, GraphActionKind::RscOp, "alpha", 0),
            action(1, GraphActionKind::RscOp, "beta", 0),
        ]);
        let mut exec = TransitionExecutor::new(g, "alpha");
        let dispatches = exec.pump(Instant::now());
        assert_eq!(dispatches[0].target, DispatchTarget::Local);
        assert_eq!(dispatches[1].target, DispatchTarget::Peer("beta".into()));
    }

    #[test]
    fn success_path_completes() {
        let mut second = action(1, GraphActionKind::RscOp, "alpha", 0);
        second.inputs = vec![0];
        let g = graph(vec![action(0, GraphActionKind::RscOp, "alpha", 0), second]);
        let mut exec = TransitionExecutor::new(g, "alpha");
        let now = Instant::now();

        let first = exec.pump(now);
        assert_eq!(first.len(), 1);
        assert_eq!(exec.record_result(0, true), Progress::Continue);
        let next = exec.pump(now);
        assert_eq!(next.len(), 1);
        assert_eq!(exec.record_result(1, true), Progress::Complete);
        assert!(exec.succeeded());
    }

    #[test]
    fn failure_demands_abort_and_abort_discards_pending() {
        let mut second = action(1, GraphActionKind::RscOp, "alpha", 0);
        second.inputs = vec![0];
        let g = graph(vec![action(0, GraphActionKind::RscOp, "alpha", 0), second]);
        let mut exec = TransitionExecutor::new(g, "alpha");
        let _ = exec.pump(Instant::now());

        let progress = exec.record_result(0, false);
        assert_eq!(progress, Progress::Abort(AbortReason::ActionFailed));
        let summary = exec.abort(AbortReason::ActionFailed);
        assert_eq!(summary.discarded, vec![1]);
        assert!(summary.draining.is_empty());
        assert!(exec.is_settled());
        assert!(!exec.succeeded());
    }

    #[test]
    fn timeout_is_failure_for_dependency_purposes() {
        let g = graph(vec![action(0, GraphActionKind::RscOp, "alpha", 0)]);
        let mut exec = TransitionExecutor::new(g, "alpha");
        let now = Instant::now();
        let _ = exec.pump(now);
        let progress = exec.poll_timeouts(now + Duration::from_secs(30));
        assert_eq!(progress, Progress::Abort(AbortReason::Timeout));
        assert_eq!(exec.state(0), SynapseState::TimedOut);
    }

    #[test]
    fn abort_leaves_in_flight_actions_draining() {
        let g = graph(vec![
            action(0, GraphActionKind::RscOp, "alpha", 0),
            action(1, GraphActionKind::RscOp, "alpha", 0),
        ]);
        let mut exec = TransitionExecutor::new(g, "alpha");
        let _ = exec.pump(Instant::now());

        let summary = exec.abort(AbortReason::CibChanged);
        assert_eq!(summary.draining, vec![0, 1], "no cancel exists; they drain");
        assert!(!exec.is_settled(), "still settling until drains complete");
        let _ = exec.record_result(0, true);
        let _ = exec.record_result(1, false);
        assert!(exec.is_settled());
    }

    #[test]
    fn pump_after_abort_dispatches_nothing() {
        let mut second = action(1, GraphActionKind::RscOp, "alpha", 0);
        second.inputs = vec![0];
        let g = graph(vec![action(0, GraphActionKind::RscOp, "alpha", 0), second]);
        let mut exec = TransitionExecutor::new(g, "alpha");
        let _ = exec.pump(Instant::now());
        let _ = exec.abort(AbortReason::OperatorRequest);
        let _ = exec.record_result(0, true);
        assert!(exec.pump(Instant::now()).is_empty());
    }
}
