// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! The transition graph: a typed DAG of synapses.
//!
//! One synapse holds one action plus the set of input triggers that must
//! confirm before it may dispatch. Emission is deterministic: synapse ids
//! follow action arena order, and inputs are sorted ascending.

use std::collections::BTreeMap;

use crate::ident::ActionId;
use crate::working_set::WorkingSet;

/// The kind of element a synapse's action serializes as.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum GraphActionKind {
    /// A concrete resource-agent operation.
    RscOp,
    /// A logical milestone never handed to an agent.
    PseudoEvent,
    /// A cluster-level event (fencing, shutdown).
    CrmEvent,
}

/// One action inside a synapse, in wire-level terms.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct GraphAction {
    /// Numeric action id, unique within the graph.
    pub action_id: u32,
    /// Serialized element kind.
    pub kind: GraphActionKind,
    /// Action identity string `rsc_task_interval`.
    pub uuid: String,
    /// Task name.
    pub task: String,
    /// Resource name, when the action belongs to one.
    pub rsc: Option<String>,
    /// Target node name.
    pub on_node: Option<String>,
    /// Target node uuid.
    pub on_node_uuid: Option<String>,
    /// Recurring interval in milliseconds.
    pub interval_ms: u32,
    /// Execution timeout in milliseconds.
    pub timeout_ms: u32,
    /// `CRM_meta_*` attributes beyond the structural ones.
    pub attrs: BTreeMap<String, String>,
}

/// A vertex of the transition graph.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct Synapse {
    /// Synapse id, dense from zero.
    pub id: u32,
    /// Dispatch priority; higher dispatches first among ready synapses.
    pub priority: i32,
    /// The single action this synapse performs.
    pub action: GraphAction,
    /// Ids of synapses whose completion triggers this one.
    pub inputs: Vec<u32>,
}

/// A complete, dispatchable transition graph.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct TransitionGraph {
    /// Monotonic transition counter assigned by the controller.
    pub transition_id: u64,
    /// Settle delay applied between batches, milliseconds.
    pub cluster_delay_ms: u32,
    /// Fencing timeout, milliseconds.
    pub stonith_timeout_ms: u32,
    /// Score offset recorded for failed stops.
    pub failed_stop_offset: String,
    /// Score offset recorded for failed starts.
    pub failed_start_offset: String,
    /// Vertices, ordered by id.
    pub synapses: Vec<Synapse>,
}

impl TransitionGraph {
    /// Returns the synapse ids in one valid topological order, or `None`
    /// if the graph contains a cycle (which emission never produces).
    #[must_use]
    pub fn topological_order(&self) -> Option<Vec<u32>> {
        let n = self.synapses.len();
        let mut indegree = vec![0usize; n];
        let mut out: Vec<Vec<usize>> = vec![Vec::new(); n];
        for syn in &self.synapses {
            for input in &syn.inputs {
                out[*input as usize].push(syn.id as usize);
                indegree[syn.id as usize] += 1;
            }
        }
        let mut ready: Vec<usize> = (0..n).filter(|i| indegree[*i] == 0).collect();
        let mut order = Vec::with_capacity(n);
        while let Some(next) = ready.pop() {
            order.push(u32::try_from(next).unwrap_or(u32::MAX));
            for &succ in &out[next] {
                indegree[succ] -= 1;
                if indegree[succ] == 0 {
                    ready.push(succ);
                }
            }
        }
        (order.len() == n).then_some(order)
    }

    /// Looks up a synapse by the uuid of its action.
    #[must_use]
    pub fn synapse_by_uuid(&self, uuid: &str) -> Option<&Synapse> {
        self.synapses.iter().find(|s| s.action.uuid == uuid)
    }
}

/// Emits the transition graph for a fully scheduled working set.
///
/// A synapse is emitted per action that is runnable and not optional.
/// Inputs are the ordering edges between emitted actions, with
/// transitively implied concrete-to-concrete inputs removed; triggers
/// from pseudo-actions are kept verbatim since they are the milestones
/// the executor reports progress against.
#[must_use]
pub fn emit(ws: &WorkingSet, transition_id: u64) -> TransitionGraph {
    // Dense synapse ids in action arena order keeps emission deterministic.
    let mut synapse_of: BTreeMap<ActionId, u32> = BTreeMap::new();
    for action in &ws.actions {
        if action.runnable && !action.optional {
            let id = u32::try_from(synapse_of.len()).unwrap_or(u32::MAX);
            synapse_of.insert(action.id, id);
        }
    }

    // inputs[s] = set of emitted predecessors of s
    let mut inputs: Vec<Vec<u32>> = vec![Vec::new(); synapse_of.len()];
    let mut succ: Vec<Vec<u32>> = vec![Vec::new(); synapse_of.len()];
    for edge in &ws.edges {
        let (Some(&f), Some(&t)) = (synapse_of.get(&edge.first), synapse_of.get(&edge.then))
        else {
            continue;
        };
        if f == t {
            continue;
        }
        if !inputs[t as usize].contains(&f) {
            inputs[t as usize].push(f);
            succ[f as usize].push(t);
        }
    }

    reduce_inputs(ws, &synapse_of, &mut inputs, &succ);

    let synapses = synapse_of
        .iter()
        .map(|(&action_id, &syn_id)| {
            let action = ws.action(action_id);
            let mut sorted_inputs = inputs[syn_id as usize].clone();
            sorted_inputs.sort_unstable();
            Synapse {
                id: syn_id,
                priority: action.priority,
                action: graph_action(ws, action_id, syn_id),
                inputs: sorted_inputs,
            }
        })
        .collect();

    TransitionGraph {
        transition_id,
        cluster_delay_ms: 60_000,
        stonith_timeout_ms: 60_000,
        failed_stop_offset: "INFINITY".to_string(),
        failed_start_offset: "INFINITY".to_string(),
        synapses,
    }
}

/// Removes concrete-to-concrete inputs already implied through another
/// path. Inputs whose source is a pseudo-action are exempt: hubs stay
/// visible as explicit triggers.
fn reduce_inputs(
    ws: &WorkingSet,
    synapse_of: &BTreeMap<ActionId, u32>,
    inputs: &mut [Vec<u32>],
    succ: &[Vec<u32>],
) {
    let mut pseudo = vec![false; synapse_of.len()];
    for (&action_id, &syn_id) in synapse_of {
        pseudo[syn_id as usize] = ws.action(action_id).pseudo;
    }
    for target in 0..inputs.len() {
        let current = inputs[target].clone();
        inputs[target].retain(|&candidate| {
            if pseudo[candidate as usize] {
                return true;
            }
            // Drop `candidate` when another input reaches `target` through
            // it: candidate →* other_input for some other input.
            !current.iter().any(|&other| {
                other != candidate && reaches(succ, candidate, other)
            })
        });
    }
}

/// DFS reachability `from →* to` over emitted successor lists.
fn reaches(succ: &[Vec<u32>], from: u32, to: u32) -> bool {
    if from == to {
        return true;
    }
    let mut stack = vec![from];
    let mut seen = vec![false; succ.len()];
    while let Some(cur) = stack.pop() {
        if cur == to {
            return true;
        }
        if seen[cur as usize] {
            continue;
        }
        seen[cur as usize] = true;
        for &next in &succ[cur as usize] {
            stack.push(next);
        }
    }
    false
}

fn graph_action(ws: &WorkingSet, action_id: ActionId, dense_id: u32) -> GraphAction {
    let action = ws.action(action_id);
    let kind = if action.pseudo {
        GraphActionKind::PseudoEvent
    } else if action.rsc.is_none() {
        GraphActionKind::CrmEvent
    } else {
        GraphActionKind::RscOp
    };
    let (on_node, on_node_uuid) = action
        .on_node
        .map(|n| {
            let node = ws.node(n);
            (Some(node.name.clone()), Some(node.uuid.clone()))
        })
        .unwrap_or((None, None));
    GraphAction {
        action_id: dense_id,
        kind,
        uuid: action.uuid.clone(),
        task: action.task.as_str().to_string(),
        rsc: action.rsc.map(|r| ws.resource(r).name.clone()),
        on_node,
        on_node_uuid,
        interval_ms: action.interval_ms,
        timeout_ms: action.timeout_ms,
        attrs: action.notify_meta.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn synapse(id: u32, inputs: Vec<u32>) -> Synapse {
        Synapse {
            id,
            priority: 0,
            action: GraphAction {
                action_id: id,
                kind: GraphActionKind::RscOp,
                uuid: format!("a{id}"),
                task: "start".into(),
                rsc: None,
                on_node: None,
                on_node_uuid: None,
                interval_ms: 0,
                timeout_ms: 0,
                attrs: BTreeMap::new(),
            },
            inputs,
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
    fn topological_order_exists_for_dag() {
        let g = graph(vec![
            synapse(0, vec![]),
            synapse(1, vec![0]),
            synapse(2, vec![0, 1]),
        ]);
        let order = g.topological_order().expect("acyclic");
        let pos = |id: u32| order.iter().position(|x| *x == id).expect("present");
        assert!(pos(0) < pos(1));
        assert!(pos(1) < pos(2));
    }

    #[test]
    fn topological_order_rejects_cycles() {
        let g = graph(vec![synapse(0, vec![1]), synapse(1, vec![0])]);
        assert!(g.topological_order().is_none());
    }
}
