// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Policy engine entry point: snapshot in, transition graph out.

use std::time::SystemTime;

use crate::actions;
use crate::allocator;
use crate::graph::{self, TransitionGraph};
use crate::ordering;
use crate::working_set::{SchemaError, WorkingSet};

/// Runs one full scheduler pass over a working set.
///
/// This is a pure function of the snapshot: allocation, action synthesis,
/// ordering resolution, and flag propagation mutate only `ws`, and the
/// same input always emits a byte-identical graph. Nothing survives the
/// call; durable state lives in the CIB.
pub fn schedule(ws: &mut WorkingSet, transition_id: u64) -> TransitionGraph {
    allocator::assign_all(ws);
    actions::create_actions(ws);
    ordering::resolve_config_orderings(ws);
    ordering::propagate(ws);
    graph::emit(ws, transition_id)
}

/// Convenience wrapper: ingest a CIB document taken at `now` and
/// schedule it.
pub fn schedule_cib(
    cib_xml: &str,
    transition_id: u64,
    now: SystemTime,
) -> Result<TransitionGraph, SchemaError> {
    let mut ws = WorkingSet::build(cib_xml, now)?;
    Ok(schedule(&mut ws, transition_id))
}
