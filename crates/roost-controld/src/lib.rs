// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! roost-controld: the per-node cluster controller.
//!
//! One single-threaded cooperative loop per process: membership, CIB,
//! peer RPC, timers, and the local executor feed [`Event`]s into a
//! [`Controller`], which drives the FSM, DC election, and the transition
//! executor and answers with effects for the loop to carry out. The
//! policy engine itself lives in `roost-core` and is invoked only from
//! `S_POLICY_ENGINE`, so two overlapping transition graphs are impossible
//! by construction.
#![forbid(unsafe_code)]
#![deny(missing_docs, rust_2018_idioms, unused_must_use)]
#![deny(
    clippy::all,
    clippy::pedantic,
    clippy::nursery,
    clippy::cargo,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::todo,
    clippy::unimplemented,
    clippy::dbg_macro,
    clippy::print_stdout,
    clippy::print_stderr
)]
#![allow(
    clippy::must_use_candidate,
    clippy::return_self_not_must_use,
    clippy::missing_const_for_fn,
    clippy::redundant_pub_crate,
    clippy::module_name_repetitions,
    clippy::use_self
)]

mod cib;
mod controller;
mod election;
mod events;
mod executor;
mod fsm;

// Re-exports for stable public API
/// CIB collaborator seam and in-memory store.
pub use cib::{write_with_retry, Backoff, CibError, CibStore, MemCib};
/// The controller context and its effects.
pub use controller::{
    parse_reference, synapse_reference, Controller, ControllerConfig, Effect,
};
/// DC election and join handshake bookkeeping.
pub use election::{Election, JoinCoordinator, JoinPhase, Standing, VoteReaction};
/// Event model of the controller loop.
pub use events::Event;
/// Transition executor.
pub use executor::{
    AbortReason, AbortSummary, Dispatch, DispatchTarget, Progress, SynapseState,
    TransitionExecutor,
};
/// The controller finite-state machine.
pub use fsm::{Fsm, FsmAction, Input, State, TransitionOutcome};
