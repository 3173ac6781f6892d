// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! roost-core: deterministic cluster policy engine.
//!
//! Ingests a CIB snapshot, assigns every resource instance to a node (or
//! to an explicit stop), synthesizes the actions that move the cluster to
//! the desired state, and emits a wire-compatible transition graph for the
//! controller to execute. The whole pass is a pure function of the
//! snapshot; determinism of every tie-break is a tested invariant.
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
    clippy::unreadable_literal,
    clippy::missing_const_for_fn,
    clippy::redundant_pub_crate,
    clippy::module_name_repetitions,
    clippy::use_self
)]

mod action;
mod actions;
mod allocator;
mod constraint;
mod graph;
mod ident;
mod node;
mod ops;
mod ordering;
mod policy;
mod resource;
mod score;
mod status;
mod working_set;
mod xml;

// Re-exports for stable public API
/// Actions and the ordering edges between them.
pub use action::{Action, ActionEdge};
/// Action synthesis over an allocated working set.
pub use actions::create_actions;
/// Instance assignment.
pub use allocator::{assign, assign_all};
/// Placement and ordering constraints.
pub use constraint::{
    Colocation, OrderKind, OrderingSpec, TaskKind, Ticket, TicketState,
};
/// Transition graph types and emission.
pub use graph::{emit, GraphAction, GraphActionKind, Synapse, TransitionGraph};
/// Arena index types.
pub use ident::{ActionId, ConstraintId, NodeId, ResourceId};
/// Cluster node model.
pub use node::{MembershipState, Node, NodeKind};
/// Per-variant behavior seam.
pub use ops::{ops_for, ActionFlags, ResourceOps};
/// Ordering resolution and flag propagation.
pub use ordering::{propagate, resolve_config_orderings};
/// Policy engine entry points.
pub use policy::{schedule, schedule_cib};
/// Resource model.
pub use resource::{
    BundleSpec, CloneSpec, Primitive, PromotableSpec, RecurringOp, Resource, ResourceVariant,
    RscRole,
};
/// Saturating score arithmetic.
pub use score::{Score, ScoreParseError};
/// Operation-history write-back into `/cib/status`.
pub use status::{record_op_history, OpRecord, StatusWriteError};
/// Snapshot ingestion and the working set.
pub use working_set::{
    parse_interval_ms, EpochTriple, LocationPref, Observed, SchemaError, WorkingSet,
};
/// Transition graph XML codec.
pub use xml::{graph_from_xml, graph_to_xml, GraphXmlError};
