// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! The controller event model.
//!
//! Every collaborator (membership, CIB, peer RPC, timers, the local
//! executor) is a producer feeding one event queue; the controller
//! consumes events in arrival order on a single task. There is no hidden
//! callback stack: an [`Event`] in, a list of effects out.

use roost_core::{EpochTriple, TransitionGraph};
use roost_proto::PeerMessage;

/// One unit of input for the controller loop.
#[derive(Debug, Clone)]
pub enum Event {
    /// Process start.
    Startup,
    /// A node appeared in the membership.
    NodeJoin {
        /// Node uuid.
        uuid: String,
        /// Node name.
        name: String,
    },
    /// A node disappeared from the membership.
    NodeLeft {
        /// Node uuid.
        uuid: String,
    },
    /// The CIB advanced to a new epoch.
    CibUpdated {
        /// Epoch after the write.
        epoch: EpochTriple,
    },
    /// A framed message arrived from a peer controller.
    Peer(PeerMessage),
    /// The policy engine finished a computation.
    PolicyComputed {
        /// The resulting graph.
        graph: Box<TransitionGraph>,
    },
    /// The policy engine failed; a schema violation on ingest lands here.
    PolicyFailed {
        /// Failure description for the log.
        error: String,
    },
    /// The local executor reports an action outcome.
    ActionResult {
        /// Synapse id inside the current graph.
        synapse: u32,
        /// Whether the agent reported success.
        ok: bool,
    },
    /// Periodic timer tick for deadlines and backoffs.
    Tick,
    /// The operator asked for an orderly shutdown.
    Shutdown,
}
