// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Peer wire schema for roost controllers.
//!
//! Controllers exchange framed envelopes: a length prefix (u32,
//! big-endian) followed by a CBOR-encoded [`PeerMessage`]. Delivery is
//! best-effort with at-least-once retry on reconnect, so receivers dedupe
//! by the envelope `reference` using [`DedupeWindow`].

mod wire;

pub use wire::{decode_frame, encode_frame, WireError};

use std::collections::{HashSet, VecDeque};

use serde::{Deserialize, Serialize};

/// Destination subsystem of a peer message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MessageType {
    /// Controller-to-controller traffic.
    Crmd,
    /// Local executor proxy traffic.
    Lrmd,
    /// Fencer traffic.
    StonithNg,
}

/// Message subtype within a [`MessageType`] conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PeerSubtype {
    /// Election candidacy announcement.
    Vote,
    /// Veto from a peer with a strictly lower uuid.
    NoVote,
    /// A node announcing itself to the elected DC.
    JoinAnnounce,
    /// DC offering a join, carrying the expected CIB epoch.
    JoinOffer,
    /// Node replying with its authoritative local state.
    JoinRequest,
    /// DC acknowledging an integrated join.
    JoinAck,
    /// DC asking a peer to execute a graph action.
    RscOpRequest,
    /// Peer reporting a graph action outcome.
    RscOpResult,
    /// Orderly cluster shutdown request.
    ShutdownRequest,
    /// Liveness probe.
    Ping,
}

/// One framed peer envelope.
///
/// `payload_xml` carries the domain document (graph action, CIB fragment,
/// join state) in the wire-compatible XML the core produces; the envelope
/// itself stays schema-stable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerMessage {
    /// Sending node uuid.
    pub from: String,
    /// Receiving node uuid, or `None` for broadcast.
    pub to: Option<String>,
    /// Destination subsystem.
    pub msg_type: MessageType,
    /// Conversation subtype.
    pub subtype: PeerSubtype,
    /// Unique reference used for at-least-once dedupe.
    pub reference: String,
    /// Domain payload, XML text.
    pub payload_xml: String,
}

impl PeerMessage {
    /// Builds a controller-to-controller message.
    #[must_use]
    pub fn crmd(from: &str, to: Option<&str>, subtype: PeerSubtype, reference: &str) -> Self {
        Self {
            from: from.to_string(),
            to: to.map(str::to_string),
            msg_type: MessageType::Crmd,
            subtype,
            reference: reference.to_string(),
            payload_xml: String::new(),
        }
    }

    /// Attaches an XML payload.
    #[must_use]
    pub fn with_payload(mut self, payload_xml: &str) -> Self {
        self.payload_xml = payload_xml.to_string();
        self
    }
}

/// Sliding window of recently seen references for duplicate suppression.
///
/// Retries after reconnect may deliver a message more than once; the
/// window drops anything whose reference was accepted within the last
/// `capacity` messages.
#[derive(Debug)]
pub struct DedupeWindow {
    capacity: usize,
    order: VecDeque<String>,
    seen: HashSet<String>,
}

impl DedupeWindow {
    /// Creates a window remembering up to `capacity` references.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            order: VecDeque::new(),
            seen: HashSet::new(),
        }
    }

    /// Records a reference. Returns `false` when it was already seen (the
    /// message is a duplicate and must be dropped).
    pub fn accept(&mut self, reference: &str) -> bool {
        if self.seen.contains(reference) {
            return false;
        }
        if self.order.len() == self.capacity {
            if let Some(evicted) = self.order.pop_front() {
                self.seen.remove(&evicted);
            }
        }
        self.order.push_back(reference.to_string());
        self.seen.insert(reference.to_string());
        true
    }
}
