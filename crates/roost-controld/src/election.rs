// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! DC election and the join handshake.
//!
//! Election is lowest-uuid-wins among online members that announced
//! candidacy: a peer with a strictly lower uuid vetoes ours. Uuids are
//! unique by construction, so ties cannot happen. Once a DC stands, every
//! other node walks `join_announce → join_offer → join_request →
//! join_ack`; a timeout in any phase re-enters election.

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

/// How to react to a peer's ballot.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum VoteReaction {
    /// Our uuid is strictly lower: veto the peer.
    Veto,
    /// The peer's uuid is strictly lower: concede and expect it to win.
    Concede,
}

/// Current election standing from this node's point of view.
#[derive(Clone, PartialEq, Eq, Debug)]
pub enum Standing {
    /// No round in progress.
    Idle,
    /// A round is open; no veto received so far.
    Pending,
    /// We were vetoed by (or conceded to) the named peer.
    Defeated {
        /// Uuid of the winning peer.
        winner: String,
    },
}

/// Election bookkeeping for one controller.
#[derive(Debug)]
pub struct Election {
    self_uuid: String,
    standing: Standing,
    round: u64,
}

impl Election {
    /// Creates election state for the given node uuid.
    #[must_use]
    pub fn new(self_uuid: &str) -> Self {
        Self {
            self_uuid: self_uuid.to_string(),
            standing: Standing::Idle,
            round: 0,
        }
    }

    /// Opens a new round; returns the round number carried in ballots.
    pub fn open_round(&mut self) -> u64 {
        self.round += 1;
        self.standing = Standing::Pending;
        self.round
    }

    /// Current standing.
    #[must_use]
    pub fn standing(&self) -> &Standing {
        &self.standing
    }

    /// Reacts to a ballot from `peer_uuid`.
    ///
    /// Lower uuid wins: if ours is lower we veto; otherwise we concede
    /// the round to the peer.
    pub fn consider_ballot(&mut self, peer_uuid: &str) -> VoteReaction {
        if self.self_uuid.as_str() < peer_uuid {
            VoteReaction::Veto
        } else {
            self.standing = Standing::Defeated {
                winner: peer_uuid.to_string(),
            };
            VoteReaction::Concede
        }
    }

    /// Records a veto (`no-vote`) from a peer.
    pub fn record_veto(&mut self, peer_uuid: &str) {
        self.standing = Standing::Defeated {
            winner: peer_uuid.to_string(),
        };
    }

    /// Settles the round: `true` means we won (no veto arrived).
    #[must_use]
    pub fn settle(&self) -> bool {
        self.standing == Standing::Pending
    }
}

/// Join phase of one node, DC side.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum JoinPhase {
    /// Offer sent; waiting for the node's state.
    Offered,
    /// State received; integration pending or done.
    Requested,
    /// Acknowledged; the node is a full member.
    Acked,
}

/// DC-side coordinator for one join round.
///
/// Deadlines are absolute instants so an executor stall cannot silently
/// extend a phase.
#[derive(Debug)]
pub struct JoinCoordinator {
    phase_timeout: Duration,
    nodes: BTreeMap<String, (JoinPhase, Instant)>,
}

impl JoinCoordinator {
    /// Creates a coordinator with the given per-phase timeout.
    #[must_use]
    pub fn new(phase_timeout: Duration) -> Self {
        Self {
            phase_timeout,
            nodes: BTreeMap::new(),
        }
    }

    /// Registers an offer sent to `uuid` at `now`.
    pub fn offered(&mut self, uuid: &str, now: Instant) {
        self.nodes
            .insert(uuid.to_string(), (JoinPhase::Offered, now + self.phase_timeout));
    }

    /// Records the node's join request. Unknown nodes are ignored (their
    /// offer may have expired).
    pub fn requested(&mut self, uuid: &str, now: Instant) {
        if let Some(entry) = self.nodes.get_mut(uuid) {
            *entry = (JoinPhase::Requested, now + self.phase_timeout);
        }
    }

    /// Marks every requested node as acknowledged.
    pub fn ack_all(&mut self, now: Instant) {
        for entry in self.nodes.values_mut() {
            if entry.0 == JoinPhase::Requested {
                *entry = (JoinPhase::Acked, now + self.phase_timeout);
            }
        }
    }

    /// True when every tracked node has replied with its state.
    #[must_use]
    pub fn integrated(&self) -> bool {
        !self.nodes.is_empty()
            && self
                .nodes
                .values()
                .all(|(phase, _)| *phase != JoinPhase::Offered)
    }

    /// Nodes still in the offered phase whose deadline has passed: the
    /// peer never answered with its state.
    #[must_use]
    pub fn expired(&self, now: Instant) -> Vec<String> {
        self.nodes
            .iter()
            .filter(|(_, (phase, deadline))| *phase == JoinPhase::Offered && *deadline <= now)
            .map(|(uuid, _)| uuid.clone())
            .collect()
    }

    /// Phase of one node, if tracked.
    #[must_use]
    pub fn phase(&self, uuid: &str) -> Option<JoinPhase> {
        self.nodes.get(uuid).map(|(phase, _)| *phase)
    }
}
