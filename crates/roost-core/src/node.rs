// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Cluster node model.

use std::collections::BTreeMap;

use crate::ident::NodeId;
use crate::score::Score;

/// Membership state as reported by the cluster layer.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum MembershipState {
    /// The node is a current member of the cluster.
    Member,
    /// The node was a member and has been lost (fenced or disappeared).
    Lost,
    /// The node is joining but has not completed the join handshake.
    Pending,
}

/// How the node participates in the cluster.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum NodeKind {
    /// A full cluster member running a controller.
    Cluster,
    /// A remote node driven over the remote protocol.
    Remote,
    /// A guest node backed by a resource.
    Guest,
    /// A node manufactured for a bundle replica.
    Bundle,
}

/// A cluster node in the working-set snapshot.
#[derive(Clone, Debug)]
pub struct Node {
    /// Arena index of this node.
    pub id: NodeId,
    /// Stable node uuid; the deterministic tie-breaker of last resort and
    /// the quantity compared during DC election.
    pub uuid: String,
    /// Human-readable node name (`uname`).
    pub name: String,
    /// Cluster-layer membership state.
    pub membership: MembershipState,
    /// Whether the controller on this node has joined and is usable.
    pub online: bool,
    /// Participation kind.
    pub kind: NodeKind,
    /// Base weight applied to every resource's score on this node.
    pub weight: Score,
    /// Transient and permanent node attributes (`name → value`).
    pub attrs: BTreeMap<String, String>,
    /// Instances assigned to this node during the current scheduler run.
    ///
    /// Zero at the start of every run; incremented once per managed
    /// instance placed here and compared against per-clone caps.
    pub count: u32,
}

impl Node {
    /// True when the allocator may place resources on this node.
    #[must_use]
    pub fn is_available(&self) -> bool {
        self.online && self.membership == MembershipState::Member
    }
}
