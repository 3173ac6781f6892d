// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
#![allow(dead_code)]

//! Shared fixtures: a tiny CIB document builder and a deterministic PRNG
//! so tests don't need `rand`.

use std::fmt::Write as _;

/// Tiny deterministic RNG (xorshift64*) for randomized invariant tests.
#[derive(Clone)]
pub struct XorShift64 {
    state: u64,
}

impl XorShift64 {
    /// Creates a new PRNG with the given seed (zero is remapped to one).
    pub fn new(seed: u64) -> Self {
        Self { state: seed.max(1) }
    }

    /// Returns the next pseudo-random `u64`.
    pub fn next_u64(&mut self) -> u64 {
        let mut x = self.state;
        x ^= x >> 12;
        x ^= x << 25;
        x ^= x >> 27;
        self.state = x;
        x.wrapping_mul(0x2545F4914F6CDD1D)
    }

    /// Returns a value in `0..bound` (bound must be non-zero).
    pub fn below(&mut self, bound: u64) -> u64 {
        self.next_u64() % bound
    }
}

/// Builds CIB XML documents for test scenarios without hand-writing the
/// boilerplate each time.
#[derive(Default)]
pub struct CibBuilder {
    epoch: u32,
    nodes: Vec<(String, String)>,
    resources: String,
    constraints: String,
    status: String,
}

impl CibBuilder {
    /// Starts an empty cluster document at epoch one.
    pub fn new() -> Self {
        Self {
            epoch: 1,
            ..Self::default()
        }
    }

    /// Adds an online cluster member.
    pub fn node(mut self, uuid: &str, uname: &str) -> Self {
        self.nodes.push((uuid.to_string(), uname.to_string()));
        let _ = write!(
            self.status,
            r#"<node_state id="{uuid}" uname="{uname}" in_ccm="true" crmd="online" join="member"/>"#
        );
        self
    }

    /// Adds a member that is present but offline.
    pub fn offline_node(mut self, uuid: &str, uname: &str) -> Self {
        self.nodes.push((uuid.to_string(), uname.to_string()));
        let _ = write!(
            self.status,
            r#"<node_state id="{uuid}" uname="{uname}" in_ccm="false" crmd="offline" join="down"/>"#
        );
        self
    }

    /// Appends raw resources XML.
    pub fn resources(mut self, xml: &str) -> Self {
        self.resources.push_str(xml);
        self
    }

    /// Appends raw constraints XML.
    pub fn constraints(mut self, xml: &str) -> Self {
        self.constraints.push_str(xml);
        self
    }

    /// Appends raw status XML (inside `<status>`).
    pub fn status(mut self, xml: &str) -> Self {
        self.status.push_str(xml);
        self
    }

    /// Records `rsc` as started on the node named `uname` (by uuid).
    pub fn running(self, rsc: &str, node_uuid: &str, node_uname: &str) -> Self {
        let xml = format!(
            r#"<node_state id="{node_uuid}" uname="{node_uname}" in_ccm="true" crmd="online" join="member">
  <lrm><lrm_resources>
    <lrm_resource id="{rsc}" class="ocf" type="Dummy">
      <lrm_rsc_op id="{rsc}_last" operation="start" rc-code="0"/>
    </lrm_resource>
  </lrm_resources></lrm>
</node_state>"#
        );
        self.status(&xml)
    }

    /// Renders the assembled CIB document.
    pub fn build(self) -> String {
        let mut nodes_xml = String::new();
        for (uuid, uname) in &self.nodes {
            let _ = write!(nodes_xml, r#"<node id="{uuid}" uname="{uname}"/>"#);
        }
        format!(
            r#"<cib admin_epoch="0" epoch="{}" num_updates="0">
  <configuration>
    <nodes>{nodes_xml}</nodes>
    <resources>{}</resources>
    <constraints>{}</constraints>
  </configuration>
  <status>{}</status>
</cib>"#,
            self.epoch, self.resources, self.constraints, self.status
        )
    }
}

/// A plain Dummy primitive with optional stickiness.
pub fn primitive(id: &str, stickiness: i64) -> String {
    format!(
        r#"<primitive id="{id}" class="ocf" provider="pacemaker" type="Dummy">
  <meta_attributes id="{id}-meta">
    <nvpair id="{id}-stick" name="resource-stickiness" value="{stickiness}"/>
  </meta_attributes>
</primitive>"#
    )
}
