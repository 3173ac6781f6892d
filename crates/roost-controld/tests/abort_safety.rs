// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Abort safety: aborting a transition and re-running the scheduler on
//! the same snapshot yields the same plan as if the aborted transition
//! had never been dispatched.

use std::time::{Instant, SystemTime};

use roost_controld::{AbortReason, TransitionExecutor};
use roost_core::{graph_to_xml, schedule_cib};

const CIB: &str = r#"<cib admin_epoch="0" epoch="2" num_updates="0">
  <configuration>
    <nodes>
      <node id="1" uname="alpha"/>
      <node id="2" uname="beta"/>
    </nodes>
    <resources>
      <group id="stack">
        <primitive id="fs" class="ocf" provider="heartbeat" type="Filesystem"/>
        <primitive id="app" class="ocf" provider="heartbeat" type="Dummy"/>
      </group>
    </resources>
    <constraints>
      <rsc_location id="pin" rsc="stack" node="beta" score="300"/>
    </constraints>
  </configuration>
  <status>
    <node_state id="1" uname="alpha" in_ccm="true" crmd="online" join="member">
      <lrm><lrm_resources>
        <lrm_resource id="fs" class="ocf" type="Filesystem">
          <lrm_rsc_op id="fs_start" operation="start" rc-code="0"/>
        </lrm_resource>
        <lrm_resource id="app" class="ocf" type="Dummy">
          <lrm_rsc_op id="app_start" operation="start" rc-code="0"/>
        </lrm_resource>
      </lrm_resources></lrm>
    </node_state>
    <node_state id="2" uname="beta" in_ccm="true" crmd="online" join="member"/>
  </status>
</cib>"#;

#[test]
fn abort_then_replan_equals_never_dispatched() {
    // First plan: the group moves from alpha to beta.
    let first = schedule_cib(CIB, 1, SystemTime::UNIX_EPOCH).expect("first schedule");
    let first_xml = graph_to_xml(&first).expect("serialize");

    // Dispatch part of it, then abort before anything completes.
    let mut exec = TransitionExecutor::new(first.clone(), "alpha");
    let dispatched = exec.pump(Instant::now());
    assert!(!dispatched.is_empty(), "something was in flight");
    let summary = exec.abort(AbortReason::OperatorRequest);
    assert!(!summary.discarded.is_empty(), "pending work was thrown away");

    // No dispatched action completed, so the snapshot is unchanged; a
    // fresh run must produce the identical plan.
    let second = schedule_cib(CIB, 1, SystemTime::UNIX_EPOCH).expect("second schedule");
    let second_xml = graph_to_xml(&second).expect("serialize");
    assert_eq!(first_xml, second_xml, "P5: abort leaves no residue");
}

#[test]
fn replan_after_partial_completion_skips_the_done_prefix() {
    // Simulate the aborted transition having completed just the stops
    // (recorded in status as stopped resources on alpha), then replan.
    let after_stops = CIB
        .replace(
            r#"<lrm_rsc_op id="fs_start" operation="start" rc-code="0"/>"#,
            r#"<lrm_rsc_op id="fs_stop" operation="stop" rc-code="0"/>"#,
        )
        .replace(
            r#"<lrm_rsc_op id="app_start" operation="start" rc-code="0"/>"#,
            r#"<lrm_rsc_op id="app_stop" operation="stop" rc-code="0"/>"#,
        );
    let graph = schedule_cib(&after_stops, 2, SystemTime::UNIX_EPOCH).expect("replan");
    assert!(
        graph.synapse_by_uuid("fs_stop_0").is_none(),
        "already stopped; no second stop"
    );
    assert!(
        graph.synapse_by_uuid("fs_start_0").is_some(),
        "the start half of the move still runs"
    );
}
