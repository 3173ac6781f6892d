// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Promotable clone behavior: notification choreography around a stop,
//! and promotion ranking by the per-node promotion attribute.

use std::time::SystemTime;

mod common;

use common::CibBuilder;
use roost_core::{assign_all, schedule, RscRole, TransitionGraph, WorkingSet};

const NOTIFYING_CLONE: &str = r#"<clone id="PROMOTABLE_RSC_A">
  <meta_attributes id="pra-meta">
    <nvpair id="pra-promotable" name="promotable" value="true"/>
    <nvpair id="pra-max" name="clone-max" value="1"/>
    <nvpair id="pra-notify" name="notify" value="true"/>
    <nvpair id="pra-role" name="target-role" value="Stopped"/>
  </meta_attributes>
  <primitive id="NATIVE_RSC_A" class="ocf" provider="pacemaker" type="Stateful"/>
</clone>"#;

fn stop_with_notifications() -> TransitionGraph {
    let cib = CibBuilder::new()
        .node("1", "fc16-builder")
        .resources(NOTIFYING_CLONE)
        .running("PROMOTABLE_RSC_A:0", "1", "fc16-builder")
        .build();
    let mut ws = WorkingSet::build(&cib, SystemTime::UNIX_EPOCH).expect("ingest");
    schedule(&mut ws, 1)
}

/// Walks triggers transitively: is `earlier` an ancestor of `later`?
fn precedes(graph: &TransitionGraph, earlier: &str, later: &str) -> bool {
    let target = graph.synapse_by_uuid(later).map(|s| s.id);
    let source = graph.synapse_by_uuid(earlier).map(|s| s.id);
    let (Some(target), Some(source)) = (target, source) else {
        return false;
    };
    let mut stack = vec![target];
    let mut seen = vec![false; graph.synapses.len()];
    while let Some(cur) = stack.pop() {
        if cur == source {
            return true;
        }
        if seen[cur as usize] {
            continue;
        }
        seen[cur as usize] = true;
        stack.extend(graph.synapses[cur as usize].inputs.iter().copied());
    }
    false
}

#[test]
fn notification_chain_brackets_the_stop() {
    let graph = stop_with_notifications();
    let chain = [
        "PROMOTABLE_RSC_A_pre_notify_stop_0",
        "PROMOTABLE_RSC_A:0_pre_notify_stop_0",
        "PROMOTABLE_RSC_A_confirmed-pre_notify_stop_0",
        "PROMOTABLE_RSC_A:0_stop_0",
        "PROMOTABLE_RSC_A_stopped_0",
        "PROMOTABLE_RSC_A_post_notify_stopped_0",
        "PROMOTABLE_RSC_A:0_post_notify_stopped_0",
        "PROMOTABLE_RSC_A_confirmed-post_notify_stopped_0",
    ];
    for uuid in &chain {
        assert!(
            graph.synapse_by_uuid(uuid).is_some(),
            "missing synapse {uuid}"
        );
    }
    for pair in chain.windows(2) {
        assert!(
            precedes(&graph, pair[0], pair[1]),
            "{} must precede {}",
            pair[0],
            pair[1]
        );
    }
}

#[test]
fn notify_actions_carry_the_notify_meta_set() {
    let graph = stop_with_notifications();
    let pre = graph
        .synapse_by_uuid("PROMOTABLE_RSC_A:0_pre_notify_stop_0")
        .expect("pre notify call");
    assert_eq!(pre.action.on_node.as_deref(), Some("fc16-builder"));
    let attrs = &pre.action.attrs;
    assert_eq!(attrs.get("CRM_meta_notify_type").map(String::as_str), Some("pre"));
    assert_eq!(
        attrs.get("CRM_meta_notify_operation").map(String::as_str),
        Some("stop")
    );
    assert_eq!(
        attrs.get("CRM_meta_notify_stop_resource").map(String::as_str),
        Some("PROMOTABLE_RSC_A:0")
    );
    assert_eq!(
        attrs.get("CRM_meta_notify_stop_uname").map(String::as_str),
        Some("fc16-builder")
    );
    assert_eq!(
        attrs.get("CRM_meta_notify_active_resource").map(String::as_str),
        Some("PROMOTABLE_RSC_A:0")
    );

    let post = graph
        .synapse_by_uuid("PROMOTABLE_RSC_A:0_post_notify_stopped_0")
        .expect("post notify call");
    assert_eq!(
        post.action.attrs.get("CRM_meta_notify_type").map(String::as_str),
        Some("post")
    );
}

#[test]
fn promotion_attribute_picks_the_promoted_instance() {
    let clone = r#"<clone id="db">
  <meta_attributes id="db-meta">
    <nvpair id="db-promotable" name="promotable" value="true"/>
    <nvpair id="db-max" name="clone-max" value="2"/>
  </meta_attributes>
  <primitive id="pgsql" class="ocf" provider="heartbeat" type="pgsql"/>
</clone>"#;
    let master_scores = r#"<node_state id="1" uname="alpha" in_ccm="true" crmd="online" join="member">
  <transient_attributes id="1">
    <instance_attributes id="1-attrs">
      <nvpair id="1-m" name="master-pgsql" value="10"/>
    </instance_attributes>
  </transient_attributes>
</node_state>
<node_state id="2" uname="beta" in_ccm="true" crmd="online" join="member">
  <transient_attributes id="2">
    <instance_attributes id="2-attrs">
      <nvpair id="2-m" name="master-pgsql" value="75"/>
    </instance_attributes>
  </transient_attributes>
</node_state>"#;
    let cib = CibBuilder::new()
        .node("1", "alpha")
        .node("2", "beta")
        .resources(clone)
        .status(master_scores)
        .build();
    let mut ws = WorkingSet::build(&cib, SystemTime::UNIX_EPOCH).expect("ingest");
    assign_all(&mut ws);

    let beta = ws.node_by_name("beta").expect("beta");
    let promoted: Vec<String> = (0..2)
        .filter_map(|k| {
            let id = ws.resource_by_name(&format!("db:{k}"))?;
            let prim = ws.resource(id).as_primitive()?;
            (prim.next_role == RscRole::Promoted).then(|| {
                assert_eq!(prim.next_node, Some(beta), "promoted where master score is 75");
                ws.resource(id).name.clone()
            })
        })
        .collect();
    assert_eq!(promoted.len(), 1, "promoted-max defaults to one");
}
