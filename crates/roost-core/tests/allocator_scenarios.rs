// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Allocator placement scenarios: stickiness, colocation, clone caps,
//! and the orphan capacity policy.

use std::time::SystemTime;

mod common;

use common::{primitive, CibBuilder};
use roost_core::{assign_all, NodeId, RscRole, WorkingSet};

fn placed_node(ws: &WorkingSet, rsc: &str) -> Option<NodeId> {
    let id = ws.resource_by_name(rsc)?;
    ws.resource(id).as_primitive()?.next_node
}

#[test]
fn stickiness_beats_weaker_colocation_pull() {
    // R (stickiness 100) runs on alpha; R is colocated score=50 with S,
    // which runs (and stays) on beta. 100 > 50: R must not move.
    let cib = CibBuilder::new()
        .node("1", "alpha")
        .node("2", "beta")
        .resources(&primitive("S", 200))
        .resources(&primitive("R", 100))
        .constraints(r#"<rsc_colocation id="r-with-s" rsc="R" with-rsc="S" score="50"/>"#)
        .running("S", "2", "beta")
        .running("R", "1", "alpha")
        .build();
    let mut ws = WorkingSet::build(&cib, SystemTime::UNIX_EPOCH).expect("ingest");
    assign_all(&mut ws);

    let beta = ws.node_by_name("beta").expect("beta");
    let alpha = ws.node_by_name("alpha").expect("alpha");
    assert_eq!(placed_node(&ws, "S"), Some(beta));
    assert_eq!(placed_node(&ws, "R"), Some(alpha), "stickiness 100 beats pull 50");
}

#[test]
fn stronger_colocation_overcomes_stickiness() {
    // S is heavily sticky so the dependent's influence cannot move it;
    // R's pull of 500 then beats its own stickiness of 100.
    let cib = CibBuilder::new()
        .node("1", "alpha")
        .node("2", "beta")
        .resources(&primitive("S", 1000))
        .resources(&primitive("R", 100))
        .constraints(r#"<rsc_colocation id="r-with-s" rsc="R" with-rsc="S" score="500"/>"#)
        .running("S", "2", "beta")
        .running("R", "1", "alpha")
        .build();
    let mut ws = WorkingSet::build(&cib, SystemTime::UNIX_EPOCH).expect("ingest");
    assign_all(&mut ws);

    let beta = ws.node_by_name("beta").expect("beta");
    assert_eq!(placed_node(&ws, "R"), Some(beta), "pull 500 beats stickiness 100");
}

#[test]
fn infinity_anti_colocation_forces_a_different_node() {
    let cib = CibBuilder::new()
        .node("1", "alpha")
        .node("2", "beta")
        .resources(&primitive("S", 0))
        .resources(&primitive("R", 0))
        .constraints(
            r#"<rsc_colocation id="r-not-with-s" rsc="R" with-rsc="S" score="-INFINITY"/>"#,
        )
        .build();
    let mut ws = WorkingSet::build(&cib, SystemTime::UNIX_EPOCH).expect("ingest");
    assign_all(&mut ws);

    let s_node = placed_node(&ws, "S").expect("S placed");
    let r_node = placed_node(&ws, "R").expect("R placed");
    assert_ne!(s_node, r_node, "-INFINITY bans sharing a node");
}

#[test]
fn infinity_anti_colocation_stops_dependent_on_single_node() {
    let cib = CibBuilder::new()
        .node("1", "alpha")
        .resources(&primitive("S", 0))
        .resources(&primitive("R", 0))
        .constraints(
            r#"<rsc_colocation id="r-not-with-s" rsc="R" with-rsc="S" score="-INFINITY"/>"#,
        )
        .build();
    let mut ws = WorkingSet::build(&cib, SystemTime::UNIX_EPOCH).expect("ingest");
    assign_all(&mut ws);

    assert!(placed_node(&ws, "S").is_some());
    assert_eq!(placed_node(&ws, "R"), None, "nowhere left for R");
    let r = ws.resource_by_name("R").expect("R");
    assert_eq!(
        ws.resource(r).as_primitive().expect("primitive").next_role,
        RscRole::Stopped
    );
}

#[test]
fn clone_distribution_is_two_two_one_over_three_nodes() {
    let clone = r#"<clone id="web">
  <meta_attributes id="web-meta">
    <nvpair id="web-max" name="clone-max" value="5"/>
    <nvpair id="web-node-max" name="clone-node-max" value="2"/>
  </meta_attributes>
  <primitive id="httpd" class="ocf" provider="heartbeat" type="apache"/>
</clone>"#;
    let cib = CibBuilder::new()
        .node("1", "alpha")
        .node("2", "beta")
        .node("3", "gamma")
        .resources(clone)
        .build();
    let mut ws = WorkingSet::build(&cib, SystemTime::UNIX_EPOCH).expect("ingest");
    assign_all(&mut ws);

    let counts: Vec<u32> = ws.nodes.iter().map(|n| n.count).collect();
    assert_eq!(counts, vec![2, 2, 1], "deterministic {{2,2,1}} split");
}

#[test]
fn clone_surplus_instances_stop_when_nodes_are_short() {
    let clone = r#"<clone id="web">
  <meta_attributes id="web-meta">
    <nvpair id="web-max" name="clone-max" value="3"/>
    <nvpair id="web-node-max" name="clone-node-max" value="1"/>
  </meta_attributes>
  <primitive id="httpd" class="ocf" provider="heartbeat" type="apache"/>
</clone>"#;
    let cib = CibBuilder::new()
        .node("1", "alpha")
        .node("2", "beta")
        .resources(clone)
        .build();
    let mut ws = WorkingSet::build(&cib, SystemTime::UNIX_EPOCH).expect("ingest");
    assign_all(&mut ws);

    let placed = (0..3)
        .filter(|k| placed_node(&ws, &format!("web:{k}")).is_some())
        .count();
    assert_eq!(placed, 2, "one instance has no node left and stops");
}

#[test]
fn running_clone_instances_keep_their_nodes() {
    let clone = r#"<clone id="web">
  <meta_attributes id="web-meta">
    <nvpair id="web-max" name="clone-max" value="2"/>
    <nvpair id="web-node-max" name="clone-node-max" value="1"/>
  </meta_attributes>
  <primitive id="httpd" class="ocf" provider="heartbeat" type="apache"/>
</clone>"#;
    let cib = CibBuilder::new()
        .node("1", "alpha")
        .node("2", "beta")
        .resources(clone)
        .running("web:0", "2", "beta")
        .running("web:1", "1", "alpha")
        .build();
    let mut ws = WorkingSet::build(&cib, SystemTime::UNIX_EPOCH).expect("ingest");
    assign_all(&mut ws);

    let alpha = ws.node_by_name("alpha").expect("alpha");
    let beta = ws.node_by_name("beta").expect("beta");
    assert_eq!(placed_node(&ws, "web:0"), Some(beta), "preferred pass keeps web:0");
    assert_eq!(placed_node(&ws, "web:1"), Some(alpha), "preferred pass keeps web:1");
}

#[test]
fn offline_nodes_are_never_chosen() {
    let cib = CibBuilder::new()
        .node("1", "alpha")
        .offline_node("2", "beta")
        .resources(&primitive("R", 0))
        .constraints(r#"<rsc_location id="r-loc" rsc="R" node="beta" score="INFINITY"/>"#)
        .build();
    let mut ws = WorkingSet::build(&cib, SystemTime::UNIX_EPOCH).expect("ingest");
    assign_all(&mut ws);

    let alpha = ws.node_by_name("alpha").expect("alpha");
    assert_eq!(
        placed_node(&ws, "R"),
        Some(alpha),
        "an INFINITY preference for an offline node cannot resurrect it"
    );
}

#[test]
fn stickiness_preserved_when_feasible() {
    // P3: running on alpha, alpha not banned, no stronger pull: stays.
    let cib = CibBuilder::new()
        .node("1", "alpha")
        .node("2", "beta")
        .resources(&primitive("R", 1))
        .running("R", "1", "alpha")
        .build();
    let mut ws = WorkingSet::build(&cib, SystemTime::UNIX_EPOCH).expect("ingest");
    assign_all(&mut ws);

    let alpha = ws.node_by_name("alpha").expect("alpha");
    assert_eq!(placed_node(&ws, "R"), Some(alpha));
}

#[test]
fn orphan_stops_in_place_without_consuming_node_capacity() {
    // ghost appears in status only. It must get an explicit stopped
    // decision, and the node counts must be exactly what the managed
    // resources account for.
    let cib = CibBuilder::new()
        .node("1", "alpha")
        .resources(&primitive("R", 0))
        .running("R", "1", "alpha")
        .running("ghost", "1", "alpha")
        .build();
    let mut ws = WorkingSet::build(&cib, SystemTime::UNIX_EPOCH).expect("ingest");
    assign_all(&mut ws);

    let ghost = ws.resource_by_name("ghost").expect("orphan adopted");
    assert!(ws.resource(ghost).orphan);
    let prim = ws.resource(ghost).as_primitive().expect("primitive");
    assert_eq!(prim.next_role, RscRole::Stopped);
    assert_eq!(prim.next_node, None);
    assert_eq!(
        ws.nodes[0].count, 1,
        "only the managed resource counts against alpha"
    );
}

#[test]
fn bundle_replicas_spread_one_per_node() {
    let bundle = r#"<bundle id="web-b">
  <docker image="httpd:2.4" replicas="2"/>
  <primitive id="webapp" class="ocf" provider="heartbeat" type="apache"/>
</bundle>"#;
    let cib = CibBuilder::new()
        .node("1", "alpha")
        .node("2", "beta")
        .resources(bundle)
        .build();
    let mut ws = WorkingSet::build(&cib, SystemTime::UNIX_EPOCH).expect("ingest");
    assign_all(&mut ws);

    let counts: Vec<u32> = ws.nodes.iter().map(|n| n.count).collect();
    assert_eq!(counts, vec![1, 1], "bundle replicas cap at one per node");
    assert!(placed_node(&ws, "web-b:0").is_some());
    assert!(placed_node(&ws, "web-b:1").is_some());
}

#[test]
fn resources_tied_to_a_revoked_ticket_stop() {
    let cib = CibBuilder::new()
        .node("1", "alpha")
        .resources(&primitive("R", 0))
        .constraints(r#"<rsc_ticket id="tk" rsc="R" ticket="golden"/>"#)
        .status(r#"<tickets><ticket_state id="golden" granted="false"/></tickets>"#)
        .running("R", "1", "alpha")
        .build();
    let mut ws = WorkingSet::build(&cib, SystemTime::UNIX_EPOCH).expect("ingest");
    assign_all(&mut ws);

    assert_eq!(placed_node(&ws, "R"), None, "revoked ticket bans everywhere");
    let r = ws.resource_by_name("R").expect("R");
    assert_eq!(
        ws.resource(r).as_primitive().expect("primitive").next_role,
        RscRole::Stopped
    );
}

#[test]
fn managed_assignment_increments_count_unconditionally() {
    let cib = CibBuilder::new()
        .node("1", "alpha")
        .resources(&primitive("A", 0))
        .resources(&primitive("B", 0))
        .build();
    let mut ws = WorkingSet::build(&cib, SystemTime::UNIX_EPOCH).expect("ingest");
    assign_all(&mut ws);
    let alpha = ws.node_by_name("alpha").expect("alpha");
    assert_eq!(placed_node(&ws, "A"), Some(alpha));
    assert_eq!(placed_node(&ws, "B"), Some(alpha));
    assert_eq!(ws.nodes[0].count, 2, "every managed placement counts");
}
