//! End-to-end scheduler scenarios over complete CIB documents.

use steward_core::TransitionId;
use steward_graph::TransitionGraph;
use steward_sched::schedule;
use steward_state::cib;
use steward_state::RscRole;

fn plan(cib_xml: &str) -> (steward_state::WorkingSet, TransitionGraph) {
    let mut ws = cib::parse(cib_xml, 0).expect("cib parses");
    let graph = schedule(&mut ws, TransitionId::zero()).expect("schedule succeeds");
    (ws, graph)
}

/// Topological position of an action key in the graph
fn topo_pos(graph: &TransitionGraph, key: &str) -> usize {
    let order = graph.topo_order().expect("acyclic");
    let action_id = graph.find_action(key).unwrap_or_else(|| panic!("action {key}")).id;
    let synapse = graph.synapse_for_action(action_id).expect("synapse").id;
    order.iter().position(|s| *s == synapse).expect("in order")
}

fn triggers(graph: &TransitionGraph, key: &str) -> Vec<String> {
    let action_id = graph.find_action(key).unwrap_or_else(|| panic!("action {key}")).id;
    let synapse = graph.synapse_for_action(action_id).expect("synapse");
    synapse
        .inputs
        .iter()
        .map(|input| {
            graph
                .synapse_for_action(*input)
                .expect("producer")
                .action
                .key
                .clone()
        })
        .collect()
}

const GROUP_MOVE_CIB: &str = r#"
<cib admin_epoch="0" epoch="10" num_updates="4">
  <configuration>
    <nodes>
      <node id="1" uname="rhel7-4"/>
      <node id="2" uname="rhel7-5"/>
    </nodes>
    <resources>
      <group id="group2">
        <primitive id="dummy2a" class="ocf" provider="heartbeat" type="Dummy"/>
        <primitive id="dummy2b" class="ocf" provider="heartbeat" type="Dummy"/>
        <primitive id="dummy2c" class="ocf" provider="heartbeat" type="Dummy"/>
      </group>
    </resources>
    <constraints>
      <rsc_location id="move-group2" rsc="group2" node="rhel7-4" score="500"/>
    </constraints>
  </configuration>
  <status>
    <node_state id="1" uname="rhel7-4" in_ccm="true" crmd="online"/>
    <node_state id="2" uname="rhel7-5" in_ccm="true" crmd="online">
      <lrm id="lrm-2">
        <lrm_resources>
          <lrm_resource id="dummy2a">
            <lrm_rsc_op id="a-start" operation="start" rc-code="0"/>
          </lrm_resource>
          <lrm_resource id="dummy2b">
            <lrm_rsc_op id="b-start" operation="start" rc-code="0"/>
          </lrm_resource>
          <lrm_resource id="dummy2c">
            <lrm_rsc_op id="c-start" operation="start" rc-code="0"/>
          </lrm_resource>
        </lrm_resources>
      </lrm>
    </node_state>
  </status>
</cib>
"#;

#[test]
fn group_move_stops_reversed_starts_forward() {
    let (_, graph) = plan(GROUP_MOVE_CIB);

    // Every member stops on the old node and starts on the new one
    for member in ["dummy2a", "dummy2b", "dummy2c"] {
        let stop = graph.find_action(&format!("{member}_stop_0")).expect("stop");
        assert_eq!(stop.node.as_deref(), Some("rhel7-5"));
        let start = graph.find_action(&format!("{member}_start_0")).expect("start");
        assert_eq!(start.node.as_deref(), Some("rhel7-4"));
    }

    // Stops run in reverse member order
    assert!(topo_pos(&graph, "dummy2c_stop_0") < topo_pos(&graph, "dummy2b_stop_0"));
    assert!(topo_pos(&graph, "dummy2b_stop_0") < topo_pos(&graph, "dummy2a_stop_0"));

    // Starts run in forward member order
    assert!(topo_pos(&graph, "dummy2a_start_0") < topo_pos(&graph, "dummy2b_start_0"));
    assert!(topo_pos(&graph, "dummy2b_start_0") < topo_pos(&graph, "dummy2c_start_0"));

    // The teardown milestone precedes the rebuild
    assert!(topo_pos(&graph, "group2_stopped_0") < topo_pos(&graph, "group2_start_0"));
    assert!(topo_pos(&graph, "group2_start_0") < topo_pos(&graph, "group2_running_0"));
}

#[test]
fn group_move_triggers_previous_member_and_milestone() {
    let (_, graph) = plan(GROUP_MOVE_CIB);

    // Each start is triggered by the previous member's start and the
    // group start milestone
    let b_triggers = triggers(&graph, "dummy2b_start_0");
    assert!(b_triggers.contains(&"dummy2a_start_0".to_string()));
    assert!(b_triggers.contains(&"group2_start_0".to_string()));

    // Each stop is triggered by the next member's stop and the group
    // stop milestone
    let b_stop_triggers = triggers(&graph, "dummy2b_stop_0");
    assert!(b_stop_triggers.contains(&"dummy2c_stop_0".to_string()));
    assert!(b_stop_triggers.contains(&"group2_stop_0".to_string()));
}

const PROMOTABLE_STOP_CIB: &str = r#"
<cib admin_epoch="0" epoch="6" num_updates="2">
  <configuration>
    <nodes>
      <node id="1" uname="fc16-builder"/>
    </nodes>
    <resources>
      <clone id="PROMOTABLE_RSC_A">
        <meta_attributes id="pm">
          <nvpair id="pm-1" name="promotable" value="true"/>
          <nvpair id="pm-2" name="notify" value="true"/>
          <nvpair id="pm-3" name="clone-max" value="1"/>
          <nvpair id="pm-4" name="target-role" value="Stopped"/>
        </meta_attributes>
        <primitive id="NATIVE_RSC_A" class="ocf" provider="heartbeat" type="Stateful"/>
      </clone>
    </resources>
    <constraints/>
  </configuration>
  <status>
    <node_state id="1" uname="fc16-builder" in_ccm="true" crmd="online">
      <lrm id="lrm-1">
        <lrm_resources>
          <lrm_resource id="NATIVE_RSC_A:0">
            <lrm_rsc_op id="i-start" operation="start" rc-code="0"/>
          </lrm_resource>
        </lrm_resources>
      </lrm>
    </node_state>
  </status>
</cib>
"#;

#[test]
fn promotable_stop_runs_full_notify_chain() {
    let (_, graph) = plan(PROMOTABLE_STOP_CIB);

    let chain = [
        "PROMOTABLE_RSC_A_pre_notify_stop_0",
        "PROMOTABLE_RSC_A_confirmed-pre_notify_stop_0",
        "NATIVE_RSC_A:0_stop_0",
        "PROMOTABLE_RSC_A_stopped_0",
        "PROMOTABLE_RSC_A_post_notify_stopped_0",
        "PROMOTABLE_RSC_A_confirmed-post_notify_stopped_0",
    ];
    for pair in chain.windows(2) {
        assert!(
            topo_pos(&graph, pair[0]) < topo_pos(&graph, pair[1]),
            "{} must precede {}",
            pair[0],
            pair[1]
        );
    }
}

#[test]
fn promotable_stop_notifications_carry_meta() {
    let (_, graph) = plan(PROMOTABLE_STOP_CIB);

    let pre = graph
        .find_action("NATIVE_RSC_A:0_pre_notify_stop_0")
        .expect("instance pre-notify");
    assert_eq!(pre.node.as_deref(), Some("fc16-builder"));
    assert_eq!(
        pre.meta.get("CRM_meta_notify_stop_resource").map(String::as_str),
        Some("NATIVE_RSC_A:0")
    );
    assert_eq!(
        pre.meta.get("CRM_meta_notify_active_uname").map(String::as_str),
        Some("fc16-builder")
    );
    assert_eq!(
        pre.meta.get("CRM_meta_notify_operation").map(String::as_str),
        Some("stop")
    );
    assert_eq!(
        pre.meta.get("CRM_meta_notify_type").map(String::as_str),
        Some("pre")
    );

    let post = graph
        .find_action("PROMOTABLE_RSC_A_post_notify_stopped_0")
        .expect("post pseudo");
    assert_eq!(
        post.meta.get("CRM_meta_notify_type").map(String::as_str),
        Some("post")
    );
}

const STICKINESS_CIB: &str = r#"
<cib admin_epoch="0" epoch="2" num_updates="0">
  <configuration>
    <nodes>
      <node id="1" uname="n1"/>
      <node id="2" uname="n2"/>
    </nodes>
    <resources>
      <primitive id="r" class="ocf" provider="heartbeat" type="Dummy">
        <meta_attributes id="rm">
          <nvpair id="rm-1" name="resource-stickiness" value="100"/>
        </meta_attributes>
      </primitive>
      <primitive id="s" class="ocf" provider="heartbeat" type="Dummy"/>
    </resources>
    <constraints>
      <rsc_colocation id="r-with-s" rsc="r" with-rsc="s" score="50"/>
    </constraints>
  </configuration>
  <status>
    <node_state id="1" uname="n1" in_ccm="true" crmd="online">
      <lrm id="lrm-1">
        <lrm_resources>
          <lrm_resource id="r">
            <lrm_rsc_op id="r-start" operation="start" rc-code="0"/>
          </lrm_resource>
        </lrm_resources>
      </lrm>
    </node_state>
    <node_state id="2" uname="n2" in_ccm="true" crmd="online">
      <lrm id="lrm-2">
        <lrm_resources>
          <lrm_resource id="s">
            <lrm_rsc_op id="s-start" operation="start" rc-code="0"/>
          </lrm_resource>
        </lrm_resources>
      </lrm>
    </node_state>
  </status>
</cib>
"#;

#[test]
fn stickiness_beats_weaker_colocation_pull() {
    let (ws, graph) = plan(STICKINESS_CIB);

    // r stays on n1: 100 stickiness outweighs the 50-point pull to s
    let r = ws.find_resource("r").unwrap();
    let n1 = ws.node_by_name("n1").unwrap().uuid;
    assert_eq!(ws.resource(r).as_primitive().unwrap().next_node, Some(n1));
    assert!(graph.find_action("r_stop_0").is_none());
    assert!(graph.find_action("r_start_0").is_none());
}

const CLONE_CAP_CIB: &str = r#"
<cib admin_epoch="0" epoch="2" num_updates="0">
  <configuration>
    <nodes>
      <node id="1" uname="n1"/>
      <node id="2" uname="n2"/>
      <node id="3" uname="n3"/>
    </nodes>
    <resources>
      <clone id="web-clone">
        <meta_attributes id="wm">
          <nvpair id="wm-1" name="clone-max" value="5"/>
          <nvpair id="wm-2" name="clone-node-max" value="2"/>
        </meta_attributes>
        <primitive id="web" class="ocf" provider="heartbeat" type="apache"/>
      </clone>
    </resources>
    <constraints/>
  </configuration>
  <status>
    <node_state id="1" uname="n1" in_ccm="true" crmd="online"/>
    <node_state id="2" uname="n2" in_ccm="true" crmd="online"/>
    <node_state id="3" uname="n3" in_ccm="true" crmd="online"/>
  </status>
</cib>
"#;

#[test]
fn clone_cap_distributes_two_two_one() {
    let (ws, graph) = plan(CLONE_CAP_CIB);

    let starts = (0..5)
        .filter(|i| graph.find_action(&format!("web:{i}_start_0")).is_some())
        .count();
    assert_eq!(starts, 5);

    let mut per_node: Vec<usize> = ws
        .nodes
        .iter()
        .map(|node| {
            (0..5)
                .filter(|i| {
                    let rsc = ws.find_resource(&format!("web:{i}")).unwrap();
                    ws.resource(rsc).as_primitive().unwrap().next_node == Some(node.uuid)
                })
                .count()
        })
        .collect();
    per_node.sort_unstable();
    per_node.reverse();
    assert_eq!(per_node, vec![2, 2, 1]);
}

#[test]
fn clone_cap_distribution_is_deterministic() {
    let (ws1, _) = plan(CLONE_CAP_CIB);
    let (ws2, _) = plan(CLONE_CAP_CIB);
    for i in 0..5 {
        let id = format!("web:{i}");
        let r1 = ws1.find_resource(&id).unwrap();
        let r2 = ws2.find_resource(&id).unwrap();
        assert_eq!(
            ws1.resource(r1).as_primitive().unwrap().next_node,
            ws2.resource(r2).as_primitive().unwrap().next_node
        );
    }
}

const ANTI_COLOCATION_CIB: &str = r#"
<cib admin_epoch="0" epoch="2" num_updates="0">
  <configuration>
    <nodes>
      <node id="1" uname="n1"/>
      <node id="2" uname="n2"/>
    </nodes>
    <resources>
      <primitive id="s" class="ocf" provider="heartbeat" type="Dummy"/>
      <primitive id="r" class="ocf" provider="heartbeat" type="Dummy"/>
    </resources>
    <constraints>
      <rsc_colocation id="r-not-with-s" rsc="r" with-rsc="s" score="-INFINITY"/>
    </constraints>
  </configuration>
  <status>
    <node_state id="1" uname="n1" in_ccm="true" crmd="online"/>
    <node_state id="2" uname="n2" in_ccm="true" crmd="online"/>
  </status>
</cib>
"#;

#[test]
fn anti_colocation_forces_different_nodes() {
    let (ws, graph) = plan(ANTI_COLOCATION_CIB);

    let r = ws.find_resource("r").unwrap();
    let s = ws.find_resource("s").unwrap();
    let r_node = ws.resource(r).as_primitive().unwrap().next_node.expect("r placed");
    let s_node = ws.resource(s).as_primitive().unwrap().next_node.expect("s placed");
    assert_ne!(r_node, s_node);

    assert!(graph.find_action("r_start_0").is_some());
    assert!(graph.find_action("s_start_0").is_some());
}

#[test]
fn no_resource_is_left_in_unknown_role() {
    for cib_xml in [
        GROUP_MOVE_CIB,
        PROMOTABLE_STOP_CIB,
        STICKINESS_CIB,
        CLONE_CAP_CIB,
        ANTI_COLOCATION_CIB,
    ] {
        let (ws, _) = plan(cib_xml);
        for rsc in &ws.resources {
            if let Some(prim) = rsc.as_primitive() {
                assert_ne!(prim.role, RscRole::Unknown, "{}", rsc.id);
                if let Some(next) = prim.next_role {
                    assert_ne!(next, RscRole::Unknown, "{}", rsc.id);
                }
            }
        }
    }
}
