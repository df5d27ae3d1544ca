//! Graph emission.
//!
//! Selects the runnable, non-optional actions out of the synthesized
//! set, renumbers them densely, and wires synapse triggers from the
//! ordering edges. Redundant triggers between concrete actions are
//! dropped; milestone (pseudo) triggers are always kept, since the
//! executor and external tooling key on them.

use indexmap::IndexMap;
use steward_core::TransitionId;
use steward_graph::TransitionGraph;
use steward_state::WorkingSet;

use crate::actions::ActionSet;

/// Emit the transition graph for a propagated action set
#[must_use]
pub fn emit(ws: &WorkingSet, set: &ActionSet, transition_id: TransitionId) -> TransitionGraph {
    let mut graph = TransitionGraph::new(transition_id);
    graph.cluster_delay_ms = ws.options.cluster_delay_ms;
    graph.stonith_timeout_ms = ws.options.stonith_timeout_ms;

    let emitted: Vec<u32> = set
        .actions
        .iter()
        .filter(|a| a.flags.runnable && !a.flags.optional)
        .map(|a| a.id)
        .collect();
    let remap: IndexMap<u32, u32> = emitted
        .iter()
        .enumerate()
        .map(|(new, old)| (*old, new as u32))
        .collect();

    let mut inputs: Vec<Vec<u32>> = vec![Vec::new(); emitted.len()];
    for edge in &set.edges {
        let (Some(first), Some(then)) = (remap.get(&edge.first), remap.get(&edge.then)) else {
            continue;
        };
        if first != then && !inputs[*then as usize].contains(first) {
            inputs[*then as usize].push(*first);
        }
    }

    reduce_inputs(&mut inputs, set, &emitted);

    for (new_id, old_id) in emitted.iter().enumerate() {
        let mut action = set.get(*old_id).clone();
        action.id = new_id as u32;
        let synapse_inputs = inputs[new_id].clone();
        graph.add_synapse(action, synapse_inputs);
    }
    graph
}

/// Drop transitively-implied triggers between concrete actions
///
/// A trigger `a` of synapse `t` is dropped when another trigger `c`
/// of `t` already (transitively) waits on `a` and `a` is not a
/// milestone.
fn reduce_inputs(inputs: &mut [Vec<u32>], set: &ActionSet, emitted: &[u32]) {
    let is_pseudo =
        |new_id: u32| -> bool { set.get(emitted[new_id as usize]).flags.pseudo };

    let depends = |dependent: u32, dependency: u32, inputs: &[Vec<u32>]| -> bool {
        let mut stack: Vec<u32> = inputs[dependent as usize].to_vec();
        let mut seen = Vec::new();
        while let Some(current) = stack.pop() {
            if current == dependency {
                return true;
            }
            if seen.contains(&current) {
                continue;
            }
            seen.push(current);
            stack.extend(inputs[current as usize].iter().copied());
        }
        false
    };

    for target in 0..inputs.len() {
        let current = inputs[target].clone();
        let kept: Vec<u32> = current
            .iter()
            .filter(|a| {
                if is_pseudo(**a) {
                    return true;
                }
                !current
                    .iter()
                    .any(|c| *c != **a && depends(*c, **a, inputs))
            })
            .copied()
            .collect();
        inputs[target] = kept;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actions;
    use steward_core::ActionTask;
    use steward_graph::Action;
    use steward_state::{Node, Resource, RscRole};

    fn moving_ws() -> WorkingSet {
        let mut ws = WorkingSet::new();
        ws.add_node(Node::new("n1").online_member());
        ws.add_node(Node::new("n2").online_member());
        let id = ws.add_resource(Resource::primitive("dummy", "ocf", None, "Dummy"));
        ws.seed_allowed_maps();
        let n1 = ws.node_by_name("n1").unwrap().uuid;
        let n2 = ws.node_by_name("n2").unwrap().uuid;
        {
            let prim = ws.resource_mut(id).as_primitive_mut().unwrap();
            prim.running_on.push(n1);
            prim.role = RscRole::Started;
            prim.next_node = Some(n2);
            prim.next_role = Some(RscRole::Started);
        }
        ws.resource_mut(id).flags.provisional = false;
        ws
    }

    #[test]
    fn test_emit_move_graph() {
        let ws = moving_ws();
        let set = actions::synthesize(&ws);
        let graph = emit(&ws, &set, TransitionId::from_u64(3));

        assert_eq!(graph.transition_id.as_u64(), 3);
        assert_eq!(graph.len(), 2);
        let stop = graph.find_action("dummy_stop_0").unwrap();
        let start = graph.find_action("dummy_start_0").unwrap();
        let start_synapse = graph.synapse_for_action(start.id).unwrap();
        assert_eq!(start_synapse.inputs, vec![stop.id]);
    }

    #[test]
    fn test_emit_skips_unrunnable() {
        let ws = moving_ws();
        let mut set = actions::synthesize(&ws);
        let start = set.find("dummy_start_0").unwrap();
        set.get_mut(start).flags.runnable = false;
        let graph = emit(&ws, &set, TransitionId::zero());

        assert!(graph.find_action("dummy_start_0").is_none());
        assert!(graph.find_action("dummy_stop_0").is_some());
    }

    #[test]
    fn test_emit_skips_optional() {
        let ws = moving_ws();
        let mut set = actions::synthesize(&ws);
        let stop = set.find("dummy_stop_0").unwrap();
        set.get_mut(stop).flags.optional = true;
        let graph = emit(&ws, &set, TransitionId::zero());

        assert!(graph.find_action("dummy_stop_0").is_none());
    }

    #[test]
    fn test_emitted_ids_dense_and_ordered() {
        let ws = moving_ws();
        let set = actions::synthesize(&ws);
        let graph = emit(&ws, &set, TransitionId::zero());
        for (index, synapse) in graph.synapses.iter().enumerate() {
            assert_eq!(synapse.id as usize, index);
            assert_eq!(synapse.action.id, synapse.id);
        }
    }

    #[test]
    fn test_milestone_priority_carried() {
        let mut ws = moving_ws();
        // Wrap in a group so milestones appear
        let child = ws.find_resource("dummy").unwrap();
        let group = ws.add_resource(Resource::new(
            "g",
            steward_state::Variant::Group(steward_state::GroupData {
                children: vec![child],
            }),
        ));
        ws.resource_mut(child).parent = Some(group);

        let set = actions::synthesize(&ws);
        let graph = emit(&ws, &set, TransitionId::zero());
        let stopped = graph.find_action("g_stopped_0").unwrap();
        assert_eq!(stopped.priority, Action::MILESTONE_PRIORITY);
        assert_eq!(stopped.task, ActionTask::Stopped);
    }
}
