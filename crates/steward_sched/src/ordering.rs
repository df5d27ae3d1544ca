//! Ordering constraint resolution and flag propagation.
//!
//! Configuration orderings are late-bound: they name a resource and a
//! task, resolved here against the synthesized action set. Collective
//! endpoints bind to their milestone pseudo-actions. Once all edges
//! exist, flags are propagated to a fixpoint with a worklist; both
//! rules only ever clear a flag, so the iteration is monotone.

use indexmap::IndexMap;
use std::collections::VecDeque;
use steward_core::{ActionTask, NodeUuid, ResourceId};
use steward_state::{OrderingConstraint, OrderKind, WorkingSet};
use tracing::{info, trace};

use crate::actions::ActionSet;

/// Resolve configuration orderings into action edges, interleaving
/// clone pairs where requested
pub fn apply_constraints(ws: &mut WorkingSet, set: &mut ActionSet) {
    let orderings = ws.orderings.clone();
    for ordering in orderings {
        let first_rsc = ws.resource(ordering.first);
        let then_rsc = ws.resource(ordering.then);

        if first_rsc.is_collective()
            && then_rsc.is_collective()
            && interleave_applies(ws, &ordering)
        {
            interleave_edges(ws, set, &ordering);
            continue;
        }

        let first = resolve_action(ws, set, ordering.first, ordering.first_task, true);
        let then = resolve_action(ws, set, ordering.then, ordering.then_task, false);
        if let (Some(first), Some(then)) = (first, then) {
            trace!(
                constraint = %ordering.id,
                first = %set.get(first).key,
                then = %set.get(then).key,
                "ordering edge"
            );
            set.order(first, then, ordering.kind);
        }
    }
}

/// Which side's interleave flag governs, per the direction of the
/// ordering: teardowns consult the first (outgoing) side
fn interleave_applies(ws: &WorkingSet, ordering: &OrderingConstraint) -> bool {
    if ordering.first == ordering.then {
        return false;
    }
    let governing = if ordering.then_task.is_teardown() {
        ordering.first
    } else {
        ordering.then
    };
    ws.resource(governing).interleave()
}

/// Find the action an ordering endpoint binds to
///
/// Primitives bind to the named action itself. Collectives bind to
/// their milestone on the completion (first) side and their entry
/// pseudo on the then side.
fn resolve_action(
    ws: &WorkingSet,
    set: &ActionSet,
    rsc: ResourceId,
    task: ActionTask,
    completion_side: bool,
) -> Option<u32> {
    let resource = ws.resource(rsc);
    if resource.is_collective() && completion_side {
        let milestone = task.milestone()?;
        return set.find_task(&resource.id, milestone);
    }
    set.find_task(&resource.id, task)
}

/// The node an instance is (or will be) bound to
fn instance_node(ws: &WorkingSet, instance: ResourceId, current: bool) -> Option<NodeUuid> {
    let prim = ws.resource(instance).as_primitive()?;
    if current {
        prim.current_node()
    } else {
        prim.next_node
    }
}

/// Replace a coarse collective edge with per-instance edges between
/// same-node partners
fn interleave_edges(ws: &mut WorkingSet, set: &mut ActionSet, ordering: &OrderingConstraint) {
    // Stops and demotes pair with the partner on the current node;
    // everything else pairs on the assigned next node
    let current = ordering.then_task.is_teardown();
    let then_children = ws.resource(ordering.then).children().to_vec();
    let first_children = ws.resource(ordering.first).children().to_vec();

    for then_instance in then_children {
        let Some(node) = instance_node(ws, then_instance, current) else {
            continue;
        };
        let partner = first_children
            .iter()
            .find(|f| instance_node(ws, **f, current) == Some(node))
            .copied();

        match partner {
            Some(first_instance) => {
                let first_id = ws.resource(first_instance).id.clone();
                let then_id = ws.resource(then_instance).id.clone();
                let first = set.find_task(&first_id, ordering.first_task);
                let then = set.find_task(&then_id, ordering.then_task);
                if let (Some(first), Some(then)) = (first, then) {
                    set.order(first, then, ordering.kind);
                }
            }
            None => {
                // A teardown may proceed without a partner; a
                // build-up with runnability semantics may not
                if !current
                    && ordering
                        .kind
                        .intersects(OrderKind::RUNNABLE_LEFT | OrderKind::IMPLIES_THEN)
                {
                    force_unassign(ws, set, then_instance, ordering.first);
                }
            }
        }
    }
}

/// Withdraw an instance that has no interleave partner
fn force_unassign(ws: &mut WorkingSet, set: &mut ActionSet, instance: ResourceId, first: ResourceId) {
    let instance_id = ws.resource(instance).id.clone();
    info!(
        instance = %instance_id,
        first = %ws.resource(first).id,
        "inhibiting: no instance to interleave with"
    );
    if let Some(node) = ws
        .resource(instance)
        .as_primitive()
        .and_then(|p| p.next_node)
    {
        if let Some(node) = ws.node_mut(node) {
            node.count = node.count.saturating_sub(1);
        }
    }
    if let Some(prim) = ws.resource_mut(instance).as_primitive_mut() {
        prim.next_node = None;
        prim.next_role = Some(steward_state::RscRole::Stopped);
    }
    for action_id in set.actions_for(&instance_id).to_vec() {
        let action = set.get_mut(action_id);
        if matches!(action.task, ActionTask::Start | ActionTask::Promote) {
            action.flags.runnable = false;
        }
    }
}

/// Propagate ordering semantics to a fixpoint
///
/// `IMPLIES_THEN`: a mandatory first makes then mandatory.
/// `RUNNABLE_LEFT`: an unrunnable first makes then unrunnable.
/// `OPTIONAL` edges order without propagating.
pub fn propagate(set: &mut ActionSet) {
    let mut by_first: IndexMap<u32, Vec<usize>> = IndexMap::new();
    for (index, edge) in set.edges.iter().enumerate() {
        by_first.entry(edge.first).or_default().push(index);
    }

    let mut worklist: VecDeque<usize> = (0..set.edges.len()).collect();
    while let Some(index) = worklist.pop_front() {
        let edge = set.edges[index];
        let (first_optional, first_runnable) = {
            let first = set.get(edge.first);
            (first.flags.optional, first.flags.runnable)
        };

        let then = set.get_mut(edge.then);
        let mut changed = false;
        if edge.kind.contains(OrderKind::IMPLIES_THEN) && !first_optional && then.flags.optional {
            then.flags.optional = false;
            changed = true;
        }
        if edge.kind.contains(OrderKind::RUNNABLE_LEFT) && !first_runnable && then.flags.runnable {
            then.flags.runnable = false;
            changed = true;
        }

        if changed {
            if let Some(successors) = by_first.get(&edge.then) {
                worklist.extend(successors.iter().copied());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actions;
    use steward_state::{CloneData, Node, Resource, RscRole, Variant};

    fn two_node_ws() -> WorkingSet {
        let mut ws = WorkingSet::new();
        ws.add_node(Node::new("n1").online_member());
        ws.add_node(Node::new("n2").online_member());
        ws
    }

    fn place(ws: &mut WorkingSet, rsc: ResourceId, node: &str) {
        let uuid = ws.node_by_name(node).unwrap().uuid;
        ws.resource_mut(rsc).flags.provisional = false;
        let prim = ws.resource_mut(rsc).as_primitive_mut().unwrap();
        prim.next_node = Some(uuid);
        prim.next_role = Some(RscRole::Started);
    }

    #[test]
    fn test_config_edge_between_primitives() {
        let mut ws = two_node_ws();
        let a = ws.add_resource(Resource::primitive("a", "ocf", None, "Dummy"));
        let b = ws.add_resource(Resource::primitive("b", "ocf", None, "Dummy"));
        ws.seed_allowed_maps();
        place(&mut ws, a, "n1");
        place(&mut ws, b, "n2");
        ws.add_ordering(OrderingConstraint::starts("o1", a, b)).unwrap();

        let mut set = actions::synthesize(&ws);
        apply_constraints(&mut ws, &mut set);

        let a_start = set.find("a_start_0").unwrap();
        let b_start = set.find("b_start_0").unwrap();
        assert!(set
            .edges
            .iter()
            .any(|e| e.first == a_start && e.then == b_start));
    }

    #[test]
    fn test_runnable_left_propagates_down_chain() {
        let mut ws = two_node_ws();
        let a = ws.add_resource(Resource::primitive("a", "ocf", None, "Dummy"));
        let b = ws.add_resource(Resource::primitive("b", "ocf", None, "Dummy"));
        let c = ws.add_resource(Resource::primitive("c", "ocf", None, "Dummy"));
        ws.seed_allowed_maps();
        place(&mut ws, a, "n1");
        place(&mut ws, b, "n1");
        place(&mut ws, c, "n1");
        ws.add_ordering(OrderingConstraint::starts("o1", a, b)).unwrap();
        ws.add_ordering(OrderingConstraint::starts("o2", b, c)).unwrap();

        let mut set = actions::synthesize(&ws);
        apply_constraints(&mut ws, &mut set);

        let a_start = set.find("a_start_0").unwrap();
        set.get_mut(a_start).flags.runnable = false;
        propagate(&mut set);

        let b_start = set.find("b_start_0").unwrap();
        let c_start = set.find("c_start_0").unwrap();
        assert!(!set.get(b_start).flags.runnable);
        assert!(!set.get(c_start).flags.runnable);
    }

    #[test]
    fn test_optional_edge_does_not_propagate() {
        let mut ws = two_node_ws();
        let a = ws.add_resource(Resource::primitive("a", "ocf", None, "Dummy"));
        let b = ws.add_resource(Resource::primitive("b", "ocf", None, "Dummy"));
        ws.seed_allowed_maps();
        place(&mut ws, a, "n1");
        place(&mut ws, b, "n1");
        let mut ordering = OrderingConstraint::starts("o1", a, b);
        ordering.kind = OrderKind::OPTIONAL;
        ws.add_ordering(ordering).unwrap();

        let mut set = actions::synthesize(&ws);
        apply_constraints(&mut ws, &mut set);

        let a_start = set.find("a_start_0").unwrap();
        set.get_mut(a_start).flags.runnable = false;
        propagate(&mut set);

        let b_start = set.find("b_start_0").unwrap();
        assert!(set.get(b_start).flags.runnable);
    }

    fn make_clone(ws: &mut WorkingSet, id: &str, template: &str, interleave: bool) -> ResourceId {
        let mut data = CloneData::new(2);
        data.max_per_node = 1;
        data.interleave = interleave;
        let clone = ws.add_resource(Resource::new(id, Variant::Clone(data)));
        let mut tpl = Resource::primitive(template, "ocf", None, "Dummy");
        tpl.parent = Some(clone);
        ws.add_resource(tpl);
        clone
    }

    #[test]
    fn test_interleave_pairs_same_node_instances() {
        let mut ws = two_node_ws();
        let first = make_clone(&mut ws, "cl-a", "a", false);
        let then = make_clone(&mut ws, "cl-b", "b", true);
        ws.materialize_instances();
        ws.seed_allowed_maps();

        // Place a:0/b:0 on n1 and a:1/b:1 on n2
        for (name, node) in [("a:0", "n1"), ("a:1", "n2"), ("b:0", "n1"), ("b:1", "n2")] {
            let rsc = ws.find_resource(name).unwrap();
            place(&mut ws, rsc, node);
        }
        ws.add_ordering(OrderingConstraint::starts("o1", first, then))
            .unwrap();

        let mut set = actions::synthesize(&ws);
        apply_constraints(&mut ws, &mut set);

        let a0 = set.find("a:0_start_0").unwrap();
        let b0 = set.find("b:0_start_0").unwrap();
        let a1 = set.find("a:1_start_0").unwrap();
        let b1 = set.find("b:1_start_0").unwrap();
        assert!(set.edges.iter().any(|e| e.first == a0 && e.then == b0));
        assert!(set.edges.iter().any(|e| e.first == a1 && e.then == b1));
        // No cross-node pairing
        assert!(!set.edges.iter().any(|e| e.first == a0 && e.then == b1));
    }

    #[test]
    fn test_interleave_without_partner_unassigns() {
        let mut ws = two_node_ws();
        let first = make_clone(&mut ws, "cl-a", "a", false);
        let then = make_clone(&mut ws, "cl-b", "b", true);
        ws.materialize_instances();
        ws.seed_allowed_maps();

        // Only one first-instance, on n1; both then-instances placed
        let a0 = ws.find_resource("a:0").unwrap();
        place(&mut ws, a0, "n1");
        let a1 = ws.find_resource("a:1").unwrap();
        crate::allocator::record_stopped(&mut ws, a1);
        let b0 = ws.find_resource("b:0").unwrap();
        let b1 = ws.find_resource("b:1").unwrap();
        place(&mut ws, b0, "n1");
        place(&mut ws, b1, "n2");
        ws.add_ordering(OrderingConstraint::starts("o1", first, then))
            .unwrap();

        let mut set = actions::synthesize(&ws);
        apply_constraints(&mut ws, &mut set);

        // b:1 had no partner on n2 and was withdrawn
        let b1_prim = ws.resource(b1).as_primitive().unwrap();
        assert_eq!(b1_prim.next_node, None);
        assert_eq!(b1_prim.next_role, Some(RscRole::Stopped));
        let b1_start = set.find("b:1_start_0").unwrap();
        assert!(!set.get(b1_start).flags.runnable);

        // b:0 kept its pairing
        let b0_prim = ws.resource(b0).as_primitive().unwrap();
        assert!(b0_prim.next_node.is_some());
    }

    #[test]
    fn test_collective_endpoint_binds_to_milestone() {
        let mut ws = two_node_ws();
        let clone = make_clone(&mut ws, "cl-a", "a", false);
        let b = ws.add_resource(Resource::primitive("b", "ocf", None, "Dummy"));
        ws.materialize_instances();
        ws.seed_allowed_maps();
        let a0 = ws.find_resource("a:0").unwrap();
        let a1 = ws.find_resource("a:1").unwrap();
        place(&mut ws, a0, "n1");
        place(&mut ws, a1, "n2");
        place(&mut ws, b, "n1");
        ws.add_ordering(OrderingConstraint::starts("o1", clone, b)).unwrap();

        let mut set = actions::synthesize(&ws);
        apply_constraints(&mut ws, &mut set);

        // b's start waits for the clone's running milestone
        let milestone = set.find("cl-a_running_0").unwrap();
        let b_start = set.find("b_start_0").unwrap();
        assert!(set
            .edges
            .iter()
            .any(|e| e.first == milestone && e.then == b_start));
    }

    #[test]
    fn test_propagation_reaches_fixpoint_on_dense_edges() {
        // A fan of mandatory edges: clearing the root clears all
        let mut ws = two_node_ws();
        let mut ids = Vec::new();
        for name in ["a", "b", "c", "d", "e"] {
            ids.push(ws.add_resource(Resource::primitive(name, "ocf", None, "Dummy")));
        }
        ws.seed_allowed_maps();
        for id in &ids {
            place(&mut ws, *id, "n1");
        }
        for window in ids.windows(2) {
            ws.add_ordering(OrderingConstraint::starts("o", window[0], window[1]))
                .unwrap();
        }

        let mut set = actions::synthesize(&ws);
        apply_constraints(&mut ws, &mut set);
        let root = set.find("a_start_0").unwrap();
        set.get_mut(root).flags.runnable = false;
        propagate(&mut set);

        for name in ["b", "c", "d", "e"] {
            let start = set.find(&format!("{name}_start_0")).unwrap();
            assert!(!set.get(start).flags.runnable, "{name} should be unrunnable");
        }
    }
}
