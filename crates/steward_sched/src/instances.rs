//! Clone instance and bundle replica assignment.
//!
//! Two-pass placement: instances that are already running healthily
//! keep their node when the per-node optimum allows it, then the
//! remainder go through the single-resource allocator. The per-node
//! hard cap is enforced by banning full nodes before each choice.

use steward_core::{NodeUuid, ResourceId, Score};
use steward_state::{Variant, WorkingSet};
use tracing::{debug, trace};

use crate::allocator;

/// Assign the instances of a clone or the replicas of a bundle
pub fn assign_collective(ws: &mut WorkingSet, collective: ResourceId) {
    let (instances, max_total, max_per_node) = match &ws.resource(collective).variant {
        Variant::Clone(data) => (data.instances.clone(), data.max_total, data.max_per_node),
        Variant::Bundle(data) => (data.replicas.clone(), data.replica_count, data.max_per_node),
        _ => return,
    };
    if ws.resource(collective).flags.allocating {
        debug!(resource = %ws.resource(collective).id, "assignment loop detected");
        return;
    }
    ws.resource_mut(collective).flags.allocating = true;

    // An administratively stopped collective stops every instance
    if ws.resource(collective).target_role() == Some(steward_state::RscRole::Stopped) {
        for instance in &instances {
            ban_everywhere(ws, *instance);
        }
        let collective_rsc = ws.resource_mut(collective);
        collective_rsc.flags.provisional = false;
        collective_rsc.flags.allocating = false;
        return;
    }

    // Node counts track instances of this collective only
    ws.reset_counts();
    let available_nodes = ws.available_nodes().len() as u32;

    // Finite positive preferences from the collective's colocations
    // are copied to instances only when nodes outnumber instances,
    // which avoids needless shuffling
    let all_coloc = max_total < available_nodes;
    append_parent_colocations(ws, collective, &instances, all_coloc);

    let optimal_per_node = if available_nodes > 0 {
        (max_total / available_nodes).max(1)
    } else {
        0
    };
    debug!(
        resource = %ws.resource(collective).id,
        max_total,
        max_per_node,
        optimal_per_node,
        available_nodes,
        "assigning instances"
    );

    let mut assigned = 0u32;

    // Preferred pass: keep healthy instances where they run
    for instance in &instances {
        if assigned >= max_total {
            break;
        }
        let Some(current) = preferred_node(ws, *instance, optimal_per_node) else {
            continue;
        };
        if assign_instance(ws, *instance, Some(current), max_per_node) {
            trace!(instance = %ws.resource(*instance).id, "kept on current node");
            assigned += 1;
        }
    }

    // Free pass: place the rest, stop the overflow
    for instance in &instances {
        if !ws.resource(*instance).flags.provisional {
            continue;
        }
        if assigned >= max_total {
            debug!(
                instance = %ws.resource(*instance).id,
                "not assigning: collective limit reached"
            );
            ban_everywhere(ws, *instance);
        } else if assign_instance(ws, *instance, None, max_per_node) {
            assigned += 1;
        }
    }

    let collective_rsc = ws.resource_mut(collective);
    collective_rsc.flags.provisional = false;
    collective_rsc.flags.allocating = false;
}

/// Whether an instance should try to stay where it is
///
/// Requires the instance to be running, healthy, still unplaced, and
/// its node to be available with fewer than the optimal number of
/// instances already kept there.
fn preferred_node(
    ws: &WorkingSet,
    instance: ResourceId,
    optimal_per_node: u32,
) -> Option<NodeUuid> {
    let rsc = ws.resource(instance);
    let prim = rsc.as_primitive()?;
    if prim.running_on.is_empty() || !rsc.flags.provisional || rsc.flags.failed {
        return None;
    }
    let current = prim.current_node()?;
    let node = ws.node(current)?;
    if !node.is_available() {
        trace!(instance = %rsc.id, node = %node.name, "not keeping: node unavailable");
        return None;
    }
    if node.count >= optimal_per_node {
        trace!(
            instance = %rsc.id,
            node = %node.name,
            "not keeping: optimal instances already assigned"
        );
        return None;
    }
    Some(current)
}

/// Whether a node may run one more instance
fn can_run_instance(ws: &WorkingSet, instance: ResourceId, node: NodeUuid, max_per_node: u32) -> bool {
    let rsc = ws.resource(instance);
    if rsc.flags.orphan {
        return false;
    }
    let Some(node_state) = ws.node(node) else {
        return false;
    };
    if !node_state.is_available() {
        return false;
    }
    if node_state.count >= max_per_node {
        return false;
    }
    // Negative parent scores block instances entirely
    rsc.as_primitive()
        .and_then(|p| p.allowed.get(&node))
        .is_some_and(|score| *score >= Score::ZERO)
}

/// Ban an instance from every node it cannot run on right now
fn ban_unavailable_nodes(ws: &mut WorkingSet, instance: ResourceId, max_per_node: u32) {
    let nodes: Vec<NodeUuid> = ws
        .resource(instance)
        .as_primitive()
        .map(|p| p.allowed.keys().copied().collect())
        .unwrap_or_default();
    for node in nodes {
        if !can_run_instance(ws, instance, node, max_per_node) {
            if let Some(prim) = ws.resource_mut(instance).as_primitive_mut() {
                prim.allowed.insert(node, Score::NEG_INFINITY);
            }
        }
    }
}

/// Try to place one instance, optionally preferring a node
///
/// With a preference, the assignment is preferred-or-nothing: if the
/// allocator picks a better node, the choice is reverted and the
/// instance stays provisional for the free pass.
fn assign_instance(
    ws: &mut WorkingSet,
    instance: ResourceId,
    prefer: Option<NodeUuid>,
    max_per_node: u32,
) -> bool {
    {
        let rsc = ws.resource(instance);
        if !rsc.flags.provisional {
            return rsc.as_primitive().and_then(|p| p.next_node).is_some();
        }
        if rsc.flags.allocating {
            debug!(instance = %rsc.id, "assignment loop detected");
            return false;
        }
        if rsc.flags.orphan {
            // Orphans are never placed and never counted
            return false;
        }
    }

    if let Some(prefer) = prefer {
        let ok = ws
            .resource(instance)
            .as_primitive()
            .and_then(|p| p.allowed.get(&prefer))
            .is_some_and(|score| *score >= Score::ZERO);
        if !ok {
            return false;
        }
    }

    ban_unavailable_nodes(ws, instance, max_per_node);

    match prefer {
        None => allocator::assign_primitive(ws, instance, None).is_some(),
        Some(prefer) => {
            let backup = ws
                .resource(instance)
                .as_primitive()
                .map(|p| p.allowed.clone())
                .unwrap_or_default();
            let chosen = allocator::assign_primitive(ws, instance, Some(prefer));
            match chosen {
                Some(node) if node == prefer => true,
                Some(node) => {
                    debug!(
                        instance = %ws.resource(instance).id,
                        "not keeping on preferred node: a better node won"
                    );
                    unassign_instance(ws, instance, node);
                    if let Some(prim) = ws.resource_mut(instance).as_primitive_mut() {
                        prim.allowed = backup;
                    }
                    false
                }
                None => false,
            }
        }
    }
}

/// Revert a placement made by the allocator
fn unassign_instance(ws: &mut WorkingSet, instance: ResourceId, node: NodeUuid) {
    if let Some(node) = ws.node_mut(node) {
        node.count = node.count.saturating_sub(1);
    }
    let rsc = ws.resource_mut(instance);
    rsc.flags.provisional = true;
    if let Some(prim) = rsc.as_primitive_mut() {
        prim.next_node = None;
        prim.next_role = None;
    }
}

/// Ban an instance everywhere and record a stop decision
fn ban_everywhere(ws: &mut WorkingSet, instance: ResourceId) {
    if let Some(prim) = ws.resource_mut(instance).as_primitive_mut() {
        for score in prim.allowed.values_mut() {
            *score = Score::NEG_INFINITY;
        }
    }
    allocator::record_stopped(ws, instance);
}

/// Copy the collective's colocation edges down to its instances
///
/// All edges are copied when `all`; otherwise only the essential
/// ones: negative scores always, and infinite attraction on the
/// dependent side.
fn append_parent_colocations(
    ws: &mut WorkingSet,
    collective: ResourceId,
    instances: &[ResourceId],
    all: bool,
) {
    let this_with = ws.resource(collective).this_with.clone();
    let with_this = ws.resource(collective).with_this.clone();

    for instance in instances {
        for index in &this_with {
            let score = ws.colocations[*index].score;
            if all || score < Score::ZERO || score.is_infinity() {
                let list = &mut ws.resource_mut(*instance).this_with;
                if !list.contains(index) {
                    list.push(*index);
                }
            }
        }
        for index in &with_this {
            let colocation = &ws.colocations[*index];
            let score = colocation.score;
            let influence = colocation.influence;
            if !influence && score > Score::ZERO {
                continue;
            }
            if all || score < Score::ZERO {
                let list = &mut ws.resource_mut(*instance).with_this;
                if !list.contains(index) {
                    list.push(*index);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use steward_state::{CloneData, Node, Resource, RscRole};

    fn make_clone_ws(node_names: &[&str], max_total: u32, max_per_node: u32) -> (WorkingSet, ResourceId) {
        let mut ws = WorkingSet::new();
        for name in node_names {
            ws.add_node(Node::new(name).online_member());
        }
        let mut data = CloneData::new(max_total);
        data.max_per_node = max_per_node;
        let clone = ws.add_resource(Resource::new("cl", Variant::Clone(data)));
        let mut template = Resource::primitive("web", "ocf", None, "apache");
        template.parent = Some(clone);
        ws.add_resource(template);
        ws.materialize_instances();
        ws.seed_allowed_maps();
        (ws, clone)
    }

    fn distribution(ws: &WorkingSet, clone: ResourceId) -> Vec<u32> {
        let mut counts: Vec<u32> = ws
            .nodes
            .iter()
            .map(|node| {
                ws.resource(clone)
                    .children()
                    .iter()
                    .filter(|c| {
                        ws.resource(**c)
                            .as_primitive()
                            .and_then(|p| p.next_node)
                            == Some(node.uuid)
                    })
                    .count() as u32
            })
            .collect();
        counts.sort_unstable();
        counts.reverse();
        counts
    }

    #[test]
    fn test_clone_five_over_three_nodes_respects_node_max() {
        let (mut ws, clone) = make_clone_ws(&["n1", "n2", "n3"], 5, 2);
        assign_collective(&mut ws, clone);
        assert_eq!(distribution(&ws, clone), vec![2, 2, 1]);
    }

    #[test]
    fn test_clone_distribution_is_deterministic() {
        let (mut ws1, clone1) = make_clone_ws(&["n1", "n2", "n3"], 5, 2);
        let (mut ws2, clone2) = make_clone_ws(&["n1", "n2", "n3"], 5, 2);
        assign_collective(&mut ws1, clone1);
        assign_collective(&mut ws2, clone2);

        let nodes1: Vec<_> = ws1
            .resource(clone1)
            .children()
            .iter()
            .map(|c| ws1.resource(*c).as_primitive().unwrap().next_node)
            .collect();
        let nodes2: Vec<_> = ws2
            .resource(clone2)
            .children()
            .iter()
            .map(|c| ws2.resource(*c).as_primitive().unwrap().next_node)
            .collect();
        assert_eq!(nodes1, nodes2);
    }

    #[test]
    fn test_per_node_cap_never_exceeded() {
        let (mut ws, clone) = make_clone_ws(&["n1", "n2"], 6, 2);
        assign_collective(&mut ws, clone);
        // Only 4 fit; the rest are stopped
        let placed: Vec<_> = ws
            .resource(clone)
            .children()
            .iter()
            .filter(|c| ws.resource(**c).as_primitive().unwrap().next_node.is_some())
            .collect();
        assert_eq!(placed.len(), 4);
        for node in &ws.nodes {
            assert!(node.count <= 2);
        }
    }

    #[test]
    fn test_running_instance_keeps_its_node() {
        let (mut ws, clone) = make_clone_ws(&["n1", "n2", "n3"], 3, 1);
        let instance = ws.resource(clone).children()[1];
        let n3 = ws.node_by_name("n3").unwrap().uuid;
        {
            let prim = ws.resource_mut(instance).as_primitive_mut().unwrap();
            prim.running_on.push(n3);
            prim.role = RscRole::Started;
        }
        assign_collective(&mut ws, clone);
        assert_eq!(
            ws.resource(instance).as_primitive().unwrap().next_node,
            Some(n3)
        );
    }

    #[test]
    fn test_failed_instance_not_kept_early() {
        let (mut ws, clone) = make_clone_ws(&["n1", "n2"], 2, 1);
        let instance = ws.resource(clone).children()[0];
        let n2 = ws.node_by_name("n2").unwrap().uuid;
        {
            let prim = ws.resource_mut(instance).as_primitive_mut().unwrap();
            prim.running_on.push(n2);
            prim.role = RscRole::Started;
        }
        ws.resource_mut(instance).flags.failed = true;
        // Failed instances skip the preferred pass but still get a
        // node in the free pass
        assign_collective(&mut ws, clone);
        assert!(ws
            .resource(instance)
            .as_primitive()
            .unwrap()
            .next_node
            .is_some());
    }

    #[test]
    fn test_overflow_instances_banned_and_stopped() {
        let (mut ws, clone) = make_clone_ws(&["n1"], 3, 1);
        assign_collective(&mut ws, clone);

        let children = ws.resource(clone).children().to_vec();
        let placed = children
            .iter()
            .filter(|c| ws.resource(**c).as_primitive().unwrap().next_node.is_some())
            .count();
        assert_eq!(placed, 1);
        for child in children {
            let rsc = ws.resource(child);
            if rsc.as_primitive().unwrap().next_node.is_none() {
                assert_eq!(rsc.as_primitive().unwrap().next_role, Some(RscRole::Stopped));
                assert!(!rsc.flags.provisional);
            }
        }
    }

    #[test]
    fn test_orphan_instance_never_assigned() {
        let (mut ws, clone) = make_clone_ws(&["n1", "n2"], 2, 1);
        let orphan = ws.resource(clone).children()[0];
        ws.resource_mut(orphan).flags.orphan = true;

        assign_collective(&mut ws, clone);

        assert!(ws
            .resource(orphan)
            .as_primitive()
            .unwrap()
            .next_node
            .is_none());
        // The orphan contributed nothing to any per-node count
        let total: u32 = ws.nodes.iter().map(|n| n.count).sum();
        let placed = ws
            .resource(clone)
            .children()
            .iter()
            .filter(|c| ws.resource(**c).as_primitive().unwrap().next_node.is_some())
            .count() as u32;
        assert_eq!(total, placed);
    }

    #[test]
    fn test_offline_node_gets_no_instances() {
        let mut ws = WorkingSet::new();
        ws.add_node(Node::new("n1").online_member());
        ws.add_node(Node::new("n2"));
        let mut data = CloneData::new(2);
        data.max_per_node = 2;
        let clone = ws.add_resource(Resource::new("cl", Variant::Clone(data)));
        let mut template = Resource::primitive("web", "ocf", None, "apache");
        template.parent = Some(clone);
        ws.add_resource(template);
        ws.materialize_instances();
        ws.seed_allowed_maps();

        assign_collective(&mut ws, clone);

        let n2 = ws.node_by_name("n2").unwrap().uuid;
        for child in ws.resource(clone).children() {
            assert_ne!(
                ws.resource(*child).as_primitive().unwrap().next_node,
                Some(n2)
            );
        }
    }
}
