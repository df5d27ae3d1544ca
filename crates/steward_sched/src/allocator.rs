//! Location assignment for single resources and groups.
//!
//! The allocator decides, per primitive, which node (if any) the
//! resource should occupy after the transition. Collectives delegate:
//! groups assign members in sequence on one node, clones and bundles
//! go through the instance allocator.

use indexmap::IndexMap;
use steward_core::{NodeUuid, ResourceId, Score};
use steward_state::{RscRole, Variant, WorkingSet};
use tracing::{debug, warn};

use crate::instances;
use crate::promotion;

/// Assign every resource in the working set
///
/// Top-level resources are processed in descending priority, then
/// configuration order, so higher-priority resources claim contested
/// nodes first.
pub fn assign_all(ws: &mut WorkingSet) {
    ws.reset_counts();

    let mut top_level = ws.top_level_resources();
    top_level.sort_by(|a, b| {
        let pa = ws.resource(*a).priority;
        let pb = ws.resource(*b).priority;
        pb.cmp(&pa).then(a.cmp(b))
    });

    for rsc in top_level {
        match &ws.resource(rsc).variant {
            Variant::Primitive(_) => {
                assign_primitive(ws, rsc, None);
            }
            Variant::Group(_) => {
                assign_group(ws, rsc);
            }
            Variant::Clone(_) | Variant::Bundle(_) => {
                instances::assign_collective(ws, rsc);
                promotion::promote_instances(ws, rsc);
            }
        }
    }
}

/// Decide a node for one primitive
///
/// Returns the chosen node, or `None` for an explicit stop decision.
/// With `prefer`, the preferred node is chosen when it ties for the
/// best score; the caller is responsible for reverting if it wants
/// preferred-or-nothing semantics (see the instance allocator).
pub fn assign_primitive(
    ws: &mut WorkingSet,
    rsc_id: ResourceId,
    prefer: Option<NodeUuid>,
) -> Option<NodeUuid> {
    {
        let rsc = ws.resource(rsc_id);
        if !rsc.flags.provisional {
            return rsc.as_primitive().and_then(|p| p.next_node);
        }
        if rsc.flags.allocating {
            debug!(resource = %rsc.id, "assignment loop detected involving colocations");
            return rsc.as_primitive().and_then(|p| p.next_node);
        }
    }
    ws.resource_mut(rsc_id).flags.allocating = true;

    // Orphans and administratively stopped resources never get a node
    let wants_stop = {
        let rsc = ws.resource(rsc_id);
        rsc.flags.orphan
            || rsc.flags.blocked
            || rsc.target_role() == Some(RscRole::Stopped)
            || rsc.as_primitive().is_none()
    };
    if wants_stop {
        record_stopped(ws, rsc_id);
        ws.resource_mut(rsc_id).flags.allocating = false;
        return None;
    }

    let scores = effective_scores(ws, rsc_id);
    let current = ws
        .resource(rsc_id)
        .as_primitive()
        .and_then(|p| p.current_node());

    let chosen = choose_node(&scores, current, prefer);
    match chosen {
        Some(node) => {
            record_assignment(ws, rsc_id, node);
        }
        None => {
            warn!(
                resource = %ws.resource(rsc_id).id,
                event = "no-allowed-node",
                "no node available, resource will be stopped"
            );
            record_stopped(ws, rsc_id);
        }
    }
    ws.resource_mut(rsc_id).flags.allocating = false;
    chosen
}

/// Compute the final score map: configured allowed scores, minus
/// unavailable nodes, plus stickiness and colocations
fn effective_scores(ws: &mut WorkingSet, rsc_id: ResourceId) -> IndexMap<NodeUuid, Score> {
    let mut scores = ws
        .resource(rsc_id)
        .as_primitive()
        .map(|p| p.allowed.clone())
        .unwrap_or_default();

    // Prune nodes that cannot run resources
    for (uuid, score) in scores.iter_mut() {
        match ws.node(*uuid) {
            Some(node) if node.is_available() => {}
            _ => *score = Score::NEG_INFINITY,
        }
    }

    // Stickiness favors the current location of a running resource
    let Some((current, stickiness, running)) = ws.resource(rsc_id).as_primitive().map(|prim| {
        let stickiness = if prim.stickiness == Score::ZERO {
            ws.options.default_stickiness
        } else {
            prim.stickiness
        };
        (prim.current_node(), stickiness, prim.role.is_active())
    }) else {
        return scores;
    };
    if running {
        if let Some(node) = current {
            if let Some(score) = scores.get_mut(&node) {
                *score = score.plus(stickiness);
            }
        }
    }

    apply_colocations(ws, rsc_id, &mut scores);
    scores
}

/// Recursively place a resource of any variant, guarded against
/// colocation cycles by the allocating flags
pub(crate) fn ensure_assigned(ws: &mut WorkingSet, rsc_id: ResourceId) {
    {
        let rsc = ws.resource(rsc_id);
        if !rsc.flags.provisional || rsc.flags.allocating {
            return;
        }
    }
    match &ws.resource(rsc_id).variant {
        Variant::Primitive(_) => {
            assign_primitive(ws, rsc_id, None);
        }
        Variant::Group(_) => {
            assign_group(ws, rsc_id);
        }
        Variant::Clone(_) | Variant::Bundle(_) => {
            instances::assign_collective(ws, rsc_id);
            promotion::promote_instances(ws, rsc_id);
        }
    }
}

/// Nodes a resource has been placed on: one for a primitive, the
/// union of instance placements for a collective
fn placement_nodes(ws: &WorkingSet, rsc_id: ResourceId) -> Vec<NodeUuid> {
    let rsc = ws.resource(rsc_id);
    if let Some(prim) = rsc.as_primitive() {
        return prim.next_node.into_iter().collect();
    }
    let mut nodes = Vec::new();
    for child in rsc.children() {
        for node in placement_nodes(ws, *child) {
            if !nodes.contains(&node) {
                nodes.push(node);
            }
        }
    }
    nodes
}

fn apply_colocations(
    ws: &mut WorkingSet,
    rsc_id: ResourceId,
    scores: &mut IndexMap<NodeUuid, Score>,
) {
    // "this with": follow primaries that already have a placement.
    // Role-scoped colocations feed promotion ranking, not location.
    let this_with = ws.resource(rsc_id).this_with.clone();
    for index in this_with {
        let colocation = ws.colocations[index].clone();
        if colocation.dependent_role.is_some() || colocation.primary_role.is_some() {
            continue;
        }
        ensure_assigned(ws, colocation.primary);
        let primary_nodes = placement_nodes(ws, colocation.primary);
        if primary_nodes.is_empty() {
            if colocation.score.is_infinity() {
                // Mandatory colocation with a stopped primary:
                // nowhere is acceptable
                for score in scores.values_mut() {
                    *score = Score::NEG_INFINITY;
                }
            }
        } else {
            for node in primary_nodes {
                if let Some(score) = scores.get_mut(&node) {
                    *score = score.plus(colocation.score);
                }
            }
        }
    }

    // "with this": dependents pull the primary toward where they run.
    // Positive finite pulls apply only with influence, and never from
    // a failed dependent about to move.
    let with_this = ws.resource(rsc_id).with_this.clone();
    for index in with_this {
        let colocation = ws.colocations[index].clone();
        if colocation.dependent_role.is_some() || colocation.primary_role.is_some() {
            continue;
        }
        let dependent = ws.resource(colocation.dependent);
        let failed = dependent.flags.failed;
        let dependent_node = dependent.as_primitive().and_then(|p| p.current_node());
        let Some(node) = dependent_node else { continue };

        let positive = colocation.score > Score::ZERO;
        if positive && (!colocation.influence || failed) {
            continue;
        }
        if let Some(score) = scores.get_mut(&node) {
            *score = score.plus(colocation.score);
        }
    }
}

/// Deterministic node choice: highest score, then the current node,
/// then lexicographically smallest uuid. Nodes at `-INFINITY` are
/// never eligible.
fn choose_node(
    scores: &IndexMap<NodeUuid, Score>,
    current: Option<NodeUuid>,
    prefer: Option<NodeUuid>,
) -> Option<NodeUuid> {
    let mut candidates: Vec<(NodeUuid, Score)> = scores
        .iter()
        .filter(|(_, score)| !score.is_neg_infinity())
        .map(|(uuid, score)| (*uuid, *score))
        .collect();
    if candidates.is_empty() {
        return None;
    }
    candidates.sort_by(|a, b| {
        b.1.cmp(&a.1)
            .then_with(|| {
                let a_current = Some(a.0) == current;
                let b_current = Some(b.0) == current;
                b_current.cmp(&a_current)
            })
            .then_with(|| a.0.cmp(&b.0))
    });

    let best_score = candidates[0].1;
    if let Some(prefer) = prefer {
        if let Some(entry) = candidates.iter().find(|(uuid, _)| *uuid == prefer) {
            if entry.1 == best_score {
                return Some(prefer);
            }
        }
    }
    Some(candidates[0].0)
}

fn record_assignment(ws: &mut WorkingSet, rsc_id: ResourceId, node: NodeUuid) {
    let managed = ws.resource(rsc_id).flags.managed;
    let orphan = ws.resource(rsc_id).flags.orphan;
    {
        let rsc = ws.resource_mut(rsc_id);
        rsc.flags.provisional = false;
        if let Some(prim) = rsc.as_primitive_mut() {
            prim.next_node = Some(node);
            if prim.next_role.is_none() {
                prim.next_role = Some(RscRole::Started);
            }
        }
    }
    // Managed instances always count against per-node capacity;
    // orphans are uncapped and never reach here
    if managed && !orphan {
        if let Some(node) = ws.node_mut(node) {
            node.count += 1;
        }
    }
}

/// Record an explicit stopped decision
pub(crate) fn record_stopped(ws: &mut WorkingSet, rsc_id: ResourceId) {
    let rsc = ws.resource_mut(rsc_id);
    rsc.flags.provisional = false;
    if let Some(prim) = rsc.as_primitive_mut() {
        prim.next_node = None;
        prim.next_role = Some(RscRole::Stopped);
    }
}

/// Assign a group: members follow the first member's node, in order
///
/// A member that cannot run forces every later member to stop; the
/// implicit group colocation is mandatory.
pub fn assign_group(ws: &mut WorkingSet, group_id: ResourceId) {
    if ws.resource(group_id).flags.allocating {
        debug!(resource = %ws.resource(group_id).id, "assignment loop detected");
        return;
    }
    ws.resource_mut(group_id).flags.allocating = true;
    let children: Vec<ResourceId> = ws.resource(group_id).children().to_vec();
    let mut anchor: Option<NodeUuid> = None;
    let mut blocked = false;

    for (position, child) in children.iter().enumerate() {
        if blocked {
            record_stopped(ws, *child);
            continue;
        }
        if position > 0 {
            if let Some(anchor) = anchor {
                // Later members may only run with the first member
                if let Some(prim) = ws.resource_mut(*child).as_primitive_mut() {
                    for (uuid, score) in prim.allowed.iter_mut() {
                        if *uuid != anchor {
                            *score = Score::NEG_INFINITY;
                        }
                    }
                }
            }
        }
        match assign_primitive(ws, *child, anchor) {
            Some(node) => {
                if anchor.is_none() {
                    anchor = Some(node);
                }
            }
            None => {
                blocked = true;
            }
        }
    }
    ws.resource_mut(group_id).flags.provisional = false;
    ws.resource_mut(group_id).flags.allocating = false;
}
