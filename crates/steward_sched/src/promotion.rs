//! Promotion ranking for promotable clones.
//!
//! After location assignment, placed instances are ranked by a
//! composite promotion score and the top `promoted-max` carry the
//! promoted role into the transition.

use steward_core::{ResourceId, Score};
use steward_state::{RscRole, Variant, WorkingSet};
use tracing::debug;

/// Decide promoted/unpromoted roles for a promotable clone
///
/// No-op for anything that is not a promotable clone.
pub fn promote_instances(ws: &mut WorkingSet, collective: ResourceId) {
    let (instances, promoted_max) = match &ws.resource(collective).variant {
        Variant::Clone(data) if data.promotable => {
            (data.instances.clone(), data.promoted_max)
        }
        _ => return,
    };

    let mut ranked: Vec<(ResourceId, Score, bool, String)> = Vec::new();
    for instance in instances {
        let rsc = ws.resource(instance);
        let Some(prim) = rsc.as_primitive() else { continue };
        let Some(node) = prim.next_node else { continue };
        let score = promotion_score(ws, instance, node);
        let currently_promoted = prim.role == RscRole::Promoted;
        ranked.push((instance, score, currently_promoted, rsc.id.clone()));
    }

    // Highest score first; the current holder wins ties; instance id
    // settles the rest deterministically
    ranked.sort_by(|a, b| {
        b.1.cmp(&a.1)
            .then_with(|| b.2.cmp(&a.2))
            .then_with(|| a.3.cmp(&b.3))
    });

    for (position, (instance, score, _, id)) in ranked.iter().enumerate() {
        let role = if (position as u32) < promoted_max {
            RscRole::Promoted
        } else {
            RscRole::Unpromoted
        };
        debug!(instance = %id, %score, role = %role, "promotion ranking");
        if let Some(prim) = ws.resource_mut(*instance).as_primitive_mut() {
            prim.next_role = Some(role);
        }
    }
}

/// Composite promotion score for an instance placed on a node
///
/// The per-node master attribute dominates; colocations scoped to the
/// promoted role contribute when their primary shares the node; a
/// current promoted role adds a small continuity bonus.
fn promotion_score(ws: &WorkingSet, instance: ResourceId, node: steward_core::NodeUuid) -> Score {
    let rsc = ws.resource(instance);
    let mut score = master_attribute(ws, &rsc.id, node);

    let colocation_indices: Vec<usize> = rsc
        .this_with
        .iter()
        .chain(rsc.parent.iter().flat_map(|p| ws.resource(*p).this_with.iter()))
        .copied()
        .collect();
    for index in colocation_indices {
        let colocation = &ws.colocations[index];
        if colocation.dependent_role != Some(RscRole::Promoted) {
            continue;
        }
        let primary_nodes: Vec<_> = ws
            .expand_to_primitives(colocation.primary)
            .into_iter()
            .filter_map(|p| ws.resource(p).as_primitive().and_then(|prim| prim.next_node))
            .collect();
        if primary_nodes.contains(&node) {
            score = score.plus(colocation.score);
        }
    }

    if rsc.as_primitive().map(|p| p.role) == Some(RscRole::Promoted) {
        score = score.plus(Score::new(1));
    }
    score
}

/// The `master-<resource>` transient attribute on a node
///
/// Instance numbering is stripped: `db:1` reads `master-db`.
fn master_attribute(ws: &WorkingSet, instance_id: &str, node: steward_core::NodeUuid) -> Score {
    let base = instance_id.split(':').next().unwrap_or(instance_id);
    let key = format!("master-{base}");
    ws.node(node)
        .and_then(|n| n.attributes.get(&key))
        .and_then(|v| Score::parse(v).ok())
        .unwrap_or(Score::ZERO)
}
