//! STEWARD Policy Engine
//!
//! The pure scheduling function: given a working-set snapshot, decide
//! where every resource instance runs, synthesize the actions that
//! get the cluster there, order them, and emit a transition graph.
//!
//! Nothing here performs I/O and nothing survives between runs; the
//! same snapshot always produces byte-identical output.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod actions;
pub mod allocator;
pub mod emit;
pub mod instances;
pub mod ordering;
pub mod promotion;

pub use actions::{ActionSet, OrderEdge};

use steward_core::{CoreResult, TransitionId};
use steward_graph::TransitionGraph;
use steward_state::WorkingSet;

/// Run one complete scheduler pass over a snapshot
///
/// Mutates the working set's assignment fields (`next_node`,
/// `next_role`, provisional flags, per-node counts) and returns the
/// transition graph that realizes the decisions.
///
/// # Errors
///
/// Returns error only on internal invariant violations; policy
/// problems (a resource with nowhere to run) degrade to stop
/// decisions with a structured warning.
pub fn schedule(ws: &mut WorkingSet, transition_id: TransitionId) -> CoreResult<TransitionGraph> {
    allocator::assign_all(ws);
    let mut set = actions::synthesize(ws);
    ordering::apply_constraints(ws, &mut set);
    ordering::propagate(&mut set);
    let graph = emit::emit(ws, &set, transition_id);
    graph.topo_order()?;
    Ok(graph)
}
