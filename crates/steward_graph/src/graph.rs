//! The transition graph proper.
//!
//! A synapse wraps exactly one action plus the set of trigger actions
//! whose completion gates it. The graph is acyclic by construction;
//! [`TransitionGraph::topo_order`] doubles as the cycle check.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use steward_core::{CoreError, CoreResult, TransitionId};

use crate::action::Action;

/// One vertex of the transition graph
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Synapse {
    /// Synapse id, dense from zero
    pub id: u32,
    /// Dispatch priority (ties broken by ascending id)
    pub priority: i32,
    /// The action to perform
    pub action: Action,
    /// Action ids whose completion must precede this synapse
    pub inputs: Vec<u32>,
}

/// A complete transition graph
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitionGraph {
    /// Which scheduler run produced this graph
    pub transition_id: TransitionId,
    /// Grace added to remote completion waits
    pub cluster_delay_ms: u64,
    /// Fencing timeout
    pub stonith_timeout_ms: u64,
    /// Score offset recorded on failed stops
    pub failed_stop_offset: String,
    /// Score offset recorded on failed starts
    pub failed_start_offset: String,
    /// Synapses in id order
    pub synapses: Vec<Synapse>,
}

impl TransitionGraph {
    /// Create an empty graph
    #[must_use]
    pub fn new(transition_id: TransitionId) -> Self {
        Self {
            transition_id,
            cluster_delay_ms: 60_000,
            stonith_timeout_ms: 60_000,
            failed_stop_offset: "INFINITY".to_string(),
            failed_start_offset: "INFINITY".to_string(),
            synapses: Vec::new(),
        }
    }

    /// Add a synapse for an action, returning the synapse id
    pub fn add_synapse(&mut self, action: Action, inputs: Vec<u32>) -> u32 {
        let id = self.synapses.len() as u32;
        self.synapses.push(Synapse {
            id,
            priority: action.priority,
            action,
            inputs,
        });
        id
    }

    /// Synapse by id
    #[must_use]
    pub fn synapse(&self, id: u32) -> Option<&Synapse> {
        self.synapses.get(id as usize)
    }

    /// The synapse whose action has the given action id
    #[must_use]
    pub fn synapse_for_action(&self, action_id: u32) -> Option<&Synapse> {
        self.synapses.iter().find(|s| s.action.id == action_id)
    }

    /// The action with the given key, if present
    #[must_use]
    pub fn find_action(&self, key: &str) -> Option<&Action> {
        self.synapses
            .iter()
            .map(|s| &s.action)
            .find(|a| a.key == key)
    }

    /// Number of synapses
    #[must_use]
    pub fn len(&self) -> usize {
        self.synapses.len()
    }

    /// Whether the graph has no synapses
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.synapses.is_empty()
    }

    /// Topological order of synapse ids
    ///
    /// # Errors
    ///
    /// Returns error if the graph contains a cycle or a trigger
    /// references an action no synapse produces
    pub fn topo_order(&self) -> CoreResult<Vec<u32>> {
        let by_action: IndexMap<u32, u32> = self
            .synapses
            .iter()
            .map(|s| (s.action.id, s.id))
            .collect();

        let mut in_degree = vec![0usize; self.synapses.len()];
        let mut dependents: Vec<Vec<u32>> = vec![Vec::new(); self.synapses.len()];
        for synapse in &self.synapses {
            for input in &synapse.inputs {
                let producer = *by_action.get(input).ok_or_else(|| CoreError::NotFound {
                    kind: "Action".to_string(),
                    id: input.to_string(),
                })?;
                in_degree[synapse.id as usize] += 1;
                dependents[producer as usize].push(synapse.id);
            }
        }

        let mut ready: Vec<u32> = (0..self.synapses.len() as u32)
            .filter(|id| in_degree[*id as usize] == 0)
            .collect();
        let mut order = Vec::with_capacity(self.synapses.len());
        while let Some(id) = ready.pop() {
            order.push(id);
            for dependent in &dependents[id as usize] {
                in_degree[*dependent as usize] -= 1;
                if in_degree[*dependent as usize] == 0 {
                    ready.push(*dependent);
                }
            }
        }

        if order.len() != self.synapses.len() {
            return Err(CoreError::Validation {
                field: "transition_graph".to_string(),
                reason: "cycle detected".to_string(),
            });
        }
        Ok(order)
    }

    /// Remove transitively-implied trigger edges
    ///
    /// An input `a` of a synapse is redundant when another input `c`
    /// of the same synapse is already (transitively) gated on `a`.
    pub fn transitive_reduce(&mut self) {
        let by_action: IndexMap<u32, usize> = self
            .synapses
            .iter()
            .enumerate()
            .map(|(i, s)| (s.action.id, i))
            .collect();

        let reachable = |from: u32, to: u32| -> bool {
            // Does `to`'s synapse transitively depend on action `from`?
            let mut stack = vec![to];
            let mut seen = Vec::new();
            while let Some(current) = stack.pop() {
                if seen.contains(&current) {
                    continue;
                }
                seen.push(current);
                let Some(index) = by_action.get(&current) else {
                    continue;
                };
                for input in &self.synapses[*index].inputs {
                    if *input == from {
                        return true;
                    }
                    stack.push(*input);
                }
            }
            false
        };

        let mut reduced: Vec<Vec<u32>> = Vec::with_capacity(self.synapses.len());
        for synapse in &self.synapses {
            let inputs = synapse.inputs.clone();
            let kept: Vec<u32> = inputs
                .iter()
                .filter(|a| {
                    !inputs
                        .iter()
                        .any(|c| *c != **a && reachable(**a, *c))
                })
                .copied()
                .collect();
            reduced.push(kept);
        }
        for (synapse, inputs) in self.synapses.iter_mut().zip(reduced) {
            synapse.inputs = inputs;
        }
    }
}
