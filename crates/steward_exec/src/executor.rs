//! The transition executor state machine.
//!
//! One executor instance drives exactly one graph; the FSM constructs
//! a fresh executor per transition, so overlapping transitions are
//! impossible by construction. The only cancellation primitive is a
//! whole-graph abort: pending synapses are discarded, in-flight ones
//! drain to completion or deadline.

use serde::{Deserialize, Serialize};
use steward_graph::{Action, TransitionGraph};
use tracing::{debug, warn};

use crate::dispatch::{ActionDispatcher, DispatchError, DispatchTarget};

/// Lifecycle of one synapse
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SynapseState {
    /// Waiting on inputs
    Pending,
    /// Dispatched, awaiting completion
    InFlight,
    /// Completed successfully
    Confirmed,
    /// Completed unsuccessfully
    Failed,
    /// Deadline passed without completion
    TimedOut,
    /// Discarded by an abort before dispatch
    Discarded,
}

/// Why a transition was abandoned
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum AbortReason {
    /// An action reported failure
    ActionFailed {
        /// The failed action's key
        key: String,
    },
    /// An action hit its absolute deadline
    ActionTimedOut {
        /// The expired action's key
        key: String,
    },
    /// The CIB changed under the transition
    CibChanged,
    /// A peer left the membership
    PeerLost {
        /// Name of the departed node
        node: String,
    },
    /// Operator requested an abort
    Operator,
}

/// Executor progress summary
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutorOutcome {
    /// Work remains
    InProgress,
    /// Every synapse confirmed
    Complete,
    /// Aborted and drained; the FSM should request a fresh
    /// scheduler run
    Aborted(AbortReason),
}

/// Drives one transition graph to completion or abort
pub struct TransitionExecutor {
    graph: TransitionGraph,
    states: Vec<SynapseState>,
    /// Absolute deadlines (unix millis), indexed by synapse
    deadlines: Vec<Option<u64>>,
    local_node: String,
    abort: Option<AbortReason>,
}

impl TransitionExecutor {
    /// Create an executor for a graph, executing on the given local
    /// node
    #[must_use]
    pub fn new(graph: TransitionGraph, local_node: &str) -> Self {
        let count = graph.len();
        Self {
            graph,
            states: vec![SynapseState::Pending; count],
            deadlines: vec![None; count],
            local_node: local_node.to_string(),
            abort: None,
        }
    }

    /// The graph being executed
    #[must_use]
    pub fn graph(&self) -> &TransitionGraph {
        &self.graph
    }

    /// State of one synapse
    #[must_use]
    pub fn state(&self, synapse: u32) -> Option<SynapseState> {
        self.states.get(synapse as usize).copied()
    }

    /// Pending synapses whose inputs are all confirmed, in dispatch
    /// order: descending priority, then ascending synapse id
    #[must_use]
    pub fn ready(&self) -> Vec<u32> {
        let mut ready: Vec<u32> = self
            .graph
            .synapses
            .iter()
            .filter(|s| self.states[s.id as usize] == SynapseState::Pending)
            .filter(|s| {
                s.inputs.iter().all(|input| {
                    self.graph
                        .synapse_for_action(*input)
                        .is_some_and(|producer| {
                            self.states[producer.id as usize] == SynapseState::Confirmed
                        })
                })
            })
            .map(|s| s.id)
            .collect();
        ready.sort_by(|a, b| {
            let pa = self.graph.synapses[*a as usize].priority;
            let pb = self.graph.synapses[*b as usize].priority;
            pb.cmp(&pa).then(a.cmp(b))
        });
        ready
    }

    /// Dispatch everything ready, confirming pseudo-actions inline
    ///
    /// Pseudo milestones confirm without dispatch, which can make
    /// more synapses ready; the loop runs until quiescent. Returns
    /// the synapse ids actually handed to the dispatcher.
    ///
    /// # Errors
    ///
    /// Returns error if the dispatcher cannot deliver an action; the
    /// synapse is marked failed and the graph aborted first, so the
    /// caller may treat the error as advisory.
    pub fn dispatch_ready(
        &mut self,
        now_ms: u64,
        dispatcher: &mut dyn ActionDispatcher,
    ) -> Result<Vec<u32>, DispatchError> {
        let mut dispatched = Vec::new();
        if self.abort.is_some() {
            return Ok(dispatched);
        }
        loop {
            let ready = self.ready();
            if ready.is_empty() {
                break;
            }
            let mut progressed = false;
            for id in ready {
                let (action, timeout_ms) = {
                    let synapse = &self.graph.synapses[id as usize];
                    (synapse.action.clone(), synapse.action.timeout_ms)
                };
                if action.is_pseudo() {
                    debug!(action = %action.key, "milestone confirmed");
                    self.states[id as usize] = SynapseState::Confirmed;
                    progressed = true;
                    continue;
                }
                let target = self.target_for(&action);
                match dispatcher.dispatch(&action, target) {
                    Ok(()) => {
                        let grace = match target {
                            DispatchTarget::Local => 0,
                            DispatchTarget::Peer(_) => self.graph.cluster_delay_ms,
                        };
                        self.states[id as usize] = SynapseState::InFlight;
                        self.deadlines[id as usize] = Some(now_ms + timeout_ms + grace);
                        dispatched.push(id);
                    }
                    Err(e) => {
                        warn!(action = %action.key, error = %e, "dispatch failed");
                        self.states[id as usize] = SynapseState::Failed;
                        self.begin_abort(AbortReason::ActionFailed {
                            key: action.key.clone(),
                        });
                        return Err(e);
                    }
                }
            }
            if !progressed {
                break;
            }
        }
        Ok(dispatched)
    }

    fn target_for(&self, action: &Action) -> DispatchTarget {
        match (&action.node, &action.node_uuid) {
            (Some(name), Some(uuid)) if *name != self.local_node => DispatchTarget::Peer(*uuid),
            _ => DispatchTarget::Local,
        }
    }

    /// Record the completion of a dispatched action
    pub fn on_action_result(&mut self, synapse: u32, ok: bool) -> ExecutorOutcome {
        let index = synapse as usize;
        if index >= self.states.len() || self.states[index] != SynapseState::InFlight {
            return self.outcome();
        }
        if ok {
            self.states[index] = SynapseState::Confirmed;
            self.deadlines[index] = None;
        } else {
            let key = self.graph.synapses[index].action.key.clone();
            warn!(action = %key, "action failed");
            self.states[index] = SynapseState::Failed;
            self.begin_abort(AbortReason::ActionFailed { key });
        }
        self.outcome()
    }

    /// Expire in-flight synapses past their absolute deadline
    ///
    /// A timeout is a failure for dependency purposes and aborts the
    /// graph.
    pub fn check_timeouts(&mut self, now_ms: u64) -> ExecutorOutcome {
        for index in 0..self.states.len() {
            if self.states[index] != SynapseState::InFlight {
                continue;
            }
            let Some(deadline) = self.deadlines[index] else {
                continue;
            };
            if now_ms >= deadline {
                let key = self.graph.synapses[index].action.key.clone();
                warn!(action = %key, deadline, "action timed out");
                self.states[index] = SynapseState::TimedOut;
                self.begin_abort(AbortReason::ActionTimedOut { key });
            }
        }
        self.outcome()
    }

    /// Fail everything in flight on a lost node and abort
    pub fn on_peer_lost(&mut self, node: &str) -> ExecutorOutcome {
        for index in 0..self.states.len() {
            if self.states[index] != SynapseState::InFlight {
                continue;
            }
            if self.graph.synapses[index].action.node.as_deref() == Some(node) {
                self.states[index] = SynapseState::Failed;
            }
        }
        self.begin_abort(AbortReason::PeerLost {
            node: node.to_string(),
        });
        self.outcome()
    }

    /// Abort for an external reason (CIB change, operator)
    pub fn abort(&mut self, reason: AbortReason) -> ExecutorOutcome {
        self.begin_abort(reason);
        self.outcome()
    }

    /// Discard pending synapses; in-flight actions drain on their own
    fn begin_abort(&mut self, reason: AbortReason) {
        if self.abort.is_some() {
            return;
        }
        debug!(?reason, "aborting transition");
        for state in &mut self.states {
            if *state == SynapseState::Pending {
                *state = SynapseState::Discarded;
            }
        }
        self.abort = Some(reason);
    }

    /// Whether no action is currently in flight
    #[must_use]
    pub fn is_quiescent(&self) -> bool {
        !self
            .states
            .iter()
            .any(|s| *s == SynapseState::InFlight)
    }

    /// Current outcome summary
    #[must_use]
    pub fn outcome(&self) -> ExecutorOutcome {
        if let Some(reason) = &self.abort {
            if self.is_quiescent() {
                return ExecutorOutcome::Aborted(reason.clone());
            }
            return ExecutorOutcome::InProgress;
        }
        if self
            .states
            .iter()
            .all(|s| *s == SynapseState::Confirmed)
        {
            return ExecutorOutcome::Complete;
        }
        ExecutorOutcome::InProgress
    }
}
