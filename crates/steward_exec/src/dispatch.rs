//! Action dispatch targets.
//!
//! The executor does not talk to agents or peers itself; it hands
//! actions to an [`ActionDispatcher`]. The daemon wires in the real
//! local executor proxy and peer messaging; tests use the recording
//! implementation.

use serde::{Deserialize, Serialize};
use steward_core::NodeUuid;
use steward_graph::Action;

/// Where an action executes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DispatchTarget {
    /// The local agent executor
    Local,
    /// A peer controller
    Peer(NodeUuid),
}

/// Dispatch failure
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DispatchError {
    /// Peer cannot be reached
    #[error("peer unreachable: {0}")]
    PeerUnreachable(NodeUuid),

    /// The local executor rejected the action
    #[error("local executor rejected {key}: {reason}")]
    Rejected {
        /// Action key
        key: String,
        /// Why it was rejected
        reason: String,
    },
}

/// Sink for dispatched actions
pub trait ActionDispatcher {
    /// Hand an action to its execution target
    ///
    /// # Errors
    ///
    /// Returns error if the action cannot be delivered at all;
    /// delivered-but-failed surfaces later as a completion event.
    fn dispatch(&mut self, action: &Action, target: DispatchTarget) -> Result<(), DispatchError>;
}

/// Test dispatcher that records what was dispatched where
#[derive(Debug, Default)]
pub struct RecordingDispatcher {
    /// Dispatched (action key, target) pairs in order
    pub dispatched: Vec<(String, DispatchTarget)>,
    /// Action keys to refuse
    pub refuse: Vec<String>,
}

impl RecordingDispatcher {
    /// Create an empty recorder
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Keys dispatched so far, in order
    #[must_use]
    pub fn keys(&self) -> Vec<&str> {
        self.dispatched.iter().map(|(k, _)| k.as_str()).collect()
    }
}

impl ActionDispatcher for RecordingDispatcher {
    fn dispatch(&mut self, action: &Action, target: DispatchTarget) -> Result<(), DispatchError> {
        if self.refuse.contains(&action.key) {
            return Err(DispatchError::Rejected {
                key: action.key.clone(),
                reason: "refused by test".to_string(),
            });
        }
        self.dispatched.push((action.key.clone(), target));
        Ok(())
    }
}
