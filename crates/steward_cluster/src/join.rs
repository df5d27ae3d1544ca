//! The join handshake.
//!
//! After an election, every non-DC member announces itself; the DC
//! replies with an offer carrying the expected CIB epoch, the node
//! answers with its authoritative local state, and the DC acknowledges
//! once integrated. A step that stalls past its timeout sends the
//! node back to election.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use steward_core::NodeUuid;
use steward_state::CibVersion;
use tracing::{debug, info, warn};

/// Where a node stands in the handshake
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JoinPhase {
    /// Node announced, no offer yet
    Announced,
    /// Offer sent, awaiting the node's state
    Offered,
    /// State received, integration pending
    Requested,
    /// Fully joined
    Acked,
}

/// Handshake failure
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum JoinError {
    /// Message from a node not in the handshake
    #[error("unknown joiner: {0}")]
    UnknownJoiner(NodeUuid),

    /// Message arrived out of phase
    #[error("unexpected message in phase {phase:?}")]
    WrongPhase {
        /// The phase the node was in
        phase: JoinPhase,
    },
}

/// DC-side join coordinator
#[derive(Debug)]
pub struct DcJoin {
    expected_version: CibVersion,
    joiners: IndexMap<NodeUuid, (JoinPhase, u64)>,
    step_timeout_ms: u64,
}

impl DcJoin {
    /// Start coordinating joins against the given CIB version
    #[must_use]
    pub fn new(expected_version: CibVersion) -> Self {
        Self {
            expected_version,
            joiners: IndexMap::new(),
            step_timeout_ms: 5000,
        }
    }

    /// Set the per-step timeout
    pub fn set_step_timeout(&mut self, timeout_ms: u64) {
        self.step_timeout_ms = timeout_ms;
    }

    /// Handle a node's announcement; returns the offer to send back
    pub fn on_announce(&mut self, node: NodeUuid, now: u64) -> CibVersion {
        debug!(node = %node, "join announced");
        self.joiners.insert(node, (JoinPhase::Offered, now));
        self.expected_version
    }

    /// Handle a node's state submission
    ///
    /// The payload is the node's authoritative local state, integrated
    /// into the CIB by the caller. Returns whether every joiner is now
    /// acked, in which case the caller broadcasts the final ack.
    ///
    /// # Errors
    ///
    /// Returns error for unknown joiners or out-of-phase requests
    pub fn on_request(&mut self, node: NodeUuid, now: u64) -> Result<bool, JoinError> {
        let Some((phase, at)) = self.joiners.get_mut(&node) else {
            return Err(JoinError::UnknownJoiner(node));
        };
        if *phase != JoinPhase::Offered {
            return Err(JoinError::WrongPhase { phase: *phase });
        }
        *phase = JoinPhase::Acked;
        *at = now;
        info!(node = %node, "join integrated");
        Ok(self.all_joined())
    }

    /// Whether every known joiner has completed the handshake
    #[must_use]
    pub fn all_joined(&self) -> bool {
        !self.joiners.is_empty()
            && self
                .joiners
                .values()
                .all(|(phase, _)| *phase == JoinPhase::Acked)
    }

    /// Joiners whose current step has stalled past the timeout
    ///
    /// Stalled joiners are dropped from the handshake; the caller
    /// re-enters election.
    pub fn check_timeouts(&mut self, now: u64) -> Vec<NodeUuid> {
        let timeout = self.step_timeout_ms;
        let stalled: Vec<NodeUuid> = self
            .joiners
            .iter()
            .filter(|(_, (phase, at))| {
                *phase != JoinPhase::Acked && now.saturating_sub(*at) > timeout
            })
            .map(|(node, _)| *node)
            .collect();
        for node in &stalled {
            warn!(node = %node, "join step timed out");
            self.joiners.shift_remove(node);
        }
        stalled
    }

    /// Number of nodes in the handshake
    #[must_use]
    pub fn joiner_count(&self) -> usize {
        self.joiners.len()
    }
}

/// Node-side join state
#[derive(Debug)]
pub struct Joiner {
    phase: JoinPhase,
    started_at: u64,
    step_timeout_ms: u64,
}

impl Joiner {
    /// Announce to the DC; the announcement itself is sent by the
    /// caller
    #[must_use]
    pub fn announce(now: u64) -> Self {
        Self {
            phase: JoinPhase::Announced,
            started_at: now,
            step_timeout_ms: 5000,
        }
    }

    /// Current phase
    #[must_use]
    pub fn phase(&self) -> JoinPhase {
        self.phase
    }

    /// Handle the DC's offer; the caller replies with local state
    ///
    /// # Errors
    ///
    /// Returns error when not awaiting an offer
    pub fn on_offer(&mut self, _expected: CibVersion, now: u64) -> Result<(), JoinError> {
        if self.phase != JoinPhase::Announced {
            return Err(JoinError::WrongPhase { phase: self.phase });
        }
        self.phase = JoinPhase::Requested;
        self.started_at = now;
        Ok(())
    }

    /// Handle the DC's final ack
    ///
    /// # Errors
    ///
    /// Returns error when no request is outstanding
    pub fn on_ack(&mut self) -> Result<(), JoinError> {
        if self.phase != JoinPhase::Requested {
            return Err(JoinError::WrongPhase { phase: self.phase });
        }
        self.phase = JoinPhase::Acked;
        Ok(())
    }

    /// Whether the current step has stalled; stalling re-enters
    /// election
    #[must_use]
    pub fn timed_out(&self, now: u64) -> bool {
        self.phase != JoinPhase::Acked
            && now.saturating_sub(self.started_at) > self.step_timeout_ms
    }
}
