//! Designated Controller election.
//!
//! Lowest-uuid-wins among announced candidates: a peer with a
//! strictly lower uuid vetoes a candidacy with a no-vote. A candidate
//! that survives its election window without a veto takes over as DC.
//! Ties are impossible because node uuids are unique.

use serde::{Deserialize, Serialize};
use steward_core::NodeUuid;
use tracing::{debug, info};

/// Election configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ElectionConfig {
    /// This node's id
    pub node: NodeUuid,
    /// How long a candidacy stands before it is considered won
    pub window_ms: u64,
}

impl ElectionConfig {
    /// Config with the default election window
    #[must_use]
    pub fn new(node: NodeUuid) -> Self {
        Self {
            node,
            window_ms: 1000,
        }
    }
}

/// Election wire messages
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ElectionMsg {
    /// Broadcast candidacy announcement
    Candidacy {
        /// The candidate
        from: NodeUuid,
    },
    /// Veto from a better-ranked peer
    NoVote {
        /// The vetoing peer
        from: NodeUuid,
    },
    /// The winner announcing takeover
    Takeover {
        /// The new DC
        from: NodeUuid,
    },
}

/// Where this node stands in the current election
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ElectionState {
    /// No election running
    Idle,
    /// Candidacy announced, window open
    Electing,
    /// This node is the DC
    Won,
    /// Another node is the DC
    Lost(NodeUuid),
}

/// The election state machine for one node
#[derive(Debug)]
pub struct Election {
    config: ElectionConfig,
    state: ElectionState,
    announced_at: Option<u64>,
    vetoed_by: Option<NodeUuid>,
}

impl Election {
    /// Create an idle election
    #[must_use]
    pub fn new(config: ElectionConfig) -> Self {
        Self {
            config,
            state: ElectionState::Idle,
            announced_at: None,
            vetoed_by: None,
        }
    }

    /// Current state
    #[must_use]
    pub fn state(&self) -> ElectionState {
        self.state
    }

    /// Whether this node currently holds the DC role
    #[must_use]
    pub fn is_dc(&self) -> bool {
        self.state == ElectionState::Won
    }

    /// Open a candidacy; returns the announcement to broadcast
    pub fn start(&mut self, now: u64) -> ElectionMsg {
        debug!(node = %self.config.node, "announcing candidacy");
        self.state = ElectionState::Electing;
        self.announced_at = Some(now);
        self.vetoed_by = None;
        ElectionMsg::Candidacy {
            from: self.config.node,
        }
    }

    /// Handle a peer's candidacy
    ///
    /// A higher-ranked (lower-uuid) local node vetoes; a lower-ranked
    /// local node concedes the window to the peer.
    pub fn on_candidacy(&mut self, from: NodeUuid) -> Option<ElectionMsg> {
        if from == self.config.node {
            return None;
        }
        if self.config.node < from {
            // We outrank the candidate
            debug!(candidate = %from, "vetoing candidacy");
            return Some(ElectionMsg::NoVote {
                from: self.config.node,
            });
        }
        // The candidate outranks us; it will veto our candidacy too
        if self.state == ElectionState::Electing {
            self.vetoed_by = Some(
                self.vetoed_by
                    .map_or(from, |existing| existing.min(from)),
            );
        }
        None
    }

    /// Handle a veto
    pub fn on_no_vote(&mut self, from: NodeUuid) {
        if from < self.config.node && self.state == ElectionState::Electing {
            debug!(vetoer = %from, "candidacy vetoed");
            self.vetoed_by = Some(
                self.vetoed_by
                    .map_or(from, |existing| existing.min(from)),
            );
        }
    }

    /// Handle the winner's takeover announcement
    pub fn on_takeover(&mut self, from: NodeUuid) {
        if from == self.config.node {
            return;
        }
        info!(dc = %from, "accepting new DC");
        self.state = ElectionState::Lost(from);
        self.announced_at = None;
    }

    /// Close the window if it has expired
    ///
    /// Returns the takeover announcement when this node won.
    pub fn tick(&mut self, now: u64) -> Option<ElectionMsg> {
        if self.state != ElectionState::Electing {
            return None;
        }
        let announced = self.announced_at?;
        if now.saturating_sub(announced) < self.config.window_ms {
            return None;
        }
        match self.vetoed_by {
            None => {
                info!(node = %self.config.node, "election won, taking over as DC");
                self.state = ElectionState::Won;
                Some(ElectionMsg::Takeover {
                    from: self.config.node,
                })
            }
            Some(winner) => {
                debug!(winner = %winner, "election lost");
                self.state = ElectionState::Lost(winner);
                None
            }
        }
    }

    /// Step down (peer loss, error recovery); next tick re-enters
    /// idle until a new candidacy is started
    pub fn reset(&mut self) {
        self.state = ElectionState::Idle;
        self.announced_at = None;
        self.vetoed_by = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ordered_uuids() -> (NodeUuid, NodeUuid) {
        let a = NodeUuid::from_name("node-a");
        let b = NodeUuid::from_name("node-b");
        if a < b {
            (a, b)
        } else {
            (b, a)
        }
    }

    #[test]
    fn test_unopposed_candidate_wins() {
        let (low, _) = ordered_uuids();
        let mut election = Election::new(ElectionConfig::new(low));
        election.start(0);
        assert_eq!(election.state(), ElectionState::Electing);

        // Window not yet closed
        assert!(election.tick(999).is_none());
        let takeover = election.tick(1000);
        assert_eq!(takeover, Some(ElectionMsg::Takeover { from: low }));
        assert!(election.is_dc());
    }

    #[test]
    fn test_lower_uuid_vetoes_higher() {
        let (low, high) = ordered_uuids();
        let mut election = Election::new(ElectionConfig::new(low));
        election.start(0);

        let reply = election.on_candidacy(high);
        assert_eq!(reply, Some(ElectionMsg::NoVote { from: low }));
        // The veto does not cost the better candidate its own run
        assert_eq!(election.tick(1000), Some(ElectionMsg::Takeover { from: low }));
    }

    #[test]
    fn test_vetoed_candidate_loses() {
        let (low, high) = ordered_uuids();
        let mut election = Election::new(ElectionConfig::new(high));
        election.start(0);

        election.on_no_vote(low);
        assert!(election.tick(1000).is_none());
        assert_eq!(election.state(), ElectionState::Lost(low));
    }

    #[test]
    fn test_candidacy_from_better_peer_concedes() {
        let (low, high) = ordered_uuids();
        let mut election = Election::new(ElectionConfig::new(high));
        election.start(0);

        // Seeing the better candidacy is as good as a veto
        assert!(election.on_candidacy(low).is_none());
        assert!(election.tick(1000).is_none());
        assert_eq!(election.state(), ElectionState::Lost(low));
    }

    #[test]
    fn test_takeover_accepted() {
        let (low, high) = ordered_uuids();
        let mut election = Election::new(ElectionConfig::new(high));
        election.start(0);
        election.on_takeover(low);
        assert_eq!(election.state(), ElectionState::Lost(low));
    }

    #[test]
    fn test_reset_reenters_idle() {
        let (low, _) = ordered_uuids();
        let mut election = Election::new(ElectionConfig::new(low));
        election.start(0);
        election.tick(1000);
        assert!(election.is_dc());

        election.reset();
        assert_eq!(election.state(), ElectionState::Idle);
    }

    #[test]
    fn test_two_node_cluster_agrees() {
        let (low, high) = ordered_uuids();
        let mut a = Election::new(ElectionConfig::new(low));
        let mut b = Election::new(ElectionConfig::new(high));

        let a_candidacy = a.start(0);
        let b_candidacy = b.start(0);

        // Cross-deliver candidacies
        let ElectionMsg::Candidacy { from: a_from } = a_candidacy else {
            panic!("expected candidacy")
        };
        let ElectionMsg::Candidacy { from: b_from } = b_candidacy else {
            panic!("expected candidacy")
        };
        if let Some(ElectionMsg::NoVote { from }) = a.on_candidacy(b_from) {
            b.on_no_vote(from);
        }
        assert!(b.on_candidacy(a_from).is_none());

        let takeover = a.tick(1000).expect("a wins");
        assert!(b.tick(1000).is_none());
        if let ElectionMsg::Takeover { from } = takeover {
            b.on_takeover(from);
        }

        assert!(a.is_dc());
        assert_eq!(b.state(), ElectionState::Lost(low));
    }
}
