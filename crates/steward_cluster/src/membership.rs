//! Live peer membership tracking.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use steward_core::NodeUuid;
use steward_state::MembershipState;
use tokio::sync::RwLock;
use tracing::info;

/// A known peer controller
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Peer {
    /// Peer node id
    pub uuid: NodeUuid,
    /// Peer node name
    pub name: String,
    /// Membership state
    pub state: MembershipState,
    /// Last heartbeat timestamp (unix millis)
    pub last_heartbeat: u64,
}

impl Peer {
    /// Create a pending peer
    #[must_use]
    pub fn new(uuid: NodeUuid, name: &str) -> Self {
        Self {
            uuid,
            name: name.to_string(),
            state: MembershipState::Pending,
            last_heartbeat: 0,
        }
    }

    /// Whether the peer is a live member
    #[must_use]
    pub fn is_member(&self) -> bool {
        self.state == MembershipState::Member
    }
}

/// Peer table shared between the event loop and message handlers
pub struct Membership {
    peers: Arc<RwLock<IndexMap<NodeUuid, Peer>>>,
    local: NodeUuid,
    heartbeat_timeout_ms: u64,
}

impl Membership {
    /// Create a membership tracker for the local node
    #[must_use]
    pub fn new(local: NodeUuid) -> Self {
        Self {
            peers: Arc::new(RwLock::new(IndexMap::new())),
            local,
            heartbeat_timeout_ms: 5000,
        }
    }

    /// The local node's id
    #[must_use]
    pub fn local(&self) -> NodeUuid {
        self.local
    }

    /// Set the heartbeat timeout
    pub fn set_heartbeat_timeout(&mut self, timeout_ms: u64) {
        self.heartbeat_timeout_ms = timeout_ms;
    }

    /// All known peers
    pub async fn peers(&self) -> Vec<Peer> {
        self.peers.read().await.values().cloned().collect()
    }

    /// Live members only
    pub async fn members(&self) -> Vec<Peer> {
        self.peers
            .read()
            .await
            .values()
            .filter(|p| p.is_member())
            .cloned()
            .collect()
    }

    /// Record a peer joining the membership
    pub async fn peer_joined(&self, uuid: NodeUuid, name: &str, now: u64) {
        let mut peers = self.peers.write().await;
        let peer = peers.entry(uuid).or_insert_with(|| Peer::new(uuid, name));
        peer.state = MembershipState::Member;
        peer.last_heartbeat = now;
        info!(peer = name, "peer joined");
    }

    /// Record a peer leaving; returns true if it was a member
    pub async fn peer_lost(&self, uuid: NodeUuid) -> bool {
        let mut peers = self.peers.write().await;
        if let Some(peer) = peers.get_mut(&uuid) {
            let was_member = peer.is_member();
            peer.state = MembershipState::Lost;
            info!(peer = %peer.name, "peer lost");
            return was_member;
        }
        false
    }

    /// Peer lookup
    pub async fn peer(&self, uuid: NodeUuid) -> Option<Peer> {
        self.peers.read().await.get(&uuid).cloned()
    }

    /// Refresh a peer's heartbeat
    pub async fn heartbeat(&self, uuid: NodeUuid, now: u64) {
        let mut peers = self.peers.write().await;
        if let Some(peer) = peers.get_mut(&uuid) {
            peer.last_heartbeat = now;
            if peer.state == MembershipState::Lost {
                peer.state = MembershipState::Member;
            }
        }
    }

    /// Move members with stale heartbeats to lost; returns them
    pub async fn check_heartbeats(&self, now: u64) -> Vec<NodeUuid> {
        let mut peers = self.peers.write().await;
        let mut lost = Vec::new();
        for (uuid, peer) in peers.iter_mut() {
            if *uuid == self.local || !peer.is_member() {
                continue;
            }
            if now.saturating_sub(peer.last_heartbeat) > self.heartbeat_timeout_ms {
                peer.state = MembershipState::Lost;
                lost.push(*uuid);
            }
        }
        lost
    }

    /// Number of live members
    pub async fn member_count(&self) -> usize {
        self.peers
            .read()
            .await
            .values()
            .filter(|p| p.is_member())
            .count()
    }
}
