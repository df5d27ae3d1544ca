//! Cluster node state.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use steward_core::NodeUuid;

/// Membership state of a node as seen by the cluster layer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MembershipState {
    /// Node is a full member
    Member,
    /// Node has dropped out of the membership
    Lost,
    /// Node is joining but not yet integrated
    Pending,
}

/// How a node participates in the cluster
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum NodeRole {
    /// Full cluster-stack node
    #[default]
    Cluster,
    /// Remote node managed over the remote protocol
    Remote,
    /// Guest node created by a resource
    Guest,
    /// Node implied by a bundle replica
    Bundle,
}

/// A cluster node in a working-set snapshot
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Node {
    /// Node identity
    pub uuid: NodeUuid,
    /// Node name (uname)
    pub name: String,
    /// Membership state
    pub membership: MembershipState,
    /// Whether the controller on the node is online
    pub online: bool,
    /// Operator-requested standby (no resources placed)
    pub standby: bool,
    /// How the node participates
    pub role: NodeRole,
    /// Node attributes (transient and permanent merged)
    pub attributes: IndexMap<String, String>,
    /// Instances assigned to this node during the current scheduler
    /// run. Zeroed at the start of each collective assignment.
    pub count: u32,
}

impl Node {
    /// Create a node, deriving its uuid from the name
    #[must_use]
    pub fn new(name: &str) -> Self {
        Self {
            uuid: NodeUuid::from_name(name),
            name: name.to_string(),
            membership: MembershipState::Pending,
            online: false,
            standby: false,
            role: NodeRole::Cluster,
            attributes: IndexMap::new(),
            count: 0,
        }
    }

    /// Set an explicit uuid
    #[must_use]
    pub fn with_uuid(mut self, uuid: NodeUuid) -> Self {
        self.uuid = uuid;
        self
    }

    /// Mark the node as an online member
    #[must_use]
    pub fn online_member(mut self) -> Self {
        self.membership = MembershipState::Member;
        self.online = true;
        self
    }

    /// Set standby
    #[must_use]
    pub fn with_standby(mut self, standby: bool) -> Self {
        self.standby = standby;
        self
    }

    /// Set an attribute
    #[must_use]
    pub fn with_attribute(mut self, name: &str, value: &str) -> Self {
        self.attributes.insert(name.to_string(), value.to_string());
        self
    }

    /// Whether the node can run resources right now
    #[must_use]
    pub fn is_available(&self) -> bool {
        self.online && self.membership == MembershipState::Member && !self.standby
    }
}
