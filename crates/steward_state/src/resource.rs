//! Resources and their variants.
//!
//! A resource is exactly one of: primitive, group, clone, or bundle.
//! Variant-specific state lives inside the variant payload so that a
//! primitive cannot carry clone fields and vice versa.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use steward_core::{ActionTask, NodeUuid, ResourceId, Score};

/// Role of a resource instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default)]
pub enum RscRole {
    /// State could not be determined
    Unknown,
    /// Not running anywhere
    #[default]
    Stopped,
    /// Running
    Started,
    /// Running, not promoted
    Unpromoted,
    /// Running in the promoted role
    Promoted,
}

impl RscRole {
    /// Wire name
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Unknown => "Unknown",
            Self::Stopped => "Stopped",
            Self::Started => "Started",
            Self::Unpromoted => "Unpromoted",
            Self::Promoted => "Promoted",
        }
    }

    /// Parse a wire name (legacy aliases included)
    #[must_use]
    pub fn parse(s: &str) -> Self {
        match s {
            "Stopped" => Self::Stopped,
            "Started" => Self::Started,
            "Unpromoted" | "Slave" => Self::Unpromoted,
            "Promoted" | "Master" => Self::Promoted,
            _ => Self::Unknown,
        }
    }

    /// Whether the role means the resource is active on a node
    #[must_use]
    pub const fn is_active(&self) -> bool {
        matches!(self, Self::Started | Self::Unpromoted | Self::Promoted)
    }
}

impl std::fmt::Display for RscRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Reaction to a failed action
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum OnFail {
    /// Pretend it succeeded
    Ignore,
    /// Stop managing the resource on that node
    Block,
    /// Stop the resource everywhere
    Stop,
    /// Stop and start again (default)
    #[default]
    Restart,
    /// Fence the node the failure occurred on
    Fence,
    /// Move all resources off the node
    Standby,
}

impl OnFail {
    /// Parse a configuration value, defaulting to restart
    #[must_use]
    pub fn parse(s: &str) -> Self {
        match s {
            "ignore" => Self::Ignore,
            "block" => Self::Block,
            "stop" => Self::Stop,
            "fence" => Self::Fence,
            "standby" => Self::Standby,
            _ => Self::Restart,
        }
    }
}

/// A configured recurring operation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecurringOp {
    /// Operation task (monitor, almost always)
    pub task: ActionTask,
    /// Interval between runs in milliseconds (0 = not recurring)
    pub interval_ms: u64,
    /// Per-run timeout in milliseconds
    pub timeout_ms: u64,
    /// Reaction to failure of this operation
    pub on_fail: OnFail,
}

impl RecurringOp {
    /// A monitor at the given interval
    #[must_use]
    pub fn monitor(interval_ms: u64, timeout_ms: u64) -> Self {
        Self {
            task: ActionTask::Monitor,
            interval_ms,
            timeout_ms,
            on_fail: OnFail::Restart,
        }
    }
}

/// Per-resource state flags
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceFlags {
    /// Present in status but no longer configured
    pub orphan: bool,
    /// Cluster may start/stop it
    pub managed: bool,
    /// No placement chosen yet this scheduler run
    pub provisional: bool,
    /// Assignment in progress (cycle guard)
    pub allocating: bool,
    /// Last relevant action failed
    pub failed: bool,
    /// Blocked by on-fail=block
    pub blocked: bool,
    /// Notifications requested around lifecycle operations
    pub notify: bool,
}

impl Default for ResourceFlags {
    fn default() -> Self {
        Self {
            orphan: false,
            managed: true,
            provisional: true,
            allocating: false,
            failed: false,
            blocked: false,
            notify: false,
        }
    }
}

/// Primitive-only state
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Primitive {
    /// Agent standard (ocf, systemd, stonith, container)
    pub class: String,
    /// Agent provider, for classes that have one
    pub provider: Option<String>,
    /// Agent type name
    pub agent_type: String,
    /// Allowed-node score map; `-INFINITY` bans, `+INFINITY` requires
    pub allowed: IndexMap<NodeUuid, Score>,
    /// Nodes the resource was observed running on
    pub running_on: Vec<NodeUuid>,
    /// Observed role
    pub role: RscRole,
    /// Role decided by the current scheduler run
    pub next_role: Option<RscRole>,
    /// Node decided by the current scheduler run
    pub next_node: Option<NodeUuid>,
    /// Additive preference for the current node
    pub stickiness: Score,
    /// Configured recurring operations
    pub operations: Vec<RecurringOp>,
    /// Reaction to a failed start/stop
    pub on_fail: OnFail,
}

impl Primitive {
    /// A minimal ocf primitive
    #[must_use]
    pub fn new(class: &str, provider: Option<&str>, agent_type: &str) -> Self {
        Self {
            class: class.to_string(),
            provider: provider.map(str::to_string),
            agent_type: agent_type.to_string(),
            allowed: IndexMap::new(),
            running_on: Vec::new(),
            role: RscRole::Stopped,
            next_role: None,
            next_node: None,
            stickiness: Score::ZERO,
            operations: Vec::new(),
            on_fail: OnFail::Restart,
        }
    }

    /// The node the resource currently occupies, if any
    #[must_use]
    pub fn current_node(&self) -> Option<NodeUuid> {
        self.running_on.first().copied()
    }
}

/// Group payload: members run on one node, started in order
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct GroupData {
    /// Members in start order
    pub children: Vec<ResourceId>,
}

/// Clone payload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CloneData {
    /// Materialized instances
    pub instances: Vec<ResourceId>,
    /// clone-max: total instances to run
    pub max_total: u32,
    /// clone-node-max: instances allowed per node
    pub max_per_node: u32,
    /// Whether instances carry promoted/unpromoted roles
    pub promotable: bool,
    /// promoted-max: instances to promote
    pub promoted_max: u32,
    /// Pair instance orderings with peers on the same node
    pub interleave: bool,
}

impl CloneData {
    /// Clone configuration with the usual defaults
    #[must_use]
    pub fn new(max_total: u32) -> Self {
        Self {
            instances: Vec::new(),
            max_total,
            max_per_node: 1,
            promotable: false,
            promoted_max: 1,
            interleave: false,
        }
    }
}

/// Bundle payload: container replicas plus their implied nodes
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BundleData {
    /// Materialized replica containers
    pub replicas: Vec<ResourceId>,
    /// Container image
    pub image: String,
    /// Replica count
    pub replica_count: u32,
    /// Replicas allowed per node
    pub max_per_node: u32,
    /// Pair instance orderings with peers on the same node
    pub interleave: bool,
}

/// Which of the four resource kinds this is
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Variant {
    /// A single agent-backed resource
    Primitive(Primitive),
    /// An ordered, colocated set of primitives
    Group(GroupData),
    /// N copies of a template
    Clone(CloneData),
    /// N container replicas of an image
    Bundle(BundleData),
}

/// A configured resource
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resource {
    /// Configuration id
    pub id: String,
    /// Enclosing collective, if any
    pub parent: Option<ResourceId>,
    /// Raw meta attributes
    pub meta: IndexMap<String, String>,
    /// State flags
    pub flags: ResourceFlags,
    /// Assignment priority (higher first)
    pub priority: Score,
    /// Variant payload
    pub variant: Variant,
    /// Colocations where this resource is the dependent
    /// (indices into the working set's colocation table)
    pub this_with: Vec<usize>,
    /// Colocations where this resource is the primary
    pub with_this: Vec<usize>,
}

impl Resource {
    /// Create a resource with the given variant
    #[must_use]
    pub fn new(id: &str, variant: Variant) -> Self {
        Self {
            id: id.to_string(),
            parent: None,
            meta: IndexMap::new(),
            flags: ResourceFlags::default(),
            priority: Score::ZERO,
            variant,
            this_with: Vec::new(),
            with_this: Vec::new(),
        }
    }

    /// Create a primitive resource
    #[must_use]
    pub fn primitive(id: &str, class: &str, provider: Option<&str>, agent_type: &str) -> Self {
        Self::new(id, Variant::Primitive(Primitive::new(class, provider, agent_type)))
    }

    /// Primitive payload, if this is a primitive
    #[must_use]
    pub fn as_primitive(&self) -> Option<&Primitive> {
        match &self.variant {
            Variant::Primitive(p) => Some(p),
            _ => None,
        }
    }

    /// Mutable primitive payload, if this is a primitive
    pub fn as_primitive_mut(&mut self) -> Option<&mut Primitive> {
        match &mut self.variant {
            Variant::Primitive(p) => Some(p),
            _ => None,
        }
    }

    /// Children of a collective (empty slice for primitives)
    #[must_use]
    pub fn children(&self) -> &[ResourceId] {
        match &self.variant {
            Variant::Primitive(_) => &[],
            Variant::Group(g) => &g.children,
            Variant::Clone(c) => &c.instances,
            Variant::Bundle(b) => &b.replicas,
        }
    }

    /// Whether this resource wraps children
    #[must_use]
    pub fn is_collective(&self) -> bool {
        !matches!(self.variant, Variant::Primitive(_))
    }

    /// Whether interleaved instance ordering applies
    #[must_use]
    pub fn interleave(&self) -> bool {
        match &self.variant {
            Variant::Clone(c) => c.interleave,
            Variant::Bundle(b) => b.interleave,
            _ => false,
        }
    }

    /// The target role requested in configuration, if any
    #[must_use]
    pub fn target_role(&self) -> Option<RscRole> {
        self.meta.get("target-role").map(|s| RscRole::parse(s))
    }
}
