//! Graph actions.
//!
//! An action is one operation against one resource, usually on one
//! node. Pseudo-actions mark logical milestones and are confirmed by
//! the executor without touching any agent.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use steward_core::{ActionTask, NodeUuid, Score};

/// Flags describing how an action participates in the transition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionFlags {
    /// Needed only for ordering, not for correctness of the target
    /// state
    pub optional: bool,
    /// Can actually be executed
    pub runnable: bool,
    /// Milestone, never handed to an agent
    pub pseudo: bool,
    /// Paired stop/start may be fused into a live migration
    pub migrate_runnable: bool,
}

impl Default for ActionFlags {
    fn default() -> Self {
        Self {
            optional: false,
            runnable: true,
            pseudo: false,
            migrate_runnable: false,
        }
    }
}

/// Position of a notification relative to the operation it wraps
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NotifyPhase {
    /// Before the operation
    Pre,
    /// After the operation's milestone
    Post,
}

impl NotifyPhase {
    /// Wire fragment
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Pre => "pre",
            Self::Post => "post",
        }
    }
}

/// The key of an ordinary action: `rsc_task_interval`
#[must_use]
pub fn action_key(rsc: &str, task: ActionTask, interval_ms: u64) -> String {
    format!("{}_{}_{}", rsc, task.as_str(), interval_ms)
}

/// The key of a notification action, e.g. `cl_pre_notify_stop_0` or
/// `cl_confirmed-post_notify_stopped_0`
#[must_use]
pub fn notify_key(rsc: &str, phase: NotifyPhase, op: ActionTask, confirmed: bool) -> String {
    if confirmed {
        format!("{}_confirmed-{}_notify_{}_0", rsc, phase.as_str(), op.as_str())
    } else {
        format!("{}_{}_notify_{}_0", rsc, phase.as_str(), op.as_str())
    }
}

/// One operation in a transition
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Action {
    /// Numeric id, unique within one scheduler run
    pub id: u32,
    /// Key `rsc_task_interval` (notify keys carry their phase)
    pub key: String,
    /// Operation
    pub task: ActionTask,
    /// Resource the action applies to (none for cluster events)
    pub rsc: Option<String>,
    /// Execution node name
    pub node: Option<String>,
    /// Execution node uuid
    pub node_uuid: Option<NodeUuid>,
    /// Flags
    pub flags: ActionFlags,
    /// Absolute per-action timeout in milliseconds
    pub timeout_ms: u64,
    /// Recurrence interval (0 for one-shot)
    pub interval_ms: u64,
    /// Dispatch priority, higher first
    pub priority: i32,
    /// `CRM_meta_*` payload carried to the executor
    pub meta: IndexMap<String, String>,
}

impl Action {
    /// Default action timeout
    pub const DEFAULT_TIMEOUT_MS: u64 = 20_000;

    /// Priority given to completion milestones so they confirm ahead
    /// of unrelated work
    pub const MILESTONE_PRIORITY: i32 = Score::INFINITY.value() as i32;

    /// Create a concrete resource action
    #[must_use]
    pub fn new(id: u32, rsc: &str, task: ActionTask, interval_ms: u64) -> Self {
        Self {
            id,
            key: action_key(rsc, task, interval_ms),
            task,
            rsc: Some(rsc.to_string()),
            node: None,
            node_uuid: None,
            flags: ActionFlags::default(),
            timeout_ms: Self::DEFAULT_TIMEOUT_MS,
            interval_ms,
            priority: 0,
            meta: IndexMap::new(),
        }
    }

    /// Create a pseudo (milestone) action
    #[must_use]
    pub fn pseudo(id: u32, rsc: &str, task: ActionTask) -> Self {
        let mut action = Self::new(id, rsc, task, 0);
        action.flags.pseudo = true;
        action
    }

    /// Create a notification action
    #[must_use]
    pub fn notify(id: u32, rsc: &str, phase: NotifyPhase, op: ActionTask, confirmed: bool) -> Self {
        let task = if confirmed {
            ActionTask::Notified
        } else {
            ActionTask::Notify
        };
        let mut action = Self::new(id, rsc, task, 0);
        action.key = notify_key(rsc, phase, op, confirmed);
        action
    }

    /// Set the execution node
    #[must_use]
    pub fn on_node(mut self, name: &str, uuid: NodeUuid) -> Self {
        self.node = Some(name.to_string());
        self.node_uuid = Some(uuid);
        self
    }

    /// Set the timeout
    #[must_use]
    pub fn with_timeout(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = timeout_ms;
        self
    }

    /// Set the priority
    #[must_use]
    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    /// Whether the executor should treat this as immediately
    /// confirmable
    #[must_use]
    pub fn is_pseudo(&self) -> bool {
        self.flags.pseudo
    }

    /// The `CRM_meta_*` attribute map for the wire format, including
    /// the implicit keys derived from the action itself
    #[must_use]
    pub fn wire_meta(&self) -> IndexMap<String, String> {
        let mut out = IndexMap::new();
        if let Some(node) = &self.node {
            out.insert("CRM_meta_on_node".to_string(), node.clone());
        }
        if let Some(uuid) = &self.node_uuid {
            out.insert("CRM_meta_on_node_uuid".to_string(), uuid.to_string());
        }
        out.insert("CRM_meta_timeout".to_string(), self.timeout_ms.to_string());
        out.insert("CRM_meta_interval".to_string(), self.interval_ms.to_string());
        out.insert("CRM_meta_name".to_string(), self.task.as_str().to_string());
        for (key, value) in &self.meta {
            out.insert(key.clone(), value.clone());
        }
        out
    }
}
