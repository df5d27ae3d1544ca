//! Action task names.
//!
//! Wire names follow the resource-agent operation vocabulary: the
//! started/stopped/promoted/demoted milestones are pseudo-operations
//! (`running`, `stopped`, ...), never executed by an agent.

use serde::{Deserialize, Serialize};

/// What an action asks an agent (or the cluster) to do
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ActionTask {
    /// Start a resource
    Start,
    /// Stop a resource
    Stop,
    /// Recurring health check
    Monitor,
    /// Promote an unpromoted instance
    Promote,
    /// Demote a promoted instance
    Demote,
    /// Notification hook around a lifecycle operation
    Notify,
    /// Confirmation milestone after notifications complete
    Notified,
    /// Milestone: all instances started
    Started,
    /// Milestone: all instances stopped
    Stopped,
    /// Milestone: promotion complete
    Promoted,
    /// Milestone: demotion complete
    Demoted,
    /// Fence a node
    Fence,
    /// Cancel a recurring operation
    Cancel,
}

impl ActionTask {
    /// Wire name of this task
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::Stop => "stop",
            Self::Monitor => "monitor",
            Self::Promote => "promote",
            Self::Demote => "demote",
            Self::Notify => "notify",
            Self::Notified => "notified",
            Self::Started => "running",
            Self::Stopped => "stopped",
            Self::Promoted => "promoted",
            Self::Demoted => "demoted",
            Self::Fence => "stonith",
            Self::Cancel => "cancel",
        }
    }

    /// Parse a wire name
    ///
    /// # Errors
    ///
    /// Returns error for an unknown task name
    pub fn parse(s: &str) -> Result<Self, crate::CoreError> {
        match s {
            "start" => Ok(Self::Start),
            "stop" => Ok(Self::Stop),
            "monitor" => Ok(Self::Monitor),
            "promote" => Ok(Self::Promote),
            "demote" => Ok(Self::Demote),
            "notify" => Ok(Self::Notify),
            "notified" => Ok(Self::Notified),
            "running" => Ok(Self::Started),
            "stopped" => Ok(Self::Stopped),
            "promoted" => Ok(Self::Promoted),
            "demoted" => Ok(Self::Demoted),
            "stonith" => Ok(Self::Fence),
            "cancel" => Ok(Self::Cancel),
            other => Err(crate::CoreError::ParseError {
                message: format!("unknown action task: {other}"),
            }),
        }
    }

    /// The milestone marking completion of this task, if any
    #[must_use]
    pub const fn milestone(&self) -> Option<Self> {
        match self {
            Self::Start => Some(Self::Started),
            Self::Stop => Some(Self::Stopped),
            Self::Promote => Some(Self::Promoted),
            Self::Demote => Some(Self::Demoted),
            Self::Notify => Some(Self::Notified),
            _ => None,
        }
    }

    /// Whether this task tears activity down (stop/demote side)
    #[must_use]
    pub const fn is_teardown(&self) -> bool {
        matches!(self, Self::Stop | Self::Stopped | Self::Demote | Self::Demoted)
    }
}

impl std::fmt::Display for ActionTask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
