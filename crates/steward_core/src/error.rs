//! Core error types for STEWARD.

use std::fmt;

/// Core result type
pub type CoreResult<T> = Result<T, CoreError>;

/// Core error type
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CoreError {
    /// Parse error
    ParseError {
        /// What failed to parse
        message: String,
    },

    /// Validation error
    Validation {
        /// Field or entity that failed validation
        field: String,
        /// Why it is invalid
        reason: String,
    },

    /// Not found
    NotFound {
        /// Entity kind
        kind: String,
        /// Entity id
        id: String,
    },

    /// Already exists
    AlreadyExists {
        /// Entity kind
        kind: String,
        /// Entity id
        id: String,
    },

    /// Capacity exceeded
    CapacityExceeded {
        /// What ran out
        resource: String,
        /// The limit that was hit
        limit: u64,
    },

    /// Timeout
    Timeout {
        /// Operation that timed out
        operation: String,
    },

    /// A peer left the membership mid-operation
    MembershipLost {
        /// The departed node
        node: String,
    },

    /// Internal error (for unexpected errors)
    Internal {
        /// Error message
        message: String,
    },
}

impl fmt::Display for CoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ParseError { message } => write!(f, "Parse error: {}", message),
            Self::Validation { field, reason } => {
                write!(f, "Validation failed for {}: {}", field, reason)
            }
            Self::NotFound { kind, id } => write!(f, "{} not found: {}", kind, id),
            Self::AlreadyExists { kind, id } => write!(f, "{} already exists: {}", kind, id),
            Self::CapacityExceeded { resource, limit } => {
                write!(f, "Capacity exceeded for {}: {}", resource, limit)
            }
            Self::Timeout { operation } => write!(f, "Timeout: {}", operation),
            Self::MembershipLost { node } => write!(f, "Peer lost: {}", node),
            Self::Internal { message } => write!(f, "Internal error: {}", message),
        }
    }
}

impl std::error::Error for CoreError {}

impl From<serde_json::Error> for CoreError {
    fn from(err: serde_json::Error) -> Self {
        Self::ParseError {
            message: err.to_string(),
        }
    }
}
