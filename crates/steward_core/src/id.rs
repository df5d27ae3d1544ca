//! Unique identifiers for STEWARD entities.
//!
//! Cluster nodes carry UUID identity (the election order depends on
//! it). Resources and actions live in flat arenas and are referenced
//! by index newtypes.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Cluster node identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeUuid(Uuid);

impl NodeUuid {
    /// Create a new random NodeUuid
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Create from UUID bytes
    #[must_use]
    pub const fn from_bytes(bytes: [u8; 16]) -> Self {
        Self(Uuid::from_bytes(bytes))
    }

    /// Derive from a node name (stable across runs)
    #[must_use]
    pub fn from_name(name: &str) -> Self {
        Self(Uuid::new_v5(&Uuid::NAMESPACE_DNS, name.as_bytes()))
    }

    /// Parse from canonical hyphenated form
    ///
    /// # Errors
    ///
    /// Returns error if the string is not a valid UUID
    pub fn parse(s: &str) -> Result<Self, uuid::Error> {
        Uuid::parse_str(s).map(Self)
    }

    /// Get as UUID
    #[must_use]
    pub const fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for NodeUuid {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for NodeUuid {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Index of a resource in the working set arena
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ResourceId(u32);

impl ResourceId {
    /// Wrap an arena index
    #[must_use]
    pub const fn new(index: u32) -> Self {
        Self(index)
    }

    /// Get the arena index
    #[must_use]
    pub const fn index(&self) -> usize {
        self.0 as usize
    }
}

impl std::fmt::Display for ResourceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "rsc#{}", self.0)
    }
}

/// Index of an action in a scheduler run's action arena
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ActionId(u32);

impl ActionId {
    /// Wrap an arena index
    #[must_use]
    pub const fn new(index: u32) -> Self {
        Self(index)
    }

    /// Get the arena index
    #[must_use]
    pub const fn index(&self) -> usize {
        self.0 as usize
    }
}

impl std::fmt::Display for ActionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "act#{}", self.0)
    }
}

/// Monotonic transition graph counter, scoped to one DC tenure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default)]
pub struct TransitionId(u64);

impl TransitionId {
    /// First transition of a DC tenure
    #[must_use]
    pub const fn zero() -> Self {
        Self(0)
    }

    /// Wrap a raw counter value
    #[must_use]
    pub const fn from_u64(value: u64) -> Self {
        Self(value)
    }

    /// Get the raw counter value
    #[must_use]
    pub const fn as_u64(&self) -> u64 {
        self.0
    }

    /// The next transition id
    #[must_use]
    pub const fn next(&self) -> Self {
        Self(self.0.saturating_add(1))
    }
}

impl std::fmt::Display for TransitionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}
