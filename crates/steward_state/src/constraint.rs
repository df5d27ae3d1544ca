//! Placement and ordering constraints.

use serde::{Deserialize, Serialize};
use steward_core::{ActionTask, NodeUuid, ResourceId, Score};

use crate::resource::RscRole;

/// A colocation edge between two resources
///
/// The dependent's placement follows the primary's. Edges are indexed
/// from both endpoints in the working set so the allocator can walk
/// either direction without scanning.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Colocation {
    /// Constraint id
    pub id: String,
    /// Resource whose placement depends on the primary
    pub dependent: ResourceId,
    /// Resource being followed
    pub primary: ResourceId,
    /// Attraction (`+INFINITY` mandatory, `-INFINITY` mandatory anti)
    pub score: Score,
    /// Restrict to this role of the dependent
    pub dependent_role: Option<RscRole>,
    /// Restrict to this role of the primary
    pub primary_role: Option<RscRole>,
    /// Whether the dependent's preferences may pull the primary
    pub influence: bool,
}

impl Colocation {
    /// Create a colocation with default roles and influence
    #[must_use]
    pub fn new(id: &str, dependent: ResourceId, primary: ResourceId, score: Score) -> Self {
        Self {
            id: id.to_string(),
            dependent,
            primary,
            score,
            dependent_role: None,
            primary_role: None,
            influence: true,
        }
    }

    /// Set the influence flag
    #[must_use]
    pub fn with_influence(mut self, influence: bool) -> Self {
        self.influence = influence;
        self
    }

    /// Whether this is a mandatory constraint (either sign)
    #[must_use]
    pub fn is_mandatory(&self) -> bool {
        self.score.is_infinity() || self.score.is_neg_infinity()
    }
}

/// Ordering semantics, as a small bit-set
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub struct OrderKind(u8);

impl OrderKind {
    /// Pure ordering, no runnability or mandatory propagation
    pub const OPTIONAL: Self = Self(1);
    /// `first` mandatory implies `then` mandatory
    pub const IMPLIES_THEN: Self = Self(1 << 1);
    /// `first` unrunnable makes `then` unrunnable
    pub const RUNNABLE_LEFT: Self = Self(1 << 2);
    /// Actions may not overlap with any other serialized action
    pub const SERIALIZE: Self = Self(1 << 3);
    /// Running `then` cancels the need for `first`
    pub const THEN_CANCELS_FIRST: Self = Self(1 << 4);
    /// Applies in one direction only
    pub const ASYMMETRICAL: Self = Self(1 << 5);

    /// The empty kind
    #[must_use]
    pub const fn empty() -> Self {
        Self(0)
    }

    /// The usual mandatory ordering
    #[must_use]
    pub const fn mandatory() -> Self {
        Self(Self::IMPLIES_THEN.0 | Self::RUNNABLE_LEFT.0)
    }

    /// Whether all bits of `other` are set
    #[must_use]
    pub const fn contains(&self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    /// Whether any bit of `other` is set
    #[must_use]
    pub const fn intersects(&self, other: Self) -> bool {
        self.0 & other.0 != 0
    }
}

impl std::ops::BitOr for OrderKind {
    type Output = Self;

    fn bitor(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }
}

impl std::ops::BitOrAssign for OrderKind {
    fn bitor_assign(&mut self, other: Self) {
        self.0 |= other.0;
    }
}

/// A configured ordering between two resource actions
///
/// Actions are late-bound: the constraint names a resource and a
/// task, resolved against the synthesized action set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderingConstraint {
    /// Constraint id
    pub id: String,
    /// Resource whose action runs first
    pub first: ResourceId,
    /// Task of the first action
    pub first_task: ActionTask,
    /// Resource whose action runs after
    pub then: ResourceId,
    /// Task of the then action
    pub then_task: ActionTask,
    /// Propagation semantics
    pub kind: OrderKind,
}

impl OrderingConstraint {
    /// Mandatory "start first then start then" ordering
    #[must_use]
    pub fn starts(id: &str, first: ResourceId, then: ResourceId) -> Self {
        Self {
            id: id.to_string(),
            first,
            first_task: ActionTask::Start,
            then,
            then_task: ActionTask::Start,
            kind: OrderKind::mandatory(),
        }
    }
}

/// A location preference for a resource on a node
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocationRule {
    /// Constraint id
    pub id: String,
    /// Affected resource
    pub rsc: ResourceId,
    /// Affected node
    pub node: NodeUuid,
    /// Preference (`-INFINITY` bans)
    pub score: Score,
}
