//! STEWARD State Model
//!
//! Immutable-per-run snapshot types: cluster nodes, resources and
//! their variants, constraints, tickets, and the [`WorkingSet`] arena
//! that ties them together, plus ingestion of a CIB XML document into
//! a working set.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod cib;
pub mod constraint;
pub mod node;
pub mod resource;
pub mod ticket;
pub mod working_set;

pub use cib::{CibVersion, IngestError};
pub use constraint::{Colocation, LocationRule, OrderKind, OrderingConstraint};
pub use node::{MembershipState, Node, NodeRole};
pub use resource::{
    BundleData, CloneData, GroupData, OnFail, Primitive, RecurringOp, Resource, ResourceFlags,
    RscRole, Variant,
};
pub use ticket::Ticket;
pub use working_set::{ClusterOptions, WorkingSet};
