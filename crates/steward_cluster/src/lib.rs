//! STEWARD Cluster Layer
//!
//! Live peer membership, Designated Controller election, the join
//! handshake that brings node state to the DC, and the framed peer
//! message format.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod election;
pub mod join;
pub mod membership;
pub mod messages;

pub use election::{Election, ElectionConfig, ElectionMsg, ElectionState};
pub use join::{DcJoin, Joiner, JoinError, JoinPhase};
pub use membership::{Membership, Peer};
pub use messages::{Deduper, MessageKind, PeerMessage};
