//! Cluster tickets.
//!
//! A ticket is a cluster-wide lease granted by an arbitrator.
//! Resources constrained to a ticket must stop (or demote) when the
//! ticket is revoked.

use serde::{Deserialize, Serialize};

/// A cluster ticket
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ticket {
    /// Ticket id
    pub id: String,
    /// Whether the ticket is currently granted to this cluster
    pub granted: bool,
    /// When the ticket was last granted (unix millis)
    pub last_granted: Option<u64>,
    /// Revocation pending: demote but do not stop yet
    pub standby: bool,
}

impl Ticket {
    /// Create an ungranted ticket
    #[must_use]
    pub fn new(id: &str) -> Self {
        Self {
            id: id.to_string(),
            granted: false,
            last_granted: None,
            standby: false,
        }
    }

    /// Grant the ticket at the given time
    pub fn grant(&mut self, now: u64) {
        self.granted = true;
        self.last_granted = Some(now);
        self.standby = false;
    }

    /// Revoke the ticket
    pub fn revoke(&mut self) {
        self.granted = false;
        self.standby = false;
    }
}
