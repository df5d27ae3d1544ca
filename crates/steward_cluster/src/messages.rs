//! Framed peer messages.
//!
//! Delivery is best-effort with at-least-once retry on reconnect;
//! receivers dedupe on the reference field.

use indexmap::IndexSet;
use serde::{Deserialize, Serialize};
use steward_core::NodeUuid;
use uuid::Uuid;

/// Which subsystem a message addresses
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MessageKind {
    /// Controller-to-controller
    Controller,
    /// To a local executor proxy
    Executor,
    /// To the fencer
    Fencer,
}

impl MessageKind {
    /// Wire name
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Controller => "crmd",
            Self::Executor => "lrmd",
            Self::Fencer => "stonith-ng",
        }
    }
}

/// A framed message between peers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerMessage {
    /// Sender
    pub from: NodeUuid,
    /// Recipient; `None` broadcasts
    pub to: Option<NodeUuid>,
    /// Addressed subsystem
    pub kind: MessageKind,
    /// Operation within the subsystem
    pub subtype: String,
    /// Unique reference for dedup and reply correlation
    pub reference: String,
    /// XML payload
    pub payload_xml: String,
}

impl PeerMessage {
    /// Create a message with a fresh reference
    #[must_use]
    pub fn new(from: NodeUuid, to: Option<NodeUuid>, kind: MessageKind, subtype: &str) -> Self {
        Self {
            from,
            to,
            kind,
            subtype: subtype.to_string(),
            reference: Uuid::new_v4().to_string(),
            payload_xml: String::new(),
        }
    }

    /// Attach a payload
    #[must_use]
    pub fn with_payload(mut self, payload_xml: &str) -> Self {
        self.payload_xml = payload_xml.to_string();
        self
    }

    /// A reply correlated to this message's reference
    #[must_use]
    pub fn reply(&self, from: NodeUuid, subtype: &str) -> Self {
        Self {
            from,
            to: Some(self.from),
            kind: self.kind,
            subtype: subtype.to_string(),
            reference: self.reference.clone(),
            payload_xml: String::new(),
        }
    }
}

/// Bounded seen-reference set for at-least-once dedup
#[derive(Debug)]
pub struct Deduper {
    seen: IndexSet<String>,
    capacity: usize,
}

impl Deduper {
    /// Create a deduper remembering up to `capacity` references
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            seen: IndexSet::new(),
            capacity,
        }
    }

    /// Record a reference; returns false when it was already seen
    pub fn insert(&mut self, reference: &str) -> bool {
        if self.seen.contains(reference) {
            return false;
        }
        if self.seen.len() >= self.capacity {
            self.seen.shift_remove_index(0);
        }
        self.seen.insert(reference.to_string());
        true
    }
}
