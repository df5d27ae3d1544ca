//! STEWARD Transition Graph
//!
//! The typed DAG the policy engine emits and the transition executor
//! consumes: synapses holding one action each plus the completion
//! triggers that gate them, with a wire-compatible XML encoding.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod action;
pub mod graph;
pub mod xml;

pub use action::{notify_key, Action, ActionFlags, NotifyPhase};
pub use graph::{Synapse, TransitionGraph};
pub use xml::GraphXmlError;
