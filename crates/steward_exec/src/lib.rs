//! STEWARD Transition Executor
//!
//! Consumes a transition graph, dispatches ready actions to the local
//! agent executor or to peer controllers, tracks completions and
//! absolute deadlines, and aborts the remainder of the graph on any
//! failure.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod dispatch;
pub mod executor;

pub use dispatch::{ActionDispatcher, DispatchError, DispatchTarget, RecordingDispatcher};
pub use executor::{AbortReason, ExecutorOutcome, SynapseState, TransitionExecutor};
