//! STEWARD Core Types
//!
//! Pure types shared by every STEWARD crate: identifiers, score
//! arithmetic, action tasks, error types, and process exit codes.
//! No I/O lives here.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod exit;
pub mod id;
pub mod score;
pub mod task;

// Re-exports
pub use error::{CoreError, CoreResult};
pub use exit::ExitStatus;
pub use id::{ActionId, NodeUuid, ResourceId, TransitionId};
pub use score::Score;
pub use task::ActionTask;
