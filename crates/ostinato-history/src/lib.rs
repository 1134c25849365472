//! History log and execution cursor model for ostinato.
//!
//! A workflow's history is the append-only record of every step it has
//! invoked, in invocation order. Replay reads the history front to back:
//! recorded steps are satisfied from the log without re-executing, so a
//! restarted workflow fast-forwards deterministically to its first
//! unresolved step.
//!
//! The [`HistoryLog`] is the only durable state a workflow has. The
//! [`ExecutionCursor`] is per-pass bookkeeping and is never persisted.

mod cursor;
mod entry;
mod log;

pub use cursor::ExecutionCursor;
pub use entry::{HistoryEntry, StepStatus};
pub use log::{HistoryLog, WorkflowStatus};

/// Reserved step name recorded for timer entries.
///
/// User activities cannot register under this name.
pub const TIMER_STEP_NAME: &str = "sleep";

/// Errors raised by invalid history mutations.
///
/// These indicate a bug in the caller (the engine), not a recoverable
/// runtime condition: history entries are append-only and only the last
/// entry may transition out of `running`.
#[derive(Debug, thiserror::Error)]
pub enum Error {
  /// The log has no entries to mutate.
  #[error("history log for workflow '{workflow_id}' has no entries")]
  Empty { workflow_id: String },

  /// The entry is not in a state that permits the requested transition.
  #[error(
    "entry {position} of workflow '{workflow_id}' is {status:?}, expected {expected:?}"
  )]
  InvalidTransition {
    workflow_id: String,
    position: usize,
    status: StepStatus,
    expected: StepStatus,
  },

  /// Only the last entry of a log may be mutated.
  #[error("entry {position} of workflow '{workflow_id}' is not the last entry")]
  NotLast { workflow_id: String, position: usize },
}
