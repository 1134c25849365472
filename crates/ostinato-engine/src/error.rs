//! Engine errors.

use chrono::{DateTime, Utc};

/// Errors that can occur while driving a workflow.
///
/// `Suspended` is control flow, not a failure: it unwinds a pass up to
/// the engine boundary when a timer step must wait for time to pass.
/// Workflow bodies propagate it with `?` like any other error; only the
/// driver consumes it.
#[derive(Debug, thiserror::Error)]
pub enum Error {
  /// The pass hit a timer with no recorded result and must be abandoned
  /// until `wake_at`.
  #[error("workflow suspended until {wake_at}")]
  Suspended { wake_at: DateTime<Utc> },

  /// A step's underlying operation failed. Recoverable: the workflow may
  /// catch this and retry, which occupies a new history position.
  #[error("step '{step_name}' failed: {message}")]
  Step { step_name: String, message: String },

  /// Replay found a recorded step whose name does not match the step the
  /// code is invoking. The workflow code has diverged from its history;
  /// fatal to the resume attempt, never auto-retried.
  #[error(
    "determinism violation in workflow '{workflow_id}' at position {position}: \
     history recorded step '{recorded}' but code invoked '{actual}'"
  )]
  DeterminismViolation {
    workflow_id: String,
    position: usize,
    recorded: String,
    actual: String,
  },

  /// No workflow function is registered under this name.
  #[error("workflow '{name}' is not registered")]
  WorkflowNotFound { name: String },

  /// No activity is registered under this name.
  #[error("activity '{name}' is not registered")]
  ActivityNotFound { name: String },

  /// No history exists for this workflow id.
  #[error("workflow id '{workflow_id}' has no history")]
  UnknownWorkflowId { workflow_id: String },

  /// A pass is already driving this workflow id.
  #[error("workflow '{workflow_id}' is already running")]
  AlreadyRunning { workflow_id: String },

  /// A history already exists for this workflow id.
  #[error("workflow '{workflow_id}' already exists")]
  AlreadyExists { workflow_id: String },

  /// The name is reserved by the engine.
  #[error("'{name}' is a reserved step name")]
  ReservedName { name: String },

  /// A workflow or activity is already registered under this name.
  #[error("'{name}' is already registered")]
  DuplicateName { name: String },

  /// The pass was cancelled at a step boundary.
  #[error("execution cancelled")]
  Cancelled,

  /// The persistence bridge failed; the workflow cannot be considered
  /// durably suspended or completed.
  #[error("persistence failure")]
  Persistence(#[from] ostinato_store::Error),

  /// The in-memory history rejected a mutation; indicates an engine bug.
  #[error("history log corrupted")]
  History(#[from] ostinato_history::Error),
}
