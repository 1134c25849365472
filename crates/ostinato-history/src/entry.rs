//! History entries.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::TIMER_STEP_NAME;

/// Status of a recorded step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
  Running,
  Completed,
  Failed,
}

impl std::fmt::Display for StepStatus {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    match self {
      StepStatus::Running => write!(f, "running"),
      StepStatus::Completed => write!(f, "completed"),
      StepStatus::Failed => write!(f, "failed"),
    }
  }
}

/// One recorded step outcome in a workflow's history.
///
/// Entries are appended in invocation order and that order is reproduced
/// bit-for-bit on every replay. `output` is present only once the entry
/// is `completed`; `error` only once it is `failed`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
  pub workflow_id: String,
  pub step_name: String,
  pub status: StepStatus,
  pub input: serde_json::Value,
  pub output: Option<serde_json::Value>,
  pub error: Option<String>,
  pub recorded_at: DateTime<Utc>,
}

impl HistoryEntry {
  /// Create a `running` entry for a step that is about to execute.
  pub fn running(
    workflow_id: impl Into<String>,
    step_name: impl Into<String>,
    input: serde_json::Value,
  ) -> Self {
    Self {
      workflow_id: workflow_id.into(),
      step_name: step_name.into(),
      status: StepStatus::Running,
      input,
      output: None,
      error: None,
      recorded_at: Utc::now(),
    }
  }

  /// Whether this entry records a timer step.
  pub fn is_timer(&self) -> bool {
    self.step_name == TIMER_STEP_NAME
  }
}
