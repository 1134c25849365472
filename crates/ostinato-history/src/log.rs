//! Per-workflow history log.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::entry::{HistoryEntry, StepStatus};
use crate::{Error, TIMER_STEP_NAME};

/// Status of a workflow instance, as recorded in its persisted log.
///
/// `Suspended` is not a process-resident state: the process may terminate
/// entirely while a workflow is suspended, and the persisted log is the
/// only representation the instance has until it is woken.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStatus {
  Running,
  Suspended,
  Completed,
  Failed,
}

impl WorkflowStatus {
  /// Whether the workflow has finished and will never run again.
  pub fn is_terminal(&self) -> bool {
    matches!(self, WorkflowStatus::Completed | WorkflowStatus::Failed)
  }
}

impl std::fmt::Display for WorkflowStatus {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    match self {
      WorkflowStatus::Running => write!(f, "running"),
      WorkflowStatus::Suspended => write!(f, "suspended"),
      WorkflowStatus::Completed => write!(f, "completed"),
      WorkflowStatus::Failed => write!(f, "failed"),
    }
  }
}

/// The append-only, ordered record of one workflow instance.
///
/// The header (`workflow_name`, `input`) is everything a restarted
/// process needs to re-run the workflow function from its entry point;
/// the entries are everything replay needs to fast-forward it.
///
/// Invariants:
/// - entries are only appended, never removed or reordered;
/// - only the last entry may transition out of `running`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryLog {
  pub workflow_id: String,
  /// Registry key of the workflow function that produced this log.
  pub workflow_name: String,
  /// Arguments the workflow was started with.
  pub input: serde_json::Value,
  pub status: WorkflowStatus,
  /// Final result, present once `status` is `completed`.
  pub result: Option<serde_json::Value>,
  /// Failure message, present once `status` is `failed`.
  pub error: Option<String>,
  pub started_at: DateTime<Utc>,
  pub finished_at: Option<DateTime<Utc>>,
  pub entries: Vec<HistoryEntry>,
}

impl HistoryLog {
  /// Create an empty log for a freshly started workflow.
  pub fn new(
    workflow_id: impl Into<String>,
    workflow_name: impl Into<String>,
    input: serde_json::Value,
  ) -> Self {
    Self {
      workflow_id: workflow_id.into(),
      workflow_name: workflow_name.into(),
      input,
      status: WorkflowStatus::Running,
      result: None,
      error: None,
      started_at: Utc::now(),
      finished_at: None,
      entries: Vec::new(),
    }
  }

  pub fn len(&self) -> usize {
    self.entries.len()
  }

  pub fn is_empty(&self) -> bool {
    self.entries.is_empty()
  }

  /// Get the entry at a replay position, if one is recorded.
  pub fn entry(&self, position: usize) -> Option<&HistoryEntry> {
    self.entries.get(position)
  }

  pub fn entries(&self) -> &[HistoryEntry] {
    &self.entries
  }

  /// Append a new entry, returning its position.
  pub fn append(&mut self, entry: HistoryEntry) -> usize {
    self.entries.push(entry);
    self.entries.len() - 1
  }

  /// Transition the last entry `running -> completed` with its output.
  pub fn complete_last(&mut self, output: serde_json::Value) -> Result<(), Error> {
    let entry = self.last_running()?;
    entry.status = StepStatus::Completed;
    entry.output = Some(output);
    Ok(())
  }

  /// Transition the last entry `running -> failed`, preserving the
  /// failing step for diagnosis.
  pub fn fail_last(&mut self, error: impl Into<String>) -> Result<(), Error> {
    let entry = self.last_running()?;
    entry.status = StepStatus::Failed;
    entry.error = Some(error.into());
    Ok(())
  }

  /// Re-arm a trailing non-completed entry for live re-execution.
  ///
  /// This is the crash-recovery path: a pass that died mid-step leaves a
  /// trailing `running` entry, and the next pass executes that step again
  /// at the same position. The position must be the last entry.
  pub fn rearm(&mut self, position: usize, input: serde_json::Value) -> Result<(), Error> {
    let workflow_id = self.workflow_id.clone();
    if self.entries.is_empty() {
      return Err(Error::Empty { workflow_id });
    }
    if position != self.entries.len() - 1 {
      return Err(Error::NotLast {
        workflow_id,
        position,
      });
    }
    let entry = &mut self.entries[position];
    entry.status = StepStatus::Running;
    entry.input = input;
    entry.output = None;
    entry.error = None;
    entry.recorded_at = Utc::now();
    Ok(())
  }

  /// Mark the workflow suspended, pending an external wake.
  pub fn mark_suspended(&mut self) {
    self.status = WorkflowStatus::Suspended;
  }

  /// Mark the workflow completed with its final result.
  pub fn mark_completed(&mut self, result: serde_json::Value) {
    self.status = WorkflowStatus::Completed;
    self.result = Some(result);
    self.finished_at = Some(Utc::now());
  }

  /// Mark the workflow failed.
  pub fn mark_failed(&mut self, error: impl Into<String>) {
    self.status = WorkflowStatus::Failed;
    self.error = Some(error.into());
    self.finished_at = Some(Utc::now());
  }

  /// Wake time of a trailing completed timer entry, if the log was
  /// suspended waiting on one.
  ///
  /// Used at startup to re-establish in-memory wakes from durable state.
  pub fn pending_wake(&self) -> Option<DateTime<Utc>> {
    let last = self.entries.last()?;
    if last.step_name != TIMER_STEP_NAME || last.status != StepStatus::Completed {
      return None;
    }
    let wake_at = last.input.get("wake_at")?;
    serde_json::from_value(wake_at.clone()).ok()
  }

  fn last_running(&mut self) -> Result<&mut HistoryEntry, Error> {
    let workflow_id = self.workflow_id.clone();
    let position = self.entries.len().checked_sub(1).ok_or(Error::Empty {
      workflow_id: workflow_id.clone(),
    })?;
    let entry = &mut self.entries[position];
    if entry.status != StepStatus::Running {
      return Err(Error::InvalidTransition {
        workflow_id,
        position,
        status: entry.status,
        expected: StepStatus::Running,
      });
    }
    Ok(entry)
  }
}
