//! Execution events and notifiers for observability.
//!
//! Events are emitted as a pass runs to allow consumers to observe
//! progress, persist audit trails, stream to UIs, etc.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

/// Events emitted while driving workflows.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ExecutionEvent {
  /// A workflow was started for the first time.
  WorkflowStarted {
    workflow_id: String,
    workflow_name: String,
  },

  /// A persisted workflow is being re-driven; replay precedes live
  /// execution.
  WorkflowResumed {
    workflow_id: String,
    replayed_entries: usize,
  },

  /// A step is executing live (cache miss).
  StepStarted {
    workflow_id: String,
    step_name: String,
    position: usize,
  },

  /// A live step completed and was recorded.
  StepCompleted {
    workflow_id: String,
    step_name: String,
    position: usize,
  },

  /// A live step failed; the failure is recorded in the history.
  StepFailed {
    workflow_id: String,
    step_name: String,
    position: usize,
    error: String,
  },

  /// A recorded step was satisfied from the history without executing.
  StepReplayed {
    workflow_id: String,
    step_name: String,
    position: usize,
  },

  /// A timer step scheduled a wake; the pass is about to suspend.
  TimerScheduled {
    workflow_id: String,
    position: usize,
    wake_at: DateTime<Utc>,
  },

  /// The pass suspended; the log is durable and a wake is registered.
  WorkflowSuspended {
    workflow_id: String,
    wake_at: DateTime<Utc>,
  },

  /// The workflow ran to completion.
  WorkflowCompleted { workflow_id: String },

  /// The workflow failed with a step-level error.
  WorkflowFailed { workflow_id: String, error: String },
}

/// Trait for receiving execution events.
///
/// The engine calls `notify` for each event - implementations decide
/// what to do with them (persist, broadcast, log, ignore, etc.).
pub trait ExecutionNotifier: Send + Sync {
  /// Called when an execution event occurs.
  fn notify(&self, event: ExecutionEvent);
}

/// A no-op notifier that discards all events.
///
/// Useful for tests or when event observation is not needed.
#[derive(Debug, Clone, Default)]
pub struct NoopNotifier;

impl ExecutionNotifier for NoopNotifier {
  fn notify(&self, _event: ExecutionEvent) {
    // Intentionally empty
  }
}

/// A notifier that sends events to an unbounded channel.
///
/// Use this when you need to consume events asynchronously (e.g., persist
/// an audit trail, stream to a UI via websocket, etc.).
#[derive(Debug, Clone)]
pub struct ChannelNotifier {
  // Unbounded so a slow consumer never blocks a pass between two step
  // boundaries; event volume is one per step, so growth stays small.
  sender: mpsc::UnboundedSender<ExecutionEvent>,
}

impl ChannelNotifier {
  /// Create a new channel notifier.
  pub fn new(sender: mpsc::UnboundedSender<ExecutionEvent>) -> Self {
    Self { sender }
  }
}

impl ExecutionNotifier for ChannelNotifier {
  fn notify(&self, event: ExecutionEvent) {
    // Ignore send errors - receiver may have been dropped
    let _ = self.sender.send(event);
  }
}
