//! Workflow context: the step interceptor.
//!
//! Every effectful step a workflow takes goes through the context, which
//! consults the history log before executing anything. A recorded
//! `completed` entry at the current cursor position is a cache hit: the
//! recorded output is returned and the operation is not invoked. This is
//! what makes replay free of side effects and gives live steps their
//! at-most-once guarantee across restarts.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use ostinato_history::{ExecutionCursor, HistoryEntry, HistoryLog, StepStatus, TIMER_STEP_NAME};
use serde_json::{Value, json};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::Error;
use crate::events::{ExecutionEvent, ExecutionNotifier};
use crate::registry::Registry;

/// Per-pass mutable state: the log being built and the replay cursor.
struct PassState {
  log: HistoryLog,
  cursor: ExecutionCursor,
}

struct ContextInner {
  workflow_id: String,
  pass_id: String,
  registry: Registry,
  notifier: Arc<dyn ExecutionNotifier>,
  cancel: CancellationToken,
  state: Mutex<PassState>,
}

/// Handle a workflow function uses to invoke steps.
///
/// Owned by exactly one execution pass; steps within a pass run
/// sequentially, so the inner lock is never contended.
#[derive(Clone)]
pub struct WorkflowContext {
  inner: Arc<ContextInner>,
}

/// What the cache consultation decided for one step invocation.
enum CacheDecision {
  /// Recorded completed entry: return its output, do not execute.
  Hit(Value),
  /// Recorded failed entry: return the recorded failure, do not execute.
  HitFailed(String),
  /// No usable record: the entry at this position is armed and the
  /// operation must run live.
  Execute,
}

impl WorkflowContext {
  pub(crate) fn new(
    log: HistoryLog,
    registry: Registry,
    notifier: Arc<dyn ExecutionNotifier>,
    cancel: CancellationToken,
  ) -> Self {
    Self {
      inner: Arc::new(ContextInner {
        workflow_id: log.workflow_id.clone(),
        pass_id: uuid::Uuid::new_v4().to_string(),
        registry,
        notifier,
        cancel,
        state: Mutex::new(PassState {
          log,
          cursor: ExecutionCursor::new(),
        }),
      }),
    }
  }

  /// The id of the workflow instance this pass is driving.
  pub fn workflow_id(&self) -> &str {
    &self.inner.workflow_id
  }

  /// Take the log back out of the context at the end of a pass.
  pub(crate) fn into_log(self) -> HistoryLog {
    let state = self.inner.state.lock().unwrap();
    state.log.clone()
  }

  /// Invoke an activity, cache-or-execute.
  ///
  /// On replay a recorded outcome at this position is returned without
  /// invoking the operation - success and failure alike, so a workflow
  /// that caught the error and retried follows the identical control
  /// flow. A live invocation appends a `running` entry first and records
  /// the outcome when the operation returns.
  ///
  /// The operation may execute more than once across process crashes
  /// (completed-but-unflushed entries are lost); activities should be
  /// written to be safely repeatable.
  pub async fn call(&self, activity: &str, input: Value) -> Result<Value, Error> {
    if self.inner.cancel.is_cancelled() {
      return Err(Error::Cancelled);
    }
    let op = self
      .inner
      .registry
      .activity(activity)
      .ok_or_else(|| Error::ActivityNotFound {
        name: activity.to_string(),
      })?;

    let (position, decision) = {
      let mut state = self.inner.state.lock().unwrap();
      let position = state.cursor.next();
      let decision = match state.log.entry(position) {
        Some(entry) => {
          if entry.step_name != activity {
            return Err(self.determinism_violation(position, &entry.step_name, activity));
          }
          match entry.status {
            StepStatus::Completed => {
              CacheDecision::Hit(entry.output.clone().unwrap_or(Value::Null))
            }
            StepStatus::Failed => {
              CacheDecision::HitFailed(entry.error.clone().unwrap_or_default())
            }
            StepStatus::Running => {
              // Trailing record of a pass that died mid-step: execute
              // again in place.
              state.log.rearm(position, input.clone())?;
              CacheDecision::Execute
            }
          }
        }
        None => {
          let entry =
            HistoryEntry::running(self.inner.workflow_id.clone(), activity, input.clone());
          state.log.append(entry);
          CacheDecision::Execute
        }
      };
      (position, decision)
    };

    match decision {
      CacheDecision::Hit(output) => {
        debug!(
          workflow_id = %self.inner.workflow_id,
          pass_id = %self.inner.pass_id,
          step_name = %activity,
          position,
          "step satisfied from history"
        );
        self.notify(ExecutionEvent::StepReplayed {
          workflow_id: self.inner.workflow_id.clone(),
          step_name: activity.to_string(),
          position,
        });
        Ok(output)
      }
      CacheDecision::HitFailed(message) => {
        debug!(
          workflow_id = %self.inner.workflow_id,
          pass_id = %self.inner.pass_id,
          step_name = %activity,
          position,
          "step failure replayed from history"
        );
        self.notify(ExecutionEvent::StepReplayed {
          workflow_id: self.inner.workflow_id.clone(),
          step_name: activity.to_string(),
          position,
        });
        Err(Error::Step {
          step_name: activity.to_string(),
          message,
        })
      }
      CacheDecision::Execute => self.execute_live(activity, op, input, position).await,
    }
  }

  /// Suspend the workflow for at least `duration`.
  ///
  /// A timer is a distinguished step whose cache-miss path never returns:
  /// it records the wake time, then unwinds the pass with the suspension
  /// signal. On replay a recorded timer entry returns immediately, which
  /// is what lets resume fast-forward through already-elapsed waits.
  pub async fn sleep(&self, duration: Duration) -> Result<(), Error> {
    if self.inner.cancel.is_cancelled() {
      return Err(Error::Cancelled);
    }

    let mut state = self.inner.state.lock().unwrap();
    let position = state.cursor.next();

    if let Some(entry) = state.log.entry(position) {
      if entry.step_name != TIMER_STEP_NAME {
        return Err(self.determinism_violation(position, &entry.step_name, TIMER_STEP_NAME));
      }
      if entry.status == StepStatus::Completed {
        drop(state);
        debug!(
          workflow_id = %self.inner.workflow_id,
          pass_id = %self.inner.pass_id,
          position,
          "timer satisfied from history"
        );
        self.notify(ExecutionEvent::StepReplayed {
          workflow_id: self.inner.workflow_id.clone(),
          step_name: TIMER_STEP_NAME.to_string(),
          position,
        });
        return Ok(());
      }
      // A non-completed timer record should not survive a flush, but if
      // one does, re-issue the timer at the same position.
      warn!(
        workflow_id = %self.inner.workflow_id,
        position,
        "re-issuing timer with incomplete record"
      );
      let (wake_at, input) = timer_input(duration);
      state.log.rearm(position, input)?;
      state.log.complete_last(Value::Null)?;
      drop(state);
      return self.suspend(position, wake_at);
    }

    let now = Utc::now();
    let (wake_at, input) = timer_input_at(now, duration);
    state.log.append(HistoryEntry::running(
      self.inner.workflow_id.clone(),
      TIMER_STEP_NAME,
      input,
    ));
    // The timer's "work" is simply having been recorded; the entry is
    // completed before the pass unwinds.
    state.log.complete_last(Value::Null)?;
    drop(state);
    self.suspend(position, wake_at)
  }

  async fn execute_live(
    &self,
    activity: &str,
    op: crate::registry::ActivityFn,
    input: Value,
    position: usize,
  ) -> Result<Value, Error> {
    info!(
      workflow_id = %self.inner.workflow_id,
      pass_id = %self.inner.pass_id,
      step_name = %activity,
      position,
      "step started"
    );
    self.notify(ExecutionEvent::StepStarted {
      workflow_id: self.inner.workflow_id.clone(),
      step_name: activity.to_string(),
      position,
    });

    // The lock is not held across the operation: the log is only touched
    // again once the outcome is known.
    let result = op(input).await;

    let mut state = self.inner.state.lock().unwrap();
    match result {
      Ok(output) => {
        state.log.complete_last(output.clone())?;
        drop(state);
        info!(
          workflow_id = %self.inner.workflow_id,
          pass_id = %self.inner.pass_id,
          step_name = %activity,
          position,
          "step completed"
        );
        self.notify(ExecutionEvent::StepCompleted {
          workflow_id: self.inner.workflow_id.clone(),
          step_name: activity.to_string(),
          position,
        });
        Ok(output)
      }
      Err(e) => {
        let message = format!("{e:#}");
        state.log.fail_last(message.clone())?;
        drop(state);
        warn!(
          workflow_id = %self.inner.workflow_id,
          pass_id = %self.inner.pass_id,
          step_name = %activity,
          position,
          error = %message,
          "step failed"
        );
        self.notify(ExecutionEvent::StepFailed {
          workflow_id: self.inner.workflow_id.clone(),
          step_name: activity.to_string(),
          position,
          error: message.clone(),
        });
        Err(Error::Step {
          step_name: activity.to_string(),
          message,
        })
      }
    }
  }

  fn suspend(&self, position: usize, wake_at: DateTime<Utc>) -> Result<(), Error> {
    info!(
      workflow_id = %self.inner.workflow_id,
      pass_id = %self.inner.pass_id,
      position,
      wake_at = %wake_at,
      "timer recorded, suspending pass"
    );
    self.notify(ExecutionEvent::TimerScheduled {
      workflow_id: self.inner.workflow_id.clone(),
      position,
      wake_at,
    });
    Err(Error::Suspended { wake_at })
  }

  fn determinism_violation(&self, position: usize, recorded: &str, actual: &str) -> Error {
    Error::DeterminismViolation {
      workflow_id: self.inner.workflow_id.clone(),
      position,
      recorded: recorded.to_string(),
      actual: actual.to_string(),
    }
  }

  fn notify(&self, event: ExecutionEvent) {
    self.inner.notifier.notify(event);
  }
}

fn timer_input(duration: Duration) -> (DateTime<Utc>, Value) {
  timer_input_at(Utc::now(), duration)
}

fn timer_input_at(now: DateTime<Utc>, duration: Duration) -> (DateTime<Utc>, Value) {
  let delta = TimeDelta::from_std(duration).unwrap_or(TimeDelta::MAX);
  let wake_at = now.checked_add_signed(delta).unwrap_or(DateTime::<Utc>::MAX_UTC);
  (wake_at, json!({ "now": now, "wake_at": wake_at }))
}
