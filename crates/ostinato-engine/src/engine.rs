//! Workflow driver.
//!
//! The `WorkflowEngine` runs workflow functions to completion, converts
//! the suspension signal into a persisted suspended state plus a
//! scheduled wake, and reconstructs pre-suspension state on resume by
//! deterministic replay of the persisted history.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use ostinato_history::{HistoryLog, WorkflowStatus};
use ostinato_store::HistoryStore;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument, warn};

use crate::context::WorkflowContext;
use crate::error::Error;
use crate::events::{ExecutionEvent, ExecutionNotifier, NoopNotifier};
use crate::registry::Registry;
use crate::scheduler::{WakeScheduler, remaining_delay};

/// Outcome of one execution pass.
///
/// `Suspended` means the pass unwound at a timer, the log is durable,
/// and a wake is registered; the process is free to do other work (or
/// exit, if an operator re-drives the engine after restart).
#[derive(Debug, Clone, PartialEq)]
pub enum PassOutcome {
  /// The workflow function returned; the log records the final result.
  Completed(Value),
  /// The pass stopped at a timer and will be re-driven at `wake_at`.
  Suspended { wake_at: DateTime<Utc> },
  /// A step failure propagated out of the workflow function.
  Failed(String),
}

struct EngineInner {
  registry: Registry,
  store: Arc<dyn HistoryStore>,
  notifier: Arc<dyn ExecutionNotifier>,
  cancel: CancellationToken,
  /// In-memory copies of logs this process has driven or loaded.
  logs: Mutex<HashMap<String, HistoryLog>>,
  /// Ids currently owned by a pass. Guarantees two passes never mutate
  /// the same workflow's log concurrently.
  active: Mutex<HashSet<String>>,
}

/// The workflow replay engine.
///
/// Cheap to clone; clones share the same state. The wake scheduler holds
/// clones to re-drive suspended workflows.
#[derive(Clone)]
pub struct WorkflowEngine {
  inner: Arc<EngineInner>,
}

impl WorkflowEngine {
  /// Create an engine with no-op event notifications.
  pub fn new(registry: Registry, store: Arc<dyn HistoryStore>) -> Self {
    Self::with_notifier(registry, store, NoopNotifier)
  }

  /// Create an engine with a custom notifier.
  pub fn with_notifier(
    registry: Registry,
    store: Arc<dyn HistoryStore>,
    notifier: impl ExecutionNotifier + 'static,
  ) -> Self {
    Self {
      inner: Arc::new(EngineInner {
        registry,
        store,
        notifier: Arc::new(notifier),
        cancel: CancellationToken::new(),
        logs: Mutex::new(HashMap::new()),
        active: Mutex::new(HashSet::new()),
      }),
    }
  }

  /// Cancel all in-flight passes (at their next step boundary) and every
  /// pending wake.
  pub fn shutdown(&self) {
    self.inner.cancel.cancel();
  }

  /// Start a new workflow instance.
  ///
  /// Fails with [`Error::AlreadyExists`] if a history is already
  /// recorded for `workflow_id`.
  #[instrument(name = "workflow_start", skip(self, input), fields(workflow_id = %workflow_id, workflow_name = %workflow_name))]
  pub async fn start(
    &self,
    workflow_id: &str,
    workflow_name: &str,
    input: Value,
  ) -> Result<PassOutcome, Error> {
    if self.inner.registry.workflow(workflow_name).is_none() {
      return Err(Error::WorkflowNotFound {
        name: workflow_name.to_string(),
      });
    }

    let _guard = self.claim(workflow_id)?;

    let known = self.inner.logs.lock().unwrap().contains_key(workflow_id);
    if known || self.inner.store.load(workflow_id).await?.is_some() {
      return Err(Error::AlreadyExists {
        workflow_id: workflow_id.to_string(),
      });
    }

    info!(workflow_id = %workflow_id, workflow_name = %workflow_name, "workflow started");
    self.inner.notifier.notify(ExecutionEvent::WorkflowStarted {
      workflow_id: workflow_id.to_string(),
      workflow_name: workflow_name.to_string(),
    });

    let log = HistoryLog::new(workflow_id, workflow_name, input);
    self.run_pass(log).await
  }

  /// Resume a workflow whose history already exists.
  ///
  /// The workflow function is re-run from its entry point; recorded
  /// steps replay from the log, so execution fast-forwards to the first
  /// unresolved step and proceeds live. Resuming an already-finished
  /// workflow is an idempotent no-op that returns the recorded outcome.
  #[instrument(name = "workflow_resume", skip(self), fields(workflow_id = %workflow_id))]
  pub async fn resume(&self, workflow_id: &str) -> Result<PassOutcome, Error> {
    let _guard = self.claim(workflow_id)?;

    let log = {
      let logs = self.inner.logs.lock().unwrap();
      logs.get(workflow_id).cloned()
    };
    let log = match log {
      Some(log) => log,
      None => self.inner.store.load(workflow_id).await?.ok_or_else(|| {
        Error::UnknownWorkflowId {
          workflow_id: workflow_id.to_string(),
        }
      })?,
    };

    match log.status {
      WorkflowStatus::Completed => {
        return Ok(PassOutcome::Completed(
          log.result.clone().unwrap_or(Value::Null),
        ));
      }
      WorkflowStatus::Failed => {
        return Ok(PassOutcome::Failed(log.error.clone().unwrap_or_default()));
      }
      WorkflowStatus::Running | WorkflowStatus::Suspended => {}
    }

    info!(
      workflow_id = %workflow_id,
      workflow_name = %log.workflow_name,
      recorded_entries = log.len(),
      "workflow resuming"
    );
    self.inner.notifier.notify(ExecutionEvent::WorkflowResumed {
      workflow_id: workflow_id.to_string(),
      replayed_entries: log.len(),
    });

    self.run_pass(log).await
  }

  /// Startup protocol: reload every persisted log and re-establish the
  /// work the previous process left behind.
  ///
  /// Suspended logs with a recorded wake time get their wake rescheduled
  /// from the remaining delay (zero if already due); incomplete logs
  /// without one (a crash mid-step) are resumed immediately. Returns the
  /// number of workflows picked up.
  #[instrument(name = "engine_recover", skip(self))]
  pub async fn recover(&self) -> Result<usize, Error> {
    let persisted = self.inner.store.load_all().await?;
    let mut recovered = 0;

    for log in persisted {
      let workflow_id = log.workflow_id.clone();
      if log.status.is_terminal() {
        self.remember(log);
        continue;
      }

      recovered += 1;
      match log.pending_wake() {
        Some(wake_at) => {
          info!(
            workflow_id = %workflow_id,
            wake_at = %wake_at,
            remaining_ms = remaining_delay(wake_at).as_millis() as u64,
            "rescheduling wake from persisted history"
          );
          self.remember(log);
          self.scheduler().schedule(self.clone(), workflow_id, wake_at);
        }
        None => {
          // The previous process died mid-pass; replay now and let the
          // trailing step re-execute.
          warn!(workflow_id = %workflow_id, "resuming workflow interrupted mid-step");
          self.remember(log);
          if let Err(e) = self.resume(&workflow_id).await {
            error!(workflow_id = %workflow_id, error = %e, "recovery resume failed");
          }
        }
      }
    }

    Ok(recovered)
  }

  /// Current history for a workflow id, from memory or the store.
  pub async fn history(&self, workflow_id: &str) -> Result<Option<HistoryLog>, Error> {
    {
      let logs = self.inner.logs.lock().unwrap();
      if let Some(log) = logs.get(workflow_id) {
        return Ok(Some(log.clone()));
      }
    }
    Ok(self.inner.store.load(workflow_id).await?)
  }

  /// Run one execution pass over `log`, persist at the boundary, and
  /// translate the function's return into a [`PassOutcome`].
  async fn run_pass(&self, mut log: HistoryLog) -> Result<PassOutcome, Error> {
    let workflow_id = log.workflow_id.clone();
    let func = self
      .inner
      .registry
      .workflow(&log.workflow_name)
      .ok_or_else(|| Error::WorkflowNotFound {
        name: log.workflow_name.clone(),
      })?;

    log.status = WorkflowStatus::Running;
    let input = log.input.clone();
    let ctx = WorkflowContext::new(
      log,
      self.inner.registry.clone(),
      self.inner.notifier.clone(),
      self.inner.cancel.child_token(),
    );

    let result = func(ctx.clone(), input).await;
    let mut log = ctx.into_log();

    let outcome = match result {
      Ok(value) => {
        log.mark_completed(value.clone());
        PassOutcome::Completed(value)
      }
      Err(Error::Suspended { wake_at }) => {
        log.mark_suspended();
        PassOutcome::Suspended { wake_at }
      }
      Err(e @ Error::DeterminismViolation { .. }) => {
        // The durable copy is left untouched: retrying would reproduce
        // the same violation, and an operator needs the history intact.
        error!(workflow_id = %workflow_id, error = %e, "replay aborted");
        return Err(e);
      }
      Err(Error::Cancelled) => {
        // Progress since the last flush is abandoned; replay recovers it.
        warn!(workflow_id = %workflow_id, "pass cancelled");
        return Err(Error::Cancelled);
      }
      Err(e) => {
        let message = e.to_string();
        log.mark_failed(message.clone());
        PassOutcome::Failed(message)
      }
    };

    // Durability gate: nothing below runs, and no outcome is reported,
    // until the log has been saved.
    self.inner.store.save(&log).await?;
    self.remember(log);

    match &outcome {
      PassOutcome::Completed(_) => {
        info!(workflow_id = %workflow_id, "workflow completed");
        self
          .inner
          .notifier
          .notify(ExecutionEvent::WorkflowCompleted {
            workflow_id: workflow_id.clone(),
          });
      }
      PassOutcome::Suspended { wake_at } => {
        info!(workflow_id = %workflow_id, wake_at = %wake_at, "workflow suspended");
        self
          .inner
          .notifier
          .notify(ExecutionEvent::WorkflowSuspended {
            workflow_id: workflow_id.clone(),
            wake_at: *wake_at,
          });
        self
          .scheduler()
          .schedule(self.clone(), workflow_id.clone(), *wake_at);
      }
      PassOutcome::Failed(message) => {
        error!(workflow_id = %workflow_id, error = %message, "workflow failed");
        self.inner.notifier.notify(ExecutionEvent::WorkflowFailed {
          workflow_id: workflow_id.clone(),
          error: message.clone(),
        });
      }
    }

    Ok(outcome)
  }

  fn scheduler(&self) -> WakeScheduler {
    WakeScheduler::new(self.inner.cancel.clone())
  }

  fn remember(&self, log: HistoryLog) {
    let mut logs = self.inner.logs.lock().unwrap();
    logs.insert(log.workflow_id.clone(), log);
  }

  /// Claim exclusive ownership of a workflow id for the duration of a
  /// pass.
  fn claim(&self, workflow_id: &str) -> Result<ActiveGuard, Error> {
    let mut active = self.inner.active.lock().unwrap();
    if !active.insert(workflow_id.to_string()) {
      return Err(Error::AlreadyRunning {
        workflow_id: workflow_id.to_string(),
      });
    }
    Ok(ActiveGuard {
      inner: self.inner.clone(),
      workflow_id: workflow_id.to_string(),
    })
  }
}

/// Releases a claimed workflow id when the pass ends, on every path.
struct ActiveGuard {
  inner: Arc<EngineInner>,
  workflow_id: String,
}

impl Drop for ActiveGuard {
  fn drop(&mut self) {
    let mut active = self.inner.active.lock().unwrap();
    active.remove(&self.workflow_id);
  }
}
