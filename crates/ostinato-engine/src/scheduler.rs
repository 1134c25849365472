//! Wake scheduler.
//!
//! Arranges for a suspended workflow to be re-driven once its recorded
//! wake time arrives. Wakes are in-memory tokio tasks and are not
//! durable: after a restart they are rebuilt from the persisted logs by
//! [`WorkflowEngine::recover`](crate::WorkflowEngine::recover).

use chrono::{DateTime, Utc};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::engine::WorkflowEngine;
use crate::error::Error;

/// Schedules wake callbacks against the engine's cancellation token.
#[derive(Debug, Clone)]
pub(crate) struct WakeScheduler {
  cancel: CancellationToken,
}

impl WakeScheduler {
  pub(crate) fn new(cancel: CancellationToken) -> Self {
    Self { cancel }
  }

  /// Arrange for `resume(workflow_id)` to run no earlier than `wake_at`.
  ///
  /// The wake is only registered after the suspended log has been saved,
  /// so a fired wake always finds durable state to resume from.
  pub(crate) fn schedule(&self, engine: WorkflowEngine, workflow_id: String, wake_at: DateTime<Utc>) {
    let cancel = self.cancel.clone();
    let delay = remaining_delay(wake_at);

    debug!(
      workflow_id = %workflow_id,
      wake_at = %wake_at,
      delay_ms = delay.as_millis() as u64,
      "wake scheduled"
    );

    tokio::spawn(async move {
      tokio::select! {
        _ = cancel.cancelled() => {
          debug!(workflow_id = %workflow_id, "wake cancelled before firing");
        }
        _ = tokio::time::sleep(delay) => {
          info!(workflow_id = %workflow_id, "wake fired, resuming workflow");
          match engine.resume(&workflow_id).await {
            Ok(_) => {}
            // Another pass picked the id up first; the wake is stale.
            Err(Error::AlreadyRunning { .. }) => {
              debug!(workflow_id = %workflow_id, "wake found workflow already running");
            }
            Err(e) => {
              error!(workflow_id = %workflow_id, error = %e, "resume after wake failed");
            }
          }
        }
      }
    });
  }
}

/// Wall-clock delay until `wake_at`, zero if it has already passed.
pub(crate) fn remaining_delay(wake_at: DateTime<Utc>) -> Duration {
  (wake_at - Utc::now()).to_std().unwrap_or(Duration::ZERO)
}
