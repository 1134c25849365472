//! Integration tests for start/suspend/resume replay semantics.

use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use anyhow::anyhow;
use async_trait::async_trait;
use ostinato_engine::{
  ChannelNotifier, Error, ExecutionEvent, PassOutcome, Registry, WorkflowEngine,
};
use ostinato_history::{HistoryEntry, HistoryLog, StepStatus, TIMER_STEP_NAME, WorkflowStatus};
use ostinato_store::{FileStore, HistoryStore, MemoryStore};
use serde_json::{Value, json};

/// Invocation counters shared between activities and assertions, across
/// engine instances (simulated restarts).
#[derive(Default)]
struct Counters {
  step_a: AtomicUsize,
  step_b: AtomicUsize,
  flaky: AtomicUsize,
}

/// Registry with two doubling activities and the `[step_a, sleep,
/// step_b]` pipeline workflow.
fn pipeline_registry(counters: Arc<Counters>, sleep_ms: u64) -> Registry {
  let mut registry = Registry::new();

  let c = counters.clone();
  registry
    .register_activity("step_a", move |input: Value| {
      let c = c.clone();
      async move {
        c.step_a.fetch_add(1, Ordering::SeqCst);
        let n = input.as_i64().ok_or_else(|| anyhow!("expected integer"))?;
        Ok(json!(n * 2))
      }
    })
    .unwrap();

  let c = counters.clone();
  registry
    .register_activity("step_b", move |input: Value| {
      let c = c.clone();
      async move {
        c.step_b.fetch_add(1, Ordering::SeqCst);
        let n = input.as_i64().ok_or_else(|| anyhow!("expected integer"))?;
        Ok(json!(n * 2))
      }
    })
    .unwrap();

  registry
    .register_workflow("pipeline", move |ctx, input| async move {
      let a = ctx.call("step_a", input).await?;
      ctx.sleep(Duration::from_millis(sleep_ms)).await?;
      ctx.call("step_b", a).await
    })
    .unwrap();

  registry
}

/// A store whose writes always fail, as a full disk would.
struct BrokenStore;

#[async_trait]
impl HistoryStore for BrokenStore {
  async fn save(&self, _log: &HistoryLog) -> Result<(), ostinato_store::Error> {
    Err(ostinato_store::Error::Io(io::Error::other("disk full")))
  }

  async fn load(&self, _workflow_id: &str) -> Result<Option<HistoryLog>, ostinato_store::Error> {
    Ok(None)
  }

  async fn load_all(&self) -> Result<Vec<HistoryLog>, ostinato_store::Error> {
    Ok(Vec::new())
  }

  async fn remove(&self, _workflow_id: &str) -> Result<(), ostinato_store::Error> {
    Ok(())
  }
}

async fn wait_for_completion(engine: &WorkflowEngine, workflow_id: &str) -> HistoryLog {
  for _ in 0..200 {
    if let Some(log) = engine.history(workflow_id).await.unwrap() {
      if log.status == WorkflowStatus::Completed {
        return log;
      }
    }
    tokio::time::sleep(Duration::from_millis(20)).await;
  }
  panic!("workflow '{workflow_id}' did not complete in time");
}

#[tokio::test]
async fn test_start_suspends_at_timer_and_resume_completes() {
  let counters = Arc::new(Counters::default());
  let store = Arc::new(MemoryStore::new());
  let engine = WorkflowEngine::new(pipeline_registry(counters.clone(), 5000), store.clone());

  let outcome = engine.start("order-1", "pipeline", json!(1)).await.unwrap();
  assert!(matches!(outcome, PassOutcome::Suspended { .. }));

  // Two entries persisted: step_a completed, timer completed.
  let log = engine.history("order-1").await.unwrap().unwrap();
  assert_eq!(log.status, WorkflowStatus::Suspended);
  assert_eq!(log.len(), 2);
  assert_eq!(log.entry(0).unwrap().step_name, "step_a");
  assert_eq!(log.entry(0).unwrap().output, Some(json!(2)));
  assert_eq!(log.entry(1).unwrap().step_name, TIMER_STEP_NAME);
  assert!(log.pending_wake().is_some());

  // Simulate a restart: fresh engine over the same store.
  engine.shutdown();
  let engine = WorkflowEngine::new(pipeline_registry(counters.clone(), 5000), store);
  let outcome = engine.resume("order-1").await.unwrap();
  assert_eq!(outcome, PassOutcome::Completed(json!(4)));

  let log = engine.history("order-1").await.unwrap().unwrap();
  assert_eq!(log.status, WorkflowStatus::Completed);
  assert_eq!(log.result, Some(json!(4)));
  assert_eq!(log.len(), 3);

  // step_a replayed from cache on resume: each operation ran exactly once.
  assert_eq!(counters.step_a.load(Ordering::SeqCst), 1);
  assert_eq!(counters.step_b.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_replay_is_deterministic_across_many_cycles() {
  let counters = Arc::new(Counters::default());
  let store = Arc::new(MemoryStore::new());

  let mut registry = Registry::new();
  let c = counters.clone();
  registry
    .register_activity("step_a", move |input: Value| {
      let c = c.clone();
      async move {
        c.step_a.fetch_add(1, Ordering::SeqCst);
        Ok(json!(input.as_i64().unwrap_or(0) * 2))
      }
    })
    .unwrap();
  registry
    .register_workflow("relay", move |ctx, input| async move {
      let mut v = ctx.call("step_a", input).await?;
      ctx.sleep(Duration::from_secs(60)).await?;
      v = ctx.call("step_a", v).await?;
      ctx.sleep(Duration::from_secs(60)).await?;
      ctx.call("step_a", v).await
    })
    .unwrap();

  let engine = WorkflowEngine::new(registry, store);
  let mut outcome = engine.start("relay-1", "relay", json!(1)).await.unwrap();
  let mut passes = 1;
  while matches!(outcome, PassOutcome::Suspended { .. }) {
    outcome = engine.resume("relay-1").await.unwrap();
    passes += 1;
  }

  assert_eq!(outcome, PassOutcome::Completed(json!(8)));
  assert_eq!(passes, 3);
  // Three live invocations total, none repeated by replay.
  assert_eq!(counters.step_a.load(Ordering::SeqCst), 3);

  let log = engine.history("relay-1").await.unwrap().unwrap();
  assert_eq!(log.len(), 5);
}

#[tokio::test]
async fn test_renamed_step_is_a_determinism_violation() {
  let counters = Arc::new(Counters::default());
  let store = Arc::new(MemoryStore::new());

  let engine = WorkflowEngine::new(pipeline_registry(counters.clone(), 5000), store.clone());
  engine.start("order-2", "pipeline", json!(1)).await.unwrap();
  engine.shutdown();

  // "Deploy" a workflow whose first step has a different name.
  let mut changed = Registry::new();
  changed
    .register_activity("step_z", move |input: Value| async move { Ok(input) })
    .unwrap();
  changed
    .register_workflow("pipeline", move |ctx, input| async move {
      ctx.call("step_z", input).await
    })
    .unwrap();

  let engine = WorkflowEngine::new(changed, store.clone());
  let err = engine.resume("order-2").await.unwrap_err();
  assert!(matches!(
    err,
    Error::DeterminismViolation {
      position: 0,
      ref recorded,
      ref actual,
      ..
    } if recorded == "step_a" && actual == "step_z"
  ));

  // The violation must not touch the durable history.
  let log = engine.history("order-2").await.unwrap().unwrap();
  assert_eq!(log.status, WorkflowStatus::Suspended);
  assert_eq!(log.len(), 2);
  // And nothing was silently executed.
  assert_eq!(counters.step_a.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_resume_of_completed_workflow_is_idempotent() {
  let counters = Arc::new(Counters::default());
  let store = Arc::new(MemoryStore::new());
  let engine = WorkflowEngine::new(pipeline_registry(counters.clone(), 5000), store);

  engine.start("order-3", "pipeline", json!(5)).await.unwrap();
  engine.resume("order-3").await.unwrap();
  let len_before = engine.history("order-3").await.unwrap().unwrap().len();

  // Repeated resumes return the recorded outcome without executing or
  // appending anything.
  for _ in 0..3 {
    let outcome = engine.resume("order-3").await.unwrap();
    assert_eq!(outcome, PassOutcome::Completed(json!(20)));
  }

  let log = engine.history("order-3").await.unwrap().unwrap();
  assert_eq!(log.len(), len_before);
  assert_eq!(counters.step_a.load(Ordering::SeqCst), 1);
  assert_eq!(counters.step_b.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_recorded_step_failure_replays_without_reexecution() {
  let counters = Arc::new(Counters::default());
  let store = Arc::new(MemoryStore::new());

  let mut registry = pipeline_registry(counters.clone(), 30_000);
  let c = counters.clone();
  registry
    .register_activity("flaky", move |input: Value| {
      let c = c.clone();
      async move {
        if c.flaky.fetch_add(1, Ordering::SeqCst) == 0 {
          Err(anyhow!("transient outage"))
        } else {
          Ok(input)
        }
      }
    })
    .unwrap();
  registry
    .register_workflow("retrying", move |ctx, input| async move {
      let v = match ctx.call("flaky", input.clone()).await {
        Ok(v) => v,
        Err(Error::Step { .. }) => ctx.call("flaky", input).await?,
        Err(e) => return Err(e),
      };
      ctx.sleep(Duration::from_secs(30)).await?;
      ctx.call("step_b", v).await
    })
    .unwrap();

  let engine = WorkflowEngine::new(registry, store);
  let outcome = engine.start("retry-1", "retrying", json!(3)).await.unwrap();
  assert!(matches!(outcome, PassOutcome::Suspended { .. }));
  assert_eq!(counters.flaky.load(Ordering::SeqCst), 2);

  let log = engine.history("retry-1").await.unwrap().unwrap();
  assert_eq!(log.entry(0).unwrap().status, StepStatus::Failed);
  assert!(
    log
      .entry(0)
      .unwrap()
      .error
      .as_deref()
      .unwrap()
      .contains("transient outage")
  );
  assert_eq!(log.entry(1).unwrap().status, StepStatus::Completed);

  // Replay must walk the exact same failure-then-retry path without
  // invoking the flaky operation again.
  let outcome = engine.resume("retry-1").await.unwrap();
  assert_eq!(outcome, PassOutcome::Completed(json!(6)));
  assert_eq!(counters.flaky.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_uncaught_step_failure_fails_the_workflow() {
  let counters = Arc::new(Counters::default());
  let store = Arc::new(MemoryStore::new());

  let mut registry = Registry::new();
  let c = counters.clone();
  registry
    .register_activity("charge", move |_input: Value| {
      let c = c.clone();
      async move {
        c.flaky.fetch_add(1, Ordering::SeqCst);
        Err(anyhow!("card declined"))
      }
    })
    .unwrap();
  registry
    .register_workflow("payment", move |ctx, input| async move {
      ctx.call("charge", input).await
    })
    .unwrap();

  let engine = WorkflowEngine::new(registry, store);
  let outcome = engine.start("pay-1", "payment", json!(9)).await.unwrap();
  let PassOutcome::Failed(message) = outcome else {
    panic!("expected failed outcome");
  };
  assert!(message.contains("card declined"));

  let log = engine.history("pay-1").await.unwrap().unwrap();
  assert_eq!(log.status, WorkflowStatus::Failed);
  assert_eq!(log.entry(0).unwrap().status, StepStatus::Failed);

  // Terminal: resume reports the recorded failure, nothing re-executes.
  let outcome = engine.resume("pay-1").await.unwrap();
  assert!(matches!(outcome, PassOutcome::Failed(_)));
  assert_eq!(counters.flaky.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_duplicate_start_and_unknown_resume_are_rejected() {
  let counters = Arc::new(Counters::default());
  let store = Arc::new(MemoryStore::new());
  let engine = WorkflowEngine::new(pipeline_registry(counters, 5000), store);

  engine.start("order-4", "pipeline", json!(1)).await.unwrap();
  assert!(matches!(
    engine.start("order-4", "pipeline", json!(1)).await,
    Err(Error::AlreadyExists { .. })
  ));

  assert!(matches!(
    engine.resume("ghost").await,
    Err(Error::UnknownWorkflowId { .. })
  ));

  assert!(matches!(
    engine.start("order-5", "nope", json!(1)).await,
    Err(Error::WorkflowNotFound { .. })
  ));
}

#[tokio::test]
async fn test_scheduled_wake_resumes_automatically() {
  let counters = Arc::new(Counters::default());
  let store = Arc::new(MemoryStore::new());
  let engine = WorkflowEngine::new(pipeline_registry(counters.clone(), 50), store);

  let outcome = engine.start("order-6", "pipeline", json!(2)).await.unwrap();
  assert!(matches!(outcome, PassOutcome::Suspended { .. }));

  let log = wait_for_completion(&engine, "order-6").await;
  assert_eq!(log.result, Some(json!(8)));
  assert_eq!(counters.step_a.load(Ordering::SeqCst), 1);
  assert_eq!(counters.step_b.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_recover_reschedules_pending_timer_from_history() {
  let dir = tempfile::tempdir().unwrap();
  let counters = Arc::new(Counters::default());
  let store = Arc::new(FileStore::new(dir.path()));

  let engine = WorkflowEngine::new(pipeline_registry(counters.clone(), 100), store.clone());
  engine.start("order-7", "pipeline", json!(3)).await.unwrap();
  // "Crash": the in-memory wake dies with the engine.
  engine.shutdown();
  drop(engine);

  let engine = WorkflowEngine::new(pipeline_registry(counters.clone(), 100), store);
  let recovered = engine.recover().await.unwrap();
  assert_eq!(recovered, 1);

  let log = wait_for_completion(&engine, "order-7").await;
  assert_eq!(log.result, Some(json!(12)));
  assert_eq!(counters.step_a.load(Ordering::SeqCst), 1);
  assert_eq!(counters.step_b.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_recover_reexecutes_step_interrupted_by_crash() {
  let counters = Arc::new(Counters::default());
  let store = Arc::new(MemoryStore::new());

  // A log whose pass died mid-step: trailing entry still `running`,
  // its completion never flushed.
  let mut log = HistoryLog::new("order-8", "pipeline", json!(1));
  log.append(HistoryEntry::running("order-8", "step_a", json!(1)));
  store.save(&log).await.unwrap();

  let engine = WorkflowEngine::new(pipeline_registry(counters.clone(), 50), store);
  let recovered = engine.recover().await.unwrap();
  assert_eq!(recovered, 1);

  let log = wait_for_completion(&engine, "order-8").await;
  assert_eq!(log.result, Some(json!(4)));
  assert_eq!(log.len(), 3);
  // The interrupted step ran again at its original position.
  assert_eq!(log.entry(0).unwrap().step_name, "step_a");
  assert_eq!(log.entry(0).unwrap().status, StepStatus::Completed);
  assert_eq!(counters.step_a.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_shutdown_cancels_new_passes() {
  let counters = Arc::new(Counters::default());
  let store = Arc::new(MemoryStore::new());
  let engine = WorkflowEngine::new(pipeline_registry(counters.clone(), 5000), store);

  engine.shutdown();
  assert!(matches!(
    engine.start("order-9", "pipeline", json!(1)).await,
    Err(Error::Cancelled)
  ));
  assert_eq!(counters.step_a.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_failed_save_surfaces_error_and_claims_nothing() {
  let counters = Arc::new(Counters::default());
  let (sender, mut receiver) = tokio::sync::mpsc::unbounded_channel();

  let engine = WorkflowEngine::with_notifier(
    pipeline_registry(counters.clone(), 50),
    Arc::new(BrokenStore),
    ChannelNotifier::new(sender),
  );

  // The pass ran up to the timer, but the flush failed: the error
  // surfaces and the workflow is never reported as suspended.
  assert!(matches!(
    engine.start("order-11", "pipeline", json!(1)).await,
    Err(Error::Persistence(_))
  ));
  assert_eq!(counters.step_a.load(Ordering::SeqCst), 1);

  let mut events = Vec::new();
  while let Ok(event) = receiver.try_recv() {
    events.push(event);
  }
  assert!(
    !events
      .iter()
      .any(|e| matches!(e, ExecutionEvent::WorkflowSuspended { .. })),
    "unsaved pass must not be reported as suspended"
  );

  // No wake was scheduled either: well past the 50ms timer, nothing has
  // re-driven the workflow.
  tokio::time::sleep(Duration::from_millis(200)).await;
  assert_eq!(counters.step_b.load(Ordering::SeqCst), 0);
  assert!(receiver.try_recv().is_err());
}

#[tokio::test]
async fn test_events_are_emitted_in_order() {
  let counters = Arc::new(Counters::default());
  let store = Arc::new(MemoryStore::new());
  let (sender, mut receiver) = tokio::sync::mpsc::unbounded_channel();

  let engine = WorkflowEngine::with_notifier(
    pipeline_registry(counters, 5000),
    store,
    ChannelNotifier::new(sender),
  );
  engine.start("order-10", "pipeline", json!(1)).await.unwrap();
  engine.resume("order-10").await.unwrap();

  let mut kinds = Vec::new();
  while let Ok(event) = receiver.try_recv() {
    kinds.push(match event {
      ExecutionEvent::WorkflowStarted { .. } => "started",
      ExecutionEvent::WorkflowResumed { .. } => "resumed",
      ExecutionEvent::StepStarted { .. } => "step_started",
      ExecutionEvent::StepCompleted { .. } => "step_completed",
      ExecutionEvent::StepFailed { .. } => "step_failed",
      ExecutionEvent::StepReplayed { .. } => "step_replayed",
      ExecutionEvent::TimerScheduled { .. } => "timer_scheduled",
      ExecutionEvent::WorkflowSuspended { .. } => "suspended",
      ExecutionEvent::WorkflowCompleted { .. } => "completed",
      ExecutionEvent::WorkflowFailed { .. } => "failed",
    });
  }

  assert_eq!(
    kinds,
    vec![
      "started",
      "step_started",
      "step_completed",
      "timer_scheduled",
      "suspended",
      "resumed",
      "step_replayed",
      "step_replayed",
      "step_started",
      "step_completed",
      "completed",
    ]
  );
}
