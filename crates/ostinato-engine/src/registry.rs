//! Workflow and activity registry.
//!
//! Names are resolved once, at engine construction: a workflow name maps
//! to the deterministic function that is re-run on every resume, and an
//! activity name maps to the effectful operation a step invokes on a
//! cache miss. The persisted log records names only, so the same
//! registrations must be present in the process that resumes a workflow.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use futures::future::BoxFuture;
use ostinato_history::TIMER_STEP_NAME;
use serde_json::Value;

use crate::context::WorkflowContext;
use crate::error::Error;

/// A registered workflow function.
pub(crate) type WorkflowFn =
  Arc<dyn Fn(WorkflowContext, Value) -> BoxFuture<'static, Result<Value, Error>> + Send + Sync>;

/// A registered activity operation.
pub(crate) type ActivityFn =
  Arc<dyn Fn(Value) -> BoxFuture<'static, anyhow::Result<Value>> + Send + Sync>;

/// Maps workflow and activity names to their implementations.
#[derive(Clone, Default)]
pub struct Registry {
  workflows: HashMap<String, WorkflowFn>,
  activities: HashMap<String, ActivityFn>,
}

impl Registry {
  pub fn new() -> Self {
    Self::default()
  }

  /// Register a workflow function.
  ///
  /// The function must be deterministic: given the same input and the
  /// same step results it must invoke the same steps in the same order.
  /// Branch on step outputs, never on wall-clock time, randomness, or
  /// ambient state.
  pub fn register_workflow<F, Fut>(&mut self, name: impl Into<String>, f: F) -> Result<(), Error>
  where
    F: Fn(WorkflowContext, Value) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value, Error>> + Send + 'static,
  {
    let name = name.into();
    if self.workflows.contains_key(&name) {
      return Err(Error::DuplicateName { name });
    }
    self.workflows.insert(
      name,
      Arc::new(move |ctx, input| Box::pin(f(ctx, input)) as BoxFuture<'static, _>),
    );
    Ok(())
  }

  /// Register an activity operation.
  ///
  /// Activities should be idempotent: a crash between flush points loses
  /// completed-but-unflushed entries, and those steps execute again on
  /// the next resume.
  pub fn register_activity<F, Fut>(&mut self, name: impl Into<String>, f: F) -> Result<(), Error>
  where
    F: Fn(Value) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<Value>> + Send + 'static,
  {
    let name = name.into();
    if name == TIMER_STEP_NAME {
      return Err(Error::ReservedName { name });
    }
    if self.activities.contains_key(&name) {
      return Err(Error::DuplicateName { name });
    }
    self.activities.insert(
      name,
      Arc::new(move |input| Box::pin(f(input)) as BoxFuture<'static, _>),
    );
    Ok(())
  }

  pub(crate) fn workflow(&self, name: &str) -> Option<WorkflowFn> {
    self.workflows.get(name).cloned()
  }

  pub(crate) fn activity(&self, name: &str) -> Option<ActivityFn> {
    self.activities.get(name).cloned()
  }
}
