//! Deterministic workflow replay engine for ostinato.
//!
//! Workflows are ordinary sequential async functions whose effectful
//! steps go through a [`WorkflowContext`]. Every step outcome is recorded
//! in an append-only history log; when a step must wait for time to pass
//! the pass is abandoned entirely and the log persisted. The workflow is
//! later re-run from its entry point, recorded steps are satisfied from
//! the log without re-executing, and execution fast-forwards to the first
//! unresolved step and proceeds live from there.
//!
//! # Architecture
//!
//! ```text
//! WorkflowEngine
//! ├── start(id, workflow, input) - fresh log, run one pass
//! ├── resume(id)                 - reload log, replay, continue live
//! └── recover()                  - startup scan: reschedule wakes / resume
//!
//! WorkflowContext (one per pass)
//! ├── call(activity, input) - cache-or-execute against the history log
//! └── sleep(duration)       - cached: fast-forward; miss: suspend the pass
//! ```
//!
//! # Usage
//!
//! ```ignore
//! let mut registry = Registry::new();
//! registry.register_activity("charge", |input| async move { /* ... */ })?;
//! registry.register_workflow("order", |ctx, input| async move {
//!   let receipt = ctx.call("charge", input).await?;
//!   ctx.sleep(Duration::from_secs(3600)).await?;
//!   ctx.call("remind", receipt).await
//! })?;
//!
//! let engine = WorkflowEngine::new(registry, store);
//! engine.recover().await?;
//! engine.start("order-42", "order", payload).await?;
//! ```

mod context;
mod engine;
mod error;
mod events;
mod registry;
mod scheduler;

pub use context::WorkflowContext;
pub use engine::{PassOutcome, WorkflowEngine};
pub use error::Error;
pub use events::{ChannelNotifier, ExecutionEvent, ExecutionNotifier, NoopNotifier};
pub use registry::Registry;
