//! Ostinato Store
//!
//! This crate provides the persistence bridge between the in-memory
//! history a pass mutates and the durable copy that survives a process
//! restart. The engine writes through it at suspension, completion, and
//! failure boundaries, and reads it once at startup to discover
//! workflows that need to be resumed.
//!
//! The [`HistoryStore`] trait defines operations for:
//! - Saving a workflow's history log
//! - Loading a single log, or every persisted log
//! - Removing a log (cleanup is an operator action, never automatic)

mod file;
mod memory;

pub use file::FileStore;
pub use memory::MemoryStore;

use async_trait::async_trait;
use ostinato_history::HistoryLog;

/// Error type for storage operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
  /// The requested record was not found.
  #[error("not found: {0}")]
  NotFound(String),

  /// An I/O error occurred.
  #[error("io error: {0}")]
  Io(#[from] std::io::Error),

  /// A log could not be encoded or decoded.
  #[error("serialization error: {0}")]
  Serialization(#[from] serde_json::Error),
}

/// Durable storage for workflow history logs.
#[async_trait]
pub trait HistoryStore: Send + Sync {
  /// Persist a history log, replacing any previous copy.
  ///
  /// A log is only considered durable once this returns `Ok`; the engine
  /// will not report a workflow as suspended or completed before then.
  async fn save(&self, log: &HistoryLog) -> Result<(), Error>;

  /// Load the history log for a workflow id, if one is persisted.
  async fn load(&self, workflow_id: &str) -> Result<Option<HistoryLog>, Error>;

  /// Load every persisted history log.
  async fn load_all(&self) -> Result<Vec<HistoryLog>, Error>;

  /// Remove the persisted log for a workflow id.
  async fn remove(&self, workflow_id: &str) -> Result<(), Error>;
}
