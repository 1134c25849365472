//! In-memory history store.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use ostinato_history::HistoryLog;

use crate::{Error, HistoryStore};

/// A non-durable store backed by a process-local map.
///
/// Useful for tests and for running the engine without durability. Logs
/// do not survive a restart.
#[derive(Debug, Default)]
pub struct MemoryStore {
  logs: Mutex<HashMap<String, HistoryLog>>,
}

impl MemoryStore {
  pub fn new() -> Self {
    Self::default()
  }
}

#[async_trait]
impl HistoryStore for MemoryStore {
  async fn save(&self, log: &HistoryLog) -> Result<(), Error> {
    let mut logs = self.logs.lock().unwrap();
    logs.insert(log.workflow_id.clone(), log.clone());
    Ok(())
  }

  async fn load(&self, workflow_id: &str) -> Result<Option<HistoryLog>, Error> {
    let logs = self.logs.lock().unwrap();
    Ok(logs.get(workflow_id).cloned())
  }

  async fn load_all(&self) -> Result<Vec<HistoryLog>, Error> {
    let logs = self.logs.lock().unwrap();
    Ok(logs.values().cloned().collect())
  }

  async fn remove(&self, workflow_id: &str) -> Result<(), Error> {
    let mut logs = self.logs.lock().unwrap();
    logs
      .remove(workflow_id)
      .map(|_| ())
      .ok_or_else(|| Error::NotFound(workflow_id.to_string()))
  }
}
