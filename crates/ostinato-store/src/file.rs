//! File-backed history store.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use ostinato_history::HistoryLog;
use tracing::warn;

use crate::{Error, HistoryStore};

/// A durable store that keeps one JSON document per workflow id under a
/// data directory.
///
/// Saves are atomic: the log is written to a temporary file and renamed
/// over the previous copy, so a crash mid-save leaves the old log intact.
#[derive(Debug, Clone)]
pub struct FileStore {
  dir: PathBuf,
}

impl FileStore {
  /// Create a store rooted at `dir`. The directory is created on first save.
  pub fn new(dir: impl Into<PathBuf>) -> Self {
    Self { dir: dir.into() }
  }

  pub fn dir(&self) -> &Path {
    &self.dir
  }

  fn log_path(&self, workflow_id: &str) -> PathBuf {
    self.dir.join(format!("{}.json", sanitize(workflow_id)))
  }
}

/// Map a workflow id onto a filesystem-safe file stem.
///
/// The id itself is recovered from the document contents, not the file
/// name, so the mapping only has to be safe, not reversible.
fn sanitize(workflow_id: &str) -> String {
  workflow_id
    .chars()
    .map(|c| {
      if c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.' {
        c
      } else {
        '_'
      }
    })
    .collect()
}

#[async_trait]
impl HistoryStore for FileStore {
  async fn save(&self, log: &HistoryLog) -> Result<(), Error> {
    tokio::fs::create_dir_all(&self.dir).await?;

    let path = self.log_path(&log.workflow_id);
    let tmp_path = path.with_extension("json.tmp");
    let data = serde_json::to_vec_pretty(log)?;

    tokio::fs::write(&tmp_path, &data).await?;
    tokio::fs::rename(&tmp_path, &path).await?;
    Ok(())
  }

  async fn load(&self, workflow_id: &str) -> Result<Option<HistoryLog>, Error> {
    let path = self.log_path(workflow_id);
    let data = match tokio::fs::read(&path).await {
      Ok(data) => data,
      Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
      Err(e) => return Err(e.into()),
    };
    Ok(Some(serde_json::from_slice(&data)?))
  }

  async fn load_all(&self) -> Result<Vec<HistoryLog>, Error> {
    let mut read_dir = match tokio::fs::read_dir(&self.dir).await {
      Ok(read_dir) => read_dir,
      Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
      Err(e) => return Err(e.into()),
    };

    let mut logs = Vec::new();
    while let Some(dir_entry) = read_dir.next_entry().await? {
      let path = dir_entry.path();
      if path.extension().and_then(|e| e.to_str()) != Some("json") {
        continue;
      }
      let data = tokio::fs::read(&path).await?;
      match serde_json::from_slice::<HistoryLog>(&data) {
        Ok(log) => logs.push(log),
        Err(e) => {
          // Leave the file for the operator rather than failing startup.
          warn!(path = %path.display(), error = %e, "skipping unreadable history log");
        }
      }
    }
    Ok(logs)
  }

  async fn remove(&self, workflow_id: &str) -> Result<(), Error> {
    let path = self.log_path(workflow_id);
    match tokio::fs::remove_file(&path).await {
      Ok(()) => Ok(()),
      Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
        Err(Error::NotFound(workflow_id.to_string()))
      }
      Err(e) => Err(e.into()),
    }
  }
}
