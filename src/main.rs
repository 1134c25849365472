use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};

use ostinato_history::WorkflowStatus;
use ostinato_store::{FileStore, HistoryStore};

/// Ostinato - a deterministic workflow replay engine
#[derive(Parser)]
#[command(name = "ostinato")]
#[command(version, about, long_about = None)]
struct Cli {
  /// Path to the data directory (default: ~/.ostinato)
  #[arg(long, global = true)]
  data_dir: Option<PathBuf>,

  #[command(subcommand)]
  command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
  /// Inspect and manage persisted workflow histories
  History {
    #[command(subcommand)]
    action: HistoryAction,
  },
}

#[derive(Subcommand)]
enum HistoryAction {
  /// List every persisted workflow history
  List,

  /// Print the full history log for a workflow
  Show {
    /// The workflow id to show
    workflow_id: String,
  },

  /// Delete the persisted history for a workflow
  Purge {
    /// The workflow id to purge
    workflow_id: String,
  },
}

fn main() -> Result<()> {
  let cli = Cli::parse();

  let data_dir = cli.data_dir.unwrap_or_else(|| {
    dirs::home_dir()
      .expect("could not determine home directory")
      .join(".ostinato")
  });

  match cli.command {
    Some(Commands::History { action }) => {
      let rt = tokio::runtime::Runtime::new()?;
      rt.block_on(async { run_history(action, data_dir).await })?;
    }
    None => {
      println!("ostinato - use --help to see available commands");
    }
  }

  Ok(())
}

async fn run_history(action: HistoryAction, data_dir: PathBuf) -> Result<()> {
  let store = FileStore::new(data_dir.join("history"));

  match action {
    HistoryAction::List => {
      let mut logs = store
        .load_all()
        .await
        .context("failed to load histories")?;
      if logs.is_empty() {
        eprintln!("no workflow histories in {}", store.dir().display());
        return Ok(());
      }

      logs.sort_by(|a, b| a.started_at.cmp(&b.started_at));
      for log in logs {
        let result = match log.status {
          WorkflowStatus::Completed => {
            format!(" -> {}", serde_json::to_string(&log.result)?)
          }
          WorkflowStatus::Failed => {
            format!(" ({})", log.error.as_deref().unwrap_or("unknown error"))
          }
          _ => String::new(),
        };
        println!(
          "{}\t{}\t{}\t{} entries{}",
          log.workflow_id,
          log.workflow_name,
          log.status,
          log.len(),
          result
        );
      }
    }

    HistoryAction::Show { workflow_id } => {
      let log = store
        .load(&workflow_id)
        .await
        .context("failed to load history")?;
      match log {
        Some(log) => println!("{}", serde_json::to_string_pretty(&log)?),
        None => bail!("no history for workflow '{workflow_id}'"),
      }
    }

    HistoryAction::Purge { workflow_id } => {
      store
        .remove(&workflow_id)
        .await
        .with_context(|| format!("failed to purge workflow '{workflow_id}'"))?;
      eprintln!("purged history for workflow '{workflow_id}'");
    }
  }

  Ok(())
}
