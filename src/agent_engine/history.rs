use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::errors::BarryResult;

/// One line of the episode trajectory log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub ts: chrono::DateTime<chrono::Utc>,
    pub step: u32,
    pub task: String,
    pub trace: Vec<String>,
    pub message: String,
    pub commands: Vec<String>,
}

pub struct SessionHistory {
    pub session_id: String,
    file_path: PathBuf,
}

impl SessionHistory {
    /// History file inside `dir`, or the default data dir when `None`.
    pub fn new(dir: Option<&Path>) -> Self {
        let session_id = uuid::Uuid::new_v4().to_string();
        let dir = dir.map(Path::to_path_buf).unwrap_or_else(data_dir_or_cwd);
        let file_path = dir.join(format!("session_{session_id}.jsonl"));
        Self { session_id, file_path }
    }

    pub fn path(&self) -> &Path {
        &self.file_path
    }

    /// Append one entry to the JSONL file.
    pub fn append(&self, entry: &HistoryEntry) -> BarryResult<()> {
        if let Some(parent) = self.file_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let line = serde_json::to_string(entry)?;
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.file_path)?;
        writeln!(file, "{}", line)?;
        tracing::debug!(path = %self.file_path.display(), step = entry.step, "history entry flushed");
        Ok(())
    }

    /// Like [`append`](Self::append), but failures are only logged.
    pub fn record(&self, entry: &HistoryEntry) {
        if let Err(e) = self.append(entry) {
            tracing::warn!(error = %e, path = %self.file_path.display(), "failed to write history");
        }
    }
}

/// `<data_local_dir>/barry/sessions`, falling back to `./sessions`.
pub fn data_dir_or_cwd() -> PathBuf {
    match dirs::data_local_dir() {
        Some(base) => base.join("barry").join("sessions"),
        None => std::env::current_dir()
            .unwrap_or_else(|_| PathBuf::from("."))
            .join("sessions"),
    }
}
