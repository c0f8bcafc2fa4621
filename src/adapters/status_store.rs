//! File-backed status store.
//!
//! Each task gets an append-only `<root>/<task_id>.jsonl` log of
//! [`StatusEntry`] records; current status is derived by replay.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use async_trait::async_trait;
use tokio::fs::{self, File, OpenOptions};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::warn;

use crate::domain::{Checkpoint, StatusEntry, StatusEntryKind, TaskStatus};

use super::StatusStore;

/// Status store keeping one JSONL log per task
#[derive(Debug, Clone)]
pub struct FileStatusStore {
    root: PathBuf,
}

impl FileStatusStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn log_path(&self, task_id: &str) -> PathBuf {
        self.root.join(format!("{}.jsonl", task_id))
    }

    async fn append(&self, entry: &StatusEntry) -> Result<()> {
        fs::create_dir_all(&self.root)
            .await
            .with_context(|| format!("Failed to create status directory: {}", self.root.display()))?;

        let path = self.log_path(&entry.task_id);
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await
            .with_context(|| format!("Failed to open status log: {}", path.display()))?;

        let json = serde_json::to_string(entry).context("Failed to serialize status entry")?;
        file.write_all(format!("{}\n", json).as_bytes())
            .await
            .context("Failed to write status entry")?;
        file.flush().await.context("Failed to flush status entry")?;

        Ok(())
    }

    /// Replay all entries of a task in order.
    ///
    /// A torn trailing line (crash mid-write) is skipped.
    pub async fn replay(&self, task_id: &str) -> Result<Vec<StatusEntry>> {
        let path = self.log_path(task_id);
        if !path.exists() {
            return Ok(Vec::new());
        }

        let file = File::open(&path)
            .await
            .with_context(|| format!("Failed to open status log: {}", path.display()))?;
        let mut lines = BufReader::new(file).lines();
        let mut entries = Vec::new();

        while let Some(line) = lines.next_line().await? {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<StatusEntry>(&line) {
                Ok(entry) => entries.push(entry),
                Err(e) => warn!(task_id, error = %e, "Skipping unreadable status entry"),
            }
        }

        Ok(entries)
    }

    /// Task ids with a status log, sorted
    pub async fn list_tasks(&self) -> Result<Vec<String>> {
        if !self.root.exists() {
            return Ok(Vec::new());
        }

        let mut tasks = Vec::new();
        let mut entries = fs::read_dir(&self.root).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) == Some("jsonl") {
                if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                    tasks.push(stem.to_string());
                }
            }
        }
        tasks.sort();
        Ok(tasks)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

#[async_trait]
impl StatusStore for FileStatusStore {
    async fn record_submission(&self, task_id: &str, file_path: &Path) -> Result<()> {
        self.append(&StatusEntry::new(
            task_id,
            StatusEntryKind::Submitted {
                file_path: file_path.to_path_buf(),
            },
        ))
        .await
    }

    async fn update_status(&self, task_id: &str, checkpoint: Checkpoint) -> Result<()> {
        self.append(&StatusEntry::new(
            task_id,
            StatusEntryKind::Checkpoint { checkpoint },
        ))
        .await
    }

    async fn record_error(&self, task_id: &str, message: &str) -> Result<()> {
        self.append(&StatusEntry::new(
            task_id,
            StatusEntryKind::Error {
                message: message.to_string(),
            },
        ))
        .await
    }

    async fn load(&self, task_id: &str) -> Result<Option<TaskStatus>> {
        let entries = self.replay(task_id).await?;
        Ok(TaskStatus::from_entries(&entries))
    }
}
