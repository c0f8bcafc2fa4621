//! Task identity, lifecycle state, and durable status.
//!
//! Two views of a task exist:
//! - [`TaskRecord`]: in-memory lifecycle record owned by the lifecycle controller
//! - [`TaskStatus`]: durable status reconstructed by replaying [`StatusEntry`] records

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::checkpoint::Checkpoint;

/// Pause/resume/stop status of a task, independent of its checkpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleState {
    Pending,
    Running,
    Paused,
    Stopped,
    Completed,
    Errored,
}

impl LifecycleState {
    /// Terminal states accept no further transitions
    pub fn is_terminal(self) -> bool {
        matches!(self, LifecycleState::Stopped | LifecycleState::Completed)
    }
}

/// Lifecycle controller's view of one task
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskRecord {
    pub id: String,
    pub state: LifecycleState,

    /// Informational label of the step being executed
    pub current_step: Option<String>,

    /// Message of the last failure; cleared on restart
    pub last_error: Option<String>,

    pub submitted_at: DateTime<Utc>,
}

impl TaskRecord {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            state: LifecycleState::Pending,
            current_step: None,
            last_error: None,
            submitted_at: Utc::now(),
        }
    }
}

/// Derive a task id from a dataset path (the file stem)
pub fn task_id_from_path(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| path.to_string_lossy().to_string())
}

/// One line of the append-only status log
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusEntry {
    pub timestamp: DateTime<Utc>,
    pub task_id: String,

    #[serde(flatten)]
    pub kind: StatusEntryKind,
}

impl StatusEntry {
    pub fn new(task_id: impl Into<String>, kind: StatusEntryKind) -> Self {
        Self {
            timestamp: Utc::now(),
            task_id: task_id.into(),
            kind,
        }
    }
}

/// What a status log line records
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StatusEntryKind {
    /// Task submitted against a dataset file
    Submitted { file_path: PathBuf },

    /// Checkpoint written
    Checkpoint { checkpoint: Checkpoint },

    /// Failure recorded
    Error { message: String },
}

/// Durable status of a task
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskStatus {
    pub task_id: String,

    /// Dataset the task was submitted with
    pub file_path: Option<PathBuf>,

    /// Last written checkpoint (may be `Error`)
    pub checkpoint: Checkpoint,

    /// Last checkpoint other than `Error`; where a resubmission resumes
    pub last_durable: Checkpoint,

    pub last_error: Option<String>,

    /// Every checkpoint written, in order
    pub history: Vec<Checkpoint>,

    pub updated_at: DateTime<Utc>,
}

impl TaskStatus {
    /// Reconstruct status from log entries (`None` when there are none)
    pub fn from_entries(entries: &[StatusEntry]) -> Option<Self> {
        let first = entries.first()?;

        let mut status = Self {
            task_id: first.task_id.clone(),
            file_path: None,
            checkpoint: Checkpoint::Queued,
            last_durable: Checkpoint::Queued,
            last_error: None,
            history: Vec::new(),
            updated_at: first.timestamp,
        };

        for entry in entries {
            status.apply(entry);
        }

        Some(status)
    }

    /// Apply a single entry (last write wins)
    pub fn apply(&mut self, entry: &StatusEntry) {
        self.updated_at = entry.timestamp;
        match &entry.kind {
            StatusEntryKind::Submitted { file_path } => {
                self.file_path = Some(file_path.clone());
            }
            StatusEntryKind::Checkpoint { checkpoint } => {
                self.checkpoint = *checkpoint;
                self.history.push(*checkpoint);
                if *checkpoint != Checkpoint::Error {
                    self.last_durable = *checkpoint;
                    self.last_error = None;
                }
            }
            StatusEntryKind::Error { message } => {
                self.last_error = Some(message.clone());
            }
        }
    }

    /// Whether the pipeline finished for this task
    pub fn is_done(&self) -> bool {
        self.checkpoint == Checkpoint::Done
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::checkpoint::StepId;

    #[test]
    fn test_task_id_from_path() {
        assert_eq!(task_id_from_path(Path::new("/data/file_abc.jsonl")), "file_abc");
        assert_eq!(task_id_from_path(Path::new("plain")), "plain");
    }

    #[test]
    fn test_terminal_states() {
        assert!(LifecycleState::Stopped.is_terminal());
        assert!(LifecycleState::Completed.is_terminal());
        assert!(!LifecycleState::Errored.is_terminal());
        assert!(!LifecycleState::Paused.is_terminal());
    }

    #[test]
    fn test_status_keeps_last_durable_checkpoint_across_error() {
        let entries = vec![
            StatusEntry::new(
                "t1",
                StatusEntryKind::Submitted {
                    file_path: PathBuf::from("/data/t1.jsonl"),
                },
            ),
            StatusEntry::new(
                "t1",
                StatusEntryKind::Checkpoint {
                    checkpoint: Checkpoint::Started(StepId::Enrich),
                },
            ),
            StatusEntry::new(
                "t1",
                StatusEntryKind::Error {
                    message: "boom".into(),
                },
            ),
            StatusEntry::new(
                "t1",
                StatusEntryKind::Checkpoint {
                    checkpoint: Checkpoint::Error,
                },
            ),
        ];

        let status = TaskStatus::from_entries(&entries).unwrap();
        assert_eq!(status.checkpoint, Checkpoint::Error);
        assert_eq!(status.last_durable, Checkpoint::Started(StepId::Enrich));
        assert_eq!(status.last_error.as_deref(), Some("boom"));
        assert_eq!(status.file_path, Some(PathBuf::from("/data/t1.jsonl")));
        assert_eq!(status.history.len(), 2);
    }

    #[test]
    fn test_status_entry_json_shape() {
        let entry = StatusEntry::new(
            "t1",
            StatusEntryKind::Checkpoint {
                checkpoint: Checkpoint::Done,
            },
        );
        let json = serde_json::to_value(&entry).unwrap();
        assert_eq!(json["kind"], "checkpoint");
        assert_eq!(json["checkpoint"], "done");
        assert_eq!(json["task_id"], "t1");
    }
}
