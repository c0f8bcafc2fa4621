//! Pipeline positions and the status vocabulary published on the bus.
//!
//! Two concerns live here and are kept apart:
//! - [`Checkpoint`]: where a task is in the fixed step sequence
//! - [`StatusMarker`]: the event/status names other services listen for
//!
//! The translation between them is an explicit table in both directions.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// One stage of the fixed pipeline, in execution order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepId {
    /// Load the dataset from the dataset store
    Ingest,

    /// De-duplicate rows and sanitise text
    Clean,

    /// Annotate rows through the model providers
    Enrich,

    /// Derive extra columns (extension point)
    Augment,

    /// Write the final dataset
    Persist,
}

impl StepId {
    /// All steps in execution order
    pub const ALL: [StepId; 5] = [
        StepId::Ingest,
        StepId::Clean,
        StepId::Enrich,
        StepId::Augment,
        StepId::Persist,
    ];

    /// Zero-based position in the sequence
    pub fn index(self) -> usize {
        match self {
            StepId::Ingest => 0,
            StepId::Clean => 1,
            StepId::Enrich => 2,
            StepId::Augment => 3,
            StepId::Persist => 4,
        }
    }

    /// The step that follows this one, if any
    pub fn next(self) -> Option<StepId> {
        Self::ALL.get(self.index() + 1).copied()
    }

    /// Label used in canonical checkpoint names
    pub fn label(self) -> &'static str {
        match self {
            StepId::Ingest => "reading-dataset",
            StepId::Clean => "process-cleaning",
            StepId::Enrich => "sending-to-llm",
            StepId::Augment => "appending-columns",
            StepId::Persist => "saving-file",
        }
    }

    fn from_label(label: &str) -> Option<StepId> {
        Self::ALL.into_iter().find(|s| s.label() == label)
    }
}

impl fmt::Display for StepId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            StepId::Ingest => "ingest",
            StepId::Clean => "clean",
            StepId::Enrich => "enrich",
            StepId::Augment => "augment",
            StepId::Persist => "persist",
        };
        f.write_str(name)
    }
}

/// Last durably recorded pipeline position of a task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Checkpoint {
    /// Submitted, nothing executed yet
    Queued,

    /// A step has begun
    Started(StepId),

    /// A step has finished
    Completed(StepId),

    /// Every step finished
    Done,

    /// The last run failed
    Error,
}

impl Checkpoint {
    /// The pipeline's first marker
    pub const FIRST: Checkpoint = Checkpoint::Started(StepId::Ingest);

    /// Ordinal along the fixed step order. `Error` is off the line.
    pub fn position(self) -> Option<u8> {
        match self {
            Checkpoint::Queued => Some(0),
            Checkpoint::Started(step) => Some(1 + 2 * step.index() as u8),
            Checkpoint::Completed(step) => Some(2 + 2 * step.index() as u8),
            Checkpoint::Done => Some(11),
            Checkpoint::Error => None,
        }
    }

    /// Wire marker published for this checkpoint
    pub fn marker(self) -> StatusMarker {
        match self {
            Checkpoint::Queued => StatusMarker::InQueue,
            Checkpoint::Started(StepId::Ingest) => StatusMarker::ReadingDataset,
            Checkpoint::Completed(StepId::Ingest) => StatusMarker::ReadingDatasetDone,
            Checkpoint::Started(StepId::Clean) => StatusMarker::ProcessCleaning,
            Checkpoint::Completed(StepId::Clean) => StatusMarker::ProcessCleaningDone,
            Checkpoint::Started(StepId::Enrich) => StatusMarker::SendingToLlm,
            Checkpoint::Completed(StepId::Enrich) => StatusMarker::SendingToLlmDone,
            Checkpoint::Started(StepId::Augment) => StatusMarker::AppendingColumns,
            Checkpoint::Completed(StepId::Augment) => StatusMarker::AppendingColumnsDone,
            Checkpoint::Started(StepId::Persist) => StatusMarker::SavingFile,
            Checkpoint::Completed(StepId::Persist) => StatusMarker::SavingFileDone,
            Checkpoint::Done => StatusMarker::Done,
            Checkpoint::Error => StatusMarker::OnError,
        }
    }

    /// Parse a canonical name or a wire marker; `None` when unrecognized
    pub fn parse(raw: &str) -> Option<Checkpoint> {
        let raw = raw.trim();
        if let Ok(marker) = raw.parse::<StatusMarker>() {
            return marker.checkpoint();
        }
        match raw {
            "queued" => return Some(Checkpoint::Queued),
            "done" => return Some(Checkpoint::Done),
            "error" => return Some(Checkpoint::Error),
            _ => {}
        }
        if let Some(label) = raw.strip_suffix("-start") {
            return StepId::from_label(label).map(Checkpoint::Started);
        }
        if let Some(label) = raw.strip_suffix("-done") {
            return StepId::from_label(label).map(Checkpoint::Completed);
        }
        None
    }
}

impl fmt::Display for Checkpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Checkpoint::Queued => f.write_str("queued"),
            Checkpoint::Started(step) => write!(f, "{}-start", step.label()),
            Checkpoint::Completed(step) => write!(f, "{}-done", step.label()),
            Checkpoint::Done => f.write_str("done"),
            Checkpoint::Error => f.write_str("error"),
        }
    }
}

/// Raised when a stored checkpoint string cannot be decoded
#[derive(Debug, Clone, Error)]
#[error("Unrecognized checkpoint: {0}")]
pub struct UnknownCheckpoint(pub String);

impl FromStr for Checkpoint {
    type Err = UnknownCheckpoint;

    fn from_str(s: &str) -> Result<Self, UnknownCheckpoint> {
        Checkpoint::parse(s).ok_or_else(|| UnknownCheckpoint(s.to_string()))
    }
}

impl TryFrom<String> for Checkpoint {
    type Error = UnknownCheckpoint;

    fn try_from(value: String) -> Result<Self, UnknownCheckpoint> {
        value.parse()
    }
}

impl From<Checkpoint> for String {
    fn from(value: Checkpoint) -> Self {
        value.to_string()
    }
}

/// Status/event names shared with the API backend and the frontend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StatusMarker {
    #[serde(rename = "added")]
    Added,
    #[serde(rename = "in_queue")]
    InQueue,
    #[serde(rename = "reading_dataset")]
    ReadingDataset,
    #[serde(rename = "reading_dataset_done")]
    ReadingDatasetDone,
    #[serde(rename = "process_cleaning")]
    ProcessCleaning,
    #[serde(rename = "process_cleaning_done")]
    ProcessCleaningDone,
    #[serde(rename = "sending_to_llm")]
    SendingToLlm,
    #[serde(rename = "sending_to_llm_progression")]
    SendingToLlmProgress,
    #[serde(rename = "sending_to_llm_done")]
    SendingToLlmDone,
    #[serde(rename = "appending_collumns")]
    AppendingColumns,
    #[serde(rename = "appending_collumns_done")]
    AppendingColumnsDone,
    #[serde(rename = "saving_file")]
    SavingFile,
    #[serde(rename = "saving_file_done")]
    SavingFileDone,
    #[serde(rename = "done")]
    Done,
    #[serde(rename = "on_error")]
    OnError,
    #[serde(rename = "paused")]
    Paused,
    #[serde(rename = "stopped")]
    Stopped,
}

impl StatusMarker {
    /// Every marker in the vocabulary
    pub const ALL: [StatusMarker; 17] = [
        StatusMarker::Added,
        StatusMarker::InQueue,
        StatusMarker::ReadingDataset,
        StatusMarker::ReadingDatasetDone,
        StatusMarker::ProcessCleaning,
        StatusMarker::ProcessCleaningDone,
        StatusMarker::SendingToLlm,
        StatusMarker::SendingToLlmProgress,
        StatusMarker::SendingToLlmDone,
        StatusMarker::AppendingColumns,
        StatusMarker::AppendingColumnsDone,
        StatusMarker::SavingFile,
        StatusMarker::SavingFileDone,
        StatusMarker::Done,
        StatusMarker::OnError,
        StatusMarker::Paused,
        StatusMarker::Stopped,
    ];

    /// Name on the wire (also the routing key)
    pub fn as_str(self) -> &'static str {
        match self {
            StatusMarker::Added => "added",
            StatusMarker::InQueue => "in_queue",
            StatusMarker::ReadingDataset => "reading_dataset",
            StatusMarker::ReadingDatasetDone => "reading_dataset_done",
            StatusMarker::ProcessCleaning => "process_cleaning",
            StatusMarker::ProcessCleaningDone => "process_cleaning_done",
            StatusMarker::SendingToLlm => "sending_to_llm",
            StatusMarker::SendingToLlmProgress => "sending_to_llm_progression",
            StatusMarker::SendingToLlmDone => "sending_to_llm_done",
            StatusMarker::AppendingColumns => "appending_collumns",
            StatusMarker::AppendingColumnsDone => "appending_collumns_done",
            StatusMarker::SavingFile => "saving_file",
            StatusMarker::SavingFileDone => "saving_file_done",
            StatusMarker::Done => "done",
            StatusMarker::OnError => "on_error",
            StatusMarker::Paused => "paused",
            StatusMarker::Stopped => "stopped",
        }
    }

    /// Pipeline position this marker denotes. Lifecycle-only markers have none.
    pub fn checkpoint(self) -> Option<Checkpoint> {
        let checkpoint = match self {
            StatusMarker::Added | StatusMarker::InQueue => Checkpoint::Queued,
            StatusMarker::ReadingDataset => Checkpoint::Started(StepId::Ingest),
            StatusMarker::ReadingDatasetDone => Checkpoint::Completed(StepId::Ingest),
            StatusMarker::ProcessCleaning => Checkpoint::Started(StepId::Clean),
            StatusMarker::ProcessCleaningDone => Checkpoint::Completed(StepId::Clean),
            // mid-enrichment progress resumes at the start of enrichment
            StatusMarker::SendingToLlm | StatusMarker::SendingToLlmProgress => {
                Checkpoint::Started(StepId::Enrich)
            }
            StatusMarker::SendingToLlmDone => Checkpoint::Completed(StepId::Enrich),
            StatusMarker::AppendingColumns => Checkpoint::Started(StepId::Augment),
            StatusMarker::AppendingColumnsDone => Checkpoint::Completed(StepId::Augment),
            StatusMarker::SavingFile => Checkpoint::Started(StepId::Persist),
            StatusMarker::SavingFileDone => Checkpoint::Completed(StepId::Persist),
            StatusMarker::Done => Checkpoint::Done,
            StatusMarker::OnError => Checkpoint::Error,
            StatusMarker::Paused | StatusMarker::Stopped => return None,
        };
        Some(checkpoint)
    }
}

impl fmt::Display for StatusMarker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StatusMarker {
    type Err = UnknownCheckpoint;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|m| m.as_str() == s)
            .ok_or_else(|| UnknownCheckpoint(s.to_string()))
    }
}
