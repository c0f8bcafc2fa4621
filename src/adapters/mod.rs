//! Adapter interfaces for external collaborators.
//!
//! The core only talks to the outside world through these traits:
//! - [`DatasetStore`]: reading inputs and writing per-stage artifacts
//! - [`StatusStore`]: durable task status
//! - [`EventSink`]: fire-and-forget event publication
//! - [`ModelProvider`]: one enrichment call against one candidate

pub mod dataset_store;
pub mod event_sink;
pub mod ollama;
pub mod status_store;

use std::path::{Path, PathBuf};

use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

use crate::domain::{ArtifactStage, Checkpoint, Dataset, ModelCandidate, TaskEvent, TaskStatus};

pub use dataset_store::FileDatasetStore;
pub use event_sink::{
    CollectingEventSink, FanoutEventSink, JsonlEventSink, NoOpEventSink, TracingEventSink,
};
pub use ollama::OllamaProvider;
pub use status_store::FileStatusStore;

/// Loads datasets and stores pipeline artifacts
#[async_trait]
pub trait DatasetStore: Send + Sync {
    /// Load a dataset from an input path
    async fn load(&self, path: &Path) -> Result<Dataset>;

    /// Store the dataset produced at `stage` for a task; returns the stored path
    async fn save(&self, task_id: &str, dataset: &Dataset, stage: ArtifactStage) -> Result<PathBuf>;

    /// Load a previously stored artifact (`None` when absent)
    async fn load_artifact(&self, task_id: &str, stage: ArtifactStage) -> Result<Option<Dataset>>;
}

/// Durable per-task status. Writes are idempotent; last write wins.
#[async_trait]
pub trait StatusStore: Send + Sync {
    /// Remember which dataset a task was submitted with
    async fn record_submission(&self, task_id: &str, file_path: &Path) -> Result<()>;

    async fn update_status(&self, task_id: &str, checkpoint: Checkpoint) -> Result<()>;

    /// Record a failure message for inspection
    async fn record_error(&self, task_id: &str, message: &str) -> Result<()>;

    async fn load(&self, task_id: &str) -> Result<Option<TaskStatus>>;
}

/// Publishes task events. Never blocks on delivery and never fails the caller.
#[async_trait]
pub trait EventSink: Send + Sync {
    async fn publish(&self, event: TaskEvent);
}

/// Errors from a single provider call
#[derive(Debug, Error)]
pub enum ProviderError {
    /// Network failure, timeout, or error status; worth retrying
    #[error("Transient provider error: {0}")]
    Transient(String),

    /// The provider answered but the body is unusable; retrying will not help
    #[error("Malformed provider response: {0}")]
    Malformed(String),
}

/// Calls a model for one batch of texts against one candidate
#[async_trait]
pub trait ModelProvider: Send + Sync {
    /// Human-readable provider name
    fn name(&self) -> &str;

    /// Analyze `texts`; the raw response is normalized by the caller
    async fn analyze(&self, candidate: &ModelCandidate, texts: &[String]) -> Result<Value, ProviderError>;
}
