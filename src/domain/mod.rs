//! Domain types for the dallosh worker.
//!
//! This module contains the core data structures:
//! - Checkpoint: Pipeline position and the status vocabulary on the bus
//! - Dataset: Tabular rows flowing through the steps
//! - Model: Provider candidates and per-row enrichment results
//! - Task: Lifecycle state and durable status
//! - Events: Published task events

pub mod checkpoint;
pub mod dataset;
pub mod events;
pub mod model;
pub mod task;

// Re-export commonly used types
pub use checkpoint::{Checkpoint, StatusMarker, StepId, UnknownCheckpoint};
pub use dataset::{ArtifactStage, Dataset};
pub use events::{generate_idempotency_key, hash_input, BatchProgress, TaskEvent};
pub use model::{
    fold_priority, AiConfig, AiMode, EnrichmentResult, ModelCandidate, ModelSettings,
    Preferences, Tier,
};
pub use task::{
    task_id_from_path, LifecycleState, StatusEntry, StatusEntryKind, TaskRecord, TaskStatus,
};
