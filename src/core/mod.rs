//! Core pipeline logic.
//!
//! This module contains:
//! - Resolver: checkpoint → remaining step plan
//! - Cleaning: text sanitising and de-duplication
//! - Normalize: model response → per-row results
//! - Enricher: batched model calls with retry and fallback
//! - Lifecycle: pause/resume/stop control and the task queue
//! - Orchestrator: main execution engine

pub mod cleaning;
pub mod enricher;
pub mod lifecycle;
pub mod normalize;
pub mod orchestrator;
pub mod resolver;

pub use cleaning::{clean_dataset, clean_text, CleanOutcome};
pub use enricher::{
    partition, select_candidate, BackoffPolicy, BatchEnricher, EnrichError, EnrichOutcome,
    EnrichRequest, EnrichmentLimits,
};
pub use lifecycle::{ControlCommand, Interrupted, RunControl, TaskLifecycleController, UnknownCommand};
pub use normalize::{normalize_response, Normalized};
pub use orchestrator::{
    ColumnAugmenter, NoopAugmenter, PipelineError, PipelineOrchestrator, Recovery, RunOutcome,
    RunReport, RunRequest,
};
pub use resolver::{normalize_resume, resolve, resolve_str, StepPlan};
