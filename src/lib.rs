//! dallosh - Resumable dataset-analysis pipeline worker
//!
//! Runs a fixed five-step pipeline (ingest, clean, enrich, augment, persist)
//! over tabular datasets, annotating each row with a sentiment, a priority and
//! a topic obtained from model providers.
//!
//! # Architecture
//!
//! - Every step is bracketed by durable checkpoints, so a crashed or failed
//!   task resumes at the step it was in
//! - Enrichment runs in bounded batches with per-candidate retries and
//!   fallback to the next configured model
//! - Tasks can be paused, resumed and stopped at suspension points
//!
//! # Modules
//!
//! - `adapters`: Collaborator traits and file/HTTP implementations
//! - `core`: Resolver, cleaning, enrichment, lifecycle, orchestrator
//! - `domain`: Checkpoints, datasets, model config, task status, events
//! - `cli`: Command-line interface
//!
//! # Usage
//!
//! ```bash
//! # Run one dataset
//! dallosh run data/tweets.jsonl -c ai.yaml
//!
//! # Resume a failed task
//! dallosh resume tweets -c ai.yaml
//!
//! # Show which steps would run
//! dallosh plan appending-columns-start
//! ```

pub mod adapters;
pub mod cli;
pub mod config;
pub mod core;
pub mod domain;

pub use core::{PipelineOrchestrator, RunOutcome, RunReport, RunRequest, TaskLifecycleController};
pub use domain::{Checkpoint, Dataset, StatusMarker, StepId, TaskEvent, TaskStatus};
