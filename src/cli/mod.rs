//! Command-line interface for dallosh.
//!
//! A minimal dispatcher: builds the stores from configuration, injects them
//! into the orchestrator, and runs tasks one at a time.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::{info, warn};

use crate::adapters::{
    FanoutEventSink, FileDatasetStore, FileStatusStore, JsonlEventSink, OllamaProvider,
    StatusStore, TracingEventSink,
};
use crate::config::{self, ResolvedConfig};
use crate::core::{
    normalize_resume, resolve, BatchEnricher, PipelineOrchestrator, RunOutcome,
    RunReport, RunRequest, TaskLifecycleController,
};
use crate::domain::{task_id_from_path, AiConfig, Checkpoint};

/// dallosh - Resumable dataset-analysis pipeline worker
#[derive(Parser, Debug)]
#[command(name = "dallosh")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the pipeline on one dataset
    Run {
        /// Dataset file (JSON Lines or JSON array)
        file: PathBuf,

        /// Model configuration (YAML or JSON)
        #[arg(short = 'c', long, env = "DALLOSH_AI_CONFIG")]
        ai_config: PathBuf,

        /// Task id (defaults to the file stem)
        #[arg(short, long)]
        task_id: Option<String>,

        /// Checkpoint to resume from (canonical name or status marker)
        #[arg(long)]
        from: Option<String>,
    },

    /// Resume a task from its last durable checkpoint
    Resume {
        /// Task id
        task_id: String,

        /// Model configuration (YAML or JSON)
        #[arg(short = 'c', long, env = "DALLOSH_AI_CONFIG")]
        ai_config: PathBuf,
    },

    /// Queue every dataset matching a glob pattern and process them in order
    Submit {
        /// Glob pattern, e.g. "data/*.jsonl"
        pattern: String,

        /// Model configuration (YAML or JSON)
        #[arg(short = 'c', long, env = "DALLOSH_AI_CONFIG")]
        ai_config: PathBuf,
    },

    /// Show the recorded status of a task (all tasks if omitted)
    Status {
        /// Task id
        task_id: Option<String>,
    },

    /// Show which steps would run from a checkpoint
    Plan {
        /// Checkpoint (canonical name or status marker)
        checkpoint: Option<String>,
    },

    /// Show resolved configuration (debug)
    Config,
}

impl Cli {
    /// Execute the CLI command
    pub async fn execute(self) -> Result<()> {
        match self.command {
            Commands::Run {
                file,
                ai_config,
                task_id,
                from,
            } => run_dataset(&file, &ai_config, task_id, from).await,
            Commands::Resume { task_id, ai_config } => resume_task(&task_id, &ai_config).await,
            Commands::Submit { pattern, ai_config } => submit_datasets(&pattern, &ai_config).await,
            Commands::Status { task_id } => match task_id {
                Some(task_id) => show_status(&task_id).await,
                None => list_tasks().await,
            },
            Commands::Plan { checkpoint } => show_plan(checkpoint.as_deref()),
            Commands::Config => show_config(),
        }
    }
}

/// Stores and orchestrator wired from configuration
struct Worker {
    orchestrator: PipelineOrchestrator,
    statuses: Arc<FileStatusStore>,
}

impl Worker {
    fn build(cfg: &ResolvedConfig) -> Result<Self> {
        let statuses = Arc::new(FileStatusStore::new(cfg.status_dir()));
        let datasets = Arc::new(FileDatasetStore::new(&cfg.storage));
        let events = Arc::new(
            FanoutEventSink::new()
                .with(Arc::new(JsonlEventSink::new(cfg.events_path())))
                .with(Arc::new(TracingEventSink)),
        );
        let provider = Arc::new(OllamaProvider::new(cfg.provider_timeout)?);

        let enricher = BatchEnricher::new(provider, events.clone())
            .with_limits(cfg.limits)
            .with_backoff(cfg.backoff);

        let orchestrator = PipelineOrchestrator::new(
            datasets,
            statuses.clone(),
            events,
            enricher,
            Arc::new(TaskLifecycleController::new()),
        );

        Ok(Self {
            orchestrator,
            statuses,
        })
    }

    /// Where a previously seen task should pick up again
    async fn resume_point(&self, task_id: &str) -> Result<Option<String>> {
        Ok(self
            .statuses
            .load(task_id)
            .await?
            .map(|status| status.last_durable.to_string()))
    }
}

fn load_ai_config(path: &Path) -> Result<AiConfig> {
    let ai_config = AiConfig::from_file(path)?;
    if ai_config.is_empty() {
        warn!(path = %path.display(), "AI config lists no model candidates");
    }
    Ok(ai_config)
}

/// Run one dataset to completion
async fn run_dataset(
    file: &Path,
    ai_config: &Path,
    task_id: Option<String>,
    from: Option<String>,
) -> Result<()> {
    let cfg = config::config()?;
    let worker = Worker::build(cfg)?;
    let ai_config = load_ai_config(ai_config)?;
    let task_id = task_id.unwrap_or_else(|| task_id_from_path(file));

    let report = worker
        .orchestrator
        .run(RunRequest {
            task_id,
            file_path: file.to_path_buf(),
            ai_config,
            resume_from: from,
        })
        .await?;

    print_report(&report);
    Ok(())
}

/// Resume a task using its recorded file path and checkpoint
async fn resume_task(task_id: &str, ai_config: &Path) -> Result<()> {
    let cfg = config::config()?;
    let worker = Worker::build(cfg)?;
    let ai_config = load_ai_config(ai_config)?;

    let status = worker
        .statuses
        .load(task_id)
        .await?
        .with_context(|| format!("No recorded status for task {}", task_id))?;
    let file_path = status
        .file_path
        .clone()
        .with_context(|| format!("Task {} has no recorded dataset path", task_id))?;

    if let Some(error) = &status.last_error {
        info!(task_id, error = %error, "Resuming after failure");
    }

    let report = worker
        .orchestrator
        .run(RunRequest {
            task_id: task_id.to_string(),
            file_path,
            ai_config,
            resume_from: Some(status.last_durable.to_string()),
        })
        .await?;

    print_report(&report);
    Ok(())
}

/// Queue matching datasets, then drain the queue one task at a time
async fn submit_datasets(pattern: &str, ai_config: &Path) -> Result<()> {
    let cfg = config::config()?;
    let worker = Worker::build(cfg)?;
    let ai_config = load_ai_config(ai_config)?;
    let lifecycle = worker.orchestrator.lifecycle().clone();

    let mut files = std::collections::HashMap::new();
    for entry in glob::glob(pattern).with_context(|| format!("Invalid glob pattern: {}", pattern))? {
        let path = entry.context("Failed to read glob entry")?;
        if !path.is_file() {
            continue;
        }
        let task_id = task_id_from_path(&path);
        if lifecycle.submit(&task_id) {
            files.insert(task_id, path);
        } else {
            warn!(task_id = %task_id, "Duplicate task id, skipping {}", path.display());
        }
    }

    if files.is_empty() {
        anyhow::bail!("No datasets match {}", pattern);
    }
    eprintln!("Queued {} dataset(s)", files.len());

    let mut failed = 0;
    while let Some(task_id) = lifecycle.next_pending() {
        let Some(file_path) = files.get(&task_id).cloned() else {
            continue;
        };
        let resume_from = worker.resume_point(&task_id).await?;

        let result = worker
            .orchestrator
            .run(RunRequest {
                task_id: task_id.clone(),
                file_path,
                ai_config: ai_config.clone(),
                resume_from,
            })
            .await;

        match result {
            Ok(report) => print_report(&report),
            Err(e) => {
                failed += 1;
                eprintln!("[Task {} failed: {}]", task_id, e);
            }
        }
    }

    if failed > 0 {
        anyhow::bail!("{} of {} task(s) failed", failed, files.len());
    }
    Ok(())
}

fn print_report(report: &RunReport) {
    match report.outcome {
        RunOutcome::Completed => {
            if let Some(path) = &report.output_path {
                println!("{}", path.display());
            }
            eprintln!(
                "[Task {} completed from {} ({} step(s), {} ms)]",
                report.task_id,
                report.started_from,
                report.steps_run.len(),
                report.duration_ms
            );
            if let Some(uid) = &report.model_uid {
                eprintln!("  Model: {}", uid);
            }
        }
        RunOutcome::Stopped => {
            eprintln!("[Task {} stopped]", report.task_id);
        }
    }
}

/// Show the recorded status of one task
async fn show_status(task_id: &str) -> Result<()> {
    let cfg = config::config()?;
    let store = FileStatusStore::new(cfg.status_dir());

    let status = store
        .load(task_id)
        .await?
        .with_context(|| format!("No recorded status for task {}", task_id))?;

    println!("Task ID: {}", status.task_id);
    if let Some(path) = &status.file_path {
        println!("Dataset: {}", path.display());
    }
    println!("Checkpoint: {}", status.checkpoint);
    println!("Last durable: {}", status.last_durable);
    println!("Updated: {}", status.updated_at);
    if let Some(error) = &status.last_error {
        println!("Last error: {}", error);
    }
    match normalize_resume(Some(&status.last_durable.to_string())) {
        Checkpoint::Done => println!("Next steps: (complete)"),
        start => println!("Next steps: {}", resolve(Some(start))),
    }
    println!("\nHistory:");
    for checkpoint in &status.history {
        println!("  {:<28} {}", checkpoint.to_string(), checkpoint.marker());
    }

    Ok(())
}

/// List every task with a status log
async fn list_tasks() -> Result<()> {
    let cfg = config::config()?;
    let store = FileStatusStore::new(cfg.status_dir());
    let tasks = store.list_tasks().await?;

    if tasks.is_empty() {
        println!("No tasks found");
        return Ok(());
    }

    println!("{:<32} {:<28} {:<28}", "TASK ID", "CHECKPOINT", "LAST DURABLE");
    println!("{}", "-".repeat(88));

    for task_id in tasks {
        match store.load(&task_id).await? {
            Some(status) => println!(
                "{:<32} {:<28} {:<28}",
                task_id,
                status.checkpoint.to_string(),
                status.last_durable.to_string()
            ),
            None => println!("{:<32} {:<28}", task_id, "-"),
        }
    }

    Ok(())
}

/// Print the step plan for a checkpoint
fn show_plan(checkpoint: Option<&str>) -> Result<()> {
    let start = normalize_resume(checkpoint);
    if let Some(raw) = checkpoint {
        if Checkpoint::parse(raw).is_none() {
            eprintln!("Unrecognized checkpoint '{}', starting from the beginning", raw);
        }
    }

    if start == Checkpoint::Done {
        println!("Already complete: nothing to run");
        return Ok(());
    }

    println!("Start: {}", start);
    println!("Steps: {}", resolve(Some(start)));
    Ok(())
}

/// Display resolved configuration
fn show_config() -> Result<()> {
    let cfg = config::config()?;

    println!("Dallosh Configuration");
    println!();
    println!(
        "Config file: {}",
        cfg.config_file
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "(none - using defaults)".to_string())
    );
    println!();
    println!("Paths:");
    println!("  Home (worker state): {}", cfg.home.display());
    println!("  Storage (datasets):  {}", cfg.storage.display());
    println!("  Status logs:         {}", cfg.status_dir().display());
    println!("  Events:              {}", cfg.events_path().display());
    println!();
    println!("Enrichment limits:");
    println!("  Rows per batch:   {} (max {})", cfg.limits.default_paginate_rows, cfg.limits.max_paginate_rows);
    println!("  Attempts per batch: {} (max {})", cfg.limits.default_retry_requests, cfg.limits.max_retry_requests);
    println!("  Backoff unit:     {} ms", cfg.backoff.unit.as_millis());
    println!("  Provider timeout: {}s", cfg.provider_timeout.as_secs());

    Ok(())
}
