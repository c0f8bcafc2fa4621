//! Pipeline orchestrator: runs the fixed step sequence for one task.
//!
//! Every step is bracketed by a `*-start` and a `*-done` checkpoint, each
//! persisted to the status store and published before moving on. A crash
//! mid-step therefore resumes that same step.
//!
//! Steps after Ingest need the dataset produced by the step before them. When
//! a run resumes without it, the orchestrator loads the predecessor's durable
//! artifact, and failing that replays the earlier steps silently.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use anyhow::Context;
use async_trait::async_trait;
use serde_json::{json, Value};
use thiserror::Error;
use tracing::{debug, error, info, instrument, warn};

use crate::adapters::{DatasetStore, EventSink, StatusStore};
use crate::domain::dataset::{PRIORITY_COLUMN, SENTIMENT_COLUMN, TEXT_COLUMN, TOPIC_COLUMN};
use crate::domain::{AiConfig, ArtifactStage, Checkpoint, Dataset, StatusMarker, StepId, TaskEvent};

use super::cleaning::clean_dataset;
use super::enricher::{BatchEnricher, EnrichError, EnrichRequest};
use super::lifecycle::{RunControl, TaskLifecycleController};
use super::resolver::{normalize_resume, resolve};

/// Extension point for deriving extra columns after enrichment
#[async_trait]
pub trait ColumnAugmenter: Send + Sync {
    async fn augment(&self, dataset: Dataset) -> anyhow::Result<Dataset>;
}

/// Leaves the dataset untouched
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopAugmenter;

#[async_trait]
impl ColumnAugmenter for NoopAugmenter {
    async fn augment(&self, dataset: Dataset) -> anyhow::Result<Dataset> {
        Ok(dataset)
    }
}

/// Pipeline failures surfaced to the dispatcher
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Task {0} cannot be started (already running, stopped, or completed)")]
    NotStartable(String),

    #[error("Step {step} failed: {message}")]
    Step { step: StepId, message: String },

    #[error("Failed to record checkpoint {checkpoint}: {message}")]
    Checkpoint {
        checkpoint: Checkpoint,
        message: String,
    },
}

impl PipelineError {
    fn step(step: StepId, err: impl std::fmt::Display) -> Self {
        PipelineError::Step {
            step,
            message: err.to_string(),
        }
    }

    /// Step the failure happened in, if any
    pub fn failed_step(&self) -> Option<StepId> {
        match self {
            PipelineError::Step { step, .. } => Some(*step),
            PipelineError::Checkpoint { checkpoint, .. } => match checkpoint {
                Checkpoint::Started(step) | Checkpoint::Completed(step) => Some(*step),
                _ => None,
            },
            PipelineError::NotStartable(_) => None,
        }
    }
}

/// One invocation of the pipeline for a task
#[derive(Debug, Clone)]
pub struct RunRequest {
    pub task_id: String,
    pub file_path: PathBuf,
    pub ai_config: AiConfig,

    /// Last known checkpoint (canonical name or wire marker); `None` starts fresh
    pub resume_from: Option<String>,
}

/// How a run ended without failing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    Completed,

    /// Stopped by an operator at a suspension point
    Stopped,
}

/// Where the in-memory dataset came from when resuming past Ingest
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Recovery {
    /// The input file was re-read
    Input,

    /// The predecessor's artifact was loaded
    Artifact(ArtifactStage),

    /// Earlier steps were re-executed without checkpoints
    Replay,
}

/// Summary of a finished run
#[derive(Debug, Clone)]
pub struct RunReport {
    pub task_id: String,
    pub outcome: RunOutcome,

    /// Normalized checkpoint the run started from
    pub started_from: Checkpoint,

    /// Steps executed under checkpoints, in order
    pub steps_run: Vec<StepId>,

    pub recovery: Option<Recovery>,

    /// Candidate that produced the enrichment (when Enrich ran)
    pub model_uid: Option<String>,

    /// Final dataset location (when Persist ran)
    pub output_path: Option<PathBuf>,

    pub duration_ms: u64,
}

impl RunReport {
    fn new(task_id: &str, started_from: Checkpoint) -> Self {
        Self {
            task_id: task_id.to_string(),
            outcome: RunOutcome::Completed,
            started_from,
            steps_run: Vec::new(),
            recovery: None,
            model_uid: None,
            output_path: None,
            duration_ms: 0,
        }
    }
}

/// Result of executing one step
enum StepFlow {
    Finished { dataset: Dataset, payload: Value },
    Interrupted,
}

/// Executes the step sequence for one task
pub struct PipelineOrchestrator {
    datasets: Arc<dyn DatasetStore>,
    statuses: Arc<dyn StatusStore>,
    events: Arc<dyn EventSink>,
    enricher: BatchEnricher,
    augmenter: Arc<dyn ColumnAugmenter>,
    lifecycle: Arc<TaskLifecycleController>,
}

impl PipelineOrchestrator {
    pub fn new(
        datasets: Arc<dyn DatasetStore>,
        statuses: Arc<dyn StatusStore>,
        events: Arc<dyn EventSink>,
        enricher: BatchEnricher,
        lifecycle: Arc<TaskLifecycleController>,
    ) -> Self {
        Self {
            datasets,
            statuses,
            events,
            enricher,
            augmenter: Arc::new(NoopAugmenter),
            lifecycle,
        }
    }

    pub fn with_augmenter(mut self, augmenter: Arc<dyn ColumnAugmenter>) -> Self {
        self.augmenter = augmenter;
        self
    }

    pub fn lifecycle(&self) -> &Arc<TaskLifecycleController> {
        &self.lifecycle
    }

    /// Run the pipeline for one task.
    ///
    /// Whole-run failures are recorded and returned; the caller owns retry
    /// scheduling.
    #[instrument(skip(self, request), fields(task_id = %request.task_id))]
    pub async fn run(&self, request: RunRequest) -> Result<RunReport, PipelineError> {
        let task_id = request.task_id.clone();
        let started = Instant::now();

        self.lifecycle.submit(&task_id);
        if !self.lifecycle.start(&task_id) {
            return Err(PipelineError::NotStartable(task_id));
        }

        if let Err(e) = self
            .statuses
            .record_submission(&task_id, &request.file_path)
            .await
        {
            warn!(error = %e, "Failed to record submission");
        }

        let control =
            RunControl::new(self.lifecycle.clone(), task_id.clone()).with_events(self.events.clone());
        let start = normalize_resume(request.resume_from.as_deref());
        info!(start = %start, "Starting pipeline");

        match self.execute(&request, start, &control).await {
            Ok(mut report) => {
                report.duration_ms = started.elapsed().as_millis() as u64;
                match report.outcome {
                    RunOutcome::Completed => {
                        info!(duration_ms = report.duration_ms, "Pipeline completed");
                    }
                    RunOutcome::Stopped => {
                        self.events
                            .publish(TaskEvent::new(&task_id, StatusMarker::Stopped, None))
                            .await;
                        info!("Pipeline stopped");
                    }
                }
                Ok(report)
            }
            Err(e) => {
                self.handle_failure(&task_id, &e).await;
                Err(e)
            }
        }
    }

    async fn execute(
        &self,
        request: &RunRequest,
        start: Checkpoint,
        control: &RunControl,
    ) -> Result<RunReport, PipelineError> {
        let task_id = request.task_id.as_str();
        let mut report = RunReport::new(task_id, start);

        if start == Checkpoint::Done {
            info!("Task already complete");
            if !self.settle(task_id, control).await {
                report.outcome = RunOutcome::Stopped;
                return Ok(report);
            }
            self.checkpoint(task_id, Checkpoint::Done, None).await?;
            return Ok(report);
        }

        let plan = resolve(Some(start));
        debug!(%plan, "Resolved step plan");

        let mut dataset = match self.recover(request, plan.first(), control, &mut report).await? {
            Some(flow) => flow,
            None => {
                report.outcome = RunOutcome::Stopped;
                return Ok(report);
            }
        };

        for step in plan.iter() {
            if control.suspension_point().await.is_err() {
                report.outcome = RunOutcome::Stopped;
                return Ok(report);
            }

            self.lifecycle.set_current_step(task_id, Some(step.label()));
            self.checkpoint(task_id, Checkpoint::Started(step), None).await?;

            let flow = self
                .execute_step(step, request, dataset.take(), Some(control), &mut report)
                .await
                .map_err(|e| PipelineError::step(step, format!("{:#}", e)))?;

            let (next, payload) = match flow {
                StepFlow::Finished { dataset, payload } => (dataset, payload),
                StepFlow::Interrupted => {
                    report.outcome = RunOutcome::Stopped;
                    return Ok(report);
                }
            };

            // a stop during the step discards its completion
            if control.is_interrupted() {
                report.outcome = RunOutcome::Stopped;
                return Ok(report);
            }

            self.checkpoint(task_id, Checkpoint::Completed(step), Some(payload))
                .await?;
            report.steps_run.push(step);
            dataset = Some(next);
        }

        self.lifecycle.set_current_step(task_id, None);
        if !self.settle(task_id, control).await {
            report.outcome = RunOutcome::Stopped;
            return Ok(report);
        }
        self.checkpoint(task_id, Checkpoint::Done, None).await?;
        Ok(report)
    }

    /// Last suspension point, then Running → Completed.
    ///
    /// A pause that lands after the final step holds the task here; a stop
    /// returns `false` and no `done` checkpoint is written.
    async fn settle(&self, task_id: &str, control: &RunControl) -> bool {
        loop {
            if control.suspension_point().await.is_err() {
                return false;
            }
            // a pause between the suspension point and the transition sends us round again
            if self.lifecycle.complete(task_id) {
                return true;
            }
        }
    }

    /// Rebuild the dataset the first step of the plan needs.
    ///
    /// Returns `Ok(Some(None))` when nothing is needed and `Ok(None)` when a
    /// replay was interrupted.
    async fn recover(
        &self,
        request: &RunRequest,
        first: StepId,
        control: &RunControl,
        report: &mut RunReport,
    ) -> Result<Option<Option<Dataset>>, PipelineError> {
        let task_id = request.task_id.as_str();

        let predecessor = match first {
            StepId::Ingest => return Ok(Some(None)),
            StepId::Clean => {
                let dataset = self
                    .datasets
                    .load(&request.file_path)
                    .await
                    .map_err(|e| PipelineError::step(StepId::Ingest, format!("{:#}", e)))?;
                report.recovery = Some(Recovery::Input);
                return Ok(Some(Some(dataset)));
            }
            StepId::Enrich => ArtifactStage::Cleaned,
            StepId::Augment => ArtifactStage::Enriched,
            StepId::Persist => ArtifactStage::Augmented,
        };

        match self.datasets.load_artifact(task_id, predecessor).await {
            Ok(Some(dataset)) => {
                info!(stage = %predecessor, rows = dataset.len(), "Recovered dataset from artifact");
                report.recovery = Some(Recovery::Artifact(predecessor));
                return Ok(Some(Some(dataset)));
            }
            Ok(None) => {
                info!(stage = %predecessor, "No artifact found, replaying earlier steps");
            }
            Err(e) => {
                warn!(stage = %predecessor, error = %e, "Unreadable artifact, replaying earlier steps");
            }
        }

        report.recovery = Some(Recovery::Replay);
        let mut dataset = None;
        for step in StepId::ALL.into_iter().take(first.index()) {
            let flow = self
                .execute_step(step, request, dataset.take(), Some(control), report)
                .await
                .map_err(|e| PipelineError::step(step, format!("{:#}", e)))?;
            match flow {
                StepFlow::Finished { dataset: next, .. } => dataset = Some(next),
                StepFlow::Interrupted => return Ok(None),
            }
        }
        Ok(Some(dataset))
    }

    /// Execute one step on the dataset produced by the step before it
    async fn execute_step(
        &self,
        step: StepId,
        request: &RunRequest,
        dataset: Option<Dataset>,
        control: Option<&RunControl>,
        report: &mut RunReport,
    ) -> anyhow::Result<StepFlow> {
        let task_id = request.task_id.as_str();
        let started = Instant::now();

        let input = |dataset: Option<Dataset>| {
            dataset.with_context(|| format!("No dataset available for step {}", step))
        };

        let (dataset, payload) = match step {
            StepId::Ingest => {
                let dataset = self.datasets.load(&request.file_path).await?;
                let payload = json!({ "rows": dataset.len(), "columns": dataset.columns.len() });
                (dataset, payload)
            }
            StepId::Clean => {
                let outcome = clean_dataset(input(dataset)?);
                let path = self
                    .datasets
                    .save(task_id, &outcome.dataset, ArtifactStage::Cleaned)
                    .await?;
                let payload = json!({
                    "rows": outcome.dataset.len(),
                    "removed_rows": outcome.removed_rows,
                    "path": path.display().to_string(),
                });
                (outcome.dataset, payload)
            }
            StepId::Enrich => {
                let mut dataset = input(dataset)?;
                let texts: Vec<String> = dataset
                    .column(TEXT_COLUMN)
                    .with_context(|| format!("Dataset must have a '{}' column", TEXT_COLUMN))?
                    .into_iter()
                    .map(str::to_string)
                    .collect();

                let outcome = match self
                    .enricher
                    .enrich(
                        EnrichRequest {
                            task_id,
                            texts: &texts,
                            config: &request.ai_config,
                            tried: Default::default(),
                        },
                        control,
                    )
                    .await
                {
                    Ok(outcome) => outcome,
                    Err(EnrichError::Interrupted(_)) => return Ok(StepFlow::Interrupted),
                    Err(e) => return Err(e.into()),
                };

                let (mut sentiments, mut priorities, mut topics) = (
                    Vec::with_capacity(outcome.results.len()),
                    Vec::with_capacity(outcome.results.len()),
                    Vec::with_capacity(outcome.results.len()),
                );
                for result in outcome.results {
                    sentiments.push(result.sentiment);
                    priorities.push(result.priority.to_string());
                    topics.push(result.topic);
                }
                dataset.set_column(SENTIMENT_COLUMN, sentiments);
                dataset.set_column(PRIORITY_COLUMN, priorities);
                dataset.set_column(TOPIC_COLUMN, topics);

                self.datasets
                    .save(task_id, &dataset, ArtifactStage::Enriched)
                    .await?;

                report.model_uid = Some(outcome.uid_used.clone());
                let payload = json!({
                    "total_rows": dataset.len(),
                    "total_batches": outcome.total_batches,
                    "model_uid": outcome.uid_used,
                    "degraded_batches": outcome.degraded_batches,
                });
                (dataset, payload)
            }
            StepId::Augment => {
                let dataset = self.augmenter.augment(input(dataset)?).await?;
                self.datasets
                    .save(task_id, &dataset, ArtifactStage::Augmented)
                    .await?;
                let payload = json!({ "rows": dataset.len(), "columns": dataset.columns.len() });
                (dataset, payload)
            }
            StepId::Persist => {
                let dataset = input(dataset)?;
                let path = self
                    .datasets
                    .save(task_id, &dataset, ArtifactStage::Analysed)
                    .await?;
                report.output_path = Some(path.clone());
                let payload = json!({ "rows": dataset.len(), "path": path.display().to_string() });
                (dataset, payload)
            }
        };

        debug!(
            step = %step,
            rows = dataset.len(),
            duration_ms = started.elapsed().as_millis() as u64,
            "Step finished"
        );
        Ok(StepFlow::Finished { dataset, payload })
    }

    /// Persist a checkpoint, then publish it
    async fn checkpoint(
        &self,
        task_id: &str,
        checkpoint: Checkpoint,
        payload: Option<Value>,
    ) -> Result<(), PipelineError> {
        self.statuses
            .update_status(task_id, checkpoint)
            .await
            .map_err(|e| PipelineError::Checkpoint {
                checkpoint,
                message: format!("{:#}", e),
            })?;
        self.events
            .publish(TaskEvent::new(task_id, checkpoint.marker(), payload))
            .await;
        debug!(checkpoint = %checkpoint, "Checkpoint recorded");
        Ok(())
    }

    /// Record a failure everywhere it needs to be visible
    async fn handle_failure(&self, task_id: &str, err: &PipelineError) {
        let message = err.to_string();
        let step = err.failed_step();
        error!(step = ?step, error = %message, "Pipeline failed");

        if let PipelineError::NotStartable(_) = err {
            return;
        }

        if let Err(e) = self.statuses.record_error(task_id, &message).await {
            warn!(error = %e, "Failed to record error message");
        }
        if let Err(e) = self.statuses.update_status(task_id, Checkpoint::Error).await {
            warn!(error = %e, "Failed to record error checkpoint");
        }
        self.events
            .publish(TaskEvent::new(
                task_id,
                StatusMarker::OnError,
                Some(json!({
                    "error": message,
                    "step": step.map(|s| s.to_string()),
                })),
            ))
            .await;
        self.lifecycle.fail(task_id, &message);
    }
}
