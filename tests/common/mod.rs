//! Shared fixtures for integration tests.

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use dallosh::adapters::{
    CollectingEventSink, DatasetStore, FileDatasetStore, FileStatusStore, ModelProvider,
    ProviderError,
};
use dallosh::core::{
    BackoffPolicy, BatchEnricher, EnrichmentLimits, PipelineOrchestrator, RunRequest,
    TaskLifecycleController,
};
use dallosh::domain::{AiConfig, AiMode, ArtifactStage, Dataset, ModelCandidate, Preferences};
use parking_lot::Mutex;
use serde_json::{json, Value};
use tempfile::TempDir;

/// What a scripted candidate answers on one call
#[derive(Debug, Clone)]
pub enum Reply {
    /// A well-formed answer sized to the batch
    Valid,
    /// A fixed response body
    Raw(Value),
    Transient,
    Malformed,
}

type Hook = Box<dyn Fn(&str, usize) + Send + Sync>;

/// Model provider answering from per-candidate scripts.
///
/// Once a candidate's script runs out it keeps answering `Reply::Valid`.
#[derive(Default)]
pub struct ScriptedProvider {
    scripts: Mutex<HashMap<String, VecDeque<Reply>>>,
    calls: Mutex<Vec<(String, usize)>>,
    hook: Mutex<Option<Hook>>,
}

impl ScriptedProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn script(&self, uid: &str, replies: Vec<Reply>) {
        self.scripts.lock().insert(uid.to_string(), replies.into());
    }

    /// Called with (uid, call number starting at 1) before each reply
    pub fn on_call(&self, hook: impl Fn(&str, usize) + Send + Sync + 'static) {
        *self.hook.lock() = Some(Box::new(hook));
    }

    /// (uid, batch length) of every call, in order
    pub fn calls(&self) -> Vec<(String, usize)> {
        self.calls.lock().clone()
    }

    pub fn calls_to(&self, uid: &str) -> usize {
        self.calls.lock().iter().filter(|(u, _)| u == uid).count()
    }
}

/// A well-formed response for `n` rows
pub fn valid_response(n: usize) -> Value {
    let sentiment = vec!["negative"; n];
    let priority = vec!["high"; n];
    let topic = vec!["billing"; n];
    json!({ "data": { "sentiment": sentiment, "priority": priority, "topic": topic } })
}

#[async_trait]
impl ModelProvider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn analyze(&self, candidate: &ModelCandidate, texts: &[String]) -> Result<Value, ProviderError> {
        let call = {
            let mut calls = self.calls.lock();
            calls.push((candidate.uid.clone(), texts.len()));
            calls.len()
        };
        if let Some(hook) = self.hook.lock().as_ref() {
            hook(&candidate.uid, call);
        }

        let reply = self
            .scripts
            .lock()
            .get_mut(&candidate.uid)
            .and_then(|q| q.pop_front())
            .unwrap_or(Reply::Valid);

        match reply {
            Reply::Valid => Ok(valid_response(texts.len())),
            Reply::Raw(value) => Ok(value),
            Reply::Transient => Err(ProviderError::Transient("connection refused".into())),
            Reply::Malformed => Err(ProviderError::Malformed("not json".into())),
        }
    }
}

type SaveHook = Box<dyn Fn(ArtifactStage) + Send + Sync>;

/// File-backed dataset store that runs a hook after each artifact save
pub struct HookedDatasetStore {
    inner: Arc<FileDatasetStore>,
    hook: Mutex<Option<SaveHook>>,
}

impl HookedDatasetStore {
    pub fn new(inner: Arc<FileDatasetStore>) -> Self {
        Self {
            inner,
            hook: Mutex::new(None),
        }
    }

    pub fn on_save(&self, hook: impl Fn(ArtifactStage) + Send + Sync + 'static) {
        *self.hook.lock() = Some(Box::new(hook));
    }
}

#[async_trait]
impl DatasetStore for HookedDatasetStore {
    async fn load(&self, path: &Path) -> Result<Dataset> {
        self.inner.load(path).await
    }

    async fn save(&self, task_id: &str, dataset: &Dataset, stage: ArtifactStage) -> Result<PathBuf> {
        let path = self.inner.save(task_id, dataset, stage).await?;
        if let Some(hook) = self.hook.lock().as_ref() {
            hook(stage);
        }
        Ok(path)
    }

    async fn load_artifact(&self, task_id: &str, stage: ArtifactStage) -> Result<Option<Dataset>> {
        self.inner.load_artifact(task_id, stage).await
    }
}

/// Local-mode config with candidates tried in the given order
pub fn local_config(candidates: Vec<ModelCandidate>) -> AiConfig {
    AiConfig {
        preferences: Preferences {
            mode: AiMode::Local,
            default_local_model_id: None,
            default_external_model_id: None,
        },
        local: candidates,
        external: Vec::new(),
    }
}

/// Orchestrator wired to temp-dir stores, a collecting sink and a scripted provider
pub struct Harness {
    pub temp: TempDir,
    pub datasets: Arc<FileDatasetStore>,
    /// The store the orchestrator writes through
    pub store: Arc<HookedDatasetStore>,
    pub statuses: Arc<FileStatusStore>,
    pub events: Arc<CollectingEventSink>,
    pub provider: Arc<ScriptedProvider>,
    pub lifecycle: Arc<TaskLifecycleController>,
    pub orchestrator: Arc<PipelineOrchestrator>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_limits(EnrichmentLimits::default())
    }

    pub fn with_limits(limits: EnrichmentLimits) -> Self {
        let temp = TempDir::new().unwrap();
        let datasets = Arc::new(FileDatasetStore::new(temp.path().join("storage")));
        let store = Arc::new(HookedDatasetStore::new(datasets.clone()));
        let statuses = Arc::new(FileStatusStore::new(temp.path().join("status")));
        let events = Arc::new(CollectingEventSink::new());
        let provider = Arc::new(ScriptedProvider::new());
        let lifecycle = Arc::new(TaskLifecycleController::new());

        let enricher = BatchEnricher::new(provider.clone(), events.clone())
            .with_limits(limits)
            .with_backoff(BackoffPolicy::none());
        let orchestrator = Arc::new(PipelineOrchestrator::new(
            store.clone(),
            statuses.clone(),
            events.clone(),
            enricher,
            lifecycle.clone(),
        ));

        Self {
            temp,
            datasets,
            store,
            statuses,
            events,
            provider,
            lifecycle,
            orchestrator,
        }
    }

    /// Write a JSONL input with one `full_text` row per text
    pub fn write_input(&self, name: &str, texts: &[&str]) -> PathBuf {
        let path = self.temp.path().join("inputs").join(format!("{}.jsonl", name));
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        let content: String = texts
            .iter()
            .enumerate()
            .map(|(i, text)| format!("{}\n", json!({ "id": i + 1, "full_text": text })))
            .collect();
        std::fs::write(&path, content).unwrap();
        path
    }

    pub fn request(&self, task_id: &str, file_path: PathBuf, ai_config: AiConfig) -> RunRequest {
        RunRequest {
            task_id: task_id.to_string(),
            file_path,
            ai_config,
            resume_from: None,
        }
    }
}
