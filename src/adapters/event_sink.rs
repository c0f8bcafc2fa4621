//! Event sink implementations.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use parking_lot::RwLock;
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;
use tracing::{info, warn};

use crate::domain::{StatusMarker, TaskEvent};

use super::EventSink;

/// Discards all events
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOpEventSink;

#[async_trait]
impl EventSink for NoOpEventSink {
    async fn publish(&self, _event: TaskEvent) {}
}

/// Logs events through `tracing`
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingEventSink;

#[async_trait]
impl EventSink for TracingEventSink {
    async fn publish(&self, event: TaskEvent) {
        info!(
            task_id = %event.task_id,
            event = %event.event,
            payload = ?event.payload,
            "Event: {}", event.event
        );
    }
}

/// Appends events to a JSONL file, one line per event.
///
/// Write failures are logged and swallowed; publication never fails the caller.
#[derive(Debug, Clone)]
pub struct JsonlEventSink {
    path: PathBuf,
}

impl JsonlEventSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn append(&self, event: &TaskEvent) -> anyhow::Result<()> {
        use anyhow::Context;

        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("Failed to create event directory: {}", parent.display()))?;
        }

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .with_context(|| format!("Failed to open events file: {}", self.path.display()))?;

        let json = serde_json::to_string(event).context("Failed to serialize event")?;
        file.write_all(format!("{}\n", json).as_bytes())
            .await
            .context("Failed to write event")?;
        file.flush().await.context("Failed to flush event")?;
        Ok(())
    }

    /// Read back every event in order
    pub async fn replay(&self) -> anyhow::Result<Vec<TaskEvent>> {
        use anyhow::Context;

        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let content = tokio::fs::read_to_string(&self.path)
            .await
            .with_context(|| format!("Failed to read events file: {}", self.path.display()))?;

        content
            .lines()
            .filter(|line| !line.trim().is_empty())
            .map(|line| {
                serde_json::from_str(line).with_context(|| format!("Failed to parse event: {}", line))
            })
            .collect()
    }
}

#[async_trait]
impl EventSink for JsonlEventSink {
    async fn publish(&self, event: TaskEvent) {
        if let Err(e) = self.append(&event).await {
            warn!(task_id = %event.task_id, event = %event.event, error = %e, "Failed to publish event");
        }
    }
}

/// Publishes to several sinks in order
#[derive(Default)]
pub struct FanoutEventSink {
    sinks: Vec<std::sync::Arc<dyn EventSink>>,
}

impl FanoutEventSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, sink: std::sync::Arc<dyn EventSink>) -> Self {
        self.sinks.push(sink);
        self
    }
}

#[async_trait]
impl EventSink for FanoutEventSink {
    async fn publish(&self, event: TaskEvent) {
        for sink in &self.sinks {
            sink.publish(event.clone()).await;
        }
    }
}

/// Keeps every event in memory, for tests
#[derive(Debug, Default)]
pub struct CollectingEventSink {
    events: RwLock<Vec<TaskEvent>>,
}

impl CollectingEventSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<TaskEvent> {
        self.events.read().clone()
    }

    /// Event names in publication order
    pub fn markers(&self) -> Vec<StatusMarker> {
        self.events.read().iter().map(|e| e.event).collect()
    }

    pub fn events_of(&self, marker: StatusMarker) -> Vec<TaskEvent> {
        self.events
            .read()
            .iter()
            .filter(|e| e.event == marker)
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.events.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.read().is_empty()
    }

    pub fn clear(&self) {
        self.events.write().clear();
    }
}

#[async_trait]
impl EventSink for CollectingEventSink {
    async fn publish(&self, event: TaskEvent) {
        self.events.write().push(event);
    }
}
