//! Events published for each task.
//!
//! Every checkpoint, progress tick, and failure produces one [`TaskEvent`].
//! The event name is always a [`StatusMarker`] so listeners can route on it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use uuid::Uuid;

use super::checkpoint::StatusMarker;

/// A single published event.
///
/// Delivery is at-least-once, so consumers de-duplicate on `idempotency_key`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskEvent {
    /// Unique identifier for this event
    pub id: Uuid,

    /// When this event was created
    pub timestamp: DateTime<Utc>,

    /// The task this event belongs to
    pub task_id: String,

    /// Routing key
    pub event: StatusMarker,

    /// Format: "{task_id}:{event}:{payload_hash}"
    pub idempotency_key: String,

    /// Optional structured payload (NO secrets)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
}

impl TaskEvent {
    /// Create a new event with the current timestamp
    pub fn new(task_id: impl Into<String>, event: StatusMarker, payload: Option<Value>) -> Self {
        let task_id = task_id.into();
        let idempotency_key = generate_idempotency_key(&task_id, event, payload.as_ref());
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            task_id,
            event,
            idempotency_key,
            payload,
        }
    }
}

/// Payload of the per-batch progress notification
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchProgress {
    /// 1-based
    pub batch_index: usize,
    pub total_batches: usize,
    pub batch_size: usize,
    pub uid_used: String,

    /// True when the batch was degraded to defaults
    pub used_fallback: bool,
}

impl BatchProgress {
    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

/// Generate the idempotency key of an event
pub fn generate_idempotency_key(task_id: &str, event: StatusMarker, payload: Option<&Value>) -> String {
    let body = payload.map(|p| p.to_string()).unwrap_or_default();
    format!("{}:{}:{}", task_id, event, hash_input(&body))
}

/// Hash input content (first 16 hex chars of SHA256)
pub fn hash_input(input: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(input.as_bytes());
    let result = hasher.finalize();
    hex::encode(&result[..8])
}
