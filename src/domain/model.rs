//! Model provider configuration and per-row enrichment results.
//!
//! The AI configuration is supplied wholesale per task. Its shape matches the
//! settings document the API backend stores:
//!
//! ```yaml
//! preferences:
//!   mode: automatic
//!   default_external_model_id: ext-1
//! external:
//!   - uid: ext-1
//!     data: { baseUrl: "https://llm.example", model: "llama3", apiKey: "..." }
//! local:
//!   - uid: local-1
//!     data: { baseUrl: "http://localhost:11434", model: "llama3" }
//! ```

use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Sentiment used when a row has no usable result
pub const DEFAULT_SENTIMENT: &str = "neutral";

/// Topic used when a row has no usable result
pub const DEFAULT_TOPIC: &str = "general";

/// Candidate selection mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AiMode {
    /// Only local candidates
    #[default]
    Local,

    /// Only external candidates
    External,

    /// External first, then local
    Automatic,
}

/// Where a candidate is hosted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    Local,
    External,
}

/// Selection preferences
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Preferences {
    #[serde(default)]
    pub mode: AiMode,

    #[serde(default)]
    pub default_local_model_id: Option<String>,

    #[serde(default)]
    pub default_external_model_id: Option<String>,
}

/// Connection and batching settings of one candidate
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelSettings {
    /// Provider endpoint
    #[serde(default)]
    pub base_url: String,

    /// Model name at the provider
    #[serde(default)]
    pub model: String,

    /// Bearer credential (empty when not needed)
    #[serde(default)]
    pub api_key: String,

    /// Preferred rows per request
    #[serde(default)]
    pub paginate_rows_limit: Option<usize>,

    /// Attempts per batch before giving up on this candidate
    #[serde(default)]
    pub retry_requests: Option<u32>,
}

/// One entry of the ranked provider list
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelCandidate {
    pub uid: String,

    #[serde(default)]
    pub data: ModelSettings,
}

impl ModelCandidate {
    /// Create a candidate with default settings
    pub fn new(uid: impl Into<String>) -> Self {
        Self {
            uid: uid.into(),
            data: ModelSettings::default(),
        }
    }

    /// Set the preferred batch size
    pub fn with_paginate_limit(mut self, limit: usize) -> Self {
        self.data.paginate_rows_limit = Some(limit);
        self
    }

    /// Set the per-batch attempt limit
    pub fn with_retry_limit(mut self, limit: u32) -> Self {
        self.data.retry_requests = Some(limit);
        self
    }
}

/// Ranked provider list plus selection preferences for one task
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AiConfig {
    #[serde(default)]
    pub preferences: Preferences,

    #[serde(default)]
    pub local: Vec<ModelCandidate>,

    #[serde(default)]
    pub external: Vec<ModelCandidate>,
}

impl AiConfig {
    /// Load from a YAML or JSON file (JSON is valid YAML)
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read AI config: {}", path.display()))?;
        Self::from_yaml(&content)
    }

    /// Parse from YAML or JSON content
    pub fn from_yaml(content: &str) -> Result<Self> {
        serde_yaml::from_str(content).context("Failed to parse AI config")
    }

    /// Candidates of one tier, in ranked order
    pub fn candidates(&self, tier: Tier) -> &[ModelCandidate] {
        match tier {
            Tier::Local => &self.local,
            Tier::External => &self.external,
        }
    }

    /// Whether any candidate is configured at all
    pub fn is_empty(&self) -> bool {
        self.local.is_empty() && self.external.is_empty()
    }
}

/// Per-row enrichment output
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnrichmentResult {
    pub sentiment: String,

    /// Ordinal: 2 high, 1 normal, 0 low
    pub priority: u8,

    pub topic: String,
}

impl Default for EnrichmentResult {
    fn default() -> Self {
        Self::neutral()
    }
}

impl EnrichmentResult {
    /// The degradation value for a row
    pub fn neutral() -> Self {
        Self {
            sentiment: DEFAULT_SENTIMENT.to_string(),
            priority: 0,
            topic: DEFAULT_TOPIC.to_string(),
        }
    }
}

/// Fold a free-form priority label onto the ordinal scale
pub fn fold_priority(label: &str) -> u8 {
    match label.trim().to_lowercase().as_str() {
        "high" | "h" => 2,
        "normal" | "medium" | "m" | "n" => 1,
        "low" | "l" => 0,
        _ => 1,
    }
}
