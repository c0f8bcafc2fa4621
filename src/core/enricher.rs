//! Batch enrichment with per-candidate retry and cross-candidate fallback.
//!
//! The dataset is partitioned once into an immutable list of batches. A cursor
//! walks that list; a batch only advances the cursor once it has a result,
//! either from a candidate or degraded to neutral defaults. Falling back to the
//! next candidate re-runs the same batch.

use std::collections::HashSet;
use std::ops::Range;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::adapters::{EventSink, ModelProvider, ProviderError};
use crate::domain::{
    AiConfig, AiMode, BatchProgress, EnrichmentResult, ModelCandidate, StatusMarker, TaskEvent,
    Tier,
};

use super::lifecycle::{Interrupted, RunControl};
use super::normalize::normalize_response;

/// Batch-size and retry bounds applied to every candidate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnrichmentLimits {
    /// Rows per request when a candidate does not say
    pub default_paginate_rows: usize,

    /// Hard ceiling on rows per request
    pub max_paginate_rows: usize,

    /// Attempts per batch when a candidate does not say
    pub default_retry_requests: u32,

    /// Hard ceiling on attempts per batch
    pub max_retry_requests: u32,
}

impl Default for EnrichmentLimits {
    fn default() -> Self {
        Self {
            default_paginate_rows: 500,
            max_paginate_rows: 1000,
            default_retry_requests: 3,
            max_retry_requests: 5,
        }
    }
}

impl EnrichmentLimits {
    /// Rows per batch for a candidate (never zero)
    pub fn batch_size(&self, candidate: &ModelCandidate) -> usize {
        candidate
            .data
            .paginate_rows_limit
            .unwrap_or(self.default_paginate_rows)
            .min(self.max_paginate_rows)
            .max(1)
    }

    /// Attempts per batch for a candidate, first call included (never zero)
    pub fn attempts(&self, candidate: &ModelCandidate) -> u32 {
        candidate
            .data
            .retry_requests
            .unwrap_or(self.default_retry_requests)
            .min(self.max_retry_requests)
            .max(1)
    }
}

/// Exponential backoff between attempts on the same candidate
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    /// Delay after the first failed attempt
    pub unit: Duration,

    /// Upper bound on any single delay
    pub max_delay: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            unit: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
        }
    }
}

impl BackoffPolicy {
    /// No waiting at all
    pub fn none() -> Self {
        Self {
            unit: Duration::ZERO,
            max_delay: Duration::ZERO,
        }
    }

    pub fn from_millis(unit_ms: u64) -> Self {
        Self {
            unit: Duration::from_millis(unit_ms),
            ..Self::default()
        }
    }

    /// Delay after failed attempt `k` (0-based): `unit * 2^k`, capped
    pub fn delay_for_attempt(&self, k: u32) -> Duration {
        let factor = 1u32.checked_shl(k).unwrap_or(u32::MAX);
        self.unit.saturating_mul(factor).min(self.max_delay)
    }
}

/// Pick the next untried candidate by configured preference.
///
/// `local` and `external` stay within their tier, default uid first.
/// `automatic` tries the default external uid, then other externals, then locals.
pub fn select_candidate<'a>(
    config: &'a AiConfig,
    tried: &HashSet<String>,
) -> Option<&'a ModelCandidate> {
    let prefs = &config.preferences;
    let ranked: Vec<(Tier, Option<&str>)> = match prefs.mode {
        AiMode::Local => vec![(Tier::Local, prefs.default_local_model_id.as_deref())],
        AiMode::External => vec![(Tier::External, prefs.default_external_model_id.as_deref())],
        AiMode::Automatic => vec![
            (Tier::External, prefs.default_external_model_id.as_deref()),
            (Tier::Local, None),
        ],
    };

    ranked.into_iter().find_map(|(tier, default_uid)| {
        let pool = config.candidates(tier);
        let untried = |c: &&ModelCandidate| !tried.contains(&c.uid);
        default_uid
            .and_then(|uid| pool.iter().filter(untried).find(|c| c.uid == uid))
            .or_else(|| pool.iter().find(untried))
    })
}

/// Split `len` rows into contiguous ranges of at most `size`
pub fn partition(len: usize, size: usize) -> Vec<Range<usize>> {
    (0..len)
        .step_by(size.max(1))
        .map(|start| start..(start + size).min(len))
        .collect()
}

/// Enrichment failures that abort the step
#[derive(Debug, Error)]
pub enum EnrichError {
    #[error("No model provider available")]
    NoProviderAvailable,

    #[error(transparent)]
    Interrupted(#[from] Interrupted),
}

/// Input of one enrichment run
#[derive(Debug, Clone)]
pub struct EnrichRequest<'a> {
    pub task_id: &'a str,
    pub texts: &'a [String],
    pub config: &'a AiConfig,

    /// Candidates already known to be unusable
    pub tried: HashSet<String>,
}

/// Result of one enrichment run
#[derive(Debug, Clone)]
pub struct EnrichOutcome {
    /// One entry per input text, in input order
    pub results: Vec<EnrichmentResult>,

    /// Last candidate that produced a real result (or the first selected)
    pub uid_used: String,

    pub total_batches: usize,
    pub degraded_batches: usize,
}

/// How a single batch ended on one candidate
enum BatchAttempt {
    Succeeded(Vec<EnrichmentResult>),
    Malformed,
    Exhausted,
}

/// Drives a model provider over a dataset in bounded batches
pub struct BatchEnricher {
    provider: Arc<dyn ModelProvider>,
    events: Arc<dyn EventSink>,
    limits: EnrichmentLimits,
    backoff: BackoffPolicy,
}

impl BatchEnricher {
    pub fn new(provider: Arc<dyn ModelProvider>, events: Arc<dyn EventSink>) -> Self {
        Self {
            provider,
            events,
            limits: EnrichmentLimits::default(),
            backoff: BackoffPolicy::default(),
        }
    }

    pub fn with_limits(mut self, limits: EnrichmentLimits) -> Self {
        self.limits = limits;
        self
    }

    pub fn with_backoff(mut self, backoff: BackoffPolicy) -> Self {
        self.backoff = backoff;
        self
    }

    /// Enrich every text. Fails only when no candidate can be selected up
    /// front or when the run is stopped between batches.
    pub async fn enrich(
        &self,
        request: EnrichRequest<'_>,
        control: Option<&RunControl>,
    ) -> Result<EnrichOutcome, EnrichError> {
        let EnrichRequest {
            task_id,
            texts,
            config,
            mut tried,
        } = request;

        let first = select_candidate(config, &tried).ok_or(EnrichError::NoProviderAvailable)?;
        let first_uid = first.uid.clone();
        let batch_size = self.limits.batch_size(first);
        let batches = partition(texts.len(), batch_size);
        let total_batches = batches.len();

        info!(
            task_id,
            rows = texts.len(),
            total_batches,
            batch_size,
            uid = %first_uid,
            provider = self.provider.name(),
            "Enriching dataset"
        );

        let mut current: Option<&ModelCandidate> = Some(first);
        let mut last_uid = first_uid.clone();
        let mut last_good: Option<String> = None;
        let mut results = Vec::with_capacity(texts.len());
        let mut degraded_batches = 0;
        let mut cursor = 0;

        while cursor < total_batches {
            let range = batches[cursor].clone();
            let batch = &texts[range];

            let attempt = match current {
                Some(candidate) => self.run_batch(task_id, candidate, batch, cursor).await,
                None => BatchAttempt::Malformed,
            };

            let used_fallback = match attempt {
                BatchAttempt::Succeeded(batch_results) => {
                    results.extend(batch_results);
                    last_good = Some(last_uid.clone());
                    false
                }
                BatchAttempt::Malformed => {
                    results.extend(std::iter::repeat(EnrichmentResult::neutral()).take(batch.len()));
                    degraded_batches += 1;
                    true
                }
                BatchAttempt::Exhausted => {
                    tried.insert(last_uid.clone());
                    current = select_candidate(config, &tried);
                    if let Some(next) = current {
                        warn!(task_id, from = %last_uid, to = %next.uid, batch = cursor + 1, "Falling back to next candidate");
                        last_uid = next.uid.clone();
                    } else {
                        warn!(task_id, batch = cursor + 1, "No candidates left, degrading remaining batches");
                    }
                    // same batch again, on the next candidate or degraded
                    continue;
                }
            };

            let progress = BatchProgress {
                batch_index: cursor + 1,
                total_batches,
                batch_size: batch.len(),
                uid_used: last_uid.clone(),
                used_fallback,
            };
            self.events
                .publish(TaskEvent::new(
                    task_id,
                    StatusMarker::SendingToLlmProgress,
                    Some(progress.to_value()),
                ))
                .await;

            cursor += 1;

            if cursor < total_batches {
                if let Some(control) = control {
                    control.suspension_point().await?;
                }
            }
        }

        Ok(EnrichOutcome {
            results,
            uid_used: last_good.unwrap_or(first_uid),
            total_batches,
            degraded_batches,
        })
    }

    /// Run one batch on one candidate with retries
    async fn run_batch(
        &self,
        task_id: &str,
        candidate: &ModelCandidate,
        batch: &[String],
        cursor: usize,
    ) -> BatchAttempt {
        let attempts = self.limits.attempts(candidate);

        for attempt in 0..attempts {
            match self.provider.analyze(candidate, batch).await {
                Ok(response) => {
                    let normalized = normalize_response(&response, batch.len());
                    if normalized.malformed {
                        warn!(task_id, uid = %candidate.uid, batch = cursor + 1, "Response carried no usable values");
                        return BatchAttempt::Malformed;
                    }
                    debug!(task_id, uid = %candidate.uid, batch = cursor + 1, "Batch enriched");
                    return BatchAttempt::Succeeded(normalized.results);
                }
                Err(ProviderError::Malformed(reason)) => {
                    warn!(task_id, uid = %candidate.uid, batch = cursor + 1, %reason, "Malformed response");
                    return BatchAttempt::Malformed;
                }
                Err(ProviderError::Transient(reason)) => {
                    if attempt + 1 < attempts {
                        let delay = self.backoff.delay_for_attempt(attempt);
                        warn!(
                            task_id,
                            uid = %candidate.uid,
                            batch = cursor + 1,
                            attempt = attempt + 1,
                            delay_ms = delay.as_millis() as u64,
                            %reason,
                            "Provider call failed, retrying"
                        );
                        tokio::time::sleep(delay).await;
                    } else {
                        warn!(
                            task_id,
                            uid = %candidate.uid,
                            batch = cursor + 1,
                            attempts,
                            %reason,
                            "Provider call failed, candidate exhausted"
                        );
                    }
                }
            }
        }

        BatchAttempt::Exhausted
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Preferences;

    fn config(mode: AiMode) -> AiConfig {
        AiConfig {
            preferences: Preferences {
                mode,
                default_local_model_id: Some("l2".into()),
                default_external_model_id: Some("e2".into()),
            },
            local: vec![ModelCandidate::new("l1"), ModelCandidate::new("l2")],
            external: vec![ModelCandidate::new("e1"), ModelCandidate::new("e2")],
        }
    }

    fn tried(uids: &[&str]) -> HashSet<String> {
        uids.iter().map(|s| s.to_string()).collect()
    }

    fn uid(c: Option<&ModelCandidate>) -> Option<&str> {
        c.map(|c| c.uid.as_str())
    }

    #[test]
    fn test_local_mode_prefers_default_then_order() {
        let cfg = config(AiMode::Local);
        assert_eq!(uid(select_candidate(&cfg, &tried(&[]))), Some("l2"));
        assert_eq!(uid(select_candidate(&cfg, &tried(&["l2"]))), Some("l1"));
        assert_eq!(uid(select_candidate(&cfg, &tried(&["l1", "l2"]))), None);
    }

    #[test]
    fn test_external_mode_never_uses_local() {
        let cfg = config(AiMode::External);
        assert_eq!(uid(select_candidate(&cfg, &tried(&[]))), Some("e2"));
        assert_eq!(uid(select_candidate(&cfg, &tried(&["e1", "e2"]))), None);
    }

    #[test]
    fn test_automatic_mode_falls_through_to_local() {
        let cfg = config(AiMode::Automatic);
        assert_eq!(uid(select_candidate(&cfg, &tried(&[]))), Some("e2"));
        assert_eq!(uid(select_candidate(&cfg, &tried(&["e2"]))), Some("e1"));
        // the local default is not consulted in automatic mode
        assert_eq!(uid(select_candidate(&cfg, &tried(&["e1", "e2"]))), Some("l1"));
    }

    #[test]
    fn test_missing_default_uid_falls_back_to_first() {
        let mut cfg = config(AiMode::Local);
        cfg.preferences.default_local_model_id = Some("gone".into());
        assert_eq!(uid(select_candidate(&cfg, &tried(&[]))), Some("l1"));
    }

    #[test]
    fn test_limits_are_capped() {
        let limits = EnrichmentLimits::default();
        assert_eq!(limits.batch_size(&ModelCandidate::new("a")), 500);
        assert_eq!(limits.batch_size(&ModelCandidate::new("a").with_paginate_limit(5000)), 1000);
        assert_eq!(limits.batch_size(&ModelCandidate::new("a").with_paginate_limit(0)), 1);
        assert_eq!(limits.attempts(&ModelCandidate::new("a")), 3);
        assert_eq!(limits.attempts(&ModelCandidate::new("a").with_retry_limit(9)), 5);
        assert_eq!(limits.attempts(&ModelCandidate::new("a").with_retry_limit(0)), 1);
    }

    #[test]
    fn test_backoff_doubles() {
        let backoff = BackoffPolicy::from_millis(100);
        assert_eq!(backoff.delay_for_attempt(0), Duration::from_millis(100));
        assert_eq!(backoff.delay_for_attempt(1), Duration::from_millis(200));
        assert_eq!(backoff.delay_for_attempt(3), Duration::from_millis(800));
        assert_eq!(backoff.delay_for_attempt(40), Duration::from_secs(30));
        assert_eq!(BackoffPolicy::none().delay_for_attempt(4), Duration::ZERO);
    }

    #[test]
    fn test_partition() {
        assert_eq!(partition(5, 2), vec![0..2, 2..4, 4..5]);
        assert_eq!(partition(4, 2), vec![0..2, 2..4]);
        assert!(partition(0, 3).is_empty());
    }
}
