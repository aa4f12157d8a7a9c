//! Fingerprint Matcher
//!
//! Turns an ambient audio sample into a broadcast identity and offset.
//!
//! # Selection rule
//! - Candidates below the confidence threshold are discarded
//! - Highest confidence wins
//! - Candidates within `live_epsilon` of the best are treated as tied, and a
//!   live broadcast beats a historical one
//! - Remaining ties resolve by broadcast id, so the result is deterministic
//!   for a fixed index snapshot
//!
//! Providers only score candidates; all of the above happens here.

use crate::services::fingerprint::{FingerprintIndex, Signature};
use crate::types::{AudioSample, BroadcastMatch};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;
use tracing::{debug, info};

/// Fixed latency of the local provider
pub const MOCK_MATCH_LATENCY: Duration = Duration::from_millis(50);

/// Hits considered per query
const MAX_CANDIDATES: usize = 5;

/// Scored candidate returned by a provider
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchCandidate {
    pub broadcast_id: String,
    pub offset_seconds: f64,
    pub confidence: f64,
    #[serde(default)]
    pub live: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub enum MatchOutcome {
    Matched(BroadcastMatch),
    /// No candidate reached the threshold
    NoMatch { best_confidence: Option<f64> },
}

#[derive(Debug, Error)]
pub enum MatcherError {
    #[error("sample too short: {duration_ms}ms (minimum {min_ms}ms)")]
    InsufficientAudio { duration_ms: u64, min_ms: u64 },

    #[error("fingerprint provider timed out after {0}ms")]
    Timeout(u64),

    #[error("fingerprint provider error: {0}")]
    Provider(String),

    #[error("fingerprint HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

/// Capability: score candidate broadcasts for a sample
#[async_trait]
pub trait FingerprintProvider: Send + Sync {
    fn name(&self) -> &'static str;

    async fn candidates(&self, sample: &AudioSample) -> Result<Vec<MatchCandidate>, MatcherError>;
}

/// Sample validation, provider call under deadline, and candidate selection
pub struct FingerprintMatcher {
    provider: Arc<dyn FingerprintProvider>,
    threshold: f64,
    live_epsilon: f64,
    min_sample_ms: u64,
    max_sample_ms: u64,
}

impl FingerprintMatcher {
    pub fn new(provider: Arc<dyn FingerprintProvider>, config: &pulse_common::RecapConfig) -> Self {
        Self {
            provider,
            threshold: config.confidence_threshold,
            live_epsilon: config.live_epsilon,
            min_sample_ms: config.min_sample_ms,
            max_sample_ms: config.max_sample_ms,
        }
    }

    pub fn provider_name(&self) -> &'static str {
        self.provider.name()
    }

    /// Identify the broadcast a sample was captured from
    ///
    /// Samples longer than the maximum window are truncated, never rejected.
    pub async fn match_sample(
        &self,
        sample: AudioSample,
        deadline: Instant,
    ) -> Result<MatchOutcome, MatcherError> {
        let duration_ms = sample.duration_ms();
        if duration_ms < self.min_sample_ms {
            return Err(MatcherError::InsufficientAudio {
                duration_ms,
                min_ms: self.min_sample_ms,
            });
        }
        let sample = if duration_ms > self.max_sample_ms {
            debug!(duration_ms, max_ms = self.max_sample_ms, "Truncating sample");
            sample.truncated(self.max_sample_ms)
        } else {
            sample
        };

        let budget_ms = deadline.saturating_duration_since(Instant::now()).as_millis() as u64;
        let candidates = tokio::time::timeout_at(deadline, self.provider.candidates(&sample))
            .await
            .map_err(|_| MatcherError::Timeout(budget_ms))??;

        let outcome = select_candidate(&candidates, self.threshold, self.live_epsilon);
        match &outcome {
            MatchOutcome::Matched(m) => info!(
                provider = self.provider.name(),
                broadcast_id = %m.broadcast_id,
                offset_seconds = m.offset_seconds,
                confidence = m.confidence,
                "Broadcast matched"
            ),
            MatchOutcome::NoMatch { best_confidence } => info!(
                provider = self.provider.name(),
                candidates = candidates.len(),
                best_confidence = ?best_confidence,
                "No broadcast above threshold"
            ),
        }
        Ok(outcome)
    }
}

/// Apply threshold, confidence ranking and the live-first tie-break
pub fn select_candidate(candidates: &[MatchCandidate], threshold: f64, live_epsilon: f64) -> MatchOutcome {
    let best_confidence = candidates
        .iter()
        .map(|c| c.confidence)
        .max_by(|a, b| a.total_cmp(b));

    let eligible: Vec<&MatchCandidate> = candidates
        .iter()
        .filter(|c| c.confidence >= threshold)
        .collect();

    let Some(top) = eligible.iter().map(|c| c.confidence).max_by(|a, b| a.total_cmp(b)) else {
        return MatchOutcome::NoMatch { best_confidence };
    };

    let winner = eligible
        .into_iter()
        .filter(|c| top - c.confidence <= live_epsilon)
        .min_by(|a, b| {
            b.live
                .cmp(&a.live)
                .then_with(|| b.confidence.total_cmp(&a.confidence))
                .then_with(|| a.broadcast_id.cmp(&b.broadcast_id))
                .then_with(|| a.offset_seconds.total_cmp(&b.offset_seconds))
        });

    match winner {
        Some(c) => MatchOutcome::Matched(BroadcastMatch {
            broadcast_id: c.broadcast_id.clone(),
            offset_seconds: c.offset_seconds,
            confidence: c.confidence.clamp(0.0, 1.0),
        }),
        None => MatchOutcome::NoMatch { best_confidence },
    }
}

// ============================================================================
// Local provider
// ============================================================================

/// Index-backed provider with a fixed latency
///
/// When no indexed entry reaches `fallback_below`, the canned fallback
/// candidate (if any) is returned instead, so arbitrary demo audio still
/// resolves to the demo game.
pub struct MockFingerprintProvider {
    index: Arc<FingerprintIndex>,
    latency: Duration,
    fallback: Option<MatchCandidate>,
    fallback_below: f64,
}

impl MockFingerprintProvider {
    pub fn new(index: Arc<FingerprintIndex>) -> Self {
        Self {
            index,
            latency: MOCK_MATCH_LATENCY,
            fallback: None,
            fallback_below: 0.0,
        }
    }

    pub fn with_fallback(mut self, candidate: MatchCandidate, fallback_below: f64) -> Self {
        self.fallback = Some(candidate);
        self.fallback_below = fallback_below;
        self
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }
}

#[async_trait]
impl FingerprintProvider for MockFingerprintProvider {
    fn name(&self) -> &'static str {
        "mock"
    }

    async fn candidates(&self, sample: &AudioSample) -> Result<Vec<MatchCandidate>, MatcherError> {
        tokio::time::sleep(self.latency).await;

        let signature = Signature::from_sample(sample);
        let mut candidates: Vec<MatchCandidate> = self
            .index
            .search(&signature, MAX_CANDIDATES)
            .into_iter()
            .map(|hit| MatchCandidate {
                broadcast_id: hit.entry.broadcast_id.clone(),
                offset_seconds: hit.entry.offset_seconds,
                confidence: hit.similarity,
                live: hit.entry.live,
            })
            .collect();

        let indexed_hit = candidates.iter().any(|c| c.confidence >= self.fallback_below);
        if !indexed_hit {
            if let Some(fallback) = &self.fallback {
                debug!(%signature, broadcast_id = %fallback.broadcast_id, "Using fallback candidate");
                candidates.push(fallback.clone());
            }
        }

        Ok(candidates)
    }
}

// ============================================================================
// HTTP provider
// ============================================================================

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct FingerprintRequest {
    signature: String,
    duration_ms: u64,
    sample_rate: u32,
}

#[derive(Debug, Deserialize)]
struct FingerprintResponse {
    #[serde(default)]
    candidates: Vec<MatchCandidate>,
}

/// Generic JSON fingerprint service
///
/// `POST {endpoint}` with `{signature, durationMs, sampleRate}` and a bearer
/// key; the response carries `{candidates: [...]}`.
pub struct HttpFingerprintProvider {
    http_client: Client,
    endpoint: String,
    api_key: String,
}

impl HttpFingerprintProvider {
    pub fn new(endpoint: impl Into<String>, api_key: impl Into<String>) -> Result<Self, MatcherError> {
        let http_client = Client::builder()
            .user_agent(concat!("pulse-ai/", env!("CARGO_PKG_VERSION")))
            .timeout(Duration::from_secs(5))
            .build()?;
        Ok(Self {
            http_client,
            endpoint: endpoint.into(),
            api_key: api_key.into(),
        })
    }
}

#[async_trait]
impl FingerprintProvider for HttpFingerprintProvider {
    fn name(&self) -> &'static str {
        "http"
    }

    async fn candidates(&self, sample: &AudioSample) -> Result<Vec<MatchCandidate>, MatcherError> {
        let request = FingerprintRequest {
            signature: Signature::from_sample(sample).to_hex(),
            duration_ms: sample.duration_ms(),
            sample_rate: sample.sample_rate(),
        };

        let response = self
            .http_client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(MatcherError::Provider(format!("HTTP {}: {}", status, body)));
        }

        let parsed: FingerprintResponse = response.json().await?;
        debug!(candidates = parsed.candidates.len(), "Fingerprint service responded");
        Ok(parsed.candidates)
    }
}
