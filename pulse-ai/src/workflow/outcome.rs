//! Fatal errors and recovered degradations of a pipeline run

use super::state::Stage;
use super::trace::LatencyTrace;
use crate::types::ContextCategory;
use serde::Serialize;
use thiserror::Error;

/// Errors that abort a run
#[derive(Debug, Clone, PartialEq, Error)]
pub enum RecapError {
    #[error("audio sample too short: {duration_ms}ms, need at least {min_ms}ms")]
    InsufficientAudio { duration_ms: u64, min_ms: u64 },

    #[error("no broadcast matched (best confidence {best_confidence:?})")]
    NoMatch { best_confidence: Option<f64> },

    #[error("fingerprint matcher unavailable: {0}")]
    MatcherUnavailable(String),

    #[error("no event data for {broadcast_id} at or before {offset_seconds}s")]
    NoEventData {
        broadcast_id: String,
        offset_seconds: f64,
    },

    #[error("event retrieval exceeded its {budget_ms}ms budget")]
    RetrievalTimeout { budget_ms: u64 },

    #[error("voice synthesis failed: {0}")]
    SynthesisFailure(String),

    #[error("global deadline exceeded before {stage} stage")]
    DeadlineExceeded { stage: Stage },

    #[error("run cancelled during {stage} stage")]
    Cancelled { stage: Stage },
}

impl RecapError {
    /// Stable machine-readable code
    pub fn code(&self) -> &'static str {
        match self {
            Self::InsufficientAudio { .. } => "INSUFFICIENT_AUDIO",
            Self::NoMatch { .. } => "NO_MATCH",
            Self::MatcherUnavailable(_) => "MATCHER_UNAVAILABLE",
            Self::NoEventData { .. } => "NO_EVENT_DATA",
            Self::RetrievalTimeout { .. } => "RETRIEVAL_TIMEOUT",
            Self::SynthesisFailure(_) => "SYNTHESIS_FAILURE",
            Self::DeadlineExceeded { .. } => "DEADLINE_EXCEEDED",
            Self::Cancelled { .. } => "CANCELLED",
        }
    }

    /// Short user-facing category
    pub fn category(&self) -> &'static str {
        match self {
            Self::InsufficientAudio { .. } | Self::NoMatch { .. } => {
                "couldn't recognize the broadcast"
            }
            Self::NoEventData { .. } => "no plays available for this broadcast yet",
            Self::MatcherUnavailable(_) => "recognition is unavailable right now",
            Self::RetrievalTimeout { .. }
            | Self::DeadlineExceeded { .. }
            | Self::Cancelled { .. } => "recap is taking longer than usual",
            Self::SynthesisFailure(_) => "voice recap is unavailable right now",
        }
    }

    /// Whether the service itself misbehaved, as opposed to the request
    /// naming audio or a position it cannot serve
    pub fn is_service_fault(&self) -> bool {
        !matches!(
            self,
            Self::InsufficientAudio { .. } | Self::NoMatch { .. } | Self::NoEventData { .. }
        )
    }
}

/// Recovered problems; the run still completes
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Degradation {
    EnrichmentUnavailable {
        missing: Vec<ContextCategory>,
    },
    GenerationTimeout {
        #[serde(rename = "budgetMs")]
        budget_ms: u64,
    },
    FidelityMismatch {
        dropped: Vec<String>,
        invented: Vec<String>,
    },
    EnhancementFailed {
        reason: String,
    },
    EnhancementSkipped {
        #[serde(rename = "remainingMs")]
        remaining_ms: u64,
    },
    TextOnlyFallback {
        reason: String,
    },
}

impl Degradation {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::EnrichmentUnavailable { .. } => "enrichment_unavailable",
            Self::GenerationTimeout { .. } => "generation_timeout",
            Self::FidelityMismatch { .. } => "fidelity_mismatch",
            Self::EnhancementFailed { .. } => "enhancement_failed",
            Self::EnhancementSkipped { .. } => "enhancement_skipped",
            Self::TextOnlyFallback { .. } => "text_only_fallback",
        }
    }
}

/// Aborted run: the error, the furthest stage reached, and the partial trace
#[derive(Debug, Clone, Error)]
#[error("recap aborted in {reached} stage: {error}")]
pub struct RunFailure {
    pub error: RecapError,
    pub reached: Stage,
    pub trace: LatencyTrace,
}
