//! Pipeline services
//!
//! Each capability sits behind a trait with a local implementation and,
//! where one exists, an HTTP-backed provider.

pub mod context_source;
pub mod enhancer;
pub mod enrichment;
pub mod event_cache;
pub mod feed;
pub mod fidelity;
pub mod fingerprint;
pub mod fingerprint_matcher;
pub mod narrative;
pub mod run_metrics;
pub mod voice_synthesizer;

pub use context_source::{ContextSource, StaticContextSource};
pub use enhancer::{Enhancer, MockEnhancer, OpenAiEnhancer};
pub use enrichment::EnrichmentEngine;
pub use event_cache::{EventCache, UpsertOutcome};
pub use fingerprint::{FingerprintIndex, Signature};
pub use fingerprint_matcher::{FingerprintMatcher, FingerprintProvider, MatchCandidate, MatchOutcome};
pub use narrative::NarrativeGenerator;
pub use run_metrics::{MetricsSummary, RunMetrics, RunStatus};
pub use voice_synthesizer::{SpeechProvider, VoiceSynthesizer};
