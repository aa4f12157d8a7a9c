//! Stub and counting providers for pipeline tests

use async_trait::async_trait;
use pulse_ai::services::context_source::{ContextSource, EnrichmentError, StaticContextSource};
use pulse_ai::services::enhancer::{EnhanceError, Enhancer, MockEnhancer};
use pulse_ai::services::event_cache::EventCache;
use pulse_ai::services::feed::{builtin_demo_feed, seed_cache};
use pulse_ai::services::fingerprint_matcher::{FingerprintProvider, MatchCandidate, MatcherError};
use pulse_ai::services::voice_synthesizer::{MockSpeechProvider, SpeechProvider, SynthesisError};
use pulse_ai::types::{AudioClip, AudioSample, Ranking, SeasonAggregates};
use pulse_ai::workflow::Providers;
use pulse_ai::AppState;
use pulse_common::config::AudioFormat;
use pulse_common::RecapConfig;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Returns fixed candidates, ignoring the audio
pub struct StubFingerprintProvider {
    candidates: Vec<MatchCandidate>,
    latency: Duration,
}

impl StubFingerprintProvider {
    pub fn new(candidates: Vec<MatchCandidate>) -> Self {
        Self {
            candidates,
            latency: Duration::ZERO,
        }
    }

    /// One candidate on the demo broadcast, just after its interception
    pub fn demo(confidence: f64) -> Self {
        Self::new(vec![MatchCandidate {
            broadcast_id: "nfl_2024_sea_hou_001".to_string(),
            offset_seconds: 860.0,
            confidence,
            live: true,
        }])
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }
}

#[async_trait]
impl FingerprintProvider for StubFingerprintProvider {
    fn name(&self) -> &'static str {
        "stub"
    }

    async fn candidates(&self, _sample: &AudioSample) -> Result<Vec<MatchCandidate>, MatcherError> {
        tokio::time::sleep(self.latency).await;
        Ok(self.candidates.clone())
    }
}

/// Static context source that counts calls
pub struct CountingContextSource {
    inner: StaticContextSource,
    pub calls: AtomicUsize,
}

impl CountingContextSource {
    pub fn new(latency: Duration) -> Self {
        Self {
            inner: StaticContextSource::with_latency(latency),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ContextSource for CountingContextSource {
    fn name(&self) -> &'static str {
        "counting"
    }

    async fn season_aggregates(
        &self,
        team: &str,
        event_type: &str,
    ) -> Result<Option<SeasonAggregates>, EnrichmentError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.inner.season_aggregates(team, event_type).await
    }

    async fn ranking(&self, team: &str, event_type: &str) -> Result<Option<Ranking>, EnrichmentError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.inner.ranking(team, event_type).await
    }
}

/// Mock speech provider that counts calls
pub struct CountingSpeechProvider {
    inner: MockSpeechProvider,
    pub calls: AtomicUsize,
}

impl CountingSpeechProvider {
    pub fn new(inner: MockSpeechProvider) -> Self {
        Self {
            inner,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SpeechProvider for CountingSpeechProvider {
    fn name(&self) -> &'static str {
        "counting"
    }

    async fn synthesize(&self, text: &str, format: &AudioFormat) -> Result<AudioClip, SynthesisError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.inner.synthesize(text, format).await
    }
}

/// Enhancer that always errors
pub struct FailingEnhancer;

#[async_trait]
impl Enhancer for FailingEnhancer {
    fn name(&self) -> &'static str {
        "failing"
    }

    async fn enhance(&self, _text: &str) -> Result<String, EnhanceError> {
        Err(EnhanceError::Empty)
    }
}

/// Provider set of local mocks around `fingerprint`
pub fn stub_providers(fingerprint: StubFingerprintProvider) -> Providers {
    Providers {
        fingerprint: Arc::new(fingerprint),
        context: Arc::new(StaticContextSource::new()),
        enhancer: Arc::new(MockEnhancer::new()),
        speech: Arc::new(MockSpeechProvider::new()),
    }
}

/// App state with the built-in demo feed and the given providers
pub fn demo_state(config: RecapConfig, providers: Providers) -> AppState {
    let cache = Arc::new(EventCache::new(config.rewind_horizon_seconds));
    seed_cache(&cache, builtin_demo_feed());
    AppState::new(config, cache, providers)
}
