//! Pipeline Orchestrator
//!
//! Runs one recap request through the four stages under a single global
//! deadline:
//!
//! 1. **Match**: fingerprint the sample (or pick a demo broadcast)
//! 2. **Retrieve**: event lookup at the matched offset, then enrichment
//! 3. **Generate**: template narrative, optionally enhanced
//! 4. **Synthesize**: voice clip in the configured format
//!
//! # Error handling
//! - Match, retrieve and synthesize failures abort the run with the stage
//!   reached and the partial trace
//! - Enrichment and enhancement problems are recorded as degradations and the
//!   run continues with what it has
//! - Synthesis failure degrades to a text-only result when the caller allows it
//!
//! Every await is bounded by a stage deadline that never extends past the
//! global deadline.

use super::budget::{DeadlineBudget, StageBudget};
use super::outcome::{Degradation, RecapError, RunFailure};
use super::state::{RunState, Stage};
use super::trace::{LatencyTrace, StageOutcome, TraceRecorder};
use crate::services::context_source::{ContextSource, StaticContextSource};
use crate::services::enhancer::{Enhancer, MockEnhancer, OpenAiEnhancer};
use crate::services::enrichment::EnrichmentEngine;
use crate::services::event_cache::EventCache;
use crate::services::feed::demo_fallback_candidate;
use crate::services::fingerprint::FingerprintIndex;
use crate::services::fingerprint_matcher::{
    FingerprintMatcher, FingerprintProvider, HttpFingerprintProvider, MatchOutcome, MatcherError,
    MockFingerprintProvider,
};
use crate::services::narrative::NarrativeGenerator;
use crate::services::run_metrics::{RunMetrics, RunStatus};
use crate::services::voice_synthesizer::{
    HttpSpeechProvider, MockSpeechProvider, SpeechProvider, VoiceSynthesizer,
};
use crate::types::{AudioClip, AudioSample, BroadcastMatch, NarrativeScript};
use pulse_common::RecapConfig;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// One recap request
#[derive(Debug, Clone, Default)]
pub struct RecapRequest {
    /// `None` selects a broadcast from the registry instead of matching
    pub audio: Option<AudioSample>,
    pub preferred_leagues: Vec<String>,
    pub user_id: Option<String>,
    /// Return the narrative without audio if synthesis fails
    pub allow_text_only: bool,
}

/// Completed run
#[derive(Debug, Clone)]
pub struct RecapResult {
    pub run_id: Uuid,
    pub broadcast_id: String,
    pub offset_seconds: f64,
    pub confidence: f64,
    pub match_reason: String,
    pub script: NarrativeScript,
    /// `None` only for text-only fallbacks
    pub audio_clip: Option<AudioClip>,
    pub trace: LatencyTrace,
    pub degradations: Vec<Degradation>,
}

impl RecapResult {
    pub fn status(&self) -> RunStatus {
        if self.degradations.is_empty() {
            RunStatus::Success
        } else {
            RunStatus::Degraded
        }
    }
}

/// Provider set behind the pipeline's capability traits
#[derive(Clone)]
pub struct Providers {
    pub fingerprint: Arc<dyn FingerprintProvider>,
    pub context: Arc<dyn ContextSource>,
    pub enhancer: Arc<dyn Enhancer>,
    pub speech: Arc<dyn SpeechProvider>,
}

impl Providers {
    /// Local providers for every capability
    pub fn mocks(config: &RecapConfig, index: Arc<FingerprintIndex>) -> Self {
        Self {
            fingerprint: Arc::new(
                MockFingerprintProvider::new(index)
                    .with_fallback(demo_fallback_candidate(), config.confidence_threshold),
            ),
            context: Arc::new(StaticContextSource::new()),
            enhancer: Arc::new(MockEnhancer::new()),
            speech: Arc::new(MockSpeechProvider::new()),
        }
    }

    /// HTTP providers where credentials are configured, mocks elsewhere
    pub fn from_config(
        config: &RecapConfig,
        index: Arc<FingerprintIndex>,
    ) -> Result<Self, pulse_common::Error> {
        let setup = |what: &str, e: &dyn std::fmt::Display| {
            pulse_common::Error::Config(format!("{} provider: {}", what, e))
        };
        let mut providers = Self::mocks(config, index);

        if let Some((endpoint, key)) = config.providers.fingerprint.credentials() {
            let provider = HttpFingerprintProvider::new(endpoint, key)
                .map_err(|e| setup("fingerprint", &e))?;
            providers.fingerprint = Arc::new(provider);
        }
        if let Some((endpoint, key)) = config.providers.enhancer.credentials() {
            let model = config
                .providers
                .enhancer
                .model
                .clone()
                .unwrap_or_else(|| "gpt-4o-mini".to_string());
            let enhancer = OpenAiEnhancer::new(endpoint, key.to_string(), model)
                .map_err(|e| setup("enhancer", &e))?;
            providers.enhancer = Arc::new(enhancer);
        }
        if let Some((endpoint, key)) = config.providers.voice.credentials() {
            let speech = HttpSpeechProvider::new(endpoint, key, config.providers.voice.voice_id.clone())
                .map_err(|e| setup("voice", &e))?;
            providers.speech = Arc::new(speech);
        }

        info!(
            fingerprint = providers.fingerprint.name(),
            context = providers.context.name(),
            enhancer = providers.enhancer.name(),
            speech = providers.speech.name(),
            "Pipeline providers selected"
        );
        Ok(providers)
    }
}

/// Mutable state of one run
struct RunContext {
    state: RunState,
    reached: Stage,
    recorder: TraceRecorder,
    budget: DeadlineBudget,
    degradations: Vec<Degradation>,
    cancel: CancellationToken,
}

impl RunContext {
    fn run_id(&self) -> Uuid {
        self.recorder.run_id()
    }

    fn transition(&mut self, next: RunState) {
        if self.state.can_transition_to(next) {
            debug!(run_id = %self.run_id(), from = %self.state, to = %next, "Run state transition");
            self.state = next;
        } else {
            warn!(run_id = %self.run_id(), from = %self.state, to = %next, "Rejected illegal run transition");
        }
    }

    /// Enter `stage`, or fail if the global deadline is already spent
    fn enter(&mut self, stage: Stage) -> Result<StageBudget, RecapError> {
        if self.budget.is_exhausted() {
            return Err(RecapError::DeadlineExceeded { stage });
        }
        self.transition(stage.run_state());
        self.reached = stage;
        Ok(self.budget.stage_deadline(stage))
    }

    fn degrade(&mut self, degradation: Degradation) {
        warn!(run_id = %self.run_id(), kind = degradation.kind(), "Run degraded");
        self.degradations.push(degradation);
    }

    fn abort(mut self, error: RecapError) -> RunFailure {
        self.transition(RunState::Aborted);
        self.cancel.cancel();
        let trace = self.recorder.into_trace();
        warn!(
            run_id = %trace.run_id,
            stage = %self.reached,
            code = error.code(),
            total_ms = trace.total_ms,
            error = %error,
            "Recap run aborted"
        );
        RunFailure {
            error,
            reached: self.reached,
            trace,
        }
    }
}

/// Await `fut` unless the run is cancelled first
async fn guarded<T>(cancel: &CancellationToken, stage: Stage, fut: impl Future<Output = T>) -> Result<T, RecapError> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(RecapError::Cancelled { stage }),
        value = fut => Ok(value),
    }
}

pub struct Orchestrator {
    matcher: FingerprintMatcher,
    cache: Arc<EventCache>,
    enrichment: EnrichmentEngine,
    narrative: NarrativeGenerator,
    voice: VoiceSynthesizer,
    metrics: Arc<RunMetrics>,
    global_deadline: Duration,
    weights: pulse_common::config::StageWeights,
}

impl Orchestrator {
    pub fn new(
        config: &RecapConfig,
        cache: Arc<EventCache>,
        providers: Providers,
        metrics: Arc<RunMetrics>,
    ) -> Self {
        Self {
            matcher: FingerprintMatcher::new(providers.fingerprint, config),
            enrichment: EnrichmentEngine::new(Arc::clone(&cache), providers.context),
            narrative: NarrativeGenerator::new(providers.enhancer, config.min_enhancement_budget_ms),
            voice: VoiceSynthesizer::new(providers.speech, config.audio_format.clone()),
            cache,
            metrics,
            global_deadline: Duration::from_millis(config.global_deadline_ms),
            weights: config.stage_weights,
        }
    }

    pub fn cache(&self) -> &Arc<EventCache> {
        &self.cache
    }

    pub async fn run(&self, request: RecapRequest) -> Result<RecapResult, RunFailure> {
        self.run_with_cancel(request, &CancellationToken::new()).await
    }

    /// Run one request; cancelling `parent` aborts the run at its next await
    pub async fn run_with_cancel(
        &self,
        request: RecapRequest,
        parent: &CancellationToken,
    ) -> Result<RecapResult, RunFailure> {
        let ctx = RunContext {
            state: RunState::Idle,
            reached: Stage::Match,
            recorder: TraceRecorder::new(Uuid::new_v4()),
            budget: DeadlineBudget::new(self.global_deadline, self.weights),
            degradations: Vec::new(),
            cancel: parent.child_token(),
        };
        info!(
            run_id = %ctx.run_id(),
            user_id = request.user_id.as_deref().unwrap_or("anonymous"),
            demo = request.audio.is_none(),
            "Recap run started"
        );

        let result = self.execute(ctx, request).await;
        match &result {
            Ok(done) => self.metrics.record(done.status(), &done.trace),
            Err(failure) => self.metrics.record(RunStatus::Aborted, &failure.trace),
        }
        result
    }

    async fn execute(&self, mut ctx: RunContext, request: RecapRequest) -> Result<RecapResult, RunFailure> {
        let RecapRequest {
            audio,
            preferred_leagues,
            allow_text_only,
            ..
        } = request;

        // Stage 1: match
        let (matched, match_reason) = match self.stage_match(&mut ctx, audio, &preferred_leagues).await {
            Ok(found) => found,
            Err(e) => return Err(ctx.abort(e)),
        };

        // Stage 2: retrieve + enrich
        let stage = match ctx.enter(Stage::Retrieve) {
            Ok(stage) => stage,
            Err(e) => return Err(ctx.abort(e)),
        };
        let timer = ctx.recorder.begin(Stage::Retrieve, stage.budget);
        let Some(event) = self.cache.lookup(&matched.broadcast_id, matched.offset_seconds) else {
            ctx.recorder.finish(timer, StageOutcome::Failed);
            return Err(ctx.abort(RecapError::NoEventData {
                broadcast_id: matched.broadcast_id.clone(),
                offset_seconds: matched.offset_seconds,
            }));
        };
        if stage.is_overrun() {
            ctx.recorder.finish(timer, StageOutcome::Failed);
            return Err(ctx.abort(RecapError::RetrievalTimeout {
                budget_ms: stage.budget_ms(),
            }));
        }
        let enriched = match guarded(&ctx.cancel, Stage::Retrieve, self.enrichment.enrich(event, stage.deadline)).await {
            Ok(enriched) => enriched,
            Err(e) => {
                ctx.recorder.finish(timer, StageOutcome::Failed);
                return Err(ctx.abort(e));
            }
        };
        if enriched.missing.is_empty() {
            ctx.recorder.finish(timer, StageOutcome::Completed);
        } else {
            ctx.recorder.finish(timer, StageOutcome::Degraded);
            ctx.degrade(Degradation::EnrichmentUnavailable {
                missing: enriched.missing.iter().copied().collect(),
            });
        }

        // Stage 3: generate
        let stage = match ctx.enter(Stage::Generate) {
            Ok(stage) => stage,
            Err(e) => return Err(ctx.abort(e)),
        };
        let timer = ctx.recorder.begin(Stage::Generate, stage.budget);
        let generated = match guarded(&ctx.cancel, Stage::Generate, self.narrative.generate(&enriched, stage.deadline)).await {
            Ok(generated) => generated,
            Err(e) => {
                ctx.recorder.finish(timer, StageOutcome::Failed);
                return Err(ctx.abort(e));
            }
        };
        match generated.degradation {
            Some(degradation) => {
                ctx.recorder.finish(timer, StageOutcome::Degraded);
                ctx.degrade(degradation);
            }
            None => {
                ctx.recorder.finish(timer, StageOutcome::Completed);
            }
        }
        let script = generated.script;

        // Stage 4: synthesize
        let stage = match ctx.enter(Stage::Synthesize) {
            Ok(stage) => stage,
            Err(e) => return Err(ctx.abort(e)),
        };
        let timer = ctx.recorder.begin(Stage::Synthesize, stage.budget);
        let synthesized = match guarded(&ctx.cancel, Stage::Synthesize, self.voice.synthesize(&script, stage.deadline)).await {
            Ok(synthesized) => synthesized,
            Err(e) => {
                ctx.recorder.finish(timer, StageOutcome::Failed);
                return Err(ctx.abort(e));
            }
        };
        let audio_clip = match synthesized {
            Ok(clip) => {
                ctx.recorder.finish(timer, StageOutcome::Completed);
                Some(clip)
            }
            Err(e) if allow_text_only => {
                ctx.recorder.finish(timer, StageOutcome::Degraded);
                ctx.degrade(Degradation::TextOnlyFallback {
                    reason: e.to_string(),
                });
                None
            }
            Err(e) => {
                ctx.recorder.finish(timer, StageOutcome::Failed);
                return Err(ctx.abort(RecapError::SynthesisFailure(e.to_string())));
            }
        };

        ctx.transition(RunState::Complete);
        ctx.cancel.cancel();
        let trace = ctx.recorder.into_trace();
        info!(
            run_id = %trace.run_id,
            broadcast_id = %matched.broadcast_id,
            phase = ?script.generation_phase,
            degradations = ctx.degradations.len(),
            total_ms = trace.total_ms,
            "Recap run complete"
        );

        Ok(RecapResult {
            run_id: trace.run_id,
            broadcast_id: matched.broadcast_id,
            offset_seconds: matched.offset_seconds,
            confidence: matched.confidence,
            match_reason,
            script,
            audio_clip,
            trace,
            degradations: ctx.degradations,
        })
    }

    /// Fingerprint match, or registry selection in demo mode
    async fn stage_match(
        &self,
        ctx: &mut RunContext,
        audio: Option<AudioSample>,
        preferred_leagues: &[String],
    ) -> Result<(BroadcastMatch, String), RecapError> {
        let stage = ctx.enter(Stage::Match)?;
        let timer = ctx.recorder.begin(Stage::Match, stage.budget);

        let outcome = match audio {
            None => match self.cache.select_demo(preferred_leagues) {
                Some(selection) => Ok((
                    BroadcastMatch {
                        broadcast_id: selection.broadcast_id,
                        offset_seconds: selection.offset_seconds,
                        confidence: 1.0,
                    },
                    selection.match_reason,
                )),
                None => Err(RecapError::NoMatch {
                    best_confidence: None,
                }),
            },
            Some(sample) => {
                let matched = guarded(
                    &ctx.cancel,
                    Stage::Match,
                    self.matcher.match_sample(sample, stage.deadline),
                )
                .await;
                match matched {
                    Err(cancelled) => Err(cancelled),
                    Ok(Ok(MatchOutcome::Matched(m))) => {
                        let reason = format!(
                            "Audio fingerprint matched by {} provider at {:.0}% confidence",
                            self.matcher.provider_name(),
                            m.confidence * 100.0
                        );
                        Ok((m, reason))
                    }
                    Ok(Ok(MatchOutcome::NoMatch { best_confidence })) => {
                        Err(RecapError::NoMatch { best_confidence })
                    }
                    Ok(Err(MatcherError::InsufficientAudio { duration_ms, min_ms })) => {
                        Err(RecapError::InsufficientAudio { duration_ms, min_ms })
                    }
                    Ok(Err(e)) => Err(RecapError::MatcherUnavailable(e.to_string())),
                }
            }
        };

        let outcome_kind = if outcome.is_ok() {
            StageOutcome::Completed
        } else {
            StageOutcome::Failed
        };
        ctx.recorder.finish(timer, outcome_kind);
        outcome
    }
}
