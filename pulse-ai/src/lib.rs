//! pulse-ai library interface
//!
//! Recognizes a live sports broadcast from a short audio sample and answers
//! with a spoken recap of the latest play, all under a one-second deadline.

pub mod api;
pub mod error;
pub mod services;
pub mod types;
pub mod workflow;

pub use crate::error::{ApiError, ApiResult};

use axum::Router;
use chrono::{DateTime, Utc};
use pulse_common::RecapConfig;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::services::feed::{build_index, seed_cache, DemoFeed, FeedReplayer, IngestSummary};
use crate::services::{EventCache, RunMetrics};
use crate::workflow::{Orchestrator, Providers};

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<Orchestrator>,
    /// Same cache the orchestrator reads; written by feed ingestion
    pub cache: Arc<EventCache>,
    pub metrics: Arc<RunMetrics>,
    pub config: Arc<RecapConfig>,
    /// Cancelled on shutdown; every run races against a child token
    pub shutdown: CancellationToken,
    /// Service startup timestamp for uptime tracking
    pub startup_time: DateTime<Utc>,
    /// Last failed run, for diagnostics
    pub last_error: Arc<RwLock<Option<String>>>,
}

impl AppState {
    pub fn new(config: RecapConfig, cache: Arc<EventCache>, providers: Providers) -> Self {
        let metrics = Arc::new(RunMetrics::new(config.metrics_window, config.global_deadline_ms));
        let orchestrator = Orchestrator::new(&config, Arc::clone(&cache), providers, Arc::clone(&metrics));
        Self {
            orchestrator: Arc::new(orchestrator),
            cache,
            metrics,
            config: Arc::new(config),
            shutdown: CancellationToken::new(),
            startup_time: Utc::now(),
            last_error: Arc::new(RwLock::new(None)),
        }
    }

    /// Providers chosen from the configured credentials, fingerprint index built from `feed`
    ///
    /// The cache starts empty; `start_feed` fills it.
    pub fn from_config(config: RecapConfig, feed: &DemoFeed) -> pulse_common::Result<Self> {
        let cache = Arc::new(EventCache::new(config.rewind_horizon_seconds));
        let providers = Providers::from_config(&config, Arc::new(build_index(feed)))?;
        Ok(Self::new(config, cache, providers))
    }

    /// Load `feed` into the cache
    ///
    /// With `feed_replay_interval_ms` set, events stream in on a background
    /// task that stops on shutdown; otherwise everything is ingested now.
    pub fn start_feed(&self, feed: DemoFeed) -> Option<JoinHandle<IngestSummary>> {
        match self.config.feed_replay_interval_ms {
            Some(interval_ms) => {
                let replayer = FeedReplayer::new(
                    Arc::clone(&self.cache),
                    feed,
                    Duration::from_millis(interval_ms),
                );
                Some(tokio::spawn(replayer.run(self.shutdown.clone())))
            }
            None => {
                seed_cache(&self.cache, feed);
                None
            }
        }
    }
}

/// Build application router
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .merge(api::recognize_routes())
        .merge(api::metrics_routes())
        .merge(api::feed_routes())
        .merge(api::health_routes())
        .layer(TraceLayer::new_for_http())
        // Enable CORS for browser clients
        .layer(CorsLayer::permissive())
        .with_state(state)
}
