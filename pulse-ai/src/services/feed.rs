//! Play-by-play feed ingestion
//!
//! Loads a demo feed (built in, or JSON from disk) into the event cache, and
//! replays a feed event by event at a fixed interval as if it were live. A
//! feed may also carry reference signatures, which become the fingerprint
//! index the local matcher searches.

use crate::services::event_cache::{EventCache, UpsertOutcome};
use crate::services::fingerprint::{FingerprintIndex, IndexEntry, Signature};
use crate::services::fingerprint_matcher::MatchCandidate;
use crate::types::{BroadcastInfo, PlayEvent};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub const DEMO_BROADCAST_ID: &str = "nfl_2024_sea_hou_001";

/// Confidence of the canned demo candidate
pub const DEMO_FALLBACK_CONFIDENCE: f64 = 0.92;

#[derive(Debug, Error)]
pub enum FeedError {
    #[error("failed to read feed {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid feed JSON: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Reference signature for one broadcast position
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FingerprintSeed {
    pub broadcast_id: String,
    /// Broadcast position at the end of the reference segment
    pub offset_seconds: f64,
    /// Hex form of `Signature`
    pub signature: String,
    /// Defaults to the registry entry's flag
    #[serde(default)]
    pub live: Option<bool>,
}

/// Broadcast registry entries plus their events and reference signatures
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DemoFeed {
    #[serde(default)]
    pub broadcasts: Vec<BroadcastInfo>,
    #[serde(default)]
    pub events: Vec<PlayEvent>,
    #[serde(default)]
    pub fingerprints: Vec<FingerprintSeed>,
}

/// Per-outcome counts for a batch of upserts
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestSummary {
    pub inserted: usize,
    pub duplicates: usize,
    pub expired: usize,
}

impl IngestSummary {
    fn count(&mut self, outcome: UpsertOutcome) {
        match outcome {
            UpsertOutcome::Inserted => self.inserted += 1,
            UpsertOutcome::Duplicate => self.duplicates += 1,
            UpsertOutcome::Expired => self.expired += 1,
        }
    }
}

fn stats(value: serde_json::Value) -> BTreeMap<String, serde_json::Value> {
    match value {
        serde_json::Value::Object(map) => map.into_iter().collect(),
        _ => BTreeMap::new(),
    }
}

/// Seahawks vs Texans (live) and Lakers vs Warriors (replay)
pub fn builtin_demo_feed() -> DemoFeed {
    let broadcasts = vec![
        BroadcastInfo {
            broadcast_id: DEMO_BROADCAST_ID.to_string(),
            league: "NFL".to_string(),
            home_team: "Seahawks".to_string(),
            away_team: "Texans".to_string(),
            live: true,
        },
        BroadcastInfo {
            broadcast_id: "nba_2024_lal_gsw_001".to_string(),
            league: "NBA".to_string(),
            home_team: "Lakers".to_string(),
            away_team: "Warriors".to_string(),
            live: false,
        },
    ];

    let events = vec![
        PlayEvent {
            broadcast_id: DEMO_BROADCAST_ID.to_string(),
            timestamp_seconds: 425.0,
            event_type: "touchdown".to_string(),
            description: "Kenneth Walker III rushes for 15-yard touchdown".to_string(),
            team_ref: "Seahawks".to_string(),
            player_ref: Some("Kenneth Walker III".to_string()),
            raw_stats: stats(json!({
                "value": 6,
                "yards": 15,
                "situation": "score_differential_trailing",
                "quarter": 2,
                "time_remaining": "5:23",
                "score_home": 21,
                "score_away": 17
            })),
        },
        PlayEvent {
            broadcast_id: DEMO_BROADCAST_ID.to_string(),
            timestamp_seconds: 850.0,
            event_type: "interception".to_string(),
            description: "Devon Witherspoon with crucial interception".to_string(),
            team_ref: "Seahawks".to_string(),
            player_ref: Some("Devon Witherspoon".to_string()),
            raw_stats: stats(json!({
                "value": 1,
                "situation": "clutch_time_winning_drive",
                "quarter": 4,
                "time_remaining": "1:47",
                "score_home": 24,
                "score_away": 21
            })),
        },
        PlayEvent {
            broadcast_id: "nba_2024_lal_gsw_001".to_string(),
            timestamp_seconds: 1520.0,
            event_type: "three_pointer".to_string(),
            description: "Austin Reaves buries a corner three".to_string(),
            team_ref: "Lakers".to_string(),
            player_ref: Some("Austin Reaves".to_string()),
            raw_stats: stats(json!({
                "value": 3,
                "situation": "leading_surge",
                "period": 3,
                "clock": "4:12",
                "score_home": 78,
                "score_away": 74
            })),
        },
        PlayEvent {
            broadcast_id: "nba_2024_lal_gsw_001".to_string(),
            timestamp_seconds: 1585.0,
            event_type: "rebound".to_string(),
            description: "Anthony Davis grabs the offensive rebound".to_string(),
            team_ref: "Lakers".to_string(),
            player_ref: Some("Anthony Davis".to_string()),
            raw_stats: stats(json!({
                "value": 1,
                "period": 3,
                "clock": "3:40",
                "score_home": 78,
                "score_away": 74
            })),
        },
    ];

    DemoFeed {
        broadcasts,
        events,
        fingerprints: Vec::new(),
    }
}

/// Candidate the local matcher falls back to for unindexed audio
pub fn demo_fallback_candidate() -> MatchCandidate {
    MatchCandidate {
        broadcast_id: DEMO_BROADCAST_ID.to_string(),
        offset_seconds: 860.0,
        confidence: DEMO_FALLBACK_CONFIDENCE,
        live: true,
    }
}

pub fn load_feed(path: &Path) -> Result<DemoFeed, FeedError> {
    let content = std::fs::read_to_string(path).map_err(|source| FeedError::Io {
        path: path.display().to_string(),
        source,
    })?;
    let feed: DemoFeed = serde_json::from_str(&content)?;
    info!(
        path = %path.display(),
        broadcasts = feed.broadcasts.len(),
        events = feed.events.len(),
        fingerprints = feed.fingerprints.len(),
        "Loaded demo feed"
    );
    Ok(feed)
}

/// Feed from `path`, or the built-in feed when unset or unreadable
pub fn load_feed_or_builtin(path: Option<&Path>) -> DemoFeed {
    match path {
        Some(path) => load_feed(path).unwrap_or_else(|e| {
            warn!(error = %e, "Demo feed unavailable, using built-in feed");
            builtin_demo_feed()
        }),
        None => builtin_demo_feed(),
    }
}

/// Fingerprint index over the feed's reference signatures
///
/// Seeds with an unparseable signature or a non-finite offset are skipped.
pub fn build_index(feed: &DemoFeed) -> FingerprintIndex {
    let mut index = FingerprintIndex::new();
    for seed in &feed.fingerprints {
        let signature = match seed.signature.parse::<Signature>() {
            Ok(signature) => signature,
            Err(e) => {
                warn!(broadcast_id = %seed.broadcast_id, error = %e, "Skipping malformed signature");
                continue;
            }
        };
        if !seed.offset_seconds.is_finite() || seed.offset_seconds < 0.0 {
            warn!(broadcast_id = %seed.broadcast_id, "Skipping signature with invalid offset");
            continue;
        }
        let live = seed.live.unwrap_or_else(|| {
            feed.broadcasts
                .iter()
                .any(|b| b.broadcast_id == seed.broadcast_id && b.live)
        });
        index.insert(IndexEntry {
            signature,
            broadcast_id: seed.broadcast_id.clone(),
            offset_seconds: seed.offset_seconds,
            live,
        });
    }
    info!(entries = index.len(), "Fingerprint index built");
    index
}

pub fn ingest_events(cache: &EventCache, events: impl IntoIterator<Item = PlayEvent>) -> IngestSummary {
    let mut summary = IngestSummary::default();
    for event in events {
        summary.count(cache.upsert(event));
    }
    summary
}

/// Register the feed's broadcasts and ingest all of its events at once
pub fn seed_cache(cache: &EventCache, feed: DemoFeed) -> IngestSummary {
    for info in feed.broadcasts {
        cache.register_broadcast(info);
    }
    let summary = ingest_events(cache, feed.events);
    info!(
        inserted = summary.inserted,
        duplicates = summary.duplicates,
        expired = summary.expired,
        "Event cache seeded"
    );
    summary
}

/// Streams feed events into the cache one per tick
pub struct FeedReplayer {
    cache: Arc<EventCache>,
    feed: DemoFeed,
    interval: Duration,
}

impl FeedReplayer {
    pub fn new(cache: Arc<EventCache>, feed: DemoFeed, interval: Duration) -> Self {
        Self {
            cache,
            feed,
            interval,
        }
    }

    /// Replay until the feed is exhausted or `cancel` fires
    pub async fn run(self, cancel: CancellationToken) -> IngestSummary {
        for info in self.feed.broadcasts {
            self.cache.register_broadcast(info);
        }

        let mut events = self.feed.events;
        events.sort_by(|a, b| a.timestamp_seconds.total_cmp(&b.timestamp_seconds));
        let total = events.len();
        info!(events = total, interval_ms = self.interval.as_millis() as u64, "Starting feed replay");

        let mut tick = interval(self.interval);
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut summary = IngestSummary::default();

        for event in events {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    info!(replayed = summary.inserted, total, "Feed replay cancelled");
                    return summary;
                }
                _ = tick.tick() => {}
            }
            debug!(key = %event.key(), "Replaying event");
            summary.count(self.cache.upsert(event));
        }

        info!(inserted = summary.inserted, "Feed replay completed");
        summary
    }
}
