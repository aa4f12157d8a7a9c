//! Season and ranking context providers
//!
//! The enrichment engine asks a `ContextSource` for the acting team's season
//! totals and league standing in the event's stat category. The static source
//! serves a fixed table for demos; a stats-database source would implement
//! the same trait.

use crate::types::{Ranking, SeasonAggregates};
use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

/// Fixed latency of the static source
pub const STATIC_SOURCE_LATENCY: Duration = Duration::from_millis(5);

#[derive(Debug, Error)]
pub enum EnrichmentError {
    #[error("event has no {0} statistic")]
    MissingStat(&'static str),

    #[error("teams unknown for broadcast {0}")]
    UnknownTeams(String),

    #[error("context source error: {0}")]
    Source(String),
}

/// Capability: season-level context for a team and stat category
#[async_trait]
pub trait ContextSource: Send + Sync {
    fn name(&self) -> &'static str;

    /// `Ok(None)` when the category has no tracked statistic
    async fn season_aggregates(
        &self,
        team: &str,
        event_type: &str,
    ) -> Result<Option<SeasonAggregates>, EnrichmentError>;

    async fn ranking(&self, team: &str, event_type: &str) -> Result<Option<Ranking>, EnrichmentError>;
}

/// Per-category demo statistics
struct CategoryStats {
    event_type: &'static str,
    category: &'static str,
    rank: u32,
    of_teams: u32,
    games_played: u32,
    per_game: f64,
}

const CATEGORY_TABLE: &[CategoryStats] = &[
    CategoryStats { event_type: "touchdown", category: "touchdowns", rank: 2, of_teams: 32, games_played: 12, per_game: 3.1 },
    CategoryStats { event_type: "field_goal", category: "field goals", rank: 4, of_teams: 32, games_played: 12, per_game: 1.8 },
    CategoryStats { event_type: "interception", category: "takeaways", rank: 1, of_teams: 32, games_played: 12, per_game: 1.5 },
    CategoryStats { event_type: "sack", category: "sacks", rank: 3, of_teams: 32, games_played: 12, per_game: 3.4 },
    CategoryStats { event_type: "pass_completion", category: "passing yards", rank: 5, of_teams: 32, games_played: 12, per_game: 21.5 },
    CategoryStats { event_type: "three_pointer", category: "three-pointers", rank: 7, of_teams: 30, games_played: 25, per_game: 14.2 },
    CategoryStats { event_type: "rebound", category: "rebounds", rank: 3, of_teams: 30, games_played: 25, per_game: 47.8 },
    CategoryStats { event_type: "assist", category: "assists", rank: 5, of_teams: 30, games_played: 25, per_game: 27.3 },
];

fn lookup_category(event_type: &str) -> Option<&'static CategoryStats> {
    CATEGORY_TABLE.iter().find(|c| c.event_type == event_type)
}

/// Fixed-table context source
///
/// Every team shares the same table; unknown event types have no context.
pub struct StaticContextSource {
    latency: Duration,
}

impl StaticContextSource {
    pub fn new() -> Self {
        Self {
            latency: STATIC_SOURCE_LATENCY,
        }
    }

    pub fn with_latency(latency: Duration) -> Self {
        Self { latency }
    }
}

impl Default for StaticContextSource {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ContextSource for StaticContextSource {
    fn name(&self) -> &'static str {
        "static"
    }

    async fn season_aggregates(
        &self,
        _team: &str,
        event_type: &str,
    ) -> Result<Option<SeasonAggregates>, EnrichmentError> {
        tokio::time::sleep(self.latency).await;
        Ok(lookup_category(event_type).map(|c| SeasonAggregates {
            games_played: c.games_played,
            total: (c.per_game * c.games_played as f64).round() as u32,
            per_game: c.per_game,
        }))
    }

    async fn ranking(&self, _team: &str, event_type: &str) -> Result<Option<Ranking>, EnrichmentError> {
        tokio::time::sleep(self.latency).await;
        Ok(lookup_category(event_type).map(|c| Ranking {
            rank: c.rank,
            of_teams: c.of_teams,
            percentile: 1.0 - (c.rank - 1) as f64 / c.of_teams as f64,
            category: c.category.to_string(),
        }))
    }
}
