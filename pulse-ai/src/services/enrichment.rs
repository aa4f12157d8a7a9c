//! Enrichment Engine
//!
//! Augments a play event with game context, season aggregates, ranking and
//! recent form. Each category runs as its own task; all of them share the
//! stage deadline. Whatever has not finished at the deadline is aborted and
//! listed in `EnrichedEvent::missing`. Enrichment never fails a run.

use crate::services::context_source::{ContextSource, EnrichmentError};
use crate::services::event_cache::EventCache;
use crate::types::{
    BroadcastInfo, ContextCategory, EnrichedEvent, GameContext, GamePhase, Momentum, PlayEvent,
    Ranking, RecentForm, SeasonAggregates,
};
use std::sync::Arc;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tracing::{debug, warn};

/// Look-back window for scoring runs
pub const RECENT_FORM_WINDOW_SECONDS: f64 = 900.0;

const SCORING_EVENTS: &[&str] = &[
    "touchdown",
    "field_goal",
    "safety",
    "three_pointer",
    "two_pointer",
    "free_throw",
    "goal",
];

/// Clock value used when the event carries none or it does not parse
const DEFAULT_CLOCK_SECONDS: u32 = 900;

enum CategoryValue {
    Game(Option<GameContext>),
    Season(Option<SeasonAggregates>),
    Ranking(Option<Ranking>),
    Form(Option<RecentForm>),
}

pub struct EnrichmentEngine {
    cache: Arc<EventCache>,
    source: Arc<dyn ContextSource>,
}

impl EnrichmentEngine {
    pub fn new(cache: Arc<EventCache>, source: Arc<dyn ContextSource>) -> Self {
        Self { cache, source }
    }

    /// Attach every category that completes before `deadline`
    pub async fn enrich(&self, event: PlayEvent, deadline: Instant) -> EnrichedEvent {
        let info = self.cache.broadcast(&event.broadcast_id);
        let opponent = opponent_for(&event, info.as_ref());

        let mut tasks: JoinSet<(ContextCategory, Result<CategoryValue, EnrichmentError>)> =
            JoinSet::new();

        {
            let event = event.clone();
            let info = info.clone();
            tasks.spawn(async move {
                let result = build_game_context(&event, info.as_ref()).map(|c| CategoryValue::Game(Some(c)));
                (ContextCategory::GameContext, result)
            });
        }
        {
            let source = Arc::clone(&self.source);
            let (team, event_type) = (event.team_ref.clone(), event.event_type.clone());
            tasks.spawn(async move {
                let result = source
                    .season_aggregates(&team, &event_type)
                    .await
                    .map(CategoryValue::Season);
                (ContextCategory::SeasonAggregates, result)
            });
        }
        {
            let source = Arc::clone(&self.source);
            let (team, event_type) = (event.team_ref.clone(), event.event_type.clone());
            tasks.spawn(async move {
                let result = source.ranking(&team, &event_type).await.map(CategoryValue::Ranking);
                (ContextCategory::Ranking, result)
            });
        }
        {
            let cache = Arc::clone(&self.cache);
            let event = event.clone();
            tasks.spawn(async move {
                let result = Ok(CategoryValue::Form(recent_form(&cache, &event)));
                (ContextCategory::RecentForm, result)
            });
        }

        let mut enriched = EnrichedEvent::bare(event);
        enriched.opponent = opponent;

        loop {
            match tokio::time::timeout_at(deadline, tasks.join_next()).await {
                Ok(Some(Ok((category, Ok(value))))) => {
                    enriched.missing.remove(&category);
                    match value {
                        CategoryValue::Game(v) => enriched.game_context = v,
                        CategoryValue::Season(v) => enriched.season = v,
                        CategoryValue::Ranking(v) => enriched.ranking = v,
                        CategoryValue::Form(v) => enriched.recent_form = v,
                    }
                }
                Ok(Some(Ok((category, Err(e))))) => {
                    debug!(%category, error = %e, "Enrichment category unavailable");
                }
                Ok(Some(Err(join_err))) => {
                    warn!(error = %join_err, "Enrichment task failed");
                }
                Ok(None) => break,
                Err(_) => {
                    tasks.abort_all();
                    warn!(
                        missing = ?enriched.missing,
                        "Enrichment deadline reached, continuing with partial context"
                    );
                    break;
                }
            }
        }

        enriched.situation = describe_situation(&enriched);
        enriched
    }
}

/// Opponent from the registry, falling back to the `league_season_aaa_bbb_n`
/// broadcast id convention
pub fn opponent_for(event: &PlayEvent, info: Option<&BroadcastInfo>) -> Option<String> {
    if let Some(info) = info {
        return info.opponent_of(&event.team_ref).map(str::to_string);
    }

    let parts: Vec<&str> = event.broadcast_id.split('_').collect();
    if parts.len() < 4 {
        return None;
    }
    let (first, second) = (parts[2].to_uppercase(), parts[3].to_uppercase());
    let team = event.team_ref.to_uppercase();
    if team.contains(&first) {
        Some(second)
    } else if team.contains(&second) {
        Some(first)
    } else {
        None
    }
}

fn league_of(event: &PlayEvent, info: Option<&BroadcastInfo>) -> String {
    match info {
        Some(info) => info.league.to_uppercase(),
        None => event
            .broadcast_id
            .split('_')
            .next()
            .unwrap_or_default()
            .to_uppercase(),
    }
}

/// Number of regulation periods for a league
pub fn final_period(league: &str) -> u32 {
    match league {
        "NHL" => 3,
        "MLS" | "EPL" | "SOCCER" => 2,
        _ => 4,
    }
}

/// "M:SS" → seconds
pub fn parse_clock(clock: &str) -> Option<u32> {
    let (mins, secs) = clock.trim().split_once(':')?;
    let mins: u32 = mins.parse().ok()?;
    let secs: u32 = secs.parse().ok()?;
    (secs < 60).then_some(mins * 60 + secs)
}

pub fn classify_phase(period: u32, final_period: u32, clock_seconds: u32, diff: i64) -> GamePhase {
    if period >= final_period && clock_seconds < 120 && diff <= 7 {
        GamePhase::ClutchTime
    } else if diff > 21 {
        GamePhase::Blowout
    } else if diff <= 7 {
        GamePhase::CloseGame
    } else if period == 1 {
        GamePhase::Opening
    } else {
        GamePhase::Competitive
    }
}

/// Momentum from the feed's situation hint, oriented by the score
pub fn classify_momentum(situation_hint: &str, score_home: i64, score_away: i64) -> Momentum {
    let hint = situation_hint.to_lowercase();
    if hint.contains("comeback") || hint.contains("trailing") {
        return Momentum::Comeback;
    }
    if hint.contains("leading") || hint.contains("surge") {
        if score_home > score_away {
            return Momentum::HomeSurge;
        }
        if score_away > score_home {
            return Momentum::AwaySurge;
        }
    }
    if hint.contains("winning_drive") || hint.contains("game_winning") {
        return Momentum::Comeback;
    }
    Momentum::Neutral
}

fn build_game_context(
    event: &PlayEvent,
    info: Option<&BroadcastInfo>,
) -> Result<GameContext, EnrichmentError> {
    let score_home = event
        .stat_i64("score_home")
        .ok_or(EnrichmentError::MissingStat("score_home"))?;
    let score_away = event
        .stat_i64("score_away")
        .ok_or(EnrichmentError::MissingStat("score_away"))?;

    let (home_team, away_team) = match info {
        Some(info) => (info.home_team.clone(), info.away_team.clone()),
        None => {
            let parts: Vec<&str> = event.broadcast_id.split('_').collect();
            if parts.len() < 4 {
                return Err(EnrichmentError::UnknownTeams(event.broadcast_id.clone()));
            }
            (parts[2].to_uppercase(), parts[3].to_uppercase())
        }
    };

    let period = event
        .stat_i64("period")
        .or_else(|| event.stat_i64("quarter"))
        .unwrap_or(1)
        .max(1) as u32;
    let clock = event
        .stat_str("clock")
        .or_else(|| event.stat_str("time_remaining"))
        .unwrap_or_else(|| "15:00".to_string());
    let clock_seconds = parse_clock(&clock).unwrap_or(DEFAULT_CLOCK_SECONDS);
    let league = league_of(event, info);
    let final_period = final_period(&league);
    let diff = (score_home - score_away).abs();

    let hint = event.stat_str("situation").unwrap_or_default();

    Ok(GameContext {
        league,
        period,
        clock,
        clock_seconds,
        final_period,
        score_home,
        score_away,
        home_team,
        away_team,
        phase: classify_phase(period, final_period, clock_seconds, diff),
        momentum: classify_momentum(&hint, score_home, score_away),
    })
}

/// Consecutive scoring plays by the acting team ending at this event
fn recent_form(cache: &EventCache, event: &PlayEvent) -> Option<RecentForm> {
    if !SCORING_EVENTS.contains(&event.event_type.as_str()) {
        return None;
    }
    let from = (event.timestamp_seconds - RECENT_FORM_WINDOW_SECONDS).max(0.0);
    let window = cache.range(&event.broadcast_id, from, event.timestamp_seconds);

    let mut run = 1;
    let key = event.key();
    for earlier in window.iter().rev().filter(|e| e.key() != key) {
        if !SCORING_EVENTS.contains(&earlier.event_type.as_str()) {
            continue;
        }
        if earlier.team_ref.eq_ignore_ascii_case(&event.team_ref) {
            run += 1;
        } else {
            break;
        }
    }

    Some(RecentForm {
        scoring_run: run,
        window_seconds: RECENT_FORM_WINDOW_SECONDS,
    })
}

/// Largest margin a single possession can erase
fn one_possession_margin(league: &str) -> i64 {
    match league {
        "NFL" | "NCAAF" => 8,
        "NBA" | "WNBA" | "NCAAB" => 3,
        _ => 1,
    }
}

fn margin_phrase(margin: i64, league: &str) -> String {
    if margin <= one_possession_margin(league) {
        "by one possession".to_string()
    } else {
        format!("by {}", margin)
    }
}

/// Short prose descriptor from the acting team's point of view
pub fn describe_situation(enriched: &EnrichedEvent) -> Option<String> {
    let Some(ctx) = &enriched.game_context else {
        return enriched
            .event
            .stat_str("situation")
            .map(|hint| hint.replace('_', " "));
    };

    let margin = ctx.margin_for(&enriched.event.team_ref);
    let scoreboard = match margin {
        0 => "tied".to_string(),
        m if m > 0 => format!("leading {}", margin_phrase(m, &ctx.league)),
        m => format!("trailing {}", margin_phrase(-m, &ctx.league)),
    };
    let timing = match ctx.phase {
        GamePhase::ClutchTime => " late",
        GamePhase::Opening => " early",
        _ if ctx.period >= ctx.final_period => " in the final period",
        _ => "",
    };
    Some(format!("{}{}", scoreboard, timing))
}
