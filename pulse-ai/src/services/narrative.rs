//! Narrative Generator
//!
//! Two phases:
//! 1. `templatize`: deterministic template fill from the enriched event.
//!    Never fails; every sentence after the play itself is included only
//!    when its data is present.
//! 2. Enhancement: optional rewrite by an `Enhancer`, kept only if it
//!    finishes inside the stage budget and passes the fidelity check.

use crate::services::enhancer::Enhancer;
use crate::services::fidelity;
use crate::types::{EnrichedEvent, GameContext, GenerationPhase, NarrativeScript};
use crate::workflow::outcome::Degradation;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

/// English ordinal ("1st", "22nd", "13th")
pub fn ordinal(n: u32) -> String {
    let suffix = match (n % 10, n % 100) {
        (_, 11..=13) => "th",
        (1, _) => "st",
        (2, _) => "nd",
        (3, _) => "rd",
        _ => "th",
    };
    format!("{}{}", n, suffix)
}

fn period_name(final_period: u32) -> &'static str {
    match final_period {
        2 => "half",
        3 => "period",
        _ => "quarter",
    }
}

/// "touchdown" → "touchdowns", "pass_completion" → "pass completions"
fn stat_label(event_type: &str) -> String {
    format!("{}s", event_type.replace('_', " "))
}

fn intro_sentence(ctx: &GameContext) -> String {
    format!(
        "In the {} {}, {} remaining.",
        ordinal(ctx.period),
        period_name(ctx.final_period),
        ctx.clock
    )
}

fn score_sentence(ctx: &GameContext) -> String {
    let closeness = match ctx.score_differential() {
        0 => ", all tied up",
        1..=3 => ", a one-score game",
        4..=7 => ", still a close contest",
        _ => "",
    };
    format!(
        "The score is now {} {}, {} {}{}.",
        ctx.home_team, ctx.score_home, ctx.away_team, ctx.score_away, closeness
    )
}

/// Sentence describing the play itself
fn play_sentence(enriched: &EnrichedEvent) -> String {
    let event = &enriched.event;
    let team = &event.team_ref;
    let player = event.player_ref.as_deref().unwrap_or(team);
    let yards = event.stat_i64("yards").filter(|y| *y > 0);

    match event.event_type.as_str() {
        "touchdown" => match yards {
            Some(y) => format!("{} punches in a {}-yard touchdown for the {}!", player, y, team),
            None => format!("{} finds the end zone for the {}!", player, team),
        },
        "field_goal" => match yards {
            Some(y) => format!("{} splits the uprights from {} yards out for the {}!", player, y, team),
            None => format!("{} splits the uprights for the {}!", player, team),
        },
        "interception" => match &enriched.opponent {
            Some(opponent) => format!("{} picks off the {} for the {} defense!", player, opponent, team),
            None => format!("{} picks it off for the {} defense!", player, team),
        },
        "sack" => match yards {
            Some(y) => format!("{} brings down the quarterback for a {}-yard loss!", player, y),
            None => format!("{} brings down the quarterback!", player),
        },
        "pass_completion" => match yards {
            Some(y) => format!("{} connects on a {}-yard pass for the {}!", player, y, team),
            None => format!("{} connects on a key pass for the {}!", player, team),
        },
        "three_pointer" => format!("{} drills a three for the {}!", player, team),
        "rebound" => format!("{} crashes the glass for the {}.", player, team),
        "assist" => format!("{} sets up the bucket with a sharp assist for the {}.", player, team),
        "goal" => format!("{} finds the back of the net for the {}!", player, team),
        _ => format!("{} — {}", team, event.description),
    }
}

/// Deterministic template narrative
pub fn templatize(enriched: &EnrichedEvent) -> NarrativeScript {
    let event = &enriched.event;
    let team = &event.team_ref;
    let mut sentences = Vec::new();

    if let Some(ctx) = &enriched.game_context {
        sentences.push(intro_sentence(ctx));
    }

    sentences.push(play_sentence(enriched));

    if let Some(ctx) = &enriched.game_context {
        sentences.push(score_sentence(ctx));
    }

    if let Some(situation) = &enriched.situation {
        sentences.push(format!("The {} are {}.", team, situation));
    }

    if let Some(form) = &enriched.recent_form {
        if form.scoring_run >= 2 {
            sentences.push(format!(
                "That's {} straight scores for the {}.",
                form.scoring_run, team
            ));
        }
    }

    if let Some(ranking) = &enriched.ranking {
        sentences.push(format!(
            "The {} rank {} of {} in {} this season.",
            team,
            ordinal(ranking.rank),
            ranking.of_teams,
            ranking.category
        ));
    }

    if let Some(season) = &enriched.season {
        sentences.push(format!(
            "They have {} {} through {} games.",
            season.total,
            stat_label(&event.event_type),
            season.games_played
        ));
    }

    NarrativeScript {
        text: sentences.join(" "),
        source_event_key: event.key().to_string(),
        generation_phase: GenerationPhase::Template,
    }
}

/// Script plus the degradation recorded while producing it, if any
#[derive(Debug, Clone)]
pub struct GenerationResult {
    pub script: NarrativeScript,
    pub degradation: Option<Degradation>,
}

pub struct NarrativeGenerator {
    enhancer: Arc<dyn Enhancer>,
    min_enhancement_budget: Duration,
}

impl NarrativeGenerator {
    pub fn new(enhancer: Arc<dyn Enhancer>, min_enhancement_budget_ms: u64) -> Self {
        Self {
            enhancer,
            min_enhancement_budget: Duration::from_millis(min_enhancement_budget_ms),
        }
    }

    /// Template, then enhancement if the remaining stage budget allows
    ///
    /// Always returns a script; every enhancement failure falls back to the
    /// template.
    pub async fn generate(&self, enriched: &EnrichedEvent, deadline: Instant) -> GenerationResult {
        let template = templatize(enriched);

        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining <= self.min_enhancement_budget {
            debug!(
                remaining_ms = remaining.as_millis() as u64,
                "Skipping enhancement, budget too small"
            );
            return GenerationResult {
                script: template,
                degradation: Some(Degradation::EnhancementSkipped {
                    remaining_ms: remaining.as_millis() as u64,
                }),
            };
        }

        let attempt = tokio::time::timeout_at(deadline, self.enhancer.enhance(&template.text)).await;
        let degradation = match attempt {
            Err(_) => {
                warn!(
                    enhancer = self.enhancer.name(),
                    budget_ms = remaining.as_millis() as u64,
                    "Enhancement timed out, using template"
                );
                Degradation::GenerationTimeout {
                    budget_ms: remaining.as_millis() as u64,
                }
            }
            Ok(Err(e)) => {
                warn!(enhancer = self.enhancer.name(), error = %e, "Enhancement failed, using template");
                Degradation::EnhancementFailed {
                    reason: e.to_string(),
                }
            }
            Ok(Ok(enhanced)) => {
                let report = fidelity::verify(&template.text, &enhanced);
                if report.is_faithful() {
                    return GenerationResult {
                        script: NarrativeScript {
                            text: enhanced,
                            source_event_key: template.source_event_key,
                            generation_phase: GenerationPhase::Enhanced,
                        },
                        degradation: None,
                    };
                }
                warn!(
                    dropped = ?report.dropped,
                    invented = ?report.invented,
                    "Enhancement changed facts, using template"
                );
                Degradation::FidelityMismatch {
                    dropped: report.dropped.into_iter().collect(),
                    invented: report.invented.into_iter().collect(),
                }
            }
        };

        GenerationResult {
            script: template,
            degradation: Some(degradation),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::enhancer::{connective_rewrite, EnhanceError, MockEnhancer};
    use crate::types::{
        ContextCategory, GamePhase, Momentum, PlayEvent, Ranking, RecentForm, SeasonAggregates,
    };
    use async_trait::async_trait;
    use serde_json::json;
    use std::collections::BTreeMap;

    fn touchdown() -> PlayEvent {
        let raw_stats: BTreeMap<String, serde_json::Value> =
            serde_json::from_value(json!({"yards": 15, "value": 6})).unwrap();
        PlayEvent {
            broadcast_id: "nfl_2024_sea_hou_001".into(),
            timestamp_seconds: 425.0,
            event_type: "touchdown".into(),
            description: "Kenneth Walker III rushes for 15-yard touchdown".into(),
            team_ref: "Seahawks".into(),
            player_ref: Some("Kenneth Walker III".into()),
            raw_stats,
        }
    }

    fn full_enrichment() -> EnrichedEvent {
        let mut enriched = EnrichedEvent::bare(touchdown());
        enriched.opponent = Some("Texans".into());
        enriched.game_context = Some(GameContext {
            league: "NFL".into(),
            period: 2,
            clock: "5:23".into(),
            clock_seconds: 323,
            final_period: 4,
            score_home: 21,
            score_away: 17,
            home_team: "Seahawks".into(),
            away_team: "Texans".into(),
            phase: GamePhase::CloseGame,
            momentum: Momentum::Comeback,
        });
        enriched.situation = Some("leading by one possession".into());
        enriched.ranking = Some(Ranking {
            rank: 2,
            of_teams: 32,
            percentile: 0.97,
            category: "touchdowns".into(),
        });
        enriched.season = Some(SeasonAggregates {
            games_played: 12,
            total: 37,
            per_game: 3.1,
        });
        enriched.recent_form = Some(RecentForm {
            scoring_run: 2,
            window_seconds: 900.0,
        });
        enriched.missing.clear();
        enriched
    }

    #[test]
    fn test_ordinals() {
        let rendered: Vec<String> = [1, 2, 3, 4, 11, 12, 13, 21, 22, 101].iter().map(|&n| ordinal(n)).collect();
        assert_eq!(
            rendered,
            vec!["1st", "2nd", "3rd", "4th", "11th", "12th", "13th", "21st", "22nd", "101st"]
        );
    }

    #[test]
    fn test_full_template() {
        let script = templatize(&full_enrichment());
        assert_eq!(
            script.text,
            "In the 2nd quarter, 5:23 remaining. \
             Kenneth Walker III punches in a 15-yard touchdown for the Seahawks! \
             The score is now Seahawks 21, Texans 17, still a close contest. \
             The Seahawks are leading by one possession. \
             That's 2 straight scores for the Seahawks. \
             The Seahawks rank 2nd of 32 in touchdowns this season. \
             They have 37 touchdowns through 12 games."
        );
        assert_eq!(script.generation_phase, GenerationPhase::Template);
        assert_eq!(script.source_event_key, "nfl_2024_sea_hou_001@425.000:touchdown");
    }

    #[test]
    fn test_bare_template_omits_optional_sentences() {
        let script = templatize(&EnrichedEvent::bare(touchdown()));
        assert_eq!(
            script.text,
            "Kenneth Walker III punches in a 15-yard touchdown for the Seahawks!"
        );
    }

    #[test]
    fn test_unknown_event_type_uses_description() {
        let mut event = touchdown();
        event.event_type = "penalty".into();
        event.description = "Holding, offense, 10 yards".into();
        let script = templatize(&EnrichedEvent::bare(event));
        assert_eq!(script.text, "Seahawks — Holding, offense, 10 yards");
    }

    #[test]
    fn test_template_is_total_over_event_types() {
        for event_type in [
            "touchdown", "field_goal", "interception", "sack", "pass_completion",
            "three_pointer", "rebound", "assist", "goal", "", "weird type",
        ] {
            let mut event = touchdown();
            event.event_type = event_type.into();
            event.player_ref = None;
            event.raw_stats.clear();
            let mut enriched = full_enrichment();
            enriched.event = event;
            enriched.missing.insert(ContextCategory::Ranking);
            assert!(!templatize(&enriched).text.is_empty());
        }
    }

    #[test]
    fn test_connective_rewrite_faithful_for_every_template_shape() {
        let event_types = [
            "touchdown", "field_goal", "interception", "sack", "pass_completion",
            "three_pointer", "rebound", "assist", "goal", "penalty",
        ];
        let full = full_enrichment();

        for event_type in event_types {
            for with_yards in [true, false] {
                // Each bit toggles one optional part of the enrichment
                for mask in 0u32..64 {
                    let mut enriched = EnrichedEvent::bare(touchdown());
                    enriched.event.event_type = event_type.into();
                    enriched.event.description = "Holding on Tariq Woolen, 10 yards.".into();
                    if !with_yards {
                        enriched.event.raw_stats.remove("yards");
                    }
                    if mask & 1 != 0 {
                        enriched.opponent = full.opponent.clone();
                    }
                    if mask & 2 != 0 {
                        enriched.game_context = full.game_context.clone();
                    }
                    if mask & 4 != 0 {
                        enriched.situation = full.situation.clone();
                    }
                    if mask & 8 != 0 {
                        enriched.recent_form = full.recent_form.clone();
                    }
                    if mask & 16 != 0 {
                        enriched.ranking = full.ranking.clone();
                    }
                    if mask & 32 != 0 {
                        enriched.season = full.season.clone();
                    }

                    let template = templatize(&enriched);
                    let enhanced = connective_rewrite(&template.text);
                    let report = fidelity::verify(&template.text, &enhanced);
                    assert!(
                        report.is_faithful(),
                        "{} (mask {:#08b}, yards {}): {:?}\n{}\n{}",
                        event_type,
                        mask,
                        with_yards,
                        report,
                        template.text,
                        enhanced
                    );
                }
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_mock_enhancement_accepted() {
        let generator = NarrativeGenerator::new(Arc::new(MockEnhancer::new()), 150);
        let result = generator
            .generate(&full_enrichment(), Instant::now() + Duration::from_millis(450))
            .await;
        assert_eq!(result.script.generation_phase, GenerationPhase::Enhanced);
        assert!(result.script.text.starts_with("And there it is!"));
        assert!(result.degradation.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_small_budget_skips_enhancement() {
        let generator = NarrativeGenerator::new(Arc::new(MockEnhancer::new()), 150);
        let result = generator
            .generate(&full_enrichment(), Instant::now() + Duration::from_millis(100))
            .await;
        assert_eq!(result.script.generation_phase, GenerationPhase::Template);
        assert!(matches!(
            result.degradation,
            Some(Degradation::EnhancementSkipped { .. })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_enhancer_times_out_to_template() {
        let slow = MockEnhancer::with_latency(Duration::from_secs(2));
        let generator = NarrativeGenerator::new(Arc::new(slow), 150);
        let started = Instant::now();
        let result = generator
            .generate(&full_enrichment(), started + Duration::from_millis(300))
            .await;
        assert!(Instant::now() - started <= Duration::from_millis(301));
        assert_eq!(result.script, templatize(&full_enrichment()));
        assert!(matches!(
            result.degradation,
            Some(Degradation::GenerationTimeout { .. })
        ));
    }

    struct InventingEnhancer;

    #[async_trait]
    impl Enhancer for InventingEnhancer {
        fn name(&self) -> &'static str {
            "inventing"
        }

        async fn enhance(&self, text: &str) -> Result<String, EnhanceError> {
            Ok(text.replace("21", "28"))
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_unfaithful_enhancement_rejected() {
        let generator = NarrativeGenerator::new(Arc::new(InventingEnhancer), 150);
        let result = generator
            .generate(&full_enrichment(), Instant::now() + Duration::from_millis(450))
            .await;
        assert_eq!(result.script.generation_phase, GenerationPhase::Template);
        assert!(matches!(
            result.degradation,
            Some(Degradation::FidelityMismatch { .. })
        ));
    }
}
