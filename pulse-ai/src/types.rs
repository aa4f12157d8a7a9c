//! Core types shared by the recap pipeline stages
//!
//! Data flows through the pipeline in this order:
//! `AudioSample` → `BroadcastMatch` → `PlayEvent` → `EnrichedEvent`
//! → `NarrativeScript` → `AudioClip`.
//!
//! Only `PlayEvent` and `BroadcastInfo` outlive a request (inside the event
//! cache); everything else is owned by one pipeline run.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::io::Cursor;
use thiserror::Error;

// ============================================================================
// Audio input
// ============================================================================

/// Ambient audio captured by the listener
///
/// Stored as 16-bit mono PCM regardless of the upload format.
#[derive(Debug, Clone)]
pub struct AudioSample {
    pcm: Vec<i16>,
    sample_rate: u32,
}

/// Errors decoding an uploaded sample
#[derive(Debug, Error)]
pub enum AudioError {
    #[error("audio sample is empty")]
    Empty,

    #[error("invalid sample rate: {0}")]
    InvalidSampleRate(u32),

    #[error("unsupported WAV encoding: {0}")]
    UnsupportedEncoding(String),

    #[error("WAV decode error: {0}")]
    Wav(#[from] hound::Error),
}

impl AudioSample {
    pub fn from_pcm(pcm: Vec<i16>, sample_rate: u32) -> Result<Self, AudioError> {
        if sample_rate == 0 {
            return Err(AudioError::InvalidSampleRate(sample_rate));
        }
        if pcm.is_empty() {
            return Err(AudioError::Empty);
        }
        Ok(Self { pcm, sample_rate })
    }

    /// Raw 16-bit little-endian mono PCM; a trailing odd byte is ignored
    pub fn from_pcm_le_bytes(bytes: &[u8], sample_rate: u32) -> Result<Self, AudioError> {
        let pcm = bytes
            .chunks_exact(2)
            .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
            .collect();
        Self::from_pcm(pcm, sample_rate)
    }

    /// WAV container, 16-bit integer or 32-bit float, any channel count
    pub fn from_wav_bytes(bytes: &[u8]) -> Result<Self, AudioError> {
        let mut reader = hound::WavReader::new(Cursor::new(bytes))?;
        let spec = reader.spec();
        let channels = spec.channels.max(1) as usize;

        let interleaved: Vec<i16> = match (spec.sample_format, spec.bits_per_sample) {
            (hound::SampleFormat::Int, 16) => reader.samples::<i16>().collect::<Result<_, _>>()?,
            (hound::SampleFormat::Float, 32) => reader
                .samples::<f32>()
                .map(|s| s.map(|v| (v.clamp(-1.0, 1.0) * i16::MAX as f32) as i16))
                .collect::<Result<_, _>>()?,
            (format, bits) => {
                return Err(AudioError::UnsupportedEncoding(format!(
                    "{:?} at {} bits",
                    format, bits
                )))
            }
        };

        let mono = interleaved
            .chunks(channels)
            .map(|frame| {
                let sum: i32 = frame.iter().map(|&s| s as i32).sum();
                (sum / frame.len() as i32) as i16
            })
            .collect();

        Self::from_pcm(mono, spec.sample_rate)
    }

    /// Detect WAV by its RIFF header, otherwise treat the body as raw PCM
    pub fn from_upload(bytes: &[u8], declared_rate: Option<u32>) -> Result<Self, AudioError> {
        if bytes.len() >= 12 && &bytes[0..4] == b"RIFF" && &bytes[8..12] == b"WAVE" {
            Self::from_wav_bytes(bytes)
        } else {
            Self::from_pcm_le_bytes(bytes, declared_rate.unwrap_or(44_100))
        }
    }

    pub fn samples(&self) -> &[i16] {
        &self.pcm
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn duration_ms(&self) -> u64 {
        self.pcm.len() as u64 * 1000 / self.sample_rate as u64
    }

    /// Keep only the first `max_ms` of audio
    pub fn truncated(mut self, max_ms: u64) -> Self {
        let max_samples = (max_ms * self.sample_rate as u64 / 1000) as usize;
        self.pcm.truncate(max_samples.max(1));
        self
    }
}

// ============================================================================
// Recognition
// ============================================================================

/// Identified broadcast and position within its event timeline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BroadcastMatch {
    pub broadcast_id: String,
    pub offset_seconds: f64,
    /// Match confidence (0.0-1.0)
    pub confidence: f64,
}

/// Registry entry for a broadcast known to the event cache
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BroadcastInfo {
    pub broadcast_id: String,
    pub league: String,
    pub home_team: String,
    pub away_team: String,
    /// Live broadcasts win recognition ties against historical replays
    #[serde(default)]
    pub live: bool,
}

impl BroadcastInfo {
    /// The other team in this broadcast, if `team` plays in it
    pub fn opponent_of(&self, team: &str) -> Option<&str> {
        if team.eq_ignore_ascii_case(&self.home_team) {
            Some(&self.away_team)
        } else if team.eq_ignore_ascii_case(&self.away_team) {
            Some(&self.home_team)
        } else {
            None
        }
    }

    pub fn is_home(&self, team: &str) -> bool {
        team.eq_ignore_ascii_case(&self.home_team)
    }
}

// ============================================================================
// Play-by-play
// ============================================================================

/// Standardized play-by-play event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayEvent {
    pub broadcast_id: String,
    /// Seconds from broadcast start
    pub timestamp_seconds: f64,
    pub event_type: String,
    pub description: String,
    pub team_ref: String,
    #[serde(default)]
    pub player_ref: Option<String>,
    /// Provider statistics (score, clock, yards, ...)
    #[serde(default)]
    pub raw_stats: BTreeMap<String, Value>,
}

impl PlayEvent {
    pub fn key(&self) -> EventKey {
        EventKey {
            broadcast_id: self.broadcast_id.clone(),
            timestamp_ms: seconds_to_ms(self.timestamp_seconds),
            event_type: self.event_type.clone(),
        }
    }

    pub fn stat_i64(&self, name: &str) -> Option<i64> {
        match self.raw_stats.get(name)? {
            Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    pub fn stat_str(&self, name: &str) -> Option<String> {
        match self.raw_stats.get(name)? {
            Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        }
    }
}

/// Unique identity of a play event
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EventKey {
    pub broadcast_id: String,
    pub timestamp_ms: i64,
    pub event_type: String,
}

impl fmt::Display for EventKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}@{}.{:03}:{}",
            self.broadcast_id,
            self.timestamp_ms / 1000,
            self.timestamp_ms.rem_euclid(1000),
            self.event_type
        )
    }
}

/// Event timestamps are keyed at millisecond resolution
pub fn seconds_to_ms(seconds: f64) -> i64 {
    (seconds * 1000.0).round() as i64
}

// ============================================================================
// Enrichment
// ============================================================================

/// Optional context groups the enrichment engine tries to attach
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContextCategory {
    GameContext,
    SeasonAggregates,
    Ranking,
    RecentForm,
}

impl ContextCategory {
    pub const ALL: [ContextCategory; 4] = [
        Self::GameContext,
        Self::SeasonAggregates,
        Self::Ranking,
        Self::RecentForm,
    ];
}

impl fmt::Display for ContextCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::GameContext => "game_context",
            Self::SeasonAggregates => "season_aggregates",
            Self::Ranking => "ranking",
            Self::RecentForm => "recent_form",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GamePhase {
    Opening,
    Competitive,
    CloseGame,
    ClutchTime,
    Blowout,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Momentum {
    HomeSurge,
    AwaySurge,
    Comeback,
    Neutral,
}

/// Score and clock state at the moment of the event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GameContext {
    /// Upper-case league code ("NFL")
    pub league: String,
    pub period: u32,
    /// Clock as displayed ("5:23")
    pub clock: String,
    pub clock_seconds: u32,
    pub final_period: u32,
    pub score_home: i64,
    pub score_away: i64,
    pub home_team: String,
    pub away_team: String,
    pub phase: GamePhase,
    pub momentum: Momentum,
}

impl GameContext {
    pub fn score_differential(&self) -> i64 {
        (self.score_home - self.score_away).abs()
    }

    /// Team score minus opponent score, from `team`'s point of view
    pub fn margin_for(&self, team: &str) -> i64 {
        if team.eq_ignore_ascii_case(&self.home_team) {
            self.score_home - self.score_away
        } else {
            self.score_away - self.score_home
        }
    }
}

/// Season totals for the acting team in the event's stat category
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeasonAggregates {
    pub games_played: u32,
    /// Season total for the event's stat category
    pub total: u32,
    pub per_game: f64,
}

/// League standing for the acting team in the event's stat category
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ranking {
    pub rank: u32,
    pub of_teams: u32,
    pub percentile: f64,
    pub category: String,
}

/// Recent scoring pattern derived from the cached timeline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecentForm {
    /// Consecutive scoring plays by the acting team, including this one
    pub scoring_run: u32,
    pub window_seconds: f64,
}

/// Play event plus everything the narrative needs, recomputed per request
#[derive(Debug, Clone, Serialize)]
pub struct EnrichedEvent {
    pub event: PlayEvent,
    pub opponent: Option<String>,
    pub game_context: Option<GameContext>,
    /// Short situational descriptor ("trailing by one possession late")
    pub situation: Option<String>,
    pub season: Option<SeasonAggregates>,
    pub ranking: Option<Ranking>,
    pub recent_form: Option<RecentForm>,
    /// Categories that could not be attached within budget
    pub missing: BTreeSet<ContextCategory>,
}

impl EnrichedEvent {
    /// Base event only, every optional category flagged missing
    pub fn bare(event: PlayEvent) -> Self {
        Self {
            event,
            opponent: None,
            game_context: None,
            situation: None,
            season: None,
            ranking: None,
            recent_form: None,
            missing: ContextCategory::ALL.into_iter().collect(),
        }
    }
}

// ============================================================================
// Narrative and voice
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GenerationPhase {
    Template,
    Enhanced,
}

impl GenerationPhase {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Template => "template",
            Self::Enhanced => "enhanced",
        }
    }
}

/// Broadcast-style recap text
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NarrativeScript {
    pub text: String,
    pub source_event_key: String,
    pub generation_phase: GenerationPhase,
}

/// Synthesized recap audio
#[derive(Debug, Clone, PartialEq)]
pub struct AudioClip {
    pub bytes: Vec<u8>,
    pub mime_type: String,
    pub duration_ms: u64,
    pub sample_rate: u32,
}
