//! Configuration loading and resolution
//!
//! Settings are resolved in priority order:
//! 1. Command-line argument (config file path)
//! 2. Environment variables (`PULSE_CONFIG`, provider credentials)
//! 3. TOML config file
//! 4. Compiled defaults
//!
//! A missing config file is never fatal: the service starts on compiled
//! defaults, with every external provider replaced by its mock.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Environment variable naming an explicit config file
pub const CONFIG_PATH_ENV: &str = "PULSE_CONFIG";

const DEFAULT_ENHANCER_ENDPOINT: &str = "https://api.openai.com/v1";
const DEFAULT_ENHANCER_MODEL: &str = "gpt-4o-mini";

/// Complete recap service configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RecapConfig {
    /// End-to-end budget for one pipeline run
    pub global_deadline_ms: u64,
    /// Relative share of the remaining budget granted to each stage
    pub stage_weights: StageWeights,
    /// Enhancement is skipped when less than this remains in the generate stage
    pub min_enhancement_budget_ms: u64,
    /// Matches below this confidence are treated as "no match"
    pub confidence_threshold: f64,
    /// Candidates closer than this in confidence are ranked live-first
    pub live_epsilon: f64,
    /// Events older than (newest - horizon) are evicted on the next write
    pub rewind_horizon_seconds: f64,
    /// Shorter samples are rejected as insufficient audio
    pub min_sample_ms: u64,
    /// Longer samples are truncated before matching
    pub max_sample_ms: u64,
    /// Fixed output format for every synthesized clip
    pub audio_format: AudioFormat,
    pub providers: ProviderConfig,
    pub server: ServerConfig,
    pub logging: LoggingConfig,
    /// Optional JSON play-by-play file loaded into the cache at startup
    pub demo_feed_path: Option<PathBuf>,
    /// When set, feed events are replayed one per interval instead of loaded at once
    pub feed_replay_interval_ms: Option<u64>,
    /// Number of recent runs summarized by the metrics endpoint
    pub metrics_window: usize,
}

impl Default for RecapConfig {
    fn default() -> Self {
        Self {
            global_deadline_ms: 1000,
            stage_weights: StageWeights::default(),
            min_enhancement_budget_ms: 150,
            confidence_threshold: 0.6,
            live_epsilon: 0.02,
            rewind_horizon_seconds: 14_400.0,
            min_sample_ms: 1000,
            max_sample_ms: 10_000,
            audio_format: AudioFormat::default(),
            providers: ProviderConfig::default(),
            server: ServerConfig::default(),
            logging: LoggingConfig::default(),
            demo_feed_path: None,
            feed_replay_interval_ms: None,
            metrics_window: 100,
        }
    }
}

/// Stage weights, re-normalized at run time over the stages still to run
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StageWeights {
    #[serde(rename = "match")]
    pub matching: f64,
    pub retrieve: f64,
    pub generate: f64,
    pub synthesize: f64,
}

impl Default for StageWeights {
    fn default() -> Self {
        Self {
            matching: 0.20,
            retrieve: 0.10,
            generate: 0.45,
            synthesize: 0.25,
        }
    }
}

impl StageWeights {
    pub fn total(&self) -> f64 {
        self.matching + self.retrieve + self.generate + self.synthesize
    }

    fn as_array(&self) -> [(&'static str, f64); 4] {
        [
            ("match", self.matching),
            ("retrieve", self.retrieve),
            ("generate", self.generate),
            ("synthesize", self.synthesize),
        ]
    }
}

/// Output audio format shared by all synthesized clips
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioFormat {
    pub mime_type: String,
    pub sample_rate: u32,
    pub channels: u16,
}

impl Default for AudioFormat {
    fn default() -> Self {
        Self {
            mime_type: "audio/wav".to_string(),
            sample_rate: 44_100,
            channels: 1,
        }
    }
}

/// External provider settings; a provider without credentials runs as a mock
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    pub fingerprint: ProviderEndpoint,
    pub enhancer: ProviderEndpoint,
    pub voice: ProviderEndpoint,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderEndpoint {
    pub endpoint: Option<String>,
    pub api_key: Option<String>,
    /// Model name (enhancer only)
    pub model: Option<String>,
    /// Voice identifier (voice only)
    pub voice_id: Option<String>,
}

impl ProviderEndpoint {
    /// Endpoint and key, when both are configured and non-blank
    pub fn credentials(&self) -> Option<(&str, &str)> {
        let endpoint = self.endpoint.as_deref().filter(|e| is_valid_key(e))?;
        let key = self.api_key.as_deref().filter(|k| is_valid_key(k))?;
        Some((endpoint, key))
    }
}

/// HTTP bind settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 5730,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl RecapConfig {
    /// Resolve, load, override and validate the configuration
    pub fn load(cli_path: Option<&Path>) -> Result<Self> {
        let mut config = match resolve_config_path(cli_path) {
            Some(path) if path.exists() => {
                info!("Loading configuration from {}", path.display());
                Self::from_toml_file(&path)?
            }
            Some(path) if cli_path.is_some() => {
                return Err(Error::Config(format!(
                    "Config file not found: {}",
                    path.display()
                )));
            }
            _ => {
                warn!("No configuration file found, using compiled defaults");
                Self::default()
            }
        };

        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Apply provider credential and port overrides from the environment
    pub fn apply_env_overrides(&mut self) {
        override_from_env(&mut self.providers.fingerprint.endpoint, "PULSE_FINGERPRINT_ENDPOINT");
        override_from_env(&mut self.providers.fingerprint.api_key, "PULSE_FINGERPRINT_API_KEY");
        override_from_env(&mut self.providers.enhancer.endpoint, "PULSE_ENHANCER_ENDPOINT");
        override_from_env(&mut self.providers.enhancer.api_key, "PULSE_ENHANCER_API_KEY");
        override_from_env(&mut self.providers.enhancer.model, "PULSE_ENHANCER_MODEL");
        override_from_env(&mut self.providers.voice.endpoint, "PULSE_VOICE_ENDPOINT");
        override_from_env(&mut self.providers.voice.api_key, "PULSE_VOICE_API_KEY");
        override_from_env(&mut self.providers.voice.voice_id, "PULSE_VOICE_ID");

        if let Ok(port) = std::env::var("PULSE_PORT") {
            match port.trim().parse::<u16>() {
                Ok(port) => self.server.port = port,
                Err(_) => warn!("Ignoring invalid PULSE_PORT value '{}'", port),
            }
        }

        // The enhancer speaks a well-known chat API, so a bare key is enough
        if self.providers.enhancer.api_key.as_deref().is_some_and(is_valid_key) {
            if self.providers.enhancer.endpoint.is_none() {
                self.providers.enhancer.endpoint = Some(DEFAULT_ENHANCER_ENDPOINT.to_string());
            }
            if self.providers.enhancer.model.is_none() {
                self.providers.enhancer.model = Some(DEFAULT_ENHANCER_MODEL.to_string());
            }
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.global_deadline_ms == 0 {
            return Err(Error::Config("global_deadline_ms must be positive".to_string()));
        }
        for (stage, weight) in self.stage_weights.as_array() {
            if !weight.is_finite() || weight <= 0.0 {
                return Err(Error::Config(format!(
                    "stage weight '{}' must be positive, got {}",
                    stage, weight
                )));
            }
        }
        if !(0.0..=1.0).contains(&self.confidence_threshold) {
            return Err(Error::Config(format!(
                "confidence_threshold must be within [0, 1], got {}",
                self.confidence_threshold
            )));
        }
        if !(0.0..=1.0).contains(&self.live_epsilon) {
            return Err(Error::Config(format!(
                "live_epsilon must be within [0, 1], got {}",
                self.live_epsilon
            )));
        }
        if self.min_sample_ms == 0 || self.min_sample_ms > self.max_sample_ms {
            return Err(Error::Config(format!(
                "sample window invalid: min {}ms, max {}ms",
                self.min_sample_ms, self.max_sample_ms
            )));
        }
        if !self.rewind_horizon_seconds.is_finite() || self.rewind_horizon_seconds <= 0.0 {
            return Err(Error::Config(format!(
                "rewind_horizon_seconds must be positive and finite, got {}",
                self.rewind_horizon_seconds
            )));
        }
        if self.audio_format.sample_rate == 0 || self.audio_format.channels == 0 {
            return Err(Error::Config("audio_format needs a sample rate and channel count".to_string()));
        }
        if self.metrics_window == 0 {
            return Err(Error::Config("metrics_window must be at least 1".to_string()));
        }
        if self.feed_replay_interval_ms == Some(0) {
            return Err(Error::Config("feed_replay_interval_ms must be positive".to_string()));
        }
        Ok(())
    }

    /// Nominal per-stage budget in milliseconds, assuming no stage saves time
    pub fn stage_targets_ms(&self) -> Vec<(&'static str, u64)> {
        let total = self.stage_weights.total();
        let mut remaining = self.global_deadline_ms as f64;
        let mut weight_left = total;
        self.stage_weights
            .as_array()
            .into_iter()
            .map(|(stage, weight)| {
                let share = remaining * weight / weight_left;
                remaining -= share;
                weight_left -= weight;
                (stage, share.round() as u64)
            })
            .collect()
    }
}

/// Locate the configuration file
///
/// CLI argument, then `PULSE_CONFIG`, then the per-user config directory.
pub fn resolve_config_path(cli_path: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = cli_path {
        return Some(path.to_path_buf());
    }
    if let Ok(path) = std::env::var(CONFIG_PATH_ENV) {
        if is_valid_key(&path) {
            return Some(PathBuf::from(path));
        }
    }
    default_config_path()
}

/// `~/.config/pulse/pulse-ai.toml` (or the platform equivalent)
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("pulse").join("pulse-ai.toml"))
}

/// Validate credential-like values (non-empty, non-whitespace)
pub fn is_valid_key(key: &str) -> bool {
    !key.trim().is_empty()
}

fn override_from_env(slot: &mut Option<String>, var: &str) {
    if let Ok(value) = std::env::var(var) {
        if is_valid_key(&value) {
            *slot = Some(value.trim().to_string());
        }
    }
}
