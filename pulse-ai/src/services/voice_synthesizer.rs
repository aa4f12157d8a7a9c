//! Voice Synthesizer
//!
//! Renders a narrative script as audio in the configured output format. A
//! clip in any other format is rejected; the caller never receives a partial
//! or mismatched clip.

use crate::types::{AudioClip, NarrativeScript};
use async_trait::async_trait;
use pulse_common::config::AudioFormat;
use reqwest::Client;
use serde::Serialize;
use std::io::Cursor;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;
use tracing::{debug, info};

/// Fixed latency of the local speech provider
pub const MOCK_SYNTHESIS_LATENCY: Duration = Duration::from_millis(75);

/// Spoken duration per word at roughly 150 words per minute
pub const MS_PER_WORD: u64 = 400;

#[derive(Debug, Error)]
pub enum SynthesisError {
    #[error("speech provider timed out after {0}ms")]
    Timeout(u64),

    #[error("clip format mismatch: expected {expected}, got {actual}")]
    FormatMismatch { expected: String, actual: String },

    #[error("speech provider returned an empty clip")]
    Empty,

    #[error("nothing to synthesize")]
    EmptyScript,

    #[error("speech HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("speech provider returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("WAV encoding error: {0}")]
    Wav(#[from] hound::Error),
}

/// Capability: text to audio in a requested format
#[async_trait]
pub trait SpeechProvider: Send + Sync {
    fn name(&self) -> &'static str;

    async fn synthesize(&self, text: &str, format: &AudioFormat) -> Result<AudioClip, SynthesisError>;
}

pub struct VoiceSynthesizer {
    provider: Arc<dyn SpeechProvider>,
    format: AudioFormat,
}

impl VoiceSynthesizer {
    pub fn new(provider: Arc<dyn SpeechProvider>, format: AudioFormat) -> Self {
        Self { provider, format }
    }

    /// Synthesize within `deadline`; the clip must match the configured format
    pub async fn synthesize(
        &self,
        script: &NarrativeScript,
        deadline: Instant,
    ) -> Result<AudioClip, SynthesisError> {
        if script.text.trim().is_empty() {
            return Err(SynthesisError::EmptyScript);
        }

        let budget_ms = deadline.saturating_duration_since(Instant::now()).as_millis() as u64;
        let clip = tokio::time::timeout_at(deadline, self.provider.synthesize(&script.text, &self.format))
            .await
            .map_err(|_| SynthesisError::Timeout(budget_ms))??;

        if clip.bytes.is_empty() {
            return Err(SynthesisError::Empty);
        }
        if clip.sample_rate != self.format.sample_rate {
            return Err(SynthesisError::FormatMismatch {
                expected: format!("{} Hz", self.format.sample_rate),
                actual: format!("{} Hz", clip.sample_rate),
            });
        }
        if !clip.mime_type.eq_ignore_ascii_case(&self.format.mime_type) {
            return Err(SynthesisError::FormatMismatch {
                expected: self.format.mime_type.clone(),
                actual: clip.mime_type,
            });
        }

        info!(
            provider = self.provider.name(),
            duration_ms = clip.duration_ms,
            bytes = clip.bytes.len(),
            "Voice clip synthesized"
        );
        Ok(clip)
    }
}

/// Render a placeholder voice track as 16-bit WAV
///
/// A 220 Hz tone whose loudness follows the word rhythm stands in for speech.
pub fn render_wav(duration_ms: u64, sample_rate: u32, channels: u16) -> Result<Vec<u8>, hound::Error> {
    let spec = hound::WavSpec {
        channels: channels.max(1),
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let frames = duration_ms * sample_rate as u64 / 1000;
    let samples_per_word = (MS_PER_WORD * sample_rate as u64 / 1000).max(1);

    let mut cursor = Cursor::new(Vec::with_capacity(frames as usize * 2 * spec.channels as usize + 44));
    {
        let mut writer = hound::WavWriter::new(&mut cursor, spec)?;
        for n in 0..frames {
            let t = n as f64 / sample_rate as f64;
            let word_phase = (n % samples_per_word) as f64 / samples_per_word as f64;
            let envelope = (std::f64::consts::PI * word_phase).sin();
            let value = (envelope * 0.2 * (2.0 * std::f64::consts::PI * 220.0 * t).sin() * i16::MAX as f64) as i16;
            for _ in 0..spec.channels {
                writer.write_sample(value)?;
            }
        }
        writer.finalize()?;
    }
    Ok(cursor.into_inner())
}

// ============================================================================
// Local provider
// ============================================================================

/// Placeholder renderer with fixed latency and word-count duration
///
/// The payload is always a WAV track; the clip is labelled with the requested
/// MIME type so any configured output format yields a usable clip.
pub struct MockSpeechProvider {
    latency: Duration,
    /// Overrides the requested sample rate, to exercise format checks
    forced_sample_rate: Option<u32>,
}

impl MockSpeechProvider {
    pub fn new() -> Self {
        Self {
            latency: MOCK_SYNTHESIS_LATENCY,
            forced_sample_rate: None,
        }
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn with_sample_rate(mut self, sample_rate: u32) -> Self {
        self.forced_sample_rate = Some(sample_rate);
        self
    }
}

impl Default for MockSpeechProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SpeechProvider for MockSpeechProvider {
    fn name(&self) -> &'static str {
        "mock"
    }

    async fn synthesize(&self, text: &str, format: &AudioFormat) -> Result<AudioClip, SynthesisError> {
        tokio::time::sleep(self.latency).await;

        let words = text.split_whitespace().count() as u64;
        let duration_ms = words * MS_PER_WORD;
        let sample_rate = self.forced_sample_rate.unwrap_or(format.sample_rate);
        let bytes = render_wav(duration_ms, sample_rate, format.channels)?;

        debug!(words, duration_ms, sample_rate, "Rendered mock voice clip");
        Ok(AudioClip {
            bytes,
            mime_type: format.mime_type.clone(),
            duration_ms,
            sample_rate,
        })
    }
}

// ============================================================================
// HTTP provider
// ============================================================================

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SpeechRequest<'a> {
    text: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    voice_id: Option<&'a str>,
    mime_type: &'a str,
    sample_rate: u32,
    channels: u16,
}

/// Generic HTTP text-to-speech endpoint
///
/// `POST {endpoint}` with `{text, voiceId, mimeType, sampleRate, channels}` and
/// a bearer key; the body is the audio. WAV clips are measured from their
/// header; other formats must report `X-Sample-Rate` and `X-Duration-Ms`.
pub struct HttpSpeechProvider {
    http_client: Client,
    endpoint: String,
    api_key: String,
    voice_id: Option<String>,
}

impl HttpSpeechProvider {
    pub fn new(
        endpoint: impl Into<String>,
        api_key: impl Into<String>,
        voice_id: Option<String>,
    ) -> Result<Self, SynthesisError> {
        let http_client = Client::builder()
            .user_agent(concat!("pulse-ai/", env!("CARGO_PKG_VERSION")))
            .timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self {
            http_client,
            endpoint: endpoint.into(),
            api_key: api_key.into(),
            voice_id,
        })
    }
}

fn header_u64(headers: &reqwest::header::HeaderMap, name: &str) -> Option<u64> {
    headers.get(name)?.to_str().ok()?.trim().parse().ok()
}

#[async_trait]
impl SpeechProvider for HttpSpeechProvider {
    fn name(&self) -> &'static str {
        "http"
    }

    async fn synthesize(&self, text: &str, format: &AudioFormat) -> Result<AudioClip, SynthesisError> {
        let request = SpeechRequest {
            text,
            voice_id: self.voice_id.as_deref(),
            mime_type: &format.mime_type,
            sample_rate: format.sample_rate,
            channels: format.channels,
        };

        let response = self
            .http_client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(SynthesisError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let headers = response.headers().clone();
        let mime_type = headers
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.split(';').next().unwrap_or(v).trim().to_string())
            .unwrap_or_else(|| format.mime_type.clone());
        let bytes = response.bytes().await?.to_vec();

        let (sample_rate, duration_ms) = if mime_type.eq_ignore_ascii_case("audio/wav") {
            let reader = hound::WavReader::new(Cursor::new(&bytes))?;
            let rate = reader.spec().sample_rate;
            (rate, reader.duration() as u64 * 1000 / rate.max(1) as u64)
        } else {
            let rate = header_u64(&headers, "x-sample-rate").unwrap_or(0) as u32;
            let duration = header_u64(&headers, "x-duration-ms").unwrap_or(0);
            (rate, duration)
        };

        Ok(AudioClip {
            bytes,
            mime_type,
            duration_ms,
            sample_rate,
        })
    }
}
