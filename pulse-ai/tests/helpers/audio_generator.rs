//! Audio sample generators
//!
//! Tones with an amplitude envelope, so fingerprints of different generators
//! differ while the same generator is always byte-identical.

use pulse_ai::types::AudioSample;
use std::io::Cursor;

/// Configuration for generated audio
#[derive(Debug, Clone)]
pub struct AudioConfig {
    pub duration_ms: u64,
    pub sample_rate: u32,
    pub channels: u16,
    pub frequency: f32,
    /// Amplitude modulation rate in Hz; zero for a flat tone
    pub pulse_hz: f32,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            duration_ms: 3000,
            sample_rate: 16_000,
            channels: 1,
            frequency: 440.0,
            pulse_hz: 2.0,
        }
    }
}

/// Mono PCM frames for `config`
pub fn generate_pcm(config: &AudioConfig) -> Vec<i16> {
    let frames = (config.duration_ms * config.sample_rate as u64 / 1000) as usize;
    (0..frames)
        .map(|i| {
            let t = i as f32 / config.sample_rate as f32;
            let envelope = if config.pulse_hz > 0.0 {
                0.5 + 0.5 * (2.0 * std::f32::consts::PI * config.pulse_hz * t).sin()
            } else {
                1.0
            };
            let tone = (2.0 * std::f32::consts::PI * config.frequency * t).sin();
            (0.3 * envelope * tone * i16::MAX as f32) as i16
        })
        .collect()
}

pub fn generate_sample(config: &AudioConfig) -> AudioSample {
    AudioSample::from_pcm(generate_pcm(config), config.sample_rate).unwrap()
}

/// 16-bit WAV bytes for `config`, each frame duplicated across channels
pub fn generate_wav_bytes(config: &AudioConfig) -> Vec<u8> {
    let spec = hound::WavSpec {
        channels: config.channels,
        sample_rate: config.sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    let mut cursor = Cursor::new(Vec::new());
    {
        let mut writer = hound::WavWriter::new(&mut cursor, spec).unwrap();
        for sample in generate_pcm(config) {
            for _ in 0..config.channels {
                writer.write_sample(sample).unwrap();
            }
        }
        writer.finalize().unwrap();
    }
    cursor.into_inner()
}
