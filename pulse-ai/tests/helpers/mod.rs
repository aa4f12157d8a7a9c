//! Test Helper Utilities
//!
//! Shared utilities for testing pulse-ai

#![allow(dead_code)]

pub mod audio_generator;
pub mod providers;

pub use audio_generator::{generate_pcm, generate_sample, generate_wav_bytes, AudioConfig};
pub use providers::{
    demo_state, stub_providers, CountingContextSource, CountingSpeechProvider, FailingEnhancer,
    StubFingerprintProvider,
};
