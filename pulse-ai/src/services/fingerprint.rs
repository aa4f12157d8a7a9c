//! Compact acoustic signatures and the in-memory signature index
//!
//! A signature is 64 bits of energy contour: the sample is split into 65
//! equal frames and bit `i` is set when frame `i + 1` is louder than frame
//! `i`. Comparing adjacent frames makes the signature insensitive to overall
//! gain, which is the main difference between a broadcast feed and the same
//! audio picked up by a phone microphone.

use crate::types::AudioSample;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::num::ParseIntError;
use std::str::FromStr;

const SIGNATURE_FRAMES: usize = 65;

/// 64-bit energy-contour signature
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Signature(pub u64);

impl Signature {
    pub fn from_sample(sample: &AudioSample) -> Self {
        let pcm = sample.samples();
        let frame_len = (pcm.len() / SIGNATURE_FRAMES).max(1);

        let energies: Vec<f64> = (0..SIGNATURE_FRAMES)
            .map(|i| {
                let start = (i * frame_len).min(pcm.len());
                let end = ((i + 1) * frame_len).min(pcm.len());
                let frame = &pcm[start..end];
                if frame.is_empty() {
                    return 0.0;
                }
                frame.iter().map(|&s| (s as f64).powi(2)).sum::<f64>() / frame.len() as f64
            })
            .collect();

        let bits = energies
            .windows(2)
            .enumerate()
            .fold(0u64, |acc, (i, pair)| {
                if pair[1] > pair[0] {
                    acc | (1u64 << i)
                } else {
                    acc
                }
            });

        Self(bits)
    }

    /// Fraction of agreeing bits (1.0 = identical)
    pub fn similarity(&self, other: &Signature) -> f64 {
        let differing = (self.0 ^ other.0).count_ones();
        1.0 - differing as f64 / 64.0
    }

    pub fn to_hex(&self) -> String {
        format!("{:016x}", self.0)
    }
}

impl FromStr for Signature {
    type Err = ParseIntError;

    /// Parse the 16-digit hex form written by `to_hex`; a `0x` prefix is accepted
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let digits = s.trim();
        let digits = digits.strip_prefix("0x").unwrap_or(digits);
        u64::from_str_radix(digits, 16).map(Self)
    }
}

impl fmt::Display for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

/// One indexed broadcast segment
#[derive(Debug, Clone, PartialEq)]
pub struct IndexEntry {
    pub signature: Signature,
    pub broadcast_id: String,
    /// Broadcast position at the end of the indexed segment
    pub offset_seconds: f64,
    pub live: bool,
}

/// Scored index hit
#[derive(Debug, Clone, PartialEq)]
pub struct IndexHit<'a> {
    pub entry: &'a IndexEntry,
    pub similarity: f64,
}

/// Signature index, built at startup and read-only afterwards
#[derive(Debug, Clone, Default)]
pub struct FingerprintIndex {
    entries: Vec<IndexEntry>,
}

impl FingerprintIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, entry: IndexEntry) {
        self.entries.push(entry);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Best `limit` hits, most similar first
    ///
    /// Ties are ordered by broadcast id then offset so results never depend
    /// on insertion order.
    pub fn search(&self, signature: &Signature, limit: usize) -> Vec<IndexHit<'_>> {
        let mut hits: Vec<IndexHit<'_>> = self
            .entries
            .iter()
            .map(|entry| IndexHit {
                entry,
                similarity: signature.similarity(&entry.signature),
            })
            .collect();

        hits.sort_by(|a, b| {
            b.similarity
                .total_cmp(&a.similarity)
                .then_with(|| a.entry.broadcast_id.cmp(&b.entry.broadcast_id))
                .then_with(|| a.entry.offset_seconds.total_cmp(&b.entry.offset_seconds))
        });
        hits.truncate(limit);
        hits
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ramp_sample(rising: bool) -> AudioSample {
        let pcm: Vec<i16> = (0..65_000)
            .map(|i| {
                let level = if rising { i / 10 } else { 6500 - i / 10 };
                if i % 2 == 0 {
                    level as i16
                } else {
                    -(level as i16)
                }
            })
            .collect();
        AudioSample::from_pcm(pcm, 16_000).unwrap()
    }

    #[test]
    fn test_signature_tracks_energy_direction() {
        assert_eq!(Signature::from_sample(&ramp_sample(true)).0, u64::MAX);
        assert_eq!(Signature::from_sample(&ramp_sample(false)).0, 0);
    }

    #[test]
    fn test_signature_ignores_gain() {
        let loud = ramp_sample(true);
        let quiet_pcm: Vec<i16> = loud.samples().iter().map(|s| s / 4).collect();
        let quiet = AudioSample::from_pcm(quiet_pcm, 16_000).unwrap();
        assert_eq!(Signature::from_sample(&loud), Signature::from_sample(&quiet));
    }

    #[test]
    fn test_similarity_counts_agreeing_bits() {
        let a = Signature(0);
        assert_eq!(a.similarity(&Signature(0)), 1.0);
        assert_eq!(a.similarity(&Signature(u64::MAX)), 0.0);
        assert_eq!(a.similarity(&Signature(0xFFFF_FFFF)), 0.5);
    }

    #[test]
    fn test_hex_form_parses_back() {
        let signature = Signature::from_sample(&ramp_sample(true));
        assert_eq!(signature.to_hex().parse::<Signature>().unwrap(), signature);
        assert_eq!("0x00000000000000ff".parse::<Signature>().unwrap(), Signature(0xff));
        assert!("not-hex".parse::<Signature>().is_err());
    }

    #[test]
    fn test_search_is_insertion_order_independent() {
        let entries = [
            IndexEntry {
                signature: Signature(0b1111),
                broadcast_id: "b".into(),
                offset_seconds: 10.0,
                live: false,
            },
            IndexEntry {
                signature: Signature(0b1111),
                broadcast_id: "a".into(),
                offset_seconds: 20.0,
                live: true,
            },
            IndexEntry {
                signature: Signature(u64::MAX),
                broadcast_id: "c".into(),
                offset_seconds: 5.0,
                live: true,
            },
        ];

        let mut forward = FingerprintIndex::new();
        let mut backward = FingerprintIndex::new();
        for entry in entries.iter() {
            forward.insert(entry.clone());
        }
        for entry in entries.iter().rev() {
            backward.insert(entry.clone());
        }

        let query = Signature(0b1111);
        let ids = |index: &FingerprintIndex| -> Vec<String> {
            index
                .search(&query, 3)
                .iter()
                .map(|h| h.entry.broadcast_id.clone())
                .collect()
        };
        assert_eq!(ids(&forward), vec!["a", "b", "c"]);
        assert_eq!(ids(&forward), ids(&backward));
    }
}
