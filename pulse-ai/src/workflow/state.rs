//! Run states and pipeline stages

use pulse_common::config::StageWeights;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle of one pipeline run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    Idle,
    Matching,
    Retrieving,
    Generating,
    Synthesizing,
    Complete,
    Aborted,
}

impl RunState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Complete | Self::Aborted)
    }

    /// Forward one step along the pipeline, or abort from any live state
    pub fn can_transition_to(self, next: RunState) -> bool {
        use RunState::*;
        match (self, next) {
            (Idle, Matching)
            | (Matching, Retrieving)
            | (Retrieving, Generating)
            | (Generating, Synthesizing)
            | (Synthesizing, Complete) => true,
            (from, Aborted) => !from.is_terminal(),
            _ => false,
        }
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Matching => "matching",
            Self::Retrieving => "retrieving",
            Self::Generating => "generating",
            Self::Synthesizing => "synthesizing",
            Self::Complete => "complete",
            Self::Aborted => "aborted",
        };
        f.write_str(name)
    }
}

/// Budgeted pipeline stage, in execution order
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Match,
    Retrieve,
    Generate,
    Synthesize,
}

impl Stage {
    pub const ALL: [Stage; 4] = [Self::Match, Self::Retrieve, Self::Generate, Self::Synthesize];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Match => "match",
            Self::Retrieve => "retrieve",
            Self::Generate => "generate",
            Self::Synthesize => "synthesize",
        }
    }

    /// State the run is in while this stage executes
    pub fn run_state(self) -> RunState {
        match self {
            Self::Match => RunState::Matching,
            Self::Retrieve => RunState::Retrieving,
            Self::Generate => RunState::Generating,
            Self::Synthesize => RunState::Synthesizing,
        }
    }

    pub fn weight(self, weights: &StageWeights) -> f64 {
        match self {
            Self::Match => weights.matching,
            Self::Retrieve => weights.retrieve,
            Self::Generate => weights.generate,
            Self::Synthesize => weights.synthesize,
        }
    }

    /// This stage and every stage after it
    pub fn remaining_stages(self) -> impl Iterator<Item = Stage> {
        Self::ALL.into_iter().filter(move |s| *s >= self)
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
