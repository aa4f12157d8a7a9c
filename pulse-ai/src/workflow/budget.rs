//! Deadline budgeting
//!
//! One global deadline per run. Each stage gets a share of whatever time is
//! left when it starts, weighted against the stages still to run, so time a
//! fast stage saves is credited to the ones after it.

use super::state::Stage;
use pulse_common::config::StageWeights;
use std::time::Duration;
use tokio::time::Instant;

/// `remaining × wᵢ / Σ_{j≥i} wⱼ`
pub fn sub_budget(remaining: Duration, stage: Stage, weights: &StageWeights) -> Duration {
    let weight = stage.weight(weights);
    let weight_left: f64 = stage.remaining_stages().map(|s| s.weight(weights)).sum();
    if weight_left <= 0.0 {
        return remaining;
    }
    let share = (weight / weight_left).clamp(0.0, 1.0);
    Duration::from_nanos((remaining.as_nanos() as f64 * share).round() as u64)
}

/// Global deadline of one run
#[derive(Debug, Clone)]
pub struct DeadlineBudget {
    deadline: Instant,
    weights: StageWeights,
}

impl DeadlineBudget {
    pub fn new(total: Duration, weights: StageWeights) -> Self {
        Self {
            deadline: Instant::now() + total,
            weights,
        }
    }

    pub fn remaining(&self) -> Duration {
        self.deadline.saturating_duration_since(Instant::now())
    }

    pub fn is_exhausted(&self) -> bool {
        self.remaining().is_zero()
    }

    /// Deadline for `stage`, computed from the time left right now
    pub fn stage_deadline(&self, stage: Stage) -> StageBudget {
        let budget = sub_budget(self.remaining(), stage, &self.weights);
        let now = Instant::now();
        StageBudget {
            stage,
            budget,
            deadline: (now + budget).min(self.deadline),
        }
    }
}

/// Sub-deadline granted to one stage
#[derive(Debug, Clone, Copy)]
pub struct StageBudget {
    pub stage: Stage,
    pub budget: Duration,
    pub deadline: Instant,
}

impl StageBudget {
    pub fn budget_ms(&self) -> u64 {
        self.budget.as_millis() as u64
    }

    pub fn is_overrun(&self) -> bool {
        Instant::now() >= self.deadline
    }
}
