//! Per-run latency telemetry

use super::state::Stage;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::time::Duration;
use tokio::time::Instant;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StageOutcome {
    Completed,
    /// Finished with a recovered degradation
    Degraded,
    Failed,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StageTrace {
    pub stage_name: Stage,
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub budget_ms: u64,
    pub outcome: StageOutcome,
}

impl StageTrace {
    pub fn over_budget(&self) -> bool {
        self.duration_ms > self.budget_ms
    }
}

/// Stage timings accumulated over one run
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LatencyTrace {
    pub run_id: Uuid,
    pub stages: Vec<StageTrace>,
    pub total_ms: u64,
}

impl LatencyTrace {
    pub fn stage(&self, stage: Stage) -> Option<&StageTrace> {
        self.stages.iter().find(|s| s.stage_name == stage)
    }
}

/// Running stage timer
#[derive(Debug)]
pub struct StageTimer {
    stage: Stage,
    budget: Duration,
    started: Instant,
    started_at: DateTime<Utc>,
}

/// Builds a `LatencyTrace` as the run progresses
#[derive(Debug)]
pub struct TraceRecorder {
    run_id: Uuid,
    started: Instant,
    stages: Vec<StageTrace>,
}

impl TraceRecorder {
    pub fn new(run_id: Uuid) -> Self {
        Self {
            run_id,
            started: Instant::now(),
            stages: Vec::new(),
        }
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    pub fn begin(&self, stage: Stage, budget: Duration) -> StageTimer {
        StageTimer {
            stage,
            budget,
            started: Instant::now(),
            started_at: Utc::now(),
        }
    }

    pub fn finish(&mut self, timer: StageTimer, outcome: StageOutcome) -> &StageTrace {
        let trace = StageTrace {
            stage_name: timer.stage,
            started_at: timer.started_at,
            duration_ms: timer.started.elapsed().as_millis() as u64,
            budget_ms: timer.budget.as_millis() as u64,
            outcome,
        };
        self.stages.push(trace);
        &self.stages[self.stages.len() - 1]
    }

    pub fn into_trace(self) -> LatencyTrace {
        LatencyTrace {
            run_id: self.run_id,
            total_ms: self.started.elapsed().as_millis() as u64,
            stages: self.stages,
        }
    }
}
