//! Rolling summary of recent pipeline runs

use crate::workflow::state::Stage;
use crate::workflow::trace::LatencyTrace;
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::{Mutex, PoisonError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Success,
    /// Completed with at least one recovered degradation
    Degraded,
    Aborted,
}

#[derive(Debug, Clone, Copy)]
struct StageSample {
    stage: Stage,
    duration_ms: u64,
    over_budget: bool,
}

#[derive(Debug, Clone)]
struct RunRecord {
    status: RunStatus,
    total_ms: u64,
    /// Only the stages the run reached
    stages: Vec<StageSample>,
}

/// Latency of one stage across the runs that reached it
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StageStats {
    pub stage: Stage,
    pub runs: usize,
    pub avg_ms: f64,
    pub max_ms: u64,
    /// Runs where the stage took longer than its sub-budget
    pub over_budget: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsSummary {
    pub window: usize,
    pub runs: usize,
    pub success: usize,
    pub degraded: usize,
    pub aborted: usize,
    pub avg_latency_ms: Option<f64>,
    pub min_latency_ms: Option<u64>,
    pub max_latency_ms: Option<u64>,
    pub p95_latency_ms: Option<u64>,
    /// Fraction of runs that finished inside the global deadline
    pub within_deadline: Option<f64>,
    /// Pipeline order; stages no run has reached are omitted
    pub stages: Vec<StageStats>,
}

/// Fixed-size window of run outcomes
pub struct RunMetrics {
    window: usize,
    deadline_ms: u64,
    runs: Mutex<VecDeque<RunRecord>>,
}

impl RunMetrics {
    pub fn new(window: usize, deadline_ms: u64) -> Self {
        Self {
            window: window.max(1),
            deadline_ms,
            runs: Mutex::new(VecDeque::with_capacity(window.max(1))),
        }
    }

    pub fn record(&self, status: RunStatus, trace: &LatencyTrace) {
        let stages = trace
            .stages
            .iter()
            .map(|s| StageSample {
                stage: s.stage_name,
                duration_ms: s.duration_ms,
                over_budget: s.over_budget(),
            })
            .collect();

        let mut runs = self.runs.lock().unwrap_or_else(PoisonError::into_inner);
        if runs.len() == self.window {
            runs.pop_front();
        }
        runs.push_back(RunRecord {
            status,
            total_ms: trace.total_ms,
            stages,
        });
    }

    pub fn summary(&self) -> MetricsSummary {
        let runs = self.runs.lock().unwrap_or_else(PoisonError::into_inner);
        let count = |status: RunStatus| runs.iter().filter(|r| r.status == status).count();

        let mut latencies: Vec<u64> = runs.iter().map(|r| r.total_ms).collect();
        latencies.sort_unstable();

        let (avg, p95, within) = if latencies.is_empty() {
            (None, None, None)
        } else {
            let n = latencies.len();
            let avg = latencies.iter().sum::<u64>() as f64 / n as f64;
            let p95_index = ((n as f64 * 0.95).ceil() as usize).clamp(1, n) - 1;
            let within = latencies.iter().filter(|&&ms| ms <= self.deadline_ms).count() as f64 / n as f64;
            (Some(avg), Some(latencies[p95_index]), Some(within))
        };

        let stages = Stage::ALL
            .into_iter()
            .filter_map(|stage| {
                let samples: Vec<&StageSample> = runs
                    .iter()
                    .flat_map(|r| r.stages.iter())
                    .filter(|s| s.stage == stage)
                    .collect();
                if samples.is_empty() {
                    return None;
                }
                let total: u64 = samples.iter().map(|s| s.duration_ms).sum();
                Some(StageStats {
                    stage,
                    runs: samples.len(),
                    avg_ms: total as f64 / samples.len() as f64,
                    max_ms: samples.iter().map(|s| s.duration_ms).max().unwrap_or(0),
                    over_budget: samples.iter().filter(|s| s.over_budget).count(),
                })
            })
            .collect();

        MetricsSummary {
            window: self.window,
            runs: runs.len(),
            success: count(RunStatus::Success),
            degraded: count(RunStatus::Degraded),
            aborted: count(RunStatus::Aborted),
            avg_latency_ms: avg,
            min_latency_ms: latencies.first().copied(),
            max_latency_ms: latencies.last().copied(),
            p95_latency_ms: p95,
            within_deadline: within,
            stages,
        }
    }
}
