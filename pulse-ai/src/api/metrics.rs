//! Pipeline metrics endpoint
//!
//! GET /metrics: configured per-stage targets plus a rolling summary of
//! recent runs.

use axum::{extract::State, routing::get, Json, Router};
use pulse_common::api::ApiEnvelope;
use serde::Serialize;
use std::collections::BTreeMap;

use crate::services::MetricsSummary;
use crate::AppState;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsResponse {
    pub global_deadline_ms: u64,
    /// Nominal budget per stage when no stage finishes early
    pub stage_targets_ms: BTreeMap<&'static str, u64>,
    pub summary: MetricsSummary,
}

/// GET /metrics
pub async fn get_metrics(State(state): State<AppState>) -> Json<ApiEnvelope<MetricsResponse>> {
    Json(ApiEnvelope::ok(MetricsResponse {
        global_deadline_ms: state.config.global_deadline_ms,
        stage_targets_ms: state.config.stage_targets_ms().into_iter().collect(),
        summary: state.metrics.summary(),
    }))
}

pub fn metrics_routes() -> Router<AppState> {
    Router::new().route("/metrics", get(get_metrics))
}
