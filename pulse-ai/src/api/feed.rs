//! Feed ingestion and broadcast registry endpoints
//!
//! POST /feed/events, GET /broadcasts, POST /broadcasts

use axum::{
    extract::State,
    routing::{get, post},
    Json, Router,
};
use pulse_common::api::ApiEnvelope;
use serde::Serialize;
use tracing::info;

use crate::error::{ApiError, ApiResult};
use crate::services::feed::{ingest_events, IngestSummary};
use crate::types::{BroadcastInfo, PlayEvent};
use crate::AppState;

/// GET /broadcasts entry
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BroadcastStatus {
    #[serde(flatten)]
    pub info: BroadcastInfo,
    pub event_count: usize,
    pub newest_event_seconds: Option<f64>,
}

/// POST /feed/events
pub async fn ingest_feed_events(
    State(state): State<AppState>,
    Json(events): Json<Vec<PlayEvent>>,
) -> ApiResult<Json<ApiEnvelope<IngestSummary>>> {
    if let Some(bad) = events.iter().find(|e| {
        e.broadcast_id.trim().is_empty() || !e.timestamp_seconds.is_finite() || e.timestamp_seconds < 0.0
    }) {
        return Err(ApiError::BadRequest(format!(
            "event '{}' needs a broadcast id and a finite, non-negative timestamp",
            bad.event_type
        )));
    }

    let summary = ingest_events(&state.cache, events);
    info!(
        inserted = summary.inserted,
        duplicates = summary.duplicates,
        expired = summary.expired,
        "Feed events ingested"
    );
    Ok(Json(ApiEnvelope::ok(summary)))
}

/// GET /broadcasts
pub async fn list_broadcasts(State(state): State<AppState>) -> Json<ApiEnvelope<Vec<BroadcastStatus>>> {
    let broadcasts = state
        .cache
        .broadcasts()
        .into_iter()
        .map(|info| BroadcastStatus {
            event_count: state.cache.event_count(&info.broadcast_id),
            newest_event_seconds: state.cache.newest_timestamp(&info.broadcast_id),
            info,
        })
        .collect();
    Json(ApiEnvelope::ok(broadcasts))
}

/// POST /broadcasts
pub async fn register_broadcast(
    State(state): State<AppState>,
    Json(info): Json<BroadcastInfo>,
) -> ApiResult<Json<ApiEnvelope<BroadcastInfo>>> {
    if info.broadcast_id.trim().is_empty() {
        return Err(ApiError::BadRequest("broadcastId is required".to_string()));
    }
    info!(broadcast_id = %info.broadcast_id, league = %info.league, live = info.live, "Broadcast registered");
    state.cache.register_broadcast(info.clone());
    Ok(Json(ApiEnvelope::ok(info)))
}

pub fn feed_routes() -> Router<AppState> {
    Router::new()
        .route("/feed/events", post(ingest_feed_events))
        .route("/broadcasts", get(list_broadcasts).post(register_broadcast))
}
