//! Recap API handlers
//!
//! POST /recognize, POST /recognize/voice-only
//!
//! Both accept either a raw audio body (WAV, or 16-bit little-endian PCM with
//! `sample_rate` in the query) or a JSON body. JSON without audio runs the
//! pipeline in demo mode.

use axum::{
    body::Bytes,
    extract::{Query, State},
    http::{header, HeaderMap, HeaderName, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::post,
    Json, Router,
};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use pulse_common::api::ApiEnvelope;
use serde::{Deserialize, Serialize};
use tracing::warn;
use uuid::Uuid;

use crate::error::{ApiError, ApiResult};
use crate::types::{AudioClip, AudioSample, GenerationPhase};
use crate::workflow::{Degradation, LatencyTrace, RecapRequest, RecapResult, RunFailure};
use crate::AppState;

/// Query parameters for raw audio uploads
#[derive(Debug, Default, Deserialize)]
pub struct RecognizeQuery {
    pub sample_rate: Option<u32>,
    /// Comma-separated league codes
    pub leagues: Option<String>,
    pub user_id: Option<String>,
    #[serde(default)]
    pub allow_text_only: bool,
}

/// JSON request body
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecognizeBody {
    pub audio_base64: Option<String>,
    pub sample_rate: Option<u32>,
    #[serde(default)]
    pub preferred_leagues: Vec<String>,
    pub user_id: Option<String>,
    #[serde(default)]
    pub allow_text_only: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AudioClipBody {
    pub mime_type: String,
    pub sample_rate: u32,
    pub duration_ms: u64,
    pub data_base64: String,
}

impl From<&AudioClip> for AudioClipBody {
    fn from(clip: &AudioClip) -> Self {
        Self {
            mime_type: clip.mime_type.clone(),
            sample_rate: clip.sample_rate,
            duration_ms: clip.duration_ms,
            data_base64: STANDARD.encode(&clip.bytes),
        }
    }
}

/// POST /recognize response data
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RecapResponse {
    pub run_id: Uuid,
    pub broadcast_id: String,
    pub offset_seconds: f64,
    pub confidence: f64,
    pub match_reason: String,
    pub narrative_text: String,
    pub generation_phase: GenerationPhase,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub audio_clip: Option<AudioClipBody>,
    pub latency: LatencyTrace,
    pub degradations: Vec<Degradation>,
}

impl From<RecapResult> for RecapResponse {
    fn from(result: RecapResult) -> Self {
        Self {
            run_id: result.run_id,
            broadcast_id: result.broadcast_id,
            offset_seconds: result.offset_seconds,
            confidence: result.confidence,
            match_reason: result.match_reason,
            narrative_text: result.script.text,
            generation_phase: result.script.generation_phase,
            audio_clip: result.audio_clip.as_ref().map(AudioClipBody::from),
            latency: result.trace,
            degradations: result.degradations,
        }
    }
}

fn is_json(headers: &HeaderMap) -> bool {
    headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.trim_start().starts_with("application/json"))
}

fn split_leagues(leagues: Option<&str>) -> Vec<String> {
    leagues
        .unwrap_or_default()
        .split(',')
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(str::to_uppercase)
        .collect()
}

/// Build a pipeline request from either body form
pub fn parse_request(headers: &HeaderMap, query: RecognizeQuery, body: &[u8]) -> ApiResult<RecapRequest> {
    if is_json(headers) {
        let body: RecognizeBody = serde_json::from_slice(body)
            .map_err(|e| ApiError::BadRequest(format!("invalid JSON body: {}", e)))?;
        let audio = match body.audio_base64.as_deref().filter(|a| !a.trim().is_empty()) {
            Some(encoded) => {
                let bytes = STANDARD
                    .decode(encoded.trim())
                    .map_err(|e| ApiError::BadRequest(format!("invalid audioBase64: {}", e)))?;
                Some(decode_audio(&bytes, body.sample_rate.or(query.sample_rate))?)
            }
            None => None,
        };
        let mut preferred_leagues: Vec<String> =
            body.preferred_leagues.iter().map(|l| l.trim().to_uppercase()).collect();
        if preferred_leagues.is_empty() {
            preferred_leagues = split_leagues(query.leagues.as_deref());
        }
        return Ok(RecapRequest {
            audio,
            preferred_leagues,
            user_id: body.user_id.or(query.user_id),
            allow_text_only: body.allow_text_only || query.allow_text_only,
        });
    }

    if body.is_empty() {
        return Err(ApiError::BadRequest("empty audio body".to_string()));
    }
    Ok(RecapRequest {
        audio: Some(decode_audio(body, query.sample_rate)?),
        preferred_leagues: split_leagues(query.leagues.as_deref()),
        user_id: query.user_id,
        allow_text_only: query.allow_text_only,
    })
}

fn decode_audio(bytes: &[u8], sample_rate: Option<u32>) -> ApiResult<AudioSample> {
    AudioSample::from_upload(bytes, sample_rate).map_err(|e| ApiError::BadRequest(e.to_string()))
}

async fn run_pipeline(state: &AppState, request: RecapRequest) -> ApiResult<RecapResult> {
    match state.orchestrator.run_with_cancel(request, &state.shutdown).await {
        Ok(result) => Ok(result),
        Err(failure) => {
            remember_failure(state, &failure).await;
            Err(failure.into())
        }
    }
}

/// Only service faults mark the service degraded
async fn remember_failure(state: &AppState, failure: &RunFailure) {
    if failure.error.is_service_fault() {
        *state.last_error.write().await = Some(failure.to_string());
    }
}

/// POST /recognize
pub async fn recognize(
    State(state): State<AppState>,
    Query(query): Query<RecognizeQuery>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<Json<ApiEnvelope<RecapResponse>>> {
    let request = parse_request(&headers, query, &body)?;
    let result = run_pipeline(&state, request).await?;
    Ok(Json(ApiEnvelope::ok(RecapResponse::from(result))))
}

/// POST /recognize/voice-only
///
/// Returns the clip bytes directly; text-only fallbacks are not allowed here.
pub async fn recognize_voice_only(
    State(state): State<AppState>,
    Query(query): Query<RecognizeQuery>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<Response> {
    let mut request = parse_request(&headers, query, &body)?;
    request.allow_text_only = false;

    let result = run_pipeline(&state, request).await?;
    let Some(clip) = result.audio_clip else {
        return Err(ApiError::Internal("run completed without audio".to_string()));
    };

    let mut response_headers = HeaderMap::new();
    let content_type = HeaderValue::from_str(&clip.mime_type)
        .unwrap_or_else(|_| HeaderValue::from_static("application/octet-stream"));
    response_headers.insert(header::CONTENT_TYPE, content_type);
    response_headers.insert(
        HeaderName::from_static("x-total-latency-ms"),
        HeaderValue::from(result.trace.total_ms),
    );
    response_headers.insert(
        HeaderName::from_static("x-generation-phase"),
        HeaderValue::from_static(result.script.generation_phase.as_str()),
    );
    match HeaderValue::from_str(&result.script.text) {
        Ok(text) => {
            response_headers.insert(HeaderName::from_static("x-narrative-text"), text);
        }
        Err(_) => warn!(run_id = %result.run_id, "Narrative text not header-safe, omitting"),
    }

    Ok((StatusCode::OK, response_headers, clip.bytes).into_response())
}

/// Build recap routes
pub fn recognize_routes() -> Router<AppState> {
    Router::new()
        .route("/recognize", post(recognize))
        .route("/recognize/voice-only", post(recognize_voice_only))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn json_headers() -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers
    }

    #[test]
    fn test_json_without_audio_is_demo_mode() {
        let body = br#"{"preferredLeagues": ["nfl"], "allowTextOnly": true}"#;
        let request = parse_request(&json_headers(), RecognizeQuery::default(), body).unwrap();
        assert!(request.audio.is_none());
        assert_eq!(request.preferred_leagues, vec!["NFL"]);
        assert!(request.allow_text_only);
    }

    #[test]
    fn test_raw_pcm_body_with_query_rate() {
        let pcm: Vec<u8> = (0..16_000i16).flat_map(|s| s.to_le_bytes()).collect();
        let query = RecognizeQuery {
            sample_rate: Some(16_000),
            leagues: Some("nba, nfl".into()),
            ..Default::default()
        };
        let request = parse_request(&HeaderMap::new(), query, &pcm).unwrap();
        let audio = request.audio.unwrap();
        assert_eq!(audio.sample_rate(), 16_000);
        assert_eq!(audio.duration_ms(), 1000);
        assert_eq!(request.preferred_leagues, vec!["NBA", "NFL"]);
    }

    #[test]
    fn test_bad_base64_is_bad_request() {
        let body = br#"{"audioBase64": "not base64!!"}"#;
        let err = parse_request(&json_headers(), RecognizeQuery::default(), body).unwrap_err();
        assert!(matches!(err, ApiError::BadRequest(_)));
    }

    #[test]
    fn test_empty_raw_body_rejected() {
        let err = parse_request(&HeaderMap::new(), RecognizeQuery::default(), &[]).unwrap_err();
        assert!(matches!(err, ApiError::BadRequest(_)));
    }
}
