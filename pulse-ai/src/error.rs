//! Error types for pulse-ai's HTTP surface
//!
//! Every error renders as the shared `{success: false, error}` envelope with a
//! short user-facing category and a stable code.

use crate::workflow::{RecapError, RunFailure};
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use pulse_common::api::{ApiEnvelope, ErrorBody};
use thiserror::Error;

/// API error type
#[derive(Debug, Error)]
pub enum ApiError {
    /// Invalid request (400)
    #[error("Invalid request: {0}")]
    BadRequest(String),

    /// Aborted pipeline run
    #[error(transparent)]
    Pipeline(Box<RunFailure>),

    /// Internal server error (500)
    #[error("Internal server error: {0}")]
    Internal(String),
}

impl From<RunFailure> for ApiError {
    fn from(failure: RunFailure) -> Self {
        ApiError::Pipeline(Box::new(failure))
    }
}

/// HTTP status for an aborted run
pub fn recap_status(error: &RecapError) -> StatusCode {
    match error {
        RecapError::InsufficientAudio { .. } => StatusCode::UNPROCESSABLE_ENTITY,
        RecapError::NoMatch { .. } | RecapError::NoEventData { .. } => StatusCode::NOT_FOUND,
        RecapError::MatcherUnavailable(_)
        | RecapError::SynthesisFailure(_)
        | RecapError::Cancelled { .. } => StatusCode::SERVICE_UNAVAILABLE,
        RecapError::RetrievalTimeout { .. } | RecapError::DeadlineExceeded { .. } => {
            StatusCode::GATEWAY_TIMEOUT
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, body) = match self {
            ApiError::BadRequest(msg) => (
                StatusCode::BAD_REQUEST,
                ErrorBody::new("BAD_REQUEST", "invalid request", msg),
            ),
            ApiError::Pipeline(failure) => {
                let mut body = ErrorBody::new(
                    failure.error.code(),
                    failure.error.category(),
                    failure.error.to_string(),
                );
                body.stage = Some(failure.reached.to_string());
                body.latency = serde_json::to_value(&failure.trace).ok();
                (recap_status(&failure.error), body)
            }
            ApiError::Internal(msg) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                ErrorBody::new("INTERNAL_ERROR", "something went wrong", msg),
            ),
        };

        (status, Json(ApiEnvelope::<()>::failure(body))).into_response()
    }
}

/// Result type for API handlers
pub type ApiResult<T> = Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::Stage;

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            recap_status(&RecapError::NoMatch { best_confidence: Some(0.4) }),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            recap_status(&RecapError::InsufficientAudio { duration_ms: 200, min_ms: 1000 }),
            StatusCode::UNPROCESSABLE_ENTITY
        );
        assert_eq!(
            recap_status(&RecapError::DeadlineExceeded { stage: Stage::Synthesize }),
            StatusCode::GATEWAY_TIMEOUT
        );
        assert_eq!(
            recap_status(&RecapError::SynthesisFailure("rate".into())),
            StatusCode::SERVICE_UNAVAILABLE
        );
    }
}
