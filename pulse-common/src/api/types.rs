//! Response envelope shared by every Pulse JSON endpoint
//!
//! All JSON responses use the shape `{success, data?, error?}` so clients can
//! branch on one field before looking at the payload.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// `{success, data, error}` response wrapper
///
/// # Examples
///
/// ```
/// use pulse_common::api::ApiEnvelope;
///
/// let ok = ApiEnvelope::ok(42);
/// assert!(ok.success);
/// assert_eq!(ok.data, Some(42));
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiEnvelope<T> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorBody>,
}

impl<T> ApiEnvelope<T> {
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn failure(error: ErrorBody) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(error),
        }
    }
}

/// Error payload
///
/// `category` is the short user-facing message; `code` is the stable
/// machine-readable identifier; `message` carries operator detail.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorBody {
    pub code: String,
    pub category: String,
    pub message: String,
    /// Furthest pipeline stage reached, for pipeline failures
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stage: Option<String>,
    /// Partial latency trace, for pipeline failures
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latency: Option<Value>,
}

impl ErrorBody {
    pub fn new(code: impl Into<String>, category: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            category: category.into(),
            message: message.into(),
            stage: None,
            latency: None,
        }
    }
}
