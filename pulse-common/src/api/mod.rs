//! Shared HTTP API types
//!
//! Contains only framework-independent types. The service crate wraps them
//! with axum responses.

pub mod types;

pub use types::{ApiEnvelope, ErrorBody};
