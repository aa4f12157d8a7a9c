//! # Pulse Common Library
//!
//! Shared code for the Pulse recap service and its tooling:
//! - Error and result types
//! - Layered configuration loading (TOML, environment, compiled defaults)
//! - HTTP response envelope types

pub mod api;
pub mod config;
pub mod error;

pub use config::RecapConfig;
pub use error::{Error, Result};
