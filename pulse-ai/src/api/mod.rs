//! HTTP API handlers for pulse-ai

pub mod feed;
pub mod health;
pub mod metrics;
pub mod recognize;

pub use feed::feed_routes;
pub use health::health_routes;
pub use metrics::metrics_routes;
pub use recognize::recognize_routes;
