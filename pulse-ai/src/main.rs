//! pulse-ai - live broadcast recap service
//!
//! Listens on 127.0.0.1:5730 by default. Without provider credentials every
//! external capability runs as a local mock, so the service works offline
//! against the built-in demo feed.

use anyhow::{Context, Result};
use clap::Parser;
use pulse_common::RecapConfig;
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::EnvFilter;

use pulse_ai::services::feed::load_feed_or_builtin;
use pulse_ai::AppState;

#[derive(Debug, Parser)]
#[command(name = "pulse-ai", version, about = "Live broadcast recap service")]
struct Cli {
    /// Path to a TOML config file
    #[arg(short, long, env = "PULSE_CONFIG")]
    config: Option<PathBuf>,

    /// Override the configured listen port
    #[arg(short, long)]
    port: Option<u16>,

    /// Override the configured log level (RUST_LOG still wins)
    #[arg(long)]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let mut config = RecapConfig::load(cli.config.as_deref()).context("Failed to load configuration")?;
    if let Some(port) = cli.port {
        config.server.port = port;
    }
    if let Some(level) = cli.log_level {
        config.logging.level = level;
    }

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("pulse_ai={0},pulse_common={0},tower_http=info", config.logging.level)));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("Starting pulse-ai (broadcast recap) service");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));
    for (stage, ms) in config.stage_targets_ms() {
        info!(stage, target_ms = ms, "Stage budget");
    }

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let feed = load_feed_or_builtin(config.demo_feed_path.as_deref());
    let state = AppState::from_config(config, &feed).context("Failed to initialize providers")?;
    let replay = state.start_feed(feed);
    let shutdown = state.shutdown.clone();
    let app = pulse_ai::build_router(state);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    info!("Listening on http://{}", addr);
    info!("Health check: http://{}/health", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::warn!(error = %e, "Failed to listen for shutdown signal");
            }
            info!("Shutdown requested");
            shutdown.cancel();
        })
        .await?;

    if let Some(replay) = replay {
        let summary = replay.await.context("Feed replay task failed")?;
        info!(inserted = summary.inserted, "Feed replay stopped");
    }

    Ok(())
}
