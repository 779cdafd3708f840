//! Lightning Feed Ingest Service
//!
//! This service subscribes to the live lightning-strike WebSocket feed,
//! decodes the obfuscated frames and stores every valid strike.
//!
//! # Architecture
//!
//! ```text
//! WebSocket feed -> FeedSupervisor -> StrikeDecoder -> StrikeStore (PostgreSQL)
//! ```
//!
//! # Configuration
//!
//! Configuration is loaded from:
//! 1. Configuration files (config/default.toml, config/{env}.toml)
//! 2. Environment variables (prefixed with INGEST_)
//!
//! See `config.rs` for detailed configuration options.

mod config;
mod feed_client;
mod supervisor;

use anyhow::Context;
use crate::config::IngestConfig;
use feed_client::WsConnector;
use std::sync::Arc;
use strike_pipeline::StrikeStore;
use supervisor::{FeedSupervisor, SupervisorConfig};
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load configuration
    let config = load_config()?;

    // Initialize logging
    init_logging(&config.logging)?;

    info!(
        service = "strike-ingest",
        version = env!("CARGO_PKG_VERSION"),
        feed = %config.feed.url,
        "Starting lightning feed ingest service"
    );

    // Validate configuration
    config.validate()?;

    if config.metrics.enabled {
        init_metrics(config.metrics.port)?;
    }

    // The only fatal retry: give up if the database never comes up.
    let store = StrikeStore::connect_with_retry(&config.database)
        .await
        .context("Failed to connect to strike database")?;

    if config.database.run_migrations {
        store
            .run_migrations()
            .await
            .context("Failed to run database migrations")?;
    }

    let shutdown = CancellationToken::new();
    let supervisor = FeedSupervisor::new(
        WsConnector::new(&config.feed),
        Arc::new(store.clone()),
        SupervisorConfig::from(&config.feed),
        shutdown.clone(),
    );

    let supervisor_handle = tokio::spawn(supervisor.run());

    shutdown_signal().await;
    info!("Initiating graceful shutdown...");
    shutdown.cancel();

    let totals = supervisor_handle
        .await
        .context("Feed supervisor task panicked")?;

    store.pool().close().await;

    info!(
        received = totals.received,
        stored = totals.stored,
        failed = totals.failed,
        "Shutdown complete"
    );
    Ok(())
}

/// Load configuration, falling back to the environment alone.
fn load_config() -> anyhow::Result<IngestConfig> {
    let config = IngestConfig::load().or_else(|e| {
        warn!(error = %e, "Failed to load config from files, trying environment");
        IngestConfig::from_env()
    })?;

    Ok(config)
}

/// Initialize the tracing/logging subsystem.
fn init_logging(config: &config::LoggingConfig) -> anyhow::Result<()> {
    let level = match config.level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    // RUST_LOG, when set, replaces the configured directives entirely.
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::new(default_directives(level)),
    };

    let subscriber = tracing_subscriber::registry().with(filter);

    if config.format == "json" {
        subscriber.with(fmt::layer().json()).init();
    } else {
        subscriber.with(fmt::layer().pretty()).init();
    }

    Ok(())
}

fn default_directives(level: Level) -> String {
    format!(
        "strike_ingest={level},strike_pipeline={level},sqlx=warn,tungstenite=info",
        level = level
    )
}

/// Initialize Prometheus metrics exporter
fn init_metrics(port: u16) -> anyhow::Result<()> {
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(([0, 0, 0, 0], port))
        .install()
        .context("Failed to install Prometheus metrics exporter")?;

    info!(port = port, "Prometheus metrics exporter started");
    Ok(())
}

/// Wait for shutdown signal (SIGINT or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C signal");
        }
        _ = terminate => {
            info!("Received SIGTERM signal");
        }
    }
}
