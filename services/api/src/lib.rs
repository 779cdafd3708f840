//! Strike API Service
//!
//! Read-only HTTP surface over the strike database written by the ingest
//! service.
//!
//! ## Endpoints
//!
//! - `GET /` - service index
//! - `GET /health` - database connectivity and total strike count
//! - `GET /strikes` - strikes filtered by time range and bounding box
//! - `GET /strikes/recent` - strikes from the last N minutes
//! - `GET /strikes/nearby` - strikes within a radius, nearest first
//! - `GET /strikes/stats` - count, time span and mean position
//! - `GET /ingestion/stats` - ingest counters and success rate
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐          ┌──────────────┐          ┌──────────────┐
//! │ HTTP client  │─────────▶│ axum router  │─────────▶│ StrikeStore  │
//! └──────────────┘          └──────────────┘          │ (PostgreSQL) │
//!                                  │                  └──────────────┘
//!                                  ▼                         ▲
//!                           ┌──────────────┐                 │
//!                           │ find_nearby  │─────────────────┘
//!                           └──────────────┘
//! ```

pub mod config;
pub mod routes;

pub use crate::config::Config;
pub use routes::{create_router, start_api_server, AppState, ErrorResponse};

use tokio::signal;
use tracing::{info, warn};

/// Wait for shutdown signal (SIGINT or SIGTERM)
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Failed to install Ctrl+C handler");
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
