//! Database configuration shared by the ingest and API services.
//!
//! The connection URL defaults to one assembled from the conventional
//! `POSTGRES_*` environment variables, so a service section only needs to
//! override what differs.

use serde::Deserialize;
use std::time::Duration;
use thiserror::Error;

/// Errors that can occur during configuration
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Missing required configuration: {0}")]
    MissingRequired(String),

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// PostgreSQL connection and startup policy
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// PostgreSQL connection URL
    #[serde(default = "default_url")]
    pub url: String,
    /// Maximum number of connections in the pool
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    /// Minimum number of connections in the pool
    #[serde(default = "default_min_connections")]
    pub min_connections: u32,
    /// Connection timeout in seconds
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    /// Idle connection timeout in seconds
    #[serde(default = "default_idle_timeout_secs")]
    pub idle_timeout_secs: u64,
    /// Run migrations on startup
    #[serde(default = "default_run_migrations")]
    pub run_migrations: bool,
    /// Connection attempts at startup before giving up
    #[serde(default = "default_startup_max_attempts")]
    pub startup_max_attempts: u32,
    /// Fixed delay between startup attempts in seconds
    #[serde(default = "default_startup_retry_delay_secs")]
    pub startup_retry_delay_secs: u64,
}

fn default_url() -> String {
    url_from_env()
}

fn default_max_connections() -> u32 {
    10
}

fn default_min_connections() -> u32 {
    1
}

fn default_connect_timeout_secs() -> u64 {
    30
}

fn default_idle_timeout_secs() -> u64 {
    600
}

fn default_run_migrations() -> bool {
    true
}

fn default_startup_max_attempts() -> u32 {
    5
}

fn default_startup_retry_delay_secs() -> u64 {
    5
}

/// Build a connection URL from `POSTGRES_HOST`, `POSTGRES_PORT`, `POSTGRES_DB`,
/// `POSTGRES_USER` and `POSTGRES_PASSWORD`.
pub fn url_from_env() -> String {
    let var = |name: &str, default: &str| std::env::var(name).unwrap_or_else(|_| default.to_string());

    format!(
        "postgres://{user}:{password}@{host}:{port}/{db}",
        user = var("POSTGRES_USER", "lightning_user"),
        password = var("POSTGRES_PASSWORD", "lightning_pass"),
        host = var("POSTGRES_HOST", "localhost"),
        port = var("POSTGRES_PORT", "5432"),
        db = var("POSTGRES_DB", "lightning"),
    )
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: default_url(),
            max_connections: default_max_connections(),
            min_connections: default_min_connections(),
            connect_timeout_secs: default_connect_timeout_secs(),
            idle_timeout_secs: default_idle_timeout_secs(),
            run_migrations: default_run_migrations(),
            startup_max_attempts: default_startup_max_attempts(),
            startup_retry_delay_secs: default_startup_retry_delay_secs(),
        }
    }
}

impl DatabaseConfig {
    /// Create a config for the given URL with default pool settings
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Default::default()
        }
    }

    /// Get connection timeout as Duration
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    /// Get idle timeout as Duration
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }

    /// Get the delay between startup connection attempts
    pub fn startup_retry_delay(&self) -> Duration {
        Duration::from_secs(self.startup_retry_delay_secs)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.url.is_empty() {
            return Err(ConfigError::MissingRequired("database.url".to_string()));
        }

        if !self.url.starts_with("postgres://") && !self.url.starts_with("postgresql://") {
            return Err(ConfigError::InvalidValue {
                key: "database.url".to_string(),
                message: "URL must start with postgres:// or postgresql://".to_string(),
            });
        }

        if self.startup_max_attempts == 0 {
            return Err(ConfigError::InvalidValue {
                key: "database.startup_max_attempts".to_string(),
                message: "At least one attempt is required".to_string(),
            });
        }

        if self.min_connections > self.max_connections {
            return Err(ConfigError::InvalidValue {
                key: "database.min_connections".to_string(),
                message: "Must not exceed max_connections".to_string(),
            });
        }

        Ok(())
    }
}
