//! Configuration management for the ingest service.
//!
//! This module handles loading and validating configuration from environment
//! variables and configuration files.

use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::time::Duration;
use strike_pipeline::DatabaseConfig;

/// Main configuration for the ingest service.
#[derive(Debug, Clone, Deserialize)]
pub struct IngestConfig {
    /// Upstream feed configuration
    #[serde(default)]
    pub feed: FeedConfig,

    /// Strike database configuration
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Metrics exporter configuration
    #[serde(default)]
    pub metrics: MetricsConfig,
}

/// Upstream WebSocket feed configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct FeedConfig {
    /// WebSocket endpoint (e.g., "wss://ws7.blitzortung.org/")
    #[serde(default = "default_feed_url")]
    pub url: String,

    /// Control message sent once after each connect
    #[serde(default = "default_subscribe_message")]
    pub subscribe_message: String,

    /// Connection timeout in seconds
    #[serde(default = "default_connection_timeout")]
    pub connection_timeout_secs: u64,

    /// Fixed delay before reconnecting in milliseconds
    #[serde(default = "default_reconnect_delay_ms")]
    pub reconnect_delay_ms: u64,

    /// Log session statistics every this many frames
    #[serde(default = "default_stats_log_interval")]
    pub stats_log_interval: u64,
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Output format (json, pretty)
    #[serde(default = "default_log_format")]
    pub format: String,
}

/// Prometheus exporter configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    /// Enable Prometheus metrics export
    #[serde(default)]
    pub enabled: bool,

    /// Port for the metrics HTTP listener
    #[serde(default = "default_metrics_port")]
    pub port: u16,
}

// Default value functions
fn default_feed_url() -> String {
    "wss://ws7.blitzortung.org/".to_string()
}
fn default_subscribe_message() -> String {
    r#"{"a":111}"#.to_string()
}
fn default_connection_timeout() -> u64 {
    10
}
fn default_reconnect_delay_ms() -> u64 {
    5000
}
fn default_stats_log_interval() -> u64 {
    10
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_log_format() -> String {
    "json".to_string()
}
fn default_metrics_port() -> u16 {
    9090
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            url: default_feed_url(),
            subscribe_message: default_subscribe_message(),
            connection_timeout_secs: default_connection_timeout(),
            reconnect_delay_ms: default_reconnect_delay_ms(),
            stats_log_interval: default_stats_log_interval(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            port: default_metrics_port(),
        }
    }
}

impl IngestConfig {
    /// Load configuration from file and environment variables.
    ///
    /// Configuration is loaded in the following order (later sources override earlier):
    /// 1. Default config file (config/default.toml)
    /// 2. Environment-specific config (config/{env}.toml)
    /// 3. Environment variables (prefixed with INGEST_)
    pub fn load() -> Result<Self, ConfigError> {
        let run_mode = std::env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

        let config = Config::builder()
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name(&format!("config/{}", run_mode)).required(false))
            // Override with environment variables (e.g., INGEST_FEED__URL)
            .add_source(
                Environment::with_prefix("INGEST")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        config.try_deserialize()
    }

    /// Create configuration from environment variables only.
    pub fn from_env() -> Result<Self, ConfigError> {
        let config = Config::builder()
            .add_source(
                Environment::with_prefix("INGEST")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        config.try_deserialize()
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigValidationError> {
        if self.feed.url.is_empty() {
            return Err(ConfigValidationError::MissingField("feed.url".to_string()));
        }
        if !self.feed.url.starts_with("ws://") && !self.feed.url.starts_with("wss://") {
            return Err(ConfigValidationError::InvalidValue {
                field: "feed.url".to_string(),
                message: "URL must start with ws:// or wss://".to_string(),
            });
        }

        if self.feed.subscribe_message.is_empty() {
            return Err(ConfigValidationError::MissingField(
                "feed.subscribe_message".to_string(),
            ));
        }

        if self.feed.stats_log_interval == 0 {
            return Err(ConfigValidationError::InvalidValue {
                field: "feed.stats_log_interval".to_string(),
                message: "Interval must be greater than 0".to_string(),
            });
        }

        self.database
            .validate()
            .map_err(|e| ConfigValidationError::Database(e.to_string()))?;

        Ok(())
    }
}

impl FeedConfig {
    /// Get connection timeout as Duration.
    pub fn connection_timeout(&self) -> Duration {
        Duration::from_secs(self.connection_timeout_secs)
    }

    /// Get reconnection delay as Duration.
    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }
}

/// Configuration validation errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigValidationError {
    #[error("Missing required field: {0}")]
    MissingField(String),

    #[error("Invalid value for {field}: {message}")]
    InvalidValue { field: String, message: String },

    #[error("Invalid database configuration: {0}")]
    Database(String),
}
