/// Configuration management for the syncflow engine
///
/// Handles server configuration, database location, and runtime parameters.

use serde::{Deserialize, Serialize};

/// Main application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Server configuration
    pub server: ServerConfig,
    /// Database configuration
    pub database: DatabaseConfig,
    /// Engine and scheduler runtime parameters
    pub engine: EngineConfig,
}

/// HTTP server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Server bind address (e.g., "0.0.0.0")
    pub host: String,
    /// Server port number
    pub port: u16,
}

/// Database configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// SQLite connection URL (e.g., "sqlite://data/syncflow.db")
    pub url: String,
}

/// Engine and scheduler runtime parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Whole-run retry budget applied by the trigger dispatcher.
    /// Bounded in production, zero in development.
    pub run_retries: u32,
    /// Tick interval of the schedule reconciliation poller, in seconds.
    pub reconcile_interval_secs: u64,
}

impl Default for Config {
    /// Default configuration with ENV_VAR support for container deployment
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: std::env::var("SYNCFLOW_HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
                port: std::env::var("SYNCFLOW_PORT")
                    .unwrap_or_else(|_| "3004".to_string())
                    .parse()
                    .unwrap_or(3004),
            },
            database: DatabaseConfig {
                url: std::env::var("SYNCFLOW_DATABASE_URL")
                    .unwrap_or_else(|_| "sqlite://data/syncflow.db".to_string()),
            },
            engine: EngineConfig {
                run_retries: std::env::var("SYNCFLOW_RUN_RETRIES")
                    .ok()
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(0),
                reconcile_interval_secs: std::env::var("SYNCFLOW_RECONCILE_INTERVAL_SECS")
                    .ok()
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(60),
            },
        }
    }
}
