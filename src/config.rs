//! Configuration for the inference proxy.
//!
//! All settings come from the process environment with sensible defaults,
//! so the proxy can run in a container with nothing but `MODEL_SERVER_URL`
//! set.

use std::time::Duration;

/// Proxy configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    /// Port the ingress HTTP API listens on
    pub port: u16,

    /// Maximum number of requests per batch
    pub batch_size: usize,

    /// Maximum time to wait for a batch to fill, measured from the first
    /// request in the batch
    pub batch_timeout: Duration,

    /// Base URL of the backend model server
    pub model_server_url: String,

    /// Log level: debug, info, warn, error
    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 8080,
            batch_size: 32,
            batch_timeout: Duration::from_millis(50),
            model_server_url: "http://localhost:8000".to_string(),
            log_level: "info".to_string(),
        }
    }
}

impl Config {
    /// Load configuration from environment variables, falling back to
    /// defaults for anything unset or unparseable.
    pub fn from_env() -> Self {
        Self {
            port: env_parsed("PORT", 8080),
            batch_size: env_parsed("BATCH_SIZE", 32),
            batch_timeout: Duration::from_millis(env_parsed("BATCH_TIMEOUT_MS", 50)),
            model_server_url: std::env::var("MODEL_SERVER_URL")
                .unwrap_or_else(|_| "http://localhost:8000".to_string()),
            log_level: std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
        }
    }
}

fn env_parsed<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
