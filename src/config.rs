//! Runtime configuration, read once at startup.

use std::path::PathBuf;
use std::time::Duration;

use crate::poll::PollConfig;

/// Configuration for the orchestration service.
#[derive(Debug, Clone)]
pub struct Config {
    /// Host to bind the HTTP server to.
    pub host: String,
    /// Port to bind the HTTP server to.
    pub port: u16,
    /// Base URL of the generation backend.
    pub backend_url: String,
    /// Directory holding persisted state (task registry).
    pub working_dir: PathBuf,
    /// Poll cadence and budget for task status loops.
    pub poll: PollConfig,
}

impl Config {
    /// Build configuration from environment variables, falling back to
    /// defaults suitable for local development.
    pub fn from_env() -> Self {
        let host = std::env::var("SLIDEFLOW_HOST").unwrap_or_else(|_| "0.0.0.0".to_string());
        let port = std::env::var("SLIDEFLOW_PORT")
            .ok()
            .and_then(|p| p.parse().ok())
            .unwrap_or(8080);
        let backend_url = std::env::var("SLIDEFLOW_BACKEND_URL")
            .unwrap_or_else(|_| "http://localhost:5000".to_string());
        let working_dir = std::env::var("WORKING_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| {
                std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."))
            });

        let mut poll = PollConfig::default();
        if let Some(interval_ms) = std::env::var("SLIDEFLOW_POLL_INTERVAL_MS")
            .ok()
            .and_then(|v| v.parse().ok())
        {
            poll.interval = Duration::from_millis(interval_ms);
        }
        if let Some(max_attempts) = std::env::var("SLIDEFLOW_POLL_MAX_ATTEMPTS")
            .ok()
            .and_then(|v| v.parse().ok())
        {
            poll.max_attempts = max_attempts;
        }

        Self {
            host,
            port,
            backend_url,
            working_dir,
            poll,
        }
    }
}
