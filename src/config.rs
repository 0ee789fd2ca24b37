//! Configuration management for Turnstile.
//!
//! Two layers are loaded independently:
//! - [`ServiceConfig`] comes from an optional YAML file and describes the server and
//!   which routes are protected.
//! - [`RateLimitSettings`] comes from `REFRESH_RATE_LIMIT_*` environment variables.
//!   Bad values never fail startup; they fall back to the documented defaults.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::net::SocketAddr;

use config::{Config, Environment};
use tracing::warn;

use crate::ratelimit::ProtectedRoutes;

/// Environment prefix for the rate limit settings.
pub const ENV_PREFIX: &str = "REFRESH_RATE_LIMIT";

pub const DEFAULT_WINDOW_MS: u64 = 60_000;
pub const DEFAULT_MAX_REQUESTS: u64 = 5;
pub const DEFAULT_CLEANUP_INTERVAL_MS: u64 = 60_000;
pub const DEFAULT_MAX_TRACKED_KEYS: usize = 10_000;
pub const DEFAULT_REMOTE_TIMEOUT_MS: u64 = 500;
pub const DEFAULT_REMOTE_BACKOFF_MS: u64 = 5_000;

/// Main configuration for the Turnstile service.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServiceConfig {
    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Routes guarded by the admission layer
    #[serde(default)]
    pub routes: ProtectedRoutes,
}

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// HTTP listen address
    #[serde(default = "default_http_addr")]
    pub http_addr: SocketAddr,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_addr: default_http_addr(),
        }
    }
}

fn default_http_addr() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 8080))
}

impl ServiceConfig {
    /// Load configuration from a file path.
    pub fn from_file(path: &str) -> crate::error::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }

    /// Load configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> crate::error::Result<Self> {
        serde_yaml::from_str(yaml)
            .map_err(|e| crate::error::TurnstileError::Config(e.to_string()))
    }
}

/// Numeric policy and backend settings for the admission layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimitSettings {
    /// Window length in milliseconds
    pub window_ms: u64,
    /// Admitted requests per client, per route, per window
    pub max_requests: u64,
    /// Minimum time between local sweeps in milliseconds
    pub cleanup_interval_ms: u64,
    /// Upper bound on locally tracked keys
    pub max_tracked_keys: usize,
    /// Budget for one remote round trip sequence
    pub remote_timeout_ms: u64,
    /// How long the remote store is skipped after a failure
    pub remote_backoff_ms: u64,
    /// Shared backend connection URL; `None` disables the remote store
    pub redis_url: Option<String>,
    /// Optional credential applied as the connection password
    pub redis_token: Option<String>,
}

impl Default for RateLimitSettings {
    fn default() -> Self {
        Self {
            window_ms: DEFAULT_WINDOW_MS,
            max_requests: DEFAULT_MAX_REQUESTS,
            cleanup_interval_ms: DEFAULT_CLEANUP_INTERVAL_MS,
            max_tracked_keys: DEFAULT_MAX_TRACKED_KEYS,
            remote_timeout_ms: DEFAULT_REMOTE_TIMEOUT_MS,
            remote_backoff_ms: DEFAULT_REMOTE_BACKOFF_MS,
            redis_url: None,
            redis_token: None,
        }
    }
}

impl RateLimitSettings {
    /// Read settings from the process environment.
    pub fn from_env() -> Self {
        Self::from_environment(Environment::with_prefix(ENV_PREFIX))
    }

    /// Read settings from an explicit variable map, keyed by full variable name
    /// (e.g. `REFRESH_RATE_LIMIT_MAX`).
    pub fn from_vars(vars: HashMap<String, String>) -> Self {
        Self::from_environment(Environment::with_prefix(ENV_PREFIX).source(Some(vars)))
    }

    fn from_environment(environment: Environment) -> Self {
        let source = match Config::builder().add_source(environment).build() {
            Ok(source) => source,
            Err(e) => {
                warn!(error = %e, "Could not read rate limit environment, using defaults");
                return Self::default();
            }
        };

        let raw = |key: &str| source.get_string(key).ok();
        let text = |key: &str| {
            raw(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        Self {
            window_ms: positive_or(raw("window_ms"), DEFAULT_WINDOW_MS),
            max_requests: positive_or(raw("max"), DEFAULT_MAX_REQUESTS),
            cleanup_interval_ms: positive_or(raw("cleanup_interval_ms"), DEFAULT_CLEANUP_INTERVAL_MS),
            max_tracked_keys: usize::try_from(positive_or(
                raw("max_tracked_keys"),
                DEFAULT_MAX_TRACKED_KEYS as u64,
            ))
            .unwrap_or(DEFAULT_MAX_TRACKED_KEYS),
            remote_timeout_ms: positive_or(raw("remote_timeout_ms"), DEFAULT_REMOTE_TIMEOUT_MS),
            remote_backoff_ms: positive_or(raw("remote_backoff_ms"), DEFAULT_REMOTE_BACKOFF_MS),
            redis_url: text("redis_url"),
            redis_token: text("redis_token"),
        }
    }
}

/// Parse a strictly positive integer, falling back on anything else.
fn positive_or(value: Option<String>, fallback: u64) -> u64 {
    value
        .and_then(|v| v.trim().parse::<u64>().ok())
        .filter(|v| *v > 0)
        .unwrap_or(fallback)
}
