//! Shared window store backed by Redis.
//!
//! This module lets several service instances draw from one quota. The store only
//! ever touches the backend through atomic primitives (`INCR`, `PEXPIRE`, `PTTL`)
//! and never caches remote state. Any failure, including a slow backend, turns into
//! "no answer" so the caller can fall back to the local store. After a failure the
//! store stays quiet for a back-off period instead of probing the backend on every
//! request.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::Mutex;
use redis::aio::{ConnectionManager, ConnectionManagerConfig};
use redis::IntoConnectionInfo;
use tokio::sync::OnceCell;
use tracing::{debug, info, trace, warn};

use super::backend::WindowStore;
use super::counter::{Decision, DecisionSource, WindowPolicy};
use super::descriptor::RateKey;
use crate::config::RateLimitSettings;
use crate::error::{Result, TurnstileError};

/// The atomic counter primitives the shared store relies on.
#[async_trait]
pub trait CounterClient: Send + Sync {
    /// Atomically increment `key` and return the new value.
    async fn incr(&self, key: &str) -> Result<i64>;

    /// Set `key` to expire `ttl_ms` milliseconds from now.
    async fn pexpire(&self, key: &str, ttl_ms: i64) -> Result<()>;

    /// Remaining time to live in milliseconds. Zero or negative means none.
    async fn pttl(&self, key: &str) -> Result<i64>;
}

/// A [`CounterClient`] talking to Redis.
///
/// The connection is opened on first use with a single attempt bounded by
/// `timeout`. If that fails, a later call tries again.
pub struct RedisCounterClient {
    client: redis::Client,
    connection: OnceCell<ConnectionManager>,
    timeout: Duration,
}

impl RedisCounterClient {
    /// Create a client for `url`, optionally overriding the password with `token`.
    pub fn open(url: &str, token: Option<&str>, timeout: Duration) -> Result<Self> {
        let mut info = url.into_connection_info()?;
        if let Some(token) = token {
            info.redis.password = Some(token.to_string());
        }

        Ok(Self {
            client: redis::Client::open(info)?,
            connection: OnceCell::new(),
            timeout,
        })
    }

    fn manager_config(&self) -> ConnectionManagerConfig {
        // No connect retries: an unreachable backend must fail fast
        ConnectionManagerConfig::new()
            .set_number_of_retries(0)
            .set_connection_timeout(self.timeout)
            .set_response_timeout(self.timeout)
    }

    async fn connection(&self) -> Result<ConnectionManager> {
        let connection = self
            .connection
            .get_or_try_init(|| async {
                let manager =
                    ConnectionManager::new_with_config(self.client.clone(), self.manager_config())
                        .await?;
                info!("Connected to shared rate limit store");
                Ok::<_, TurnstileError>(manager)
            })
            .await?;
        Ok(connection.clone())
    }
}

#[async_trait]
impl CounterClient for RedisCounterClient {
    async fn incr(&self, key: &str) -> Result<i64> {
        let mut conn = self.connection().await?;
        let count: i64 = redis::cmd("INCR").arg(key).query_async(&mut conn).await?;
        Ok(count)
    }

    async fn pexpire(&self, key: &str, ttl_ms: i64) -> Result<()> {
        let mut conn = self.connection().await?;
        let _: () = redis::cmd("PEXPIRE")
            .arg(key)
            .arg(ttl_ms)
            .query_async(&mut conn)
            .await?;
        Ok(())
    }

    async fn pttl(&self, key: &str) -> Result<i64> {
        let mut conn = self.connection().await?;
        let ttl: i64 = redis::cmd("PTTL").arg(key).query_async(&mut conn).await?;
        Ok(ttl)
    }
}

/// A counter value read back from the shared store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RemoteCount {
    /// Requests counted in the current window, including this one
    pub count: u64,
    /// When the window ends, unix milliseconds
    pub reset_at: i64,
}

/// Quota store shared across instances.
pub struct RemoteWindowStore {
    /// The backend
    client: Arc<dyn CounterClient>,
    /// Budget for one increment sequence
    timeout: Duration,
    /// How long to skip the backend after a failure
    backoff: Duration,
    /// Set after a failure; the backend is not contacted before this instant
    unhealthy_until: Mutex<Option<Instant>>,
}

impl RemoteWindowStore {
    /// Create a store over an existing counter client.
    pub fn new(client: Arc<dyn CounterClient>, timeout: Duration, backoff: Duration) -> Self {
        Self {
            client,
            timeout,
            backoff,
            unhealthy_until: Mutex::new(None),
        }
    }

    /// Build a Redis-backed store from settings.
    ///
    /// Returns `None` when no URL is configured or the URL is unusable.
    pub fn from_settings(settings: &RateLimitSettings) -> Option<Self> {
        let url = settings.redis_url.as_deref()?;
        let timeout = Duration::from_millis(settings.remote_timeout_ms);

        match RedisCounterClient::open(url, settings.redis_token.as_deref(), timeout) {
            Ok(client) => {
                info!(
                    timeout_ms = settings.remote_timeout_ms,
                    backoff_ms = settings.remote_backoff_ms,
                    "Shared rate limit store enabled"
                );
                Some(Self::new(
                    Arc::new(client),
                    timeout,
                    Duration::from_millis(settings.remote_backoff_ms),
                ))
            }
            Err(e) => {
                warn!(error = %e, "Invalid shared store URL, using local rate limiting only");
                None
            }
        }
    }

    /// Count one request against `key` in the shared store.
    ///
    /// Returns `None` on any backend error, when the backend does not answer
    /// within the configured timeout, or while backing off after a failure.
    pub async fn try_increment(&self, key: &str, now: i64, window_ms: i64) -> Option<RemoteCount> {
        if !self.is_healthy() {
            trace!(key = %key, "Shared rate limit store backing off, using local");
            return None;
        }

        let error = match tokio::time::timeout(self.timeout, self.increment(key, now, window_ms)).await
        {
            Ok(Ok(count)) => return Some(count),
            Ok(Err(e)) => e,
            Err(_) => TurnstileError::RemoteTimeout(self.timeout.as_millis() as u64),
        };

        warn!(key = %key, error = %error, "Shared rate limit store failed, falling back to local");
        self.mark_unhealthy();
        None
    }

    /// Whether the backend may be contacted right now.
    pub fn is_healthy(&self) -> bool {
        let mut unhealthy_until = self.unhealthy_until.lock();
        let until = *unhealthy_until;
        match until {
            Some(until) if Instant::now() < until => false,
            Some(_) => {
                debug!("Shared rate limit store back-off elapsed, retrying backend");
                *unhealthy_until = None;
                true
            }
            None => true,
        }
    }

    fn mark_unhealthy(&self) {
        *self.unhealthy_until.lock() = Some(Instant::now() + self.backoff);
    }

    async fn increment(&self, key: &str, now: i64, window_ms: i64) -> Result<RemoteCount> {
        let count = self.client.incr(key).await?;

        if count == 1 {
            self.client.pexpire(key, window_ms).await?;
        }

        let mut ttl_ms = self.client.pttl(key).await?;
        if ttl_ms <= 0 {
            // Lost or missing expiry; re-arm so the counter cannot live forever
            trace!(key = %key, ttl_ms = ttl_ms, "Re-arming shared counter expiry");
            self.client.pexpire(key, window_ms).await?;
            ttl_ms = window_ms;
        }

        Ok(RemoteCount {
            count: u64::try_from(count).unwrap_or(0),
            reset_at: now.saturating_add(ttl_ms),
        })
    }
}

#[async_trait]
impl WindowStore for RemoteWindowStore {
    async fn admit(&self, key: &RateKey, now: i64, policy: &WindowPolicy) -> Option<Decision> {
        let remote = self
            .try_increment(&key.remote_key(), now, policy.window_ms_i64())
            .await?;
        let limit = policy.max_requests;

        if remote.count > limit {
            debug!(
                key = %key,
                count = remote.count,
                limit = limit,
                "Shared rate limit exceeded"
            );
            return Some(Decision::deny(limit, remote.reset_at, now, DecisionSource::Remote));
        }

        Some(Decision::allow(
            limit,
            limit - remote.count,
            remote.reset_at,
            DecisionSource::Remote,
        ))
    }
}
