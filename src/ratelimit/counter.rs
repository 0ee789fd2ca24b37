//! Window state and admission decision types.

use crate::config::RateLimitSettings;

/// The numeric policy applied to one admission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowPolicy {
    /// Length of a window in milliseconds
    pub window_ms: u64,
    /// Requests admitted per key per window
    pub max_requests: u64,
}

impl WindowPolicy {
    pub fn new(window_ms: u64, max_requests: u64) -> Self {
        Self {
            window_ms,
            max_requests,
        }
    }

    /// Window length as a signed millisecond offset.
    pub fn window_ms_i64(&self) -> i64 {
        i64::try_from(self.window_ms).unwrap_or(i64::MAX)
    }
}

impl From<&RateLimitSettings> for WindowPolicy {
    fn from(settings: &RateLimitSettings) -> Self {
        Self::new(settings.window_ms, settings.max_requests)
    }
}

/// One client's quota state for one route during one window.
///
/// Timestamps are unix milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowEntry {
    /// Requests admitted so far in the current window
    pub count: u64,
    /// When the current window ends
    pub window_reset_at: i64,
    /// Most recent admission attempt, used for eviction ordering
    pub last_seen_at: i64,
}

impl WindowEntry {
    /// Start a fresh window at `now` with one admitted request.
    pub fn open(now: i64, window_ms: i64) -> Self {
        Self {
            count: 1,
            window_reset_at: now.saturating_add(window_ms),
            last_seen_at: now,
        }
    }

    /// Whether the window has ended at `now`.
    pub fn is_expired(&self, now: i64) -> bool {
        self.window_reset_at <= now
    }
}

/// Which store produced a decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecisionSource {
    /// The shared counter backend
    Remote,
    /// The in-process table
    Local,
}

impl std::fmt::Display for DecisionSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DecisionSource::Remote => write!(f, "remote"),
            DecisionSource::Local => write!(f, "local"),
        }
    }
}

/// The outcome of one admission attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Decision {
    /// Whether the request may proceed
    pub allowed: bool,
    /// The configured quota
    pub limit: u64,
    /// Quota left in the current window
    pub remaining: u64,
    /// When the current window ends, unix milliseconds
    pub reset_at_ms: i64,
    /// Seconds the client should wait; only meaningful when denied
    pub retry_after_secs: u64,
    /// Which store decided
    pub source: DecisionSource,
}

impl Decision {
    pub fn allow(limit: u64, remaining: u64, reset_at_ms: i64, source: DecisionSource) -> Self {
        Self {
            allowed: true,
            limit,
            remaining,
            reset_at_ms,
            retry_after_secs: 0,
            source,
        }
    }

    pub fn deny(limit: u64, reset_at_ms: i64, now: i64, source: DecisionSource) -> Self {
        Self {
            allowed: false,
            limit,
            remaining: 0,
            reset_at_ms,
            retry_after_secs: retry_after_secs(reset_at_ms, now),
            source,
        }
    }

    /// Reset time as unix seconds, rounded up.
    pub fn reset_at_secs(&self) -> i64 {
        ceil_div(self.reset_at_ms, 1000)
    }
}

/// Whole seconds until `reset_at`, rounded up, never below one.
pub fn retry_after_secs(reset_at: i64, now: i64) -> u64 {
    let secs = ceil_div(reset_at.saturating_sub(now), 1000);
    u64::try_from(secs).unwrap_or(0).max(1)
}

fn ceil_div(value: i64, divisor: i64) -> i64 {
    let quotient = value.div_euclid(divisor);
    if value.rem_euclid(divisor) == 0 {
        quotient
    } else {
        quotient + 1
    }
}
