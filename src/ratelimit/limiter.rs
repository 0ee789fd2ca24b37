//! In-process window store.
//!
//! Holds quota state when no shared backend is configured or reachable. The table
//! is a sharded map, so the read-modify-write for one key happens under that key's
//! shard lock and never races with another admission for the same key.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::Mutex;
use tracing::{debug, trace};

use super::counter::{Decision, DecisionSource, WindowEntry, WindowPolicy};
use super::descriptor::RateKey;
use crate::config::{DEFAULT_CLEANUP_INTERVAL_MS, DEFAULT_MAX_TRACKED_KEYS};

/// Bookkeeping for the opportunistic sweep.
#[derive(Debug)]
struct SweepState {
    last_sweep_at: i64,
    cleanup_interval_ms: i64,
    max_tracked_keys: usize,
}

/// The in-process quota table.
///
/// This struct is thread-safe and can be shared across multiple tasks.
pub struct LocalWindowStore {
    /// Window entries indexed by local rate key
    entries: DashMap<String, WindowEntry>,
    /// Sweep schedule and size bound
    sweep: Mutex<SweepState>,
}

impl LocalWindowStore {
    /// Create a store with the default cleanup interval and size bound.
    pub fn new() -> Self {
        Self::with_limits(DEFAULT_CLEANUP_INTERVAL_MS, DEFAULT_MAX_TRACKED_KEYS)
    }

    /// Create a store with an explicit cleanup interval and size bound.
    pub fn with_limits(cleanup_interval_ms: u64, max_tracked_keys: usize) -> Self {
        Self {
            entries: DashMap::new(),
            sweep: Mutex::new(SweepState {
                last_sweep_at: 0,
                cleanup_interval_ms: i64::try_from(cleanup_interval_ms).unwrap_or(i64::MAX),
                max_tracked_keys,
            }),
        }
    }

    /// Replace the cleanup interval and size bound.
    pub fn set_limits(&self, cleanup_interval_ms: u64, max_tracked_keys: usize) {
        let mut sweep = self.sweep.lock();
        sweep.cleanup_interval_ms = i64::try_from(cleanup_interval_ms).unwrap_or(i64::MAX);
        sweep.max_tracked_keys = max_tracked_keys;
    }

    /// Count one request against `key` and decide.
    ///
    /// A missing or expired entry opens a new window with a count of one. A live
    /// entry below the quota is incremented. A live entry at the quota is left
    /// untouched and the request is denied with the entry's reset time.
    pub fn check_and_increment(&self, key: &str, now: i64, policy: &WindowPolicy) -> Decision {
        let limit = policy.max_requests;
        let window_ms = policy.window_ms_i64();

        match self.entries.entry(key.to_string()) {
            Entry::Vacant(vacant) => {
                let entry = WindowEntry::open(now, window_ms);
                vacant.insert(entry);
                trace!(key = %key, "Opened local window");
                Decision::allow(limit, limit.saturating_sub(1), entry.window_reset_at, DecisionSource::Local)
            }
            Entry::Occupied(mut occupied) => {
                let entry = occupied.get_mut();

                if entry.is_expired(now) {
                    *entry = WindowEntry::open(now, window_ms);
                    trace!(key = %key, "Reopened expired local window");
                    return Decision::allow(
                        limit,
                        limit.saturating_sub(1),
                        entry.window_reset_at,
                        DecisionSource::Local,
                    );
                }

                if entry.count < limit {
                    entry.count += 1;
                    entry.last_seen_at = now;
                    return Decision::allow(
                        limit,
                        limit - entry.count,
                        entry.window_reset_at,
                        DecisionSource::Local,
                    );
                }

                debug!(key = %key, count = entry.count, limit = limit, "Local rate limit exceeded");
                Decision::deny(limit, entry.window_reset_at, now, DecisionSource::Local)
            }
        }
    }

    /// Sweep opportunistically, then count one request against `key`.
    pub fn admit_local(&self, key: &RateKey, now: i64, policy: &WindowPolicy) -> Decision {
        self.maybe_sweep(now);
        self.check_and_increment(&key.local_key(), now, policy)
    }

    /// Sweep if the cleanup interval has passed or the table is over its bound.
    ///
    /// Returns the number of entries removed.
    pub fn maybe_sweep(&self, now: i64) -> usize {
        let mut sweep = self.sweep.lock();
        let interval_due = now.saturating_sub(sweep.last_sweep_at) >= sweep.cleanup_interval_ms;
        if !interval_due && self.entries.len() <= sweep.max_tracked_keys {
            return 0;
        }

        sweep.last_sweep_at = now;
        self.sweep_locked(now, sweep.max_tracked_keys)
    }

    /// Sweep unconditionally.
    pub fn sweep(&self, now: i64) -> usize {
        let mut sweep = self.sweep.lock();
        sweep.last_sweep_at = now;
        self.sweep_locked(now, sweep.max_tracked_keys)
    }

    fn sweep_locked(&self, now: i64, max_tracked_keys: usize) -> usize {
        let before = self.entries.len();

        self.entries.retain(|_, entry| !entry.is_expired(now));

        let live = self.entries.len();
        if live > max_tracked_keys {
            let overflow = live - max_tracked_keys;
            let mut by_age: Vec<(String, i64)> = self
                .entries
                .iter()
                .map(|e| (e.key().clone(), e.value().last_seen_at))
                .collect();
            by_age.sort_by_key(|(_, last_seen_at)| *last_seen_at);

            for (key, _) in by_age.into_iter().take(overflow) {
                self.entries.remove(&key);
            }
        }

        let removed = before.saturating_sub(self.entries.len());
        if removed > 0 {
            debug!(removed = removed, remaining = self.entries.len(), "Swept local rate limit table");
        }
        removed
    }

    /// Get the current window entry for a key.
    ///
    /// Returns `None` if the key is not tracked.
    pub fn entry(&self, key: &str) -> Option<WindowEntry> {
        self.entries.get(key).map(|e| *e.value())
    }

    /// Get the number of tracked keys.
    pub fn tracked_keys(&self) -> usize {
        self.entries.len()
    }

    /// Clear all entries.
    ///
    /// This is primarily useful for testing.
    pub fn clear(&self) {
        self.entries.clear();
    }
}

impl Default for LocalWindowStore {
    fn default() -> Self {
        Self::new()
    }
}
