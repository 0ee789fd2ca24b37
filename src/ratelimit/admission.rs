//! Admission controller.
//!
//! The single decision point for guarded requests. The shared store is asked first
//! and is authoritative whenever it answers. When it is not configured, fails, or
//! times out, the in-process store decides instead, so enforcement degrades to
//! per-instance limits and never to no limits at all.

use chrono::Utc;
use parking_lot::RwLock;
use tracing::{debug, trace};

use super::backend::WindowStore;
use super::counter::{Decision, WindowPolicy};
use super::descriptor::RateKey;
use super::distributed::RemoteWindowStore;
use super::limiter::LocalWindowStore;
use crate::config::RateLimitSettings;

/// Walks the shared store then the local store for every guarded request.
pub struct AdmissionController {
    /// Numeric policy, copied once per request
    settings: RwLock<RateLimitSettings>,
    /// Optional shared store
    remote: Option<Box<dyn WindowStore>>,
    /// Per-instance fallback, owned exclusively by this controller
    local: LocalWindowStore,
}

impl AdmissionController {
    /// Create a controller, enabling the shared store when the settings name one.
    pub fn new(settings: RateLimitSettings) -> Self {
        let remote = RemoteWindowStore::from_settings(&settings)
            .map(|store| Box::new(store) as Box<dyn WindowStore>);
        Self::build(settings, remote)
    }

    /// Create a controller that only enforces per-instance limits.
    pub fn local_only(settings: RateLimitSettings) -> Self {
        Self::build(settings, None)
    }

    /// Create a controller over an explicit shared store.
    pub fn with_remote<S>(settings: RateLimitSettings, remote: S) -> Self
    where
        S: WindowStore + 'static,
    {
        Self::build(settings, Some(Box::new(remote)))
    }

    fn build(settings: RateLimitSettings, remote: Option<Box<dyn WindowStore>>) -> Self {
        let local = LocalWindowStore::with_limits(settings.cleanup_interval_ms, settings.max_tracked_keys);
        Self {
            settings: RwLock::new(settings),
            remote,
            local,
        }
    }

    /// Replace the numeric policy.
    ///
    /// Backend connection settings are only read at construction.
    pub fn set_settings(&self, settings: RateLimitSettings) {
        self.local
            .set_limits(settings.cleanup_interval_ms, settings.max_tracked_keys);
        *self.settings.write() = settings;
    }

    /// Get the current settings.
    pub fn settings(&self) -> RateLimitSettings {
        self.settings.read().clone()
    }

    /// Whether a shared store is configured.
    pub fn has_remote(&self) -> bool {
        self.remote.is_some()
    }

    /// The per-instance store, for inspection.
    pub fn local(&self) -> &LocalWindowStore {
        &self.local
    }

    /// Decide on one request from `client` to `route` using the wall clock.
    pub async fn check(&self, client: &str, route: &str) -> Decision {
        self.check_at(client, route, Utc::now().timestamp_millis())
            .await
    }

    /// Decide on one request from `client` to `route` at `now` (unix milliseconds).
    pub async fn check_at(&self, client: &str, route: &str, now: i64) -> Decision {
        let policy = WindowPolicy::from(&*self.settings.read());
        let key = RateKey::new(client, route);

        trace!(key = %key, "Checking admission");

        let remote = match self.remote.as_deref() {
            Some(store) => store.admit(&key, now, &policy).await,
            None => None,
        };
        let decision = match remote {
            Some(decision) => decision,
            None => self.local.admit_local(&key, now, &policy),
        };

        debug!(
            key = %key,
            allowed = decision.allowed,
            remaining = decision.remaining,
            source = %decision.source,
            "Admission decided"
        );
        decision
    }
}
