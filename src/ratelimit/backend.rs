//! Store trait for quota backends that may decline to answer.

use async_trait::async_trait;

use super::counter::{Decision, WindowPolicy};
use super::descriptor::RateKey;

/// Trait for quota store implementations.
///
/// Implemented by the shared `RemoteWindowStore` and by test doubles. The
/// admission controller asks it first; `None` means the store could not decide
/// and the in-process `LocalWindowStore`, which always answers, decides instead.
#[async_trait]
pub trait WindowStore: Send + Sync {
    /// Count one request against `key` at `now` (unix milliseconds) and decide.
    async fn admit(&self, key: &RateKey, now: i64, policy: &WindowPolicy) -> Option<Decision>;
}
