//! Admission control logic and quota state management.

mod admission;
mod backend;
mod counter;
mod descriptor;
mod distributed;
mod limiter;
mod rules;

pub use admission::AdmissionController;
pub use backend::WindowStore;
pub use counter::{retry_after_secs, Decision, DecisionSource, WindowEntry, WindowPolicy};
pub use descriptor::{RateKey, REMOTE_NAMESPACE};
pub use distributed::{CounterClient, RedisCounterClient, RemoteCount, RemoteWindowStore};
pub use limiter::LocalWindowStore;
pub use rules::ProtectedRoutes;

#[cfg(test)]
pub(crate) use distributed::tests as test_support;
