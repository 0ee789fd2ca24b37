//! HTTP surface: client identity, the admission middleware, and the server.

mod identity;
mod middleware;
mod routes;
mod server;

pub use identity::{normalize_address, resolve_client_address, UNKNOWN_CLIENT};
pub use middleware::{
    admit_request, apply_rate_limit_headers, rejection, with_admission, AdmissionState,
    REJECTION_MESSAGE, X_RATELIMIT_LIMIT, X_RATELIMIT_REMAINING, X_RATELIMIT_RESET,
};
pub use routes::application;
pub use server::HttpServer;
