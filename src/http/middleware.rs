//! Admission middleware for the HTTP application.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::{ConnectInfo, Request, State};
use axum::http::header::{HeaderName, CACHE_CONTROL, RETRY_AFTER};
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::{Json, Router};
use serde::Serialize;
use tracing::{info, instrument, trace};

use super::identity::resolve_client_address;
use crate::ratelimit::{AdmissionController, Decision, ProtectedRoutes};

pub const X_RATELIMIT_LIMIT: HeaderName = HeaderName::from_static("x-ratelimit-limit");
pub const X_RATELIMIT_REMAINING: HeaderName = HeaderName::from_static("x-ratelimit-remaining");
pub const X_RATELIMIT_RESET: HeaderName = HeaderName::from_static("x-ratelimit-reset");

/// Message returned to throttled clients.
pub const REJECTION_MESSAGE: &str = "Too many refresh requests";

/// Shared state for the admission middleware.
#[derive(Clone)]
pub struct AdmissionState {
    /// The decision point
    pub controller: Arc<AdmissionController>,
    /// Which requests consume quota
    pub routes: Arc<ProtectedRoutes>,
}

impl AdmissionState {
    pub fn new(controller: Arc<AdmissionController>, routes: ProtectedRoutes) -> Self {
        Self {
            controller,
            routes: Arc::new(routes),
        }
    }
}

#[derive(Serialize)]
struct Rejection {
    error: &'static str,
}

/// Wrap an application router with the admission layer.
pub fn with_admission(app: Router, state: AdmissionState) -> Router {
    app.layer(middleware::from_fn_with_state(state, admit_request))
}

/// Gate one request.
///
/// Requests outside the protected routes, or with a method that does not consume
/// quota, are forwarded untouched. Admitted requests are forwarded and their
/// responses carry the rate limit headers. Denied requests never reach the
/// application.
#[instrument(
    skip_all,
    fields(
        method = %request.method(),
        path = %request.uri().path()
    )
)]
pub async fn admit_request(
    State(state): State<AdmissionState>,
    request: Request,
    next: Next,
) -> Response {
    let path = request.uri().path().to_string();

    if !state.routes.applies_to(request.method().as_str(), &path) {
        trace!("Request not subject to admission control");
        return next.run(request).await;
    }

    let connect = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|info| info.0);
    let client = resolve_client_address(request.headers(), connect);

    let decision = state.controller.check(&client, &path).await;

    if !decision.allowed {
        info!(
            client = %client,
            retry_after_secs = decision.retry_after_secs,
            source = %decision.source,
            "Request throttled"
        );
        return rejection(&decision);
    }

    let mut response = next.run(request).await;
    apply_rate_limit_headers(response.headers_mut(), &decision);
    response
}

/// Attach the limit, remaining quota, and reset time (unix seconds).
pub fn apply_rate_limit_headers(headers: &mut HeaderMap, decision: &Decision) {
    headers.insert(X_RATELIMIT_LIMIT, HeaderValue::from(decision.limit));
    headers.insert(X_RATELIMIT_REMAINING, HeaderValue::from(decision.remaining));
    headers.insert(X_RATELIMIT_RESET, HeaderValue::from(decision.reset_at_secs()));
}

/// Build the 429 response for a denied request.
pub fn rejection(decision: &Decision) -> Response {
    let mut response = (
        StatusCode::TOO_MANY_REQUESTS,
        Json(Rejection {
            error: REJECTION_MESSAGE,
        }),
    )
        .into_response();

    let headers = response.headers_mut();
    headers.insert(RETRY_AFTER, HeaderValue::from(decision.retry_after_secs));
    headers.insert(CACHE_CONTROL, HeaderValue::from_static("no-store"));
    apply_rate_limit_headers(headers, decision);
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RateLimitSettings;
    use crate::http::routes::application;
    use crate::ratelimit::test_support::FailingCounter;
    use crate::ratelimit::{DecisionSource, RemoteWindowStore};
    use axum::body::{to_bytes, Body};
    use axum::http::Method;
    use std::time::Duration;
    use tower::ServiceExt;

    fn app_with(controller: AdmissionController) -> Router {
        let state = AdmissionState::new(Arc::new(controller), ProtectedRoutes::default());
        with_admission(application(), state)
    }

    fn app() -> Router {
        app_with(AdmissionController::local_only(RateLimitSettings::default()))
    }

    fn refresh(client: &str) -> Request {
        Request::builder()
            .method(Method::POST)
            .uri("/api/refresh")
            .header("x-forwarded-for", client)
            .body(Body::empty())
            .unwrap()
    }

    fn header(response: &Response, name: &str) -> Option<String> {
        response
            .headers()
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.to_string())
    }

    #[tokio::test]
    async fn test_admitted_requests_carry_headers() {
        let app = app();

        for expected in ["4", "3", "2", "1", "0"] {
            let response = app.clone().oneshot(refresh("203.0.113.7")).await.unwrap();
            assert_eq!(response.status(), StatusCode::OK);
            assert_eq!(header(&response, "x-ratelimit-limit").as_deref(), Some("5"));
            assert_eq!(header(&response, "x-ratelimit-remaining").as_deref(), Some(expected));
            assert!(header(&response, "x-ratelimit-reset").is_some());
        }
    }

    #[tokio::test]
    async fn test_sixth_request_is_rejected() {
        let app = app();
        for _ in 0..5 {
            app.clone().oneshot(refresh("203.0.113.7")).await.unwrap();
        }

        let response = app.clone().oneshot(refresh("203.0.113.7")).await.unwrap();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);

        let retry_after: u64 = header(&response, "retry-after").unwrap().parse().unwrap();
        assert!((1..=60).contains(&retry_after));
        assert_eq!(header(&response, "cache-control").as_deref(), Some("no-store"));
        assert_eq!(header(&response, "x-ratelimit-remaining").as_deref(), Some("0"));
        assert_eq!(header(&response, "x-ratelimit-limit").as_deref(), Some("5"));

        let body = to_bytes(response.into_body(), 1024).await.unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json, serde_json::json!({ "error": "Too many refresh requests" }));
    }

    #[tokio::test]
    async fn test_other_clients_unaffected() {
        let app = app();
        for _ in 0..6 {
            app.clone().oneshot(refresh("203.0.113.7")).await.unwrap();
        }

        let response = app.clone().oneshot(refresh("203.0.113.8")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(header(&response, "x-ratelimit-remaining").as_deref(), Some("4"));
    }

    #[tokio::test]
    async fn test_safe_methods_bypass() {
        let app = app();
        for _ in 0..10 {
            let request = Request::builder()
                .method(Method::GET)
                .uri("/health")
                .body(Body::empty())
                .unwrap();
            let response = app.clone().oneshot(request).await.unwrap();
            assert_eq!(response.status(), StatusCode::OK);
            assert!(header(&response, "x-ratelimit-limit").is_none());
        }
    }

    #[tokio::test]
    async fn test_get_on_protected_route_is_not_counted() {
        let controller = Arc::new(AdmissionController::local_only(RateLimitSettings::default()));
        let state = AdmissionState::new(controller.clone(), ProtectedRoutes::default());
        let app = with_admission(application(), state);

        let request = Request::builder()
            .method(Method::GET)
            .uri("/api/refresh")
            .body(Body::empty())
            .unwrap();
        let response = app.oneshot(request).await.unwrap();

        assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
        assert_eq!(controller.local().tracked_keys(), 0);
    }

    #[tokio::test]
    async fn test_connect_info_takes_priority() {
        let controller = Arc::new(AdmissionController::local_only(RateLimitSettings::default()));
        let state = AdmissionState::new(controller.clone(), ProtectedRoutes::default());
        let app = with_admission(application(), state);

        let mut request = refresh("198.51.100.1");
        let peer: SocketAddr = "192.0.2.10:40000".parse().unwrap();
        request.extensions_mut().insert(ConnectInfo(peer));
        app.oneshot(request).await.unwrap();

        assert!(controller.local().entry("192.0.2.10:/api/refresh").is_some());
        assert!(controller.local().entry("198.51.100.1:/api/refresh").is_none());
    }

    #[tokio::test]
    async fn test_unresolvable_clients_share_unknown_bucket() {
        let app = app();
        for _ in 0..5 {
            let response = app.clone().oneshot(refresh("not-an-ip")).await.unwrap();
            assert_eq!(response.status(), StatusCode::OK);
        }

        let response = app.clone().oneshot(refresh("also-bad")).await.unwrap();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    }

    #[tokio::test]
    async fn test_remote_outage_still_enforces() {
        let remote = RemoteWindowStore::new(
            Arc::new(FailingCounter),
            Duration::from_millis(50),
            Duration::from_millis(50),
        );
        let app = app_with(AdmissionController::with_remote(RateLimitSettings::default(), remote));

        for _ in 0..5 {
            let response = app.clone().oneshot(refresh("203.0.113.7")).await.unwrap();
            assert_eq!(response.status(), StatusCode::OK);
        }
        let response = app.clone().oneshot(refresh("203.0.113.7")).await.unwrap();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    }

    #[test]
    fn test_rejection_reset_header_in_seconds() {
        let decision = Decision::deny(5, 1_700_000_060_500, 1_700_000_001_000, DecisionSource::Local);
        let response = rejection(&decision);

        assert_eq!(header(&response, "x-ratelimit-reset").as_deref(), Some("1700000061"));
        assert_eq!(header(&response, "retry-after").as_deref(), Some("60"));
    }
}
