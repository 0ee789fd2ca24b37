//! Application routes served behind the admission layer.
//!
//! The refresh handlers are placeholders for the real token endpoints.

use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{json, Value};

/// Build the application router.
pub fn application() -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/refresh", post(refresh))
        .route("/api/auth/refresh", post(refresh))
}

async fn health() -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now().to_rfc3339()
    }))
}

async fn refresh() -> Json<Value> {
    Json(json!({ "refreshed": true }))
}
