//! Turnstile - Admission Control for Token Refresh Endpoints
//!
//! This crate gates mutating requests to a small set of routes behind a fixed
//! per-client quota per time window. A shared Redis counter keeps instances in
//! agreement when available; an in-process table takes over when it is not.

pub mod config;
pub mod error;
pub mod http;
pub mod ratelimit;
