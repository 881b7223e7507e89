//! Axum HTTP API server.
//!
//! This crate provides:
//! - Submission endpoints for download, upload, split, convert and storyboard jobs
//! - Snapshot, list and cancellation endpoints
//! - Live job updates over WebSocket
//! - Security headers, request ids and Prometheus metrics

pub mod config;
pub mod error;
pub mod handlers;
pub mod metrics;
pub mod middleware;
pub mod routes;
pub mod security;
pub mod state;
pub mod ws;

pub use config::ApiConfig;
pub use error::{ApiError, ApiResult};
pub use routes::create_router;
pub use state::AppState;
