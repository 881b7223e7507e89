//! API routes.

use axum::extract::DefaultBodyLimit;
use axum::middleware;
use axum::routing::{get, post};
use axum::Router;
use metrics_exporter_prometheus::PrometheusHandle;
use tower_http::limit::RequestBodyLimitLayer;

use crate::handlers::{
    cancel_job, get_job, health, list_jobs, ready, start_convert, start_download, start_split, start_storyboard,
    start_upload, storyboard_frame, storyboard_frames, storyboard_status,
};
use crate::metrics::metrics_middleware;
use crate::middleware::{cors_layer, request_id, request_logging, security_headers};
use crate::state::AppState;
use crate::ws::ws_job;

/// Create the API router.
pub fn create_router(state: AppState, metrics_handle: Option<PrometheusHandle>) -> Router {
    let submit_routes = Router::new()
        .route("/download", post(start_download))
        .route("/split", post(start_split))
        .route("/convert", post(start_convert))
        .route("/storyboard", post(start_storyboard))
        // Uploads are bounded by the outer body limit only
        .route("/upload", post(start_upload).layer(DefaultBodyLimit::disable()));

    let job_routes = Router::new()
        .route("/job/:job_id", get(get_job))
        .route("/job/:job_id/cancel", post(cancel_job))
        .route("/jobs", get(list_jobs));

    let storyboard_routes = Router::new()
        .route("/storyboard/:job_id/status", get(storyboard_status))
        .route("/storyboard/:job_id/frames", get(storyboard_frames))
        .route("/storyboard/:job_id/frame/:index", get(storyboard_frame));

    let api_routes = Router::new().merge(submit_routes)
        .merge(job_routes)
        .merge(storyboard_routes);

    let ws_routes = Router::new().route("/ws/:job_id", get(ws_job));

    let health_routes = Router::new()
        .route("/health", get(health))
        .route("/healthz", get(health))
        .route("/ready", get(ready));

    // Metrics endpoint (if enabled)
    let metrics_routes = if let Some(handle) = metrics_handle {
        Router::new().route("/metrics", get(move || async move { handle.render() }))
    } else {
        Router::new()
    };

    Router::new()
        .nest("/api", api_routes)
        .merge(ws_routes)
        .merge(health_routes)
        .merge(metrics_routes)
        .layer(RequestBodyLimitLayer::new(state.config.max_body_size))
        .layer(middleware::from_fn(metrics_middleware))
        .layer(middleware::from_fn(security_headers))
        .layer(middleware::from_fn(request_id))
        .layer(middleware::from_fn(request_logging))
        .layer(cors_layer(&state.config.cors_origins))
        .with_state(state)
}
