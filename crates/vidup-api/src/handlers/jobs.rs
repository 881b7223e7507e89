//! Snapshot and cancellation handlers.
//!
//! Provides REST API endpoints for:
//! - Getting a job snapshot (polling fallback when the WebSocket disconnects)
//! - Listing jobs for operational views
//! - Requesting cancellation

use axum::extract::{Path, Query, State};
use axum::Json;
use serde::{Deserialize, Serialize};
use tracing::info;

use vidup_models::{JobId, JobSnapshot};

use crate::error::{ApiError, ApiResult};
use crate::security::is_valid_job_id;
use crate::state::AppState;

/// Query parameters for the job list.
#[derive(Debug, Default, Deserialize)]
pub struct ListJobsQuery {
    /// Include complete, failed and cancelled jobs.
    #[serde(default)]
    pub include_completed: bool,
}

#[derive(Debug, Serialize)]
pub struct ListJobsResponse {
    pub jobs: Vec<JobSnapshot>,
    pub count: usize,
}

/// Cancellation response.
#[derive(Debug, Serialize)]
pub struct CancelResponse {
    pub job_id: String,
    pub status: String,
    pub message: String,
    pub job: JobSnapshot,
}

fn parse_job_id(raw: &str) -> ApiResult<JobId> {
    if !is_valid_job_id(raw) {
        return Err(ApiError::not_found("Job not found"));
    }
    Ok(JobId::from_string(raw))
}

/// GET /api/job/:job_id
///
/// Returns:
/// - 200: Current snapshot
/// - 404: Unknown or expired job
pub async fn get_job(State(state): State<AppState>, Path(job_id): Path<String>) -> ApiResult<Json<JobSnapshot>> {
    let id = parse_job_id(&job_id)?;
    Ok(Json(state.orchestrator.get(&id)?))
}

/// GET /api/jobs?include_completed=bool
///
/// Newest first.
pub async fn list_jobs(
    State(state): State<AppState>,
    Query(query): Query<ListJobsQuery>,
) -> Json<ListJobsResponse> {
    let jobs = state.orchestrator.list(query.include_completed);
    Json(ListJobsResponse {
        count: jobs.len(),
        jobs,
    })
}

/// POST /api/job/:job_id/cancel
///
/// Returns immediately; the job reaches `cancelled` asynchronously. Repeated
/// calls and calls on finished jobs succeed without changing anything.
pub async fn cancel_job(State(state): State<AppState>, Path(job_id): Path<String>) -> ApiResult<Json<CancelResponse>> {
    let id = parse_job_id(&job_id)?;
    let snapshot = state.orchestrator.cancel(&id)?;

    let (status, message) = if snapshot.is_terminal() {
        (snapshot.stage.as_str().to_string(), "Job already finished".to_string())
    } else {
        info!(job_id = %id, "Cancel requested via API");
        ("cancelled".to_string(), "Job cancellation requested".to_string())
    };

    Ok(Json(CancelResponse {
        job_id: id.to_string(),
        status,
        message,
        job: snapshot,
    }))
}
