//! Storyboard read endpoints.
//!
//! Frame URLs frozen into a result eventually expire, so these endpoints hand
//! out freshly resolved URLs from the stored frame keys. A job id may name
//! the storyboard job itself or a job whose follow-up storyboard it started.

use axum::extract::{Path, State};
use axum::response::Redirect;
use axum::Json;
use serde::Serialize;
use serde_json::Value;
use tracing::warn;

use vidup_media::StoryboardFrame;
use vidup_models::{JobId, JobKind, JobSnapshot};

use crate::error::{ApiError, ApiResult};
use crate::security::is_valid_job_id;
use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct StoryboardStatusResponse {
    pub job_id: String,
    pub status: String,
    pub percent: f64,
    pub frame_count: usize,
    pub has_frames: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_job_id: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct FrameView {
    pub index: usize,
    pub timestamp: f64,
    pub time_str: String,
    pub image_url: String,
}

#[derive(Debug, Serialize)]
pub struct FramesResponse {
    pub job_id: String,
    pub frames: Vec<FrameView>,
}

/// The storyboard job behind an id, and the parent it was reached through.
struct Resolved {
    snapshot: JobSnapshot,
    parent: Option<JobId>,
}

fn resolve(state: &AppState, raw: &str) -> ApiResult<Resolved> {
    if !is_valid_job_id(raw) {
        return Err(ApiError::not_found("Job not found"));
    }
    let id = JobId::from_string(raw);
    let snapshot = state.orchestrator.get(&id)?;
    if snapshot.kind == JobKind::Storyboard {
        return Ok(Resolved { snapshot, parent: None });
    }

    let follow_up = snapshot
        .metadata
        .as_ref()
        .and_then(|m| m.get("storyboard_job_id"))
        .and_then(Value::as_str)
        .map(JobId::from_string)
        .ok_or_else(|| ApiError::not_found("Storyboard not found"))?;
    let snapshot = state
        .orchestrator
        .get(&follow_up)
        .map_err(|_| ApiError::not_found("Storyboard not found"))?;
    Ok(Resolved {
        snapshot,
        parent: Some(id),
    })
}

/// Frames of a completed storyboard; empty while it is still running.
fn frames_of(snapshot: &JobSnapshot) -> Vec<StoryboardFrame> {
    let Some(raw) = snapshot.metadata.as_ref().and_then(|m| m.get("frames")) else {
        return Vec::new();
    };
    match serde_json::from_value(raw.clone()) {
        Ok(frames) => frames,
        Err(e) => {
            warn!(job_id = %snapshot.job_id, "Unreadable storyboard frames: {}", e);
            Vec::new()
        }
    }
}

/// Fresh URL from the frame key, or the URL frozen at completion.
async fn frame_url(state: &AppState, frame: &StoryboardFrame) -> Option<String> {
    if let Some(key) = &frame.key {
        match state.orchestrator.store().url_for(key).await {
            Ok(url) => return Some(url),
            Err(e) => warn!(key = %key, "Failed to resolve frame URL: {}", e),
        }
    }
    frame.url.clone()
}

/// GET /api/storyboard/:job_id/status
pub async fn storyboard_status(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> ApiResult<Json<StoryboardStatusResponse>> {
    let Resolved { snapshot, parent } = resolve(&state, &job_id)?;
    let frame_count = frames_of(&snapshot).len();
    Ok(Json(StoryboardStatusResponse {
        job_id: snapshot.job_id.to_string(),
        status: snapshot.stage.as_str().to_string(),
        percent: snapshot.percent,
        frame_count,
        has_frames: frame_count > 0,
        parent_job_id: parent.map(|p| p.to_string()),
    }))
}

/// GET /api/storyboard/:job_id/frames
pub async fn storyboard_frames(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> ApiResult<Json<FramesResponse>> {
    let Resolved { snapshot, .. } = resolve(&state, &job_id)?;

    let mut frames = Vec::new();
    for frame in frames_of(&snapshot) {
        let Some(image_url) = frame_url(&state, &frame).await else {
            continue;
        };
        frames.push(FrameView {
            index: frame.index,
            timestamp: frame.timestamp,
            time_str: frame.time_str,
            image_url,
        });
    }

    Ok(Json(FramesResponse {
        job_id: snapshot.job_id.to_string(),
        frames,
    }))
}

/// GET /api/storyboard/:job_id/frame/:index
///
/// Redirects to a fresh URL of the frame at that position.
pub async fn storyboard_frame(
    State(state): State<AppState>,
    Path((job_id, index)): Path<(String, usize)>,
) -> ApiResult<Redirect> {
    let Resolved { snapshot, .. } = resolve(&state, &job_id)?;
    let frames = frames_of(&snapshot);
    if frames.is_empty() {
        return Err(ApiError::not_found("Storyboard frames not found"));
    }
    let frame = frames
        .get(index)
        .ok_or_else(|| ApiError::not_found("Frame index out of range"))?;

    let url = frame_url(&state, frame)
        .await
        .ok_or_else(|| ApiError::not_found("Frame image not found"))?;
    Ok(Redirect::temporary(&url))
}
