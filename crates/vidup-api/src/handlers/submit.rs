//! Job submission handlers.
//!
//! Every handler validates its input, hands a `JobRequest` to the
//! orchestrator and answers with the new job id right away. Progress is
//! followed over `/ws/:job_id` or polled at `/api/job/:job_id`.

use std::path::Path;

use axum::extract::multipart::{Field, MultipartError};
use axum::extract::{Multipart, State};
use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::io::AsyncWriteExt;
use tracing::{info, warn};
use uuid::Uuid;

use vidup_models::encoding::{DEFAULT_SCENE_THRESHOLD, DEFAULT_STORYBOARD_HEIGHT, DEFAULT_STORYBOARD_WIDTH};
use vidup_models::{JobRequest, JobSnapshot, SplitParams, StoryboardParams};

use crate::error::{ApiError, ApiResult};
use crate::metrics;
use crate::security::{sanitize_filename, validate_video_url};
use crate::state::AppState;

const UPLOAD_FIELD: &str = "file";

#[derive(Debug, Deserialize)]
pub struct DownloadRequest {
    pub url: String,
    /// yt-dlp format selector
    #[serde(default)]
    pub format: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct SplitRequest {
    /// Stored video, as a URL issued by the store or a storage key
    pub s3_url: String,
    pub start_time: f64,
    #[serde(default)]
    pub end_time: Option<f64>,
    #[serde(default)]
    pub convert_to_horizontal: bool,
    #[serde(default)]
    pub original_metadata: Option<Map<String, Value>>,
}

#[derive(Debug, Deserialize)]
pub struct ConvertRequest {
    pub s3_url: String,
}

#[derive(Debug, Deserialize)]
pub struct StoryboardRequest {
    /// Stored video URL or key, or any http(s) URL ffmpeg can read
    pub video_url: String,
    #[serde(default = "default_threshold")]
    pub threshold: f64,
    #[serde(default = "default_width")]
    pub thumbnail_width: u32,
    #[serde(default = "default_height")]
    pub thumbnail_height: u32,
}

fn default_threshold() -> f64 {
    DEFAULT_SCENE_THRESHOLD
}
fn default_width() -> u32 {
    DEFAULT_STORYBOARD_WIDTH
}
fn default_height() -> u32 {
    DEFAULT_STORYBOARD_HEIGHT
}

/// Submission response.
#[derive(Debug, Serialize)]
pub struct JobResponse {
    pub job_id: String,
    pub status: String,
    pub message: String,
}

impl JobResponse {
    fn started(snapshot: &JobSnapshot, what: &str) -> Self {
        Self {
            job_id: snapshot.job_id.to_string(),
            status: "started".to_string(),
            message: format!("{} job started. Connect to WebSocket to track progress.", what),
        }
    }
}

/// POST /api/download
pub async fn start_download(
    State(state): State<AppState>,
    Json(request): Json<DownloadRequest>,
) -> ApiResult<Json<JobResponse>> {
    let url = validate_video_url(&request.url, &state.config.allowed_hosts)
        .into_result(&state.config.allowed_hosts)
        .map_err(ApiError::BadRequest)?;

    let format = request.format.filter(|f| !f.trim().is_empty());
    let snapshot = state.orchestrator.submit(JobRequest::UrlDownload { url, format })?;
    Ok(Json(JobResponse::started(&snapshot, "Download")))
}

/// Sources the store issued are trusted; anything else is held to the same
/// rules as a download URL.
fn check_source(state: &AppState, source: &str) -> ApiResult<()> {
    let source = source.trim();
    if source.is_empty() || state.orchestrator.store().key_from_location(source).is_some() {
        // Emptiness is reported by request validation
        return Ok(());
    }
    let hosts = &state.config.allowed_hosts;
    validate_video_url(source, hosts)
        .into_result(hosts)
        .map(|_| ())
        .map_err(ApiError::BadRequest)
}

/// POST /api/split
pub async fn start_split(
    State(state): State<AppState>,
    Json(request): Json<SplitRequest>,
) -> ApiResult<Json<JobResponse>> {
    check_source(&state, &request.s3_url)?;
    let snapshot = state.orchestrator.submit(JobRequest::Split(SplitParams {
        source: request.s3_url,
        start_time: request.start_time,
        end_time: request.end_time,
        convert_to_horizontal: request.convert_to_horizontal,
        original_metadata: request.original_metadata,
    }))?;
    Ok(Json(JobResponse::started(&snapshot, "Split")))
}

/// POST /api/convert
pub async fn start_convert(
    State(state): State<AppState>,
    Json(request): Json<ConvertRequest>,
) -> ApiResult<Json<JobResponse>> {
    check_source(&state, &request.s3_url)?;
    let snapshot = state.orchestrator.submit(JobRequest::Convert {
        source: request.s3_url,
    })?;
    Ok(Json(JobResponse::started(&snapshot, "Convert")))
}

/// POST /api/storyboard
pub async fn start_storyboard(
    State(state): State<AppState>,
    Json(request): Json<StoryboardRequest>,
) -> ApiResult<Json<JobResponse>> {
    check_source(&state, &request.video_url)?;
    let snapshot = state.orchestrator.submit(JobRequest::Storyboard(StoryboardParams {
        source: request.video_url,
        threshold: request.threshold,
        thumbnail_width: request.thumbnail_width,
        thumbnail_height: request.thumbnail_height,
    }))?;
    Ok(Json(JobResponse::started(&snapshot, "Storyboard")))
}

/// POST /api/upload (multipart, field `file`)
///
/// The body is streamed to the uploads directory; the job owns the file from
/// then on and removes it when it finishes.
pub async fn start_upload(State(state): State<AppState>, mut multipart: Multipart) -> ApiResult<Json<JobResponse>> {
    let upload_dir = state.orchestrator.config().work_dir.join("uploads");

    while let Some(field) = multipart.next_field().await.map_err(multipart_error)? {
        if field.name() != Some(UPLOAD_FIELD) {
            continue;
        }

        let is_video = field.content_type().is_some_and(|ct| ct.starts_with("video/"));
        if !is_video {
            return Err(ApiError::bad_request("File must be a video"));
        }

        let filename = field
            .file_name()
            .map(|s| s.to_string())
            .filter(|s| !s.trim().is_empty())
            .unwrap_or_else(|| "upload.mp4".to_string());

        tokio::fs::create_dir_all(&upload_dir)
            .await
            .map_err(|e| ApiError::internal(format!("Failed to prepare upload directory: {}", e)))?;
        let path = upload_dir.join(format!("upload_{}_{}", Uuid::new_v4(), sanitize_filename(&filename)));

        let bytes = match receive_file(field, &path).await {
            Ok(bytes) => bytes,
            Err(e) => {
                discard(&path).await;
                return Err(e);
            }
        };
        if bytes == 0 {
            discard(&path).await;
            return Err(ApiError::bad_request("Uploaded file is empty"));
        }

        metrics::record_upload_bytes(bytes);
        info!(filename = %filename, bytes, "Upload received");

        // A rejected submission removes the file itself
        let snapshot = state.orchestrator.submit(JobRequest::FileUpload { path, filename })?;
        return Ok(Json(JobResponse::started(&snapshot, "Upload")));
    }

    Err(ApiError::bad_request("Missing multipart field 'file'"))
}

async fn receive_file(mut field: Field<'_>, path: &Path) -> ApiResult<u64> {
    let mut file = tokio::fs::File::create(path)
        .await
        .map_err(|e| ApiError::internal(format!("Failed to save uploaded file: {}", e)))?;

    let mut written = 0u64;
    while let Some(chunk) = field.chunk().await.map_err(multipart_error)? {
        file.write_all(&chunk)
            .await
            .map_err(|e| ApiError::internal(format!("Failed to save uploaded file: {}", e)))?;
        written += chunk.len() as u64;
    }
    file.flush()
        .await
        .map_err(|e| ApiError::internal(format!("Failed to save uploaded file: {}", e)))?;

    Ok(written)
}

fn multipart_error(e: MultipartError) -> ApiError {
    if e.status() == StatusCode::PAYLOAD_TOO_LARGE {
        ApiError::PayloadTooLarge
    } else {
        ApiError::bad_request(e.body_text())
    }
}

async fn discard(path: &Path) {
    if let Err(e) = tokio::fs::remove_file(path).await {
        if e.kind() != std::io::ErrorKind::NotFound {
            warn!(path = %path.display(), "Failed to remove partial upload: {}", e);
        }
    }
}
