//! Job requests accepted by the orchestrator.

use std::path::PathBuf;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use url::Url;

use crate::encoding::{DEFAULT_SCENE_THRESHOLD, DEFAULT_STORYBOARD_HEIGHT, DEFAULT_STORYBOARD_WIDTH};
use crate::error::{ModelError, ModelResult};
use crate::job::JobKind;

/// Parameters for cutting a time range out of a stored video.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct SplitParams {
    /// URL or storage key of the source video.
    pub source: String,
    pub start_time: f64,
    #[serde(default)]
    pub end_time: Option<f64>,
    #[serde(default)]
    pub convert_to_horizontal: bool,
    /// Metadata of the source video, carried into the result.
    #[serde(default)]
    #[schemars(with = "Option<std::collections::BTreeMap<String, serde_json::Value>>")]
    pub original_metadata: Option<Map<String, Value>>,
}

/// Parameters for scene-change storyboard extraction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct StoryboardParams {
    /// URL or storage key of the source video.
    pub source: String,
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

impl StoryboardParams {
    pub fn for_source(source: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            threshold: DEFAULT_SCENE_THRESHOLD,
            thumbnail_width: DEFAULT_STORYBOARD_WIDTH,
            thumbnail_height: DEFAULT_STORYBOARD_HEIGHT,
        }
    }
}

/// A job submission.
#[derive(Debug, Clone, PartialEq)]
pub enum JobRequest {
    UrlDownload {
        url: String,
        /// yt-dlp format selector.
        format: Option<String>,
    },
    FileUpload {
        /// Local path of the received file. The job takes ownership and removes it.
        path: PathBuf,
        /// Client-provided file name.
        filename: String,
    },
    Split(SplitParams),
    Convert {
        /// URL or storage key of the stored video.
        source: String,
    },
    Storyboard(StoryboardParams),
}

impl JobRequest {
    pub fn kind(&self) -> JobKind {
        match self {
            JobRequest::UrlDownload { .. } => JobKind::UrlDownload,
            JobRequest::FileUpload { .. } => JobKind::FileUpload,
            JobRequest::Split(_) => JobKind::Split,
            JobRequest::Convert { .. } => JobKind::Convert,
            JobRequest::Storyboard(_) => JobKind::Storyboard,
        }
    }

    /// Source shown in snapshots.
    pub fn source_label(&self) -> String {
        match self {
            JobRequest::UrlDownload { url, .. } => url.clone(),
            JobRequest::FileUpload { filename, .. } => filename.clone(),
            JobRequest::Split(p) => p.source.clone(),
            JobRequest::Convert { source } => source.clone(),
            JobRequest::Storyboard(p) => p.source.clone(),
        }
    }

    /// Reject malformed parameters before a job exists.
    pub fn validate(&self) -> ModelResult<()> {
        match self {
            JobRequest::UrlDownload { url, .. } => validate_http_url(url),
            JobRequest::FileUpload { filename, .. } => {
                if filename.trim().is_empty() {
                    return Err(ModelError::invalid_request("File name is required"));
                }
                Ok(())
            }
            JobRequest::Split(p) => {
                require_source(&p.source)?;
                if !p.start_time.is_finite() || p.start_time < 0.0 {
                    return Err(ModelError::invalid_request("start_time must be >= 0"));
                }
                if let Some(end) = p.end_time {
                    if !end.is_finite() || end <= p.start_time {
                        return Err(ModelError::invalid_request(
                            "end_time must be greater than start_time",
                        ));
                    }
                }
                Ok(())
            }
            JobRequest::Convert { source } => require_source(source),
            JobRequest::Storyboard(p) => {
                require_source(&p.source)?;
                if !(p.threshold > 0.0 && p.threshold <= 1.0) {
                    return Err(ModelError::invalid_request("threshold must be in (0, 1]"));
                }
                for dim in [p.thumbnail_width, p.thumbnail_height] {
                    if !(16..=3840).contains(&dim) {
                        return Err(ModelError::invalid_request(
                            "thumbnail dimensions must be between 16 and 3840",
                        ));
                    }
                }
                Ok(())
            }
        }
    }
}

fn require_source(source: &str) -> ModelResult<()> {
    if source.trim().is_empty() {
        return Err(ModelError::invalid_request("Source video is required"));
    }
    Ok(())
}

/// Require an absolute http(s) URL with a host.
pub fn validate_http_url(raw: &str) -> ModelResult<()> {
    let parsed = Url::parse(raw.trim())
        .map_err(|e| ModelError::invalid_request(format!("Invalid URL: {}", e)))?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(ModelError::invalid_request("URL must use http or https"));
    }
    if parsed.host_str().map_or(true, str::is_empty) {
        return Err(ModelError::invalid_request("URL must include a host"));
    }
    Ok(())
}
