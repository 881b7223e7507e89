//! Job aggregate and its stage state machine.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use uuid::Uuid;

use crate::error::{ModelError, ModelResult};
use crate::progress::{clamp_percent, Progress, ProgressUpdate};

/// Unique identifier for a job.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, JsonSchema)]
#[serde(transparent)]
pub struct JobId(pub String);

impl JobId {
    /// Generate a new random job ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Create from an existing string.
    pub fn from_string(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    /// Get the inner string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for JobId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// What a job does. Fixed at creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "kebab-case")]
pub enum JobKind {
    /// Fetch a remote video, re-orient if needed, store it.
    UrlDownload,
    /// Re-orient a client-provided file and store it.
    FileUpload,
    /// Cut a time range out of a stored video.
    Split,
    /// Re-orient an already stored video.
    Convert,
    /// Extract scene-change frames from a stored video.
    Storyboard,
}

impl JobKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobKind::UrlDownload => "url-download",
            JobKind::FileUpload => "file-upload",
            JobKind::Split => "split",
            JobKind::Convert => "convert",
            JobKind::Storyboard => "storyboard",
        }
    }

    /// Working stages in execution order, excluding `pending` and terminal stages.
    pub fn pipeline(&self) -> &'static [Stage] {
        match self {
            JobKind::UrlDownload | JobKind::Convert => &[Stage::Download, Stage::Upload],
            JobKind::FileUpload => &[Stage::Upload],
            JobKind::Split => &[Stage::Split],
            JobKind::Storyboard => &[Stage::Storyboard],
        }
    }

    /// Position of a stage in this kind's pipeline. `pending` is 0.
    fn position(&self, stage: Stage) -> Option<usize> {
        if stage == Stage::Pending {
            return Some(0);
        }
        self.pipeline().iter().position(|s| *s == stage).map(|i| i + 1)
    }
}

impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Job stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    #[default]
    Pending,
    Download,
    Upload,
    Split,
    Storyboard,
    Complete,
    Error,
    Cancelled,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Pending => "pending",
            Stage::Download => "download",
            Stage::Upload => "upload",
            Stage::Split => "split",
            Stage::Storyboard => "storyboard",
            Stage::Complete => "complete",
            Stage::Error => "error",
            Stage::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Stage::Complete | Stage::Error | Stage::Cancelled)
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Output of a completed job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct JobResult {
    /// Public or presigned URL of the primary output.
    pub url: String,
    /// Storage key of the primary output.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub width: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub height: Option<u32>,
    /// Derived metadata (title, duration, thumbnail, split range, ...).
    #[serde(default)]
    #[schemars(with = "std::collections::BTreeMap<String, serde_json::Value>")]
    pub metadata: Map<String, Value>,
}

impl JobResult {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            key: None,
            width: None,
            height: None,
            metadata: Map::new(),
        }
    }

    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.key = Some(key.into());
        self
    }

    pub fn with_dimensions(mut self, width: u32, height: u32) -> Self {
        self.width = Some(width);
        self.height = Some(height);
        self
    }

    pub fn with_meta(mut self, name: &str, value: impl Into<Value>) -> Self {
        self.metadata.insert(name.to_string(), value.into());
        self
    }

    /// Metadata as exposed to clients: derived metadata plus key and dimensions.
    pub fn client_metadata(&self) -> Map<String, Value> {
        let mut out = self.metadata.clone();
        if let Some(key) = &self.key {
            out.insert("s3_key".to_string(), Value::from(key.clone()));
        }
        if let Some(w) = self.width {
            out.insert("width".to_string(), Value::from(w));
        }
        if let Some(h) = self.height {
            out.insert("height".to_string(), Value::from(h));
        }
        out
    }
}

/// Outcome of a cancellation request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelOutcome {
    /// The flag was set by this call.
    Requested,
    /// A previous call already set the flag.
    AlreadyRequested,
    /// The job had already reached a terminal stage; nothing changed.
    AlreadyTerminal,
}

/// The job aggregate.
///
/// Mutators enforce the stage machine: stages only move forward along the
/// kind's pipeline, `error`/`cancelled` are reachable from any non-terminal
/// stage, and nothing changes once a terminal stage is reached. Every
/// observable change bumps `seq`.
#[derive(Debug, Clone, PartialEq)]
pub struct Job {
    pub id: JobId,
    pub kind: JobKind,
    pub stage: Stage,
    pub progress: Progress,
    pub result: Option<JobResult>,
    pub failure: Option<String>,
    pub cancel_requested: bool,
    /// Human-readable source (URL or file name), for operational views.
    pub source: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub seq: u64,
}

impl Job {
    pub fn new(kind: JobKind, source: Option<String>) -> Self {
        Self::with_id(JobId::new(), kind, source)
    }

    pub fn with_id(id: JobId, kind: JobKind, source: Option<String>) -> Self {
        let now = Utc::now();
        Self {
            id,
            kind,
            stage: Stage::Pending,
            progress: Progress::starting("Job queued"),
            result: None,
            failure: None,
            cancel_requested: false,
            source,
            created_at: now,
            updated_at: now,
            seq: 0,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.stage.is_terminal()
    }

    fn ensure_active(&self) -> ModelResult<()> {
        if self.stage.is_terminal() {
            return Err(ModelError::AlreadyTerminal(self.stage));
        }
        Ok(())
    }

    fn touch(&mut self) {
        self.seq += 1;
        self.updated_at = Utc::now();
    }

    /// Move to the next working stage. Percent resets to 0.
    pub fn enter_stage(&mut self, stage: Stage, message: impl Into<String>) -> ModelResult<()> {
        self.ensure_active()?;
        let invalid = ModelError::InvalidTransition {
            from: self.stage,
            to: stage,
        };
        let (Some(current), Some(next)) = (self.kind.position(self.stage), self.kind.position(stage))
        else {
            return Err(invalid);
        };
        if next <= current {
            return Err(invalid);
        }
        self.stage = stage;
        self.progress = Progress::starting(message);
        self.touch();
        Ok(())
    }

    /// Merge a progress update into the current stage.
    ///
    /// Percent never decreases within a stage. Returns whether anything changed.
    pub fn apply_progress(&mut self, update: &ProgressUpdate) -> ModelResult<bool> {
        self.ensure_active()?;
        let mut next = self.progress.clone();
        if let Some(p) = update.percent {
            next.percent = next.percent.max(clamp_percent(p));
        }
        if let Some(m) = &update.message {
            next.message = m.clone();
        }
        if let Some(s) = &update.speed {
            next.speed = Some(s.clone());
        }
        if let Some(e) = &update.eta {
            next.eta = Some(e.clone());
        }
        if next == self.progress {
            return Ok(false);
        }
        self.progress = next;
        self.touch();
        Ok(true)
    }

    /// Finish successfully. Only valid from the last working stage.
    pub fn complete(&mut self, result: JobResult, message: impl Into<String>) -> ModelResult<()> {
        self.ensure_active()?;
        let last = self.kind.pipeline().last().copied().unwrap_or(Stage::Pending);
        if self.stage != last {
            return Err(ModelError::InvalidTransition {
                from: self.stage,
                to: Stage::Complete,
            });
        }
        self.stage = Stage::Complete;
        self.progress = Progress {
            percent: 100.0,
            message: message.into(),
            speed: None,
            eta: None,
        };
        self.result = Some(result);
        self.touch();
        Ok(())
    }

    /// Finish with a failure. Valid from any non-terminal stage.
    pub fn fail(&mut self, cause: impl Into<String>) -> ModelResult<()> {
        self.ensure_active()?;
        let cause = cause.into();
        let cause = if cause.trim().is_empty() {
            format!("{} stage failed", self.stage)
        } else {
            cause
        };
        self.stage = Stage::Error;
        self.progress.message = format!("Error: {}", cause);
        self.progress.speed = None;
        self.progress.eta = None;
        self.failure = Some(cause);
        self.touch();
        Ok(())
    }

    /// Finish as cancelled. Valid from any non-terminal stage.
    pub fn cancel(&mut self) -> ModelResult<()> {
        self.ensure_active()?;
        self.stage = Stage::Cancelled;
        self.progress.message = "Job cancelled".to_string();
        self.progress.speed = None;
        self.progress.eta = None;
        self.touch();
        Ok(())
    }

    /// Set the cancellation flag. Set once, never unset; a no-op once terminal.
    pub fn request_cancel(&mut self) -> CancelOutcome {
        if self.is_terminal() {
            return CancelOutcome::AlreadyTerminal;
        }
        if self.cancel_requested {
            return CancelOutcome::AlreadyRequested;
        }
        self.cancel_requested = true;
        self.touch();
        CancelOutcome::Requested
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn url_job() -> Job {
        Job::new(JobKind::UrlDownload, Some("https://example.com/v".to_string()))
    }

    #[test]
    fn test_pipeline_forward_only() {
        let mut job = url_job();
        job.enter_stage(Stage::Download, "Downloading").unwrap();
        job.enter_stage(Stage::Upload, "Uploading").unwrap();

        let err = job.enter_stage(Stage::Download, "again").unwrap_err();
        assert_eq!(
            err,
            ModelError::InvalidTransition {
                from: Stage::Upload,
                to: Stage::Download
            }
        );
    }

    #[test]
    fn test_stage_outside_pipeline_rejected() {
        let mut job = Job::new(JobKind::Split, None);
        assert!(job.enter_stage(Stage::Download, "x").is_err());
        assert!(job.enter_stage(Stage::Split, "Splitting").is_ok());
    }

    #[test]
    fn test_percent_non_decreasing_within_stage() {
        let mut job = url_job();
        job.enter_stage(Stage::Download, "Downloading").unwrap();
        job.apply_progress(&ProgressUpdate::percent(40.0)).unwrap();
        job.apply_progress(&ProgressUpdate::percent(10.0)).unwrap();
        assert_eq!(job.progress.percent, 40.0);

        // Indeterminate update keeps the percent.
        job.apply_progress(&ProgressUpdate::message("Merging formats")).unwrap();
        assert_eq!(job.progress.percent, 40.0);
        assert_eq!(job.progress.message, "Merging formats");

        job.enter_stage(Stage::Upload, "Uploading").unwrap();
        assert_eq!(job.progress.percent, 0.0);
    }

    #[test]
    fn test_unchanged_progress_does_not_bump_seq() {
        let mut job = url_job();
        job.enter_stage(Stage::Download, "Downloading").unwrap();
        job.apply_progress(&ProgressUpdate::percent(5.0)).unwrap();
        let seq = job.seq;
        assert!(!job.apply_progress(&ProgressUpdate::percent(5.0)).unwrap());
        assert_eq!(job.seq, seq);
    }

    #[test]
    fn test_complete_requires_last_stage() {
        let mut job = url_job();
        job.enter_stage(Stage::Download, "Downloading").unwrap();
        assert!(job.complete(JobResult::new("u"), "done").is_err());

        job.enter_stage(Stage::Upload, "Uploading").unwrap();
        job.complete(JobResult::new("https://cdn/x.mp4"), "done").unwrap();
        assert_eq!(job.stage, Stage::Complete);
        assert!(job.result.is_some());
        assert!(job.failure.is_none());
    }

    #[test]
    fn test_terminal_is_immutable() {
        let mut job = url_job();
        job.fail("yt-dlp exited with code 1").unwrap();
        let frozen = job.clone();

        assert!(job.cancel().is_err());
        assert!(job.fail("other").is_err());
        assert!(job.apply_progress(&ProgressUpdate::percent(50.0)).is_err());
        assert_eq!(job.request_cancel(), CancelOutcome::AlreadyTerminal);
        assert_eq!(job, frozen);
    }

    #[test]
    fn test_request_cancel_idempotent() {
        let mut job = url_job();
        assert_eq!(job.request_cancel(), CancelOutcome::Requested);
        assert_eq!(job.request_cancel(), CancelOutcome::AlreadyRequested);
        assert!(job.cancel_requested);

        job.cancel().unwrap();
        assert_eq!(job.stage, Stage::Cancelled);
        assert!(job.result.is_none() && job.failure.is_none());
    }

    #[test]
    fn test_empty_failure_message_gets_default() {
        let mut job = url_job();
        job.enter_stage(Stage::Download, "Downloading").unwrap();
        job.fail("  ").unwrap();
        assert_eq!(job.failure.as_deref(), Some("download stage failed"));
    }

    #[test]
    fn test_kind_serialization() {
        let json = serde_json::to_string(&JobKind::UrlDownload).unwrap();
        assert_eq!(json, "\"url-download\"");
        let stage: Stage = serde_json::from_str("\"storyboard\"").unwrap();
        assert_eq!(stage, Stage::Storyboard);
    }
}
