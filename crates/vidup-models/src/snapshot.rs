//! Immutable job snapshots.
//!
//! A snapshot is what every reader sees: the REST endpoints return it as-is
//! and the live-update channel pushes it on every change. Field order and
//! metadata key order are fixed, so a terminal snapshot always serializes to
//! the same bytes.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::job::{Job, JobId, JobKind, Stage};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct JobSnapshot {
    #[serde(rename = "jobId")]
    pub job_id: JobId,
    pub kind: JobKind,
    pub stage: Stage,
    pub percent: f64,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub speed: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub eta: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub s3_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    #[schemars(with = "Option<std::collections::BTreeMap<String, serde_json::Value>>")]
    pub metadata: Option<Map<String, Value>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(rename = "cancelRequested")]
    pub cancel_requested: bool,
    #[serde(rename = "createdAt")]
    pub created_at: DateTime<Utc>,
    #[serde(rename = "updatedAt")]
    pub updated_at: DateTime<Utc>,
    /// Per-job change counter. Strictly increases with every observable change.
    pub seq: u64,
}

impl JobSnapshot {
    pub fn is_terminal(&self) -> bool {
        self.stage.is_terminal()
    }
}

impl From<&Job> for JobSnapshot {
    fn from(job: &Job) -> Self {
        Self {
            job_id: job.id.clone(),
            kind: job.kind,
            stage: job.stage,
            percent: job.progress.percent,
            message: job.progress.message.clone(),
            speed: job.progress.speed.clone(),
            eta: job.progress.eta.clone(),
            s3_url: job.result.as_ref().map(|r| r.url.clone()),
            metadata: job.result.as_ref().map(|r| r.client_metadata()),
            error: job.failure.clone(),
            url: job.source.clone(),
            cancel_requested: job.cancel_requested,
            created_at: job.created_at,
            updated_at: job.updated_at,
            seq: job.seq,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::JobResult;

    #[test]
    fn test_snapshot_wire_names() {
        let mut job = Job::new(JobKind::FileUpload, Some("clip.mov".to_string()));
        job.enter_stage(Stage::Upload, "Uploading").unwrap();
        job.complete(
            JobResult::new("https://bucket/videos/a.mp4")
                .with_key("videos/a.mp4")
                .with_dimensions(1920, 1080)
                .with_meta("title", "clip"),
            "Upload complete",
        )
        .unwrap();

        let value = serde_json::to_value(JobSnapshot::from(&job)).unwrap();
        assert_eq!(value["jobId"], job.id.as_str());
        assert_eq!(value["kind"], "file-upload");
        assert_eq!(value["stage"], "complete");
        assert_eq!(value["percent"], 100.0);
        assert_eq!(value["s3_url"], "https://bucket/videos/a.mp4");
        assert_eq!(value["metadata"]["s3_key"], "videos/a.mp4");
        assert_eq!(value["metadata"]["width"], 1920);
        assert_eq!(value["cancelRequested"], false);
        assert!(value.get("error").is_none());
        assert!(value.get("speed").is_none());
    }

    #[test]
    fn test_terminal_snapshot_stable_bytes() {
        let mut job = Job::new(JobKind::Split, None);
        job.fail("ffmpeg exited with code 1").unwrap();
        let a = serde_json::to_vec(&JobSnapshot::from(&job)).unwrap();
        let b = serde_json::to_vec(&JobSnapshot::from(&job)).unwrap();
        assert_eq!(a, b);
    }
}
