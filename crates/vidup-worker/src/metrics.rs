//! Job metrics. Recorded through the `metrics` facade; the API binary installs the exporter.

use metrics::{counter, gauge, histogram};
use vidup_models::{JobKind, Stage};

pub mod names {
    pub const JOBS_SUBMITTED_TOTAL: &str = "vidup_jobs_submitted_total";
    pub const JOBS_FINISHED_TOTAL: &str = "vidup_jobs_finished_total";
    pub const JOBS_ACTIVE: &str = "vidup_jobs_active";
    pub const STAGE_DURATION_SECONDS: &str = "vidup_stage_duration_seconds";
    pub const LIVE_UPDATES_DROPPED_TOTAL: &str = "vidup_live_updates_dropped_total";
    pub const JOBS_SWEPT_TOTAL: &str = "vidup_jobs_swept_total";
}

pub fn record_job_submitted(kind: JobKind) {
    counter!(names::JOBS_SUBMITTED_TOTAL, "kind" => kind.as_str()).increment(1);
    gauge!(names::JOBS_ACTIVE).increment(1.0);
}

/// `outcome` is the terminal stage.
pub fn record_job_finished(kind: JobKind, outcome: Stage) {
    counter!(
        names::JOBS_FINISHED_TOTAL,
        "kind" => kind.as_str(),
        "outcome" => outcome.as_str()
    )
    .increment(1);
    gauge!(names::JOBS_ACTIVE).decrement(1.0);
}

pub fn record_stage_duration(stage: Stage, tool: &str, duration_secs: f64) {
    histogram!(
        names::STAGE_DURATION_SECONDS,
        "stage" => stage.as_str(),
        "tool" => tool.to_string()
    )
    .record(duration_secs);
}

pub fn record_update_dropped() {
    counter!(names::LIVE_UPDATES_DROPPED_TOTAL).increment(1);
}

pub fn record_jobs_swept(count: usize) {
    counter!(names::JOBS_SWEPT_TOTAL).increment(count as u64);
}
