//! Worker configuration.

use std::path::PathBuf;
use std::time::Duration;

use vidup_models::encoding::{
    DEFAULT_SCENE_THRESHOLD, DEFAULT_STORYBOARD_HEIGHT, DEFAULT_STORYBOARD_WIDTH, TARGET_HEIGHT, TARGET_WIDTH,
};

/// Worker configuration.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Parent directory of per-job scratch directories
    pub work_dir: PathBuf,
    /// How long terminal jobs stay queryable
    pub job_retention: Duration,
    /// Interval between retention sweeps
    pub sweep_interval: Duration,
    /// Time between SIGTERM and SIGKILL when cancelling a tool
    pub kill_grace: Duration,
    /// Per-subscriber live update buffer
    pub subscriber_buffer: usize,
    /// Start a storyboard job after every completed video job
    pub auto_storyboard: bool,
    /// Output frame of horizontal conversion
    pub target_width: u32,
    pub target_height: u32,
    /// Defaults for follow-up storyboards
    pub storyboard_threshold: f64,
    pub storyboard_width: u32,
    pub storyboard_height: u32,
    /// How long shutdown waits for cancelled jobs to clean up
    pub shutdown_timeout: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            work_dir: PathBuf::from("./tmp/jobs"),
            job_retention: Duration::from_secs(3600),
            sweep_interval: Duration::from_secs(60),
            kill_grace: Duration::from_secs(5),
            subscriber_buffer: 64,
            auto_storyboard: true,
            target_width: TARGET_WIDTH,
            target_height: TARGET_HEIGHT,
            storyboard_threshold: DEFAULT_SCENE_THRESHOLD,
            storyboard_width: DEFAULT_STORYBOARD_WIDTH,
            storyboard_height: DEFAULT_STORYBOARD_HEIGHT,
            shutdown_timeout: Duration::from_secs(30),
        }
    }
}

impl WorkerConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            work_dir: std::env::var("WORKER_WORK_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.work_dir),
            job_retention: Duration::from_secs(
                std::env::var("JOB_RETENTION_SECS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(3600),
            ),
            sweep_interval: Duration::from_secs(
                std::env::var("JOB_SWEEP_INTERVAL_SECS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(60)
                    .max(1),
            ),
            kill_grace: Duration::from_secs(
                std::env::var("KILL_GRACE_PERIOD_SECS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(5),
            ),
            subscriber_buffer: std::env::var("SUBSCRIBER_BUFFER")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(64usize)
                .max(1),
            auto_storyboard: std::env::var("AUTO_STORYBOARD")
                .map(|v| v == "true" || v == "1")
                .unwrap_or(true),
            target_width: std::env::var("TARGET_WIDTH")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(TARGET_WIDTH),
            target_height: std::env::var("TARGET_HEIGHT")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(TARGET_HEIGHT),
            storyboard_threshold: std::env::var("STORYBOARD_THRESHOLD")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(DEFAULT_SCENE_THRESHOLD),
            storyboard_width: std::env::var("STORYBOARD_WIDTH")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(DEFAULT_STORYBOARD_WIDTH),
            storyboard_height: std::env::var("STORYBOARD_HEIGHT")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(DEFAULT_STORYBOARD_HEIGHT),
            shutdown_timeout: Duration::from_secs(
                std::env::var("WORKER_SHUTDOWN_TIMEOUT")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(30),
            ),
        }
    }
}
