//! Structured job logging.

use tracing::{error, info, warn, Span};
use vidup_models::{JobId, JobKind};

/// Per-job logger carrying the job id and kind on every event.
#[derive(Debug, Clone)]
pub struct JobLogger {
    job_id: String,
    kind: &'static str,
}

impl JobLogger {
    pub fn new(job_id: &JobId, kind: JobKind) -> Self {
        Self {
            job_id: job_id.to_string(),
            kind: kind.as_str(),
        }
    }

    pub fn log_start(&self, message: &str) {
        info!(job_id = %self.job_id, kind = self.kind, "Job started: {}", message);
    }

    /// Stage transitions and milestones. Per-line tool progress goes to debug.
    pub fn log_progress(&self, message: &str) {
        info!(job_id = %self.job_id, kind = self.kind, "Job progress: {}", message);
    }

    pub fn log_warning(&self, message: &str) {
        warn!(job_id = %self.job_id, kind = self.kind, "Job warning: {}", message);
    }

    pub fn log_error(&self, message: &str) {
        error!(job_id = %self.job_id, kind = self.kind, "Job error: {}", message);
    }

    pub fn log_completion(&self, message: &str) {
        info!(job_id = %self.job_id, kind = self.kind, "Job completed: {}", message);
    }

    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    pub fn kind(&self) -> &'static str {
        self.kind
    }

    /// Span wrapping one orchestrator run.
    pub fn create_span(&self) -> Span {
        tracing::info_span!("job", job_id = %self.job_id, kind = self.kind)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_logger_creation() {
        let job_id = JobId::new();
        let logger = JobLogger::new(&job_id, JobKind::Split);

        assert_eq!(logger.job_id(), job_id.to_string());
        assert_eq!(logger.kind(), "split");
    }
}
