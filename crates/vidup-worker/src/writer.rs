//! The single writer of one job's state.
//!
//! Each change is applied to the registry first and the resulting snapshot is
//! then published, so a subscriber never sees a state the registry does not
//! hold.

use std::sync::Arc;

use tracing::debug;
use vidup_models::{JobId, JobKind, JobResult, JobSnapshot, ProgressUpdate, Stage};

use crate::error::WorkerResult;
use crate::hub::StatusHub;
use crate::logging::JobLogger;
use crate::metrics;
use crate::registry::JobRegistry;

#[derive(Clone)]
pub struct JobWriter {
    id: JobId,
    kind: JobKind,
    registry: Arc<JobRegistry>,
    hub: StatusHub,
    logger: JobLogger,
}

impl JobWriter {
    pub fn new(id: JobId, kind: JobKind, registry: Arc<JobRegistry>, hub: StatusHub) -> Self {
        let logger = JobLogger::new(&id, kind);
        Self {
            id,
            kind,
            registry,
            hub,
            logger,
        }
    }

    pub fn id(&self) -> &JobId {
        &self.id
    }

    pub fn logger(&self) -> &JobLogger {
        &self.logger
    }

    fn publish(&self, snapshot: Option<JobSnapshot>) {
        if let Some(snapshot) = snapshot {
            self.hub.publish(&snapshot);
        }
    }

    pub fn enter_stage(&self, stage: Stage, message: &str) -> WorkerResult<()> {
        let snapshot = self
            .registry
            .update(&self.id, |job| job.enter_stage(stage, message).map(|_| true))?;
        self.logger.log_progress(&format!("{} stage: {}", stage, message));
        self.publish(snapshot);
        Ok(())
    }

    /// Merge a progress update. Errors (job gone or terminal) are ignored.
    pub fn report(&self, update: &ProgressUpdate) {
        if update.is_empty() {
            return;
        }
        match self.registry.update(&self.id, |job| job.apply_progress(update)) {
            Ok(snapshot) => self.publish(snapshot),
            Err(e) => debug!(job_id = %self.id, "Progress not applied: {}", e),
        }
    }

    pub fn complete(&self, result: JobResult, message: &str) -> WorkerResult<()> {
        let snapshot = self
            .registry
            .update(&self.id, |job| job.complete(result, message).map(|_| true))?;
        self.logger.log_completion(message);
        metrics::record_job_finished(self.kind, Stage::Complete);
        self.publish(snapshot);
        Ok(())
    }

    pub fn fail(&self, cause: &str) -> WorkerResult<()> {
        let snapshot = self.registry.update(&self.id, |job| job.fail(cause).map(|_| true))?;
        self.logger.log_error(cause);
        metrics::record_job_finished(self.kind, Stage::Error);
        self.publish(snapshot);
        Ok(())
    }

    pub fn cancel(&self) -> WorkerResult<()> {
        let snapshot = self.registry.update(&self.id, |job| job.cancel().map(|_| true))?;
        self.logger.log_warning("cancelled");
        metrics::record_job_finished(self.kind, Stage::Cancelled);
        self.publish(snapshot);
        Ok(())
    }
}
