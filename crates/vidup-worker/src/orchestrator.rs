//! Pipeline orchestrator.
//!
//! The orchestrator owns the registry and the status hub, accepts job
//! requests and runs each job on its own task. A running job is the only
//! writer of its state; cancellation reaches it through its token.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde_json::Value;
use tempfile::TempDir;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn, Instrument};
use vidup_media::{CancelToken, StageExecutor, Toolchain};
use vidup_models::{CancelOutcome, JobId, JobKind, JobRequest, JobResult, JobSnapshot, ModelError, StoryboardParams};
use vidup_storage::ObjectStore;

use crate::config::WorkerConfig;
use crate::error::{WorkerError, WorkerResult};
use crate::hub::{StatusHub, Subscription};
use crate::metrics;
use crate::pipeline::{Halt, JobRun, Services};
use crate::registry::JobRegistry;
use crate::sweeper::RetentionSweeper;
use crate::writer::JobWriter;

struct Inner {
    services: Services,
    registry: Arc<JobRegistry>,
    hub: StatusHub,
    tracker: TaskTracker,
    shutting_down: AtomicBool,
}

#[derive(Clone)]
pub struct Orchestrator {
    inner: Arc<Inner>,
}

impl Orchestrator {
    pub fn new(config: WorkerConfig, toolchain: Arc<dyn Toolchain>, store: Arc<dyn ObjectStore>) -> Self {
        let hub = StatusHub::new(config.subscriber_buffer);
        let executor = StageExecutor::new(config.kill_grace);
        Self {
            inner: Arc::new(Inner {
                services: Services {
                    config,
                    toolchain,
                    store,
                    executor,
                },
                registry: Arc::new(JobRegistry::new()),
                hub,
                tracker: TaskTracker::new(),
                shutting_down: AtomicBool::new(false),
            }),
        }
    }

    pub fn registry(&self) -> &Arc<JobRegistry> {
        &self.inner.registry
    }

    pub fn hub(&self) -> &StatusHub {
        &self.inner.hub
    }

    pub fn store(&self) -> &Arc<dyn ObjectStore> {
        &self.inner.services.store
    }

    pub fn toolchain(&self) -> &Arc<dyn Toolchain> {
        &self.inner.services.toolchain
    }

    pub fn config(&self) -> &WorkerConfig {
        &self.inner.services.config
    }

    pub fn is_shutting_down(&self) -> bool {
        self.inner.shutting_down.load(Ordering::SeqCst)
    }

    /// Validate a request, register a pending job and start it.
    ///
    /// Returns the initial snapshot. A rejected request creates no job.
    pub fn submit(&self, request: JobRequest) -> WorkerResult<JobSnapshot> {
        if self.is_shutting_down() {
            discard_upload(&request);
            return Err(WorkerError::ShuttingDown);
        }
        if let Err(e) = request.validate() {
            discard_upload(&request);
            return Err(match e {
                ModelError::InvalidRequest(msg) => WorkerError::InvalidRequest(msg),
                other => WorkerError::State(other),
            });
        }

        let kind = request.kind();
        let (snapshot, cancel) = self.inner.registry.create(kind, Some(request.source_label()));
        metrics::record_job_submitted(kind);
        info!(job_id = %snapshot.job_id, kind = %kind, "Job submitted");

        self.launch(snapshot.job_id.clone(), request, cancel);
        Ok(snapshot)
    }

    pub fn get(&self, id: &JobId) -> WorkerResult<JobSnapshot> {
        self.inner.registry.get(id)
    }

    pub fn list(&self, include_terminal: bool) -> Vec<JobSnapshot> {
        self.inner.registry.list(include_terminal)
    }

    /// Request cancellation. Idempotent; a no-op on terminal jobs.
    pub fn cancel(&self, id: &JobId) -> WorkerResult<JobSnapshot> {
        let (outcome, snapshot) = self.inner.registry.request_cancel(id)?;
        if outcome == CancelOutcome::Requested {
            info!(job_id = %id, stage = %snapshot.stage, "Cancellation requested");
            self.inner.hub.publish(&snapshot);
        }
        Ok(snapshot)
    }

    /// Attach a live subscriber. The first snapshot received is the current one.
    pub fn subscribe(&self, id: &JobId) -> WorkerResult<Subscription> {
        let registry = &self.inner.registry;
        self.inner
            .hub
            .subscribe(id, || registry.get(id).ok())
            .ok_or_else(|| WorkerError::not_found(id))
    }

    pub fn sweeper(&self) -> RetentionSweeper {
        let config = &self.inner.services.config;
        RetentionSweeper::new(
            Arc::clone(&self.inner.registry),
            self.inner.hub.clone(),
            config.job_retention,
            config.sweep_interval,
        )
    }

    /// Stop accepting jobs, cancel every active one and wait for them to wind down.
    pub async fn shutdown(&self) {
        if self.inner.shutting_down.swap(true, Ordering::SeqCst) {
            return;
        }

        let flagged = self.inner.registry.cancel_all();
        for snapshot in &flagged {
            self.inner.hub.publish(snapshot);
        }
        info!("Shutting down orchestrator, cancelling {} active jobs", flagged.len());

        self.inner.tracker.close();
        let timeout = self.inner.services.config.shutdown_timeout;
        if tokio::time::timeout(timeout, self.inner.tracker.wait()).await.is_err() {
            warn!("{} jobs still running after {:?}", self.inner.tracker.len(), timeout);
        }
    }

    fn launch(&self, id: JobId, request: JobRequest, cancel: CancelToken) {
        let this = self.clone();
        self.inner.tracker.spawn(async move { this.run(id, request, cancel).await });
    }

    async fn run(self, id: JobId, request: JobRequest, cancel: CancelToken) {
        let kind = request.kind();
        let writer = JobWriter::new(
            id.clone(),
            kind,
            Arc::clone(&self.inner.registry),
            self.inner.hub.clone(),
        );
        let span = writer.logger().create_span();

        async {
            writer.logger().log_start(&request.source_label());
            self.execute(&writer, &request, &cancel).await;
        }
        .instrument(span)
        .await
    }

    /// Run the pipeline, release every local file, then record the outcome.
    ///
    /// Subscribers see a terminal snapshot only once the job's scratch
    /// directory and received upload are gone.
    async fn execute(&self, writer: &JobWriter, request: &JobRequest, cancel: &CancelToken) {
        let workspace = match self.workspace(writer.id()).await {
            Ok(dir) => dir,
            Err(e) => {
                release_upload(request).await;
                let _ = writer.fail(&format!("Failed to create work directory: {}", e));
                return;
            }
        };

        let mut run = JobRun::new(&self.inner.services, writer, cancel, workspace.path());
        let outcome = match run.run(request).await {
            Ok(_) if cancel.is_cancelled() => Err(Halt::Cancelled),
            other => other,
        };
        if outcome.is_err() {
            run.reclaim().await;
        }

        close_workspace(workspace).await;
        release_upload(request).await;

        let finished = match outcome {
            Ok((result, message)) => self.complete(writer, request.kind(), result, &message),
            Err(Halt::Cancelled) => writer.cancel(),
            Err(Halt::Failed(cause)) => writer.fail(&cause),
        };
        if let Err(e) = finished {
            error!(job_id = %writer.id(), "Failed to record job outcome: {}", e);
        }
    }

    /// Complete a job, registering its follow-up storyboard first.
    fn complete(&self, writer: &JobWriter, kind: JobKind, mut result: JobResult, message: &str) -> WorkerResult<()> {
        let follow_up = self.plan_follow_up(kind, &result);
        if let Some((id, _, _)) = &follow_up {
            result
                .metadata
                .insert("storyboard_job_id".to_string(), Value::from(id.as_str()));
        }

        match writer.complete(result, message) {
            Ok(()) => {
                if let Some((id, params, cancel)) = follow_up {
                    metrics::record_job_submitted(JobKind::Storyboard);
                    debug!(job_id = %writer.id(), storyboard_job_id = %id, "Starting follow-up storyboard");
                    self.launch(id, JobRequest::Storyboard(params), cancel);
                }
                Ok(())
            }
            Err(e) => {
                if let Some((id, _, _)) = follow_up {
                    self.inner.registry.remove(&id);
                }
                Err(e)
            }
        }
    }

    fn plan_follow_up(&self, kind: JobKind, result: &JobResult) -> Option<(JobId, StoryboardParams, CancelToken)> {
        let config = &self.inner.services.config;
        if !config.auto_storyboard || kind == JobKind::Storyboard || self.is_shutting_down() {
            return None;
        }

        let params = StoryboardParams {
            source: result.key.clone().unwrap_or_else(|| result.url.clone()),
            threshold: config.storyboard_threshold,
            thumbnail_width: config.storyboard_width,
            thumbnail_height: config.storyboard_height,
        };
        let (snapshot, cancel) = self
            .inner
            .registry
            .create(JobKind::Storyboard, Some(params.source.clone()));
        Some((snapshot.job_id, params, cancel))
    }

    async fn workspace(&self, id: &JobId) -> std::io::Result<TempDir> {
        let root = &self.inner.services.config.work_dir;
        tokio::fs::create_dir_all(root).await?;
        tempfile::Builder::new()
            .prefix(&format!("job-{}-", id))
            .tempdir_in(root)
    }
}

fn discard_upload(request: &JobRequest) {
    if let JobRequest::FileUpload { path, .. } = request {
        if let Err(e) = std::fs::remove_file(path) {
            debug!(path = %path.display(), "Could not remove rejected upload: {}", e);
        }
    }
}

async fn close_workspace(workspace: TempDir) {
    let path = workspace.path().to_path_buf();
    match tokio::task::spawn_blocking(move || workspace.close()).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => warn!(path = %path.display(), "Failed to remove work directory: {}", e),
        Err(e) => warn!(path = %path.display(), "Work directory cleanup panicked: {}", e),
    }
}

/// The job owns a received upload; it goes once the job stops using it.
async fn release_upload(request: &JobRequest) {
    let JobRequest::FileUpload { path, .. } = request else {
        return;
    };
    match tokio::fs::remove_file(path).await {
        Ok(()) => debug!(path = %path.display(), "Removed received upload"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!(path = %path.display(), "Failed to remove received upload: {}", e),
    }
}
