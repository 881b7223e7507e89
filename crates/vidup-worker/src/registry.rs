//! In-memory job registry.
//!
//! The registry is the single source of truth for job state. Readers only ever
//! get [`JobSnapshot`] copies taken under the lock, so a half-applied update is
//! never observable.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use parking_lot::RwLock;
use vidup_media::CancelToken;
use vidup_models::{CancelOutcome, Job, JobId, JobKind, JobSnapshot, ModelResult};

use crate::error::{WorkerError, WorkerResult};

struct Entry {
    job: Job,
    cancel: CancelToken,
    /// Set when the job becomes terminal; drives retention.
    finished_at: Option<Instant>,
}

#[derive(Default)]
pub struct JobRegistry {
    jobs: RwLock<HashMap<JobId, Entry>>,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new pending job.
    pub fn create(&self, kind: JobKind, source: Option<String>) -> (JobSnapshot, CancelToken) {
        let job = Job::new(kind, source);
        let snapshot = JobSnapshot::from(&job);
        let cancel = CancelToken::new();
        self.jobs.write().insert(
            job.id.clone(),
            Entry {
                job,
                cancel: cancel.clone(),
                finished_at: None,
            },
        );
        (snapshot, cancel)
    }

    pub fn get(&self, id: &JobId) -> WorkerResult<JobSnapshot> {
        self.jobs
            .read()
            .get(id)
            .map(|e| JobSnapshot::from(&e.job))
            .ok_or_else(|| WorkerError::not_found(id))
    }

    /// Snapshots, newest first.
    pub fn list(&self, include_terminal: bool) -> Vec<JobSnapshot> {
        let mut out: Vec<JobSnapshot> = self
            .jobs
            .read()
            .values()
            .filter(|e| include_terminal || !e.job.is_terminal())
            .map(|e| JobSnapshot::from(&e.job))
            .collect();
        out.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| b.job_id.cmp(&a.job_id)));
        out
    }

    /// Set the cancel flag and trigger the job's token.
    ///
    /// Returns the outcome and the snapshot after the call.
    pub fn request_cancel(&self, id: &JobId) -> WorkerResult<(CancelOutcome, JobSnapshot)> {
        let mut jobs = self.jobs.write();
        let entry = jobs.get_mut(id).ok_or_else(|| WorkerError::not_found(id))?;
        let outcome = entry.job.request_cancel();
        if outcome == CancelOutcome::Requested {
            entry.cancel.request_cancel();
        }
        Ok((outcome, JobSnapshot::from(&entry.job)))
    }

    /// Apply a mutation. Returns the new snapshot when the job changed.
    pub(crate) fn update<F>(&self, id: &JobId, mutate: F) -> WorkerResult<Option<JobSnapshot>>
    where
        F: FnOnce(&mut Job) -> ModelResult<bool>,
    {
        let mut jobs = self.jobs.write();
        let entry = jobs.get_mut(id).ok_or_else(|| WorkerError::not_found(id))?;
        if !mutate(&mut entry.job)? {
            return Ok(None);
        }
        if entry.job.is_terminal() && entry.finished_at.is_none() {
            entry.finished_at = Some(Instant::now());
        }
        Ok(Some(JobSnapshot::from(&entry.job)))
    }

    pub fn remove(&self, id: &JobId) -> bool {
        self.jobs.write().remove(id).is_some()
    }

    /// Remove terminal jobs finished longer than `retention` ago.
    pub fn remove_expired(&self, retention: Duration) -> Vec<JobId> {
        let now = Instant::now();
        let mut jobs = self.jobs.write();
        let expired: Vec<JobId> = jobs
            .iter()
            .filter(|(_, e)| {
                e.finished_at
                    .map(|t| now.saturating_duration_since(t) >= retention)
                    .unwrap_or(false)
            })
            .map(|(id, _)| id.clone())
            .collect();
        for id in &expired {
            jobs.remove(id);
        }
        expired
    }

    /// Request cancellation of every non-terminal job. Returns the newly flagged snapshots.
    pub fn cancel_all(&self) -> Vec<JobSnapshot> {
        let mut jobs = self.jobs.write();
        jobs.values_mut()
            .filter_map(|e| match e.job.request_cancel() {
                CancelOutcome::Requested => {
                    e.cancel.request_cancel();
                    Some(JobSnapshot::from(&e.job))
                }
                CancelOutcome::AlreadyRequested => {
                    e.cancel.request_cancel();
                    None
                }
                CancelOutcome::AlreadyTerminal => None,
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.jobs.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn active_count(&self) -> usize {
        self.jobs.read().values().filter(|e| !e.job.is_terminal()).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::{assert_err, assert_ok};
    use vidup_models::{JobResult, Stage};

    #[test]
    fn test_get_unknown_is_not_found() {
        let registry = JobRegistry::new();
        let err = registry.get(&JobId::from_string("nope")).unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn test_snapshots_are_copies() {
        let registry = JobRegistry::new();
        let (created, _) = registry.create(JobKind::FileUpload, Some("a.mp4".to_string()));
        let before = registry.get(&created.job_id).unwrap();

        registry
            .update(&created.job_id, |job| job.enter_stage(Stage::Upload, "Uploading").map(|_| true))
            .unwrap();

        assert_eq!(before.stage, Stage::Pending);
        assert_eq!(registry.get(&created.job_id).unwrap().stage, Stage::Upload);
    }

    #[test]
    fn test_request_cancel_is_idempotent() {
        let registry = JobRegistry::new();
        let (created, token) = registry.create(JobKind::Split, None);

        let (first, snap) = registry.request_cancel(&created.job_id).unwrap();
        assert_eq!(first, CancelOutcome::Requested);
        assert!(snap.cancel_requested);
        assert!(token.is_cancelled());

        let (second, again) = registry.request_cancel(&created.job_id).unwrap();
        assert_eq!(second, CancelOutcome::AlreadyRequested);
        assert_eq!(again.seq, snap.seq);
    }

    #[test]
    fn test_cancel_after_terminal_is_noop() {
        let registry = JobRegistry::new();
        let (created, token) = registry.create(JobKind::FileUpload, None);
        registry
            .update(&created.job_id, |job| {
                job.enter_stage(Stage::Upload, "Uploading")?;
                job.complete(JobResult::new("https://cdn/x.mp4"), "Done")?;
                Ok(true)
            })
            .unwrap();

        let (outcome, snap) = registry.request_cancel(&created.job_id).unwrap();
        assert_eq!(outcome, CancelOutcome::AlreadyTerminal);
        assert!(!snap.cancel_requested);
        assert!(!token.is_cancelled());
    }

    #[test]
    fn test_list_filters_terminal() {
        let registry = JobRegistry::new();
        let (a, _) = registry.create(JobKind::Split, None);
        let (_b, _) = registry.create(JobKind::Split, None);
        registry
            .update(&a.job_id, |job| job.fail("boom").map(|_| true))
            .unwrap();

        assert_eq!(registry.list(false).len(), 1);
        assert_eq!(registry.list(true).len(), 2);
    }

    #[test]
    fn test_remove_expired_only_terminal() {
        let registry = JobRegistry::new();
        let (done, _) = registry.create(JobKind::Split, None);
        let (running, _) = registry.create(JobKind::Split, None);
        registry.update(&done.job_id, |job| job.cancel().map(|_| true)).unwrap();

        let removed = registry.remove_expired(Duration::ZERO);
        assert_eq!(removed, vec![done.job_id.clone()]);
        assert_err!(registry.get(&done.job_id));
        assert_ok!(registry.get(&running.job_id));
    }
}
