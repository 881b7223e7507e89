//! Per-job multicast of snapshots to live subscribers.
//!
//! Every subscriber owns a bounded channel. Publishing never waits on a
//! subscriber: intermediate snapshots that do not fit are dropped (the next
//! one supersedes them), terminal snapshots are handed to a background send.
//! Each sink remembers the last `seq` it was given and never receives an
//! older or equal one, which makes catch-up plus live delivery gap-free and
//! duplicate-free.
//!
//! Lock order: hub, then registry (inside the catch-up closure). Publishers
//! release the registry before publishing.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::{debug, trace};
use vidup_models::{JobId, JobSnapshot};

use crate::metrics;

/// Upper bound for delivering a terminal snapshot to a congested subscriber.
const TERMINAL_SEND_TIMEOUT: Duration = Duration::from_secs(30);

struct Sink {
    id: u64,
    tx: mpsc::Sender<JobSnapshot>,
    last_seq: u64,
}

struct HubInner {
    topics: Mutex<HashMap<JobId, Vec<Sink>>>,
    buffer: usize,
    next_id: AtomicU64,
}

impl HubInner {
    fn unsubscribe(&self, job_id: &JobId, sink_id: u64) {
        let mut topics = self.topics.lock();
        if let Some(sinks) = topics.get_mut(job_id) {
            sinks.retain(|s| s.id != sink_id);
            if sinks.is_empty() {
                topics.remove(job_id);
            }
        }
    }
}

#[derive(Clone)]
pub struct StatusHub {
    inner: Arc<HubInner>,
}

impl StatusHub {
    /// `buffer` is the per-subscriber channel capacity.
    pub fn new(buffer: usize) -> Self {
        Self {
            inner: Arc::new(HubInner {
                topics: Mutex::new(HashMap::new()),
                buffer: buffer.max(1),
                next_id: AtomicU64::new(1),
            }),
        }
    }

    /// Attach a subscriber to `job_id`.
    ///
    /// `current` supplies the catch-up snapshot and runs under the hub lock;
    /// `None` means the job is unknown and no subscription is created.
    pub fn subscribe<F>(&self, job_id: &JobId, current: F) -> Option<Subscription>
    where
        F: FnOnce() -> Option<JobSnapshot>,
    {
        let mut topics = self.inner.topics.lock();
        let snapshot = current()?;

        let (tx, rx) = mpsc::channel(self.inner.buffer);
        let last_seq = snapshot.seq;
        // Fresh channel with capacity >= 1
        let _ = tx.try_send(snapshot);

        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        topics
            .entry(job_id.clone())
            .or_default()
            .push(Sink { id, tx, last_seq });
        debug!(job_id = %job_id, subscriber = id, "Subscriber attached");

        Some(Subscription {
            id,
            job_id: job_id.clone(),
            rx,
            hub: Arc::downgrade(&self.inner),
        })
    }

    /// Deliver a snapshot to every current subscriber of its job.
    pub fn publish(&self, snapshot: &JobSnapshot) {
        let mut topics = self.inner.topics.lock();
        let Some(sinks) = topics.get_mut(&snapshot.job_id) else {
            return;
        };

        sinks.retain_mut(|sink| {
            if snapshot.seq <= sink.last_seq {
                return true;
            }
            match sink.tx.try_send(snapshot.clone()) {
                Ok(()) => {
                    sink.last_seq = snapshot.seq;
                    true
                }
                Err(mpsc::error::TrySendError::Full(_)) if snapshot.is_terminal() => {
                    sink.last_seq = snapshot.seq;
                    deliver_later(sink.tx.clone(), snapshot.clone());
                    true
                }
                Err(mpsc::error::TrySendError::Full(_)) => {
                    trace!(job_id = %snapshot.job_id, subscriber = sink.id, seq = snapshot.seq, "Subscriber full, update dropped");
                    metrics::record_update_dropped();
                    true
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    debug!(job_id = %snapshot.job_id, subscriber = sink.id, "Subscriber gone");
                    false
                }
            }
        });

        if sinks.is_empty() {
            topics.remove(&snapshot.job_id);
        }
    }

    /// Detach every subscriber of a job. Their streams end after draining.
    pub fn close_topic(&self, job_id: &JobId) {
        self.inner.topics.lock().remove(job_id);
    }

    pub fn subscriber_count(&self, job_id: &JobId) -> usize {
        self.inner.topics.lock().get(job_id).map(Vec::len).unwrap_or(0)
    }
}

fn deliver_later(tx: mpsc::Sender<JobSnapshot>, snapshot: JobSnapshot) {
    match tokio::runtime::Handle::try_current() {
        Ok(handle) => {
            handle.spawn(async move {
                if tokio::time::timeout(TERMINAL_SEND_TIMEOUT, tx.send(snapshot)).await.is_err() {
                    debug!("Gave up delivering terminal snapshot");
                }
            });
        }
        Err(_) => debug!("No runtime to deliver terminal snapshot"),
    }
}

/// A live subscription. Dropping it unsubscribes.
pub struct Subscription {
    id: u64,
    job_id: JobId,
    rx: mpsc::Receiver<JobSnapshot>,
    hub: Weak<HubInner>,
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("job_id", &self.job_id)
            .finish_non_exhaustive()
    }
}

impl Subscription {
    pub fn job_id(&self) -> &JobId {
        &self.job_id
    }

    /// Next snapshot; `None` once the hub dropped this subscriber.
    pub async fn recv(&mut self) -> Option<JobSnapshot> {
        self.rx.recv().await
    }

    /// Next snapshot if one is already buffered.
    pub fn try_recv(&mut self) -> Option<JobSnapshot> {
        self.rx.try_recv().ok()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(hub) = self.hub.upgrade() {
            hub.unsubscribe(&self.job_id, self.id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vidup_models::{Job, JobKind, JobResult, Stage};

    fn job() -> Job {
        Job::new(JobKind::FileUpload, None)
    }

    #[tokio::test]
    async fn test_subscribe_unknown_job() {
        let hub = StatusHub::new(4);
        assert!(hub.subscribe(&JobId::from_string("x"), || None).is_none());
    }

    #[tokio::test]
    async fn test_catch_up_then_live() {
        let hub = StatusHub::new(4);
        let mut job = job();
        let mut sub = hub.subscribe(&job.id, || Some(JobSnapshot::from(&job))).unwrap();

        job.enter_stage(Stage::Upload, "Uploading").unwrap();
        hub.publish(&JobSnapshot::from(&job));

        assert_eq!(sub.recv().await.unwrap().stage, Stage::Pending);
        assert_eq!(sub.recv().await.unwrap().stage, Stage::Upload);
    }

    #[tokio::test]
    async fn test_stale_and_duplicate_seq_skipped() {
        let hub = StatusHub::new(8);
        let mut job = job();
        let first = JobSnapshot::from(&job);
        job.enter_stage(Stage::Upload, "Uploading").unwrap();
        let second = JobSnapshot::from(&job);

        let mut sub = hub.subscribe(&job.id, || Some(second.clone())).unwrap();
        hub.publish(&first);
        hub.publish(&second);
        job.fail("boom").unwrap();
        let third = JobSnapshot::from(&job);
        hub.publish(&third);

        let seqs = vec![sub.recv().await.unwrap().seq, sub.recv().await.unwrap().seq];
        assert_eq!(seqs, vec![second.seq, third.seq]);
        assert!(sub.try_recv().is_none());
    }

    #[tokio::test]
    async fn test_drop_unsubscribes() {
        let hub = StatusHub::new(4);
        let job = job();
        let sub = hub.subscribe(&job.id, || Some(JobSnapshot::from(&job))).unwrap();
        assert_eq!(hub.subscriber_count(&job.id), 1);
        drop(sub);
        assert_eq!(hub.subscriber_count(&job.id), 0);
    }

    #[tokio::test]
    async fn test_full_buffer_still_gets_terminal() {
        let hub = StatusHub::new(1);
        let mut job = job();
        let mut sub = hub.subscribe(&job.id, || Some(JobSnapshot::from(&job))).unwrap();

        job.enter_stage(Stage::Upload, "Uploading").unwrap();
        hub.publish(&JobSnapshot::from(&job)); // dropped, buffer holds catch-up
        job.complete(JobResult::new("https://cdn/v.mp4"), "Done").unwrap();
        hub.publish(&JobSnapshot::from(&job));

        assert_eq!(sub.recv().await.unwrap().stage, Stage::Pending);
        assert_eq!(sub.recv().await.unwrap().stage, Stage::Complete);
    }

    #[tokio::test]
    async fn test_close_topic_ends_stream() {
        let hub = StatusHub::new(4);
        let job = job();
        let mut sub = hub.subscribe(&job.id, || Some(JobSnapshot::from(&job))).unwrap();
        hub.close_topic(&job.id);
        assert!(sub.recv().await.is_some());
        assert!(sub.recv().await.is_none());
    }
}
