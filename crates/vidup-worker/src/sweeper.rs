//! Background removal of expired terminal jobs.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info};

use crate::hub::StatusHub;
use crate::metrics;
use crate::registry::JobRegistry;

/// Periodically drops terminal jobs older than the retention window.
pub struct RetentionSweeper {
    registry: Arc<JobRegistry>,
    hub: StatusHub,
    retention: Duration,
    interval: Duration,
}

impl RetentionSweeper {
    pub fn new(registry: Arc<JobRegistry>, hub: StatusHub, retention: Duration, interval: Duration) -> Self {
        Self {
            registry,
            hub,
            retention,
            interval,
        }
    }

    /// Start the sweep loop.
    ///
    /// This function runs indefinitely and should be spawned as a background task.
    pub async fn run(&self) {
        info!(
            "Starting retention sweeper (retention: {:?}, interval: {:?})",
            self.retention, self.interval
        );

        let mut ticker = interval(self.interval.max(Duration::from_millis(10)));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;
            self.sweep_once();
        }
    }

    /// Run a single sweep. Returns the number of removed jobs.
    pub fn sweep_once(&self) -> usize {
        let expired = self.registry.remove_expired(self.retention);
        for id in &expired {
            self.hub.close_topic(id);
            debug!(job_id = %id, "Removed expired job");
        }

        if !expired.is_empty() {
            info!("Retention sweep removed {} jobs", expired.len());
            metrics::record_jobs_swept(expired.len());
        }
        expired.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::assert_ok;
    use vidup_models::JobKind;

    #[tokio::test]
    async fn test_sweep_removes_terminal_and_closes_topic() {
        let registry = Arc::new(JobRegistry::new());
        let hub = StatusHub::new(4);
        let (done, _) = registry.create(JobKind::Convert, None);
        let (active, _) = registry.create(JobKind::Convert, None);
        registry.update(&done.job_id, |job| job.fail("boom").map(|_| true)).unwrap();

        let mut sub = hub.subscribe(&done.job_id, || registry.get(&done.job_id).ok()).unwrap();
        let sweeper = RetentionSweeper::new(Arc::clone(&registry), hub.clone(), Duration::ZERO, Duration::from_secs(60));

        assert_eq!(sweeper.sweep_once(), 1);
        assert!(registry.get(&done.job_id).unwrap_err().is_not_found());
        assert_ok!(registry.get(&active.job_id));
        assert!(sub.recv().await.is_some());
        assert!(sub.recv().await.is_none());
    }

    #[test]
    fn test_sweep_respects_retention() {
        let registry = Arc::new(JobRegistry::new());
        let (done, _) = registry.create(JobKind::Convert, None);
        registry.update(&done.job_id, |job| job.cancel().map(|_| true)).unwrap();

        let sweeper = RetentionSweeper::new(
            Arc::clone(&registry),
            StatusHub::new(4),
            Duration::from_secs(3600),
            Duration::from_secs(60),
        );
        assert_eq!(sweeper.sweep_once(), 0);
        assert_ok!(registry.get(&done.job_id));
    }
}
