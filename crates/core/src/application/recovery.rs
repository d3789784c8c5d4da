// Stall recovery
use crate::application::queue::JobQueue;
use crate::application::worker::constants::{
    DEFAULT_STALL_CHECK_INTERVAL, DEFAULT_STALL_THRESHOLD, MIN_TICK_INTERVAL,
};
use crate::application::worker::ShutdownToken;
use crate::error::Result;
use crate::port::ReclaimStats;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::interval;
use tracing::{error, info};

/// Returns jobs stuck in `active` to the queue.
///
/// A job is stalled when its heartbeat is older than the threshold, which
/// happens when the worker running it crashed or was aborted on shutdown.
/// Stalled jobs with attempts left go back to waiting; the rest fail.
pub struct StallReclaimer {
    queue: Arc<JobQueue>,
    threshold: Duration,
    check_interval: Duration,
}

impl StallReclaimer {
    /// Create a stall reclaimer
    ///
    /// # Arguments
    /// * `queue` - Job queue service
    /// * `threshold` - Heartbeat age after which an active job counts as stalled
    /// * `check_interval` - How often `run` sweeps (at least 1ms)
    pub fn new(queue: Arc<JobQueue>, threshold: Duration, check_interval: Duration) -> Self {
        Self {
            queue,
            threshold,
            check_interval: check_interval.max(MIN_TICK_INTERVAL),
        }
    }

    pub fn with_defaults(queue: Arc<JobQueue>) -> Self {
        Self::new(queue, DEFAULT_STALL_THRESHOLD, DEFAULT_STALL_CHECK_INTERVAL)
    }

    pub fn threshold(&self) -> Duration {
        self.threshold
    }

    pub fn check_interval(&self) -> Duration {
        self.check_interval
    }

    /// Sweep every known queue once (also used at daemon startup)
    pub async fn reclaim_all(&self) -> Result<ReclaimStats> {
        let mut total = ReclaimStats::default();
        for queue in self.queue.queues().await? {
            let stats = self.queue.reclaim_stalled(&queue, self.threshold).await?;
            total.requeued += stats.requeued;
            total.failed += stats.failed;
        }

        if total.total() > 0 {
            info!(
                requeued = total.requeued,
                failed = total.failed,
                threshold_ms = self.threshold.as_millis() as u64,
                "Stall recovery complete"
            );
        }
        Ok(total)
    }

    /// Sweep on an interval until shutdown
    pub async fn run(self, mut shutdown: ShutdownToken) {
        info!(
            threshold_ms = self.threshold.as_millis() as u64,
            interval_ms = self.check_interval.as_millis() as u64,
            "Stall reclaimer started"
        );
        let mut tick = interval(self.check_interval);

        loop {
            tokio::select! {
                _ = tick.tick() => {
                    if let Err(e) = self.reclaim_all().await {
                        error!(error = %e, "Stall recovery failed");
                    }
                }
                _ = shutdown.wait() => break,
            }
        }
        info!("Stall reclaimer stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::worker::shutdown_channel;
    use crate::domain::{JobOptions, JobState};
    use crate::port::id_provider::mocks::SequentialIdProvider;
    use crate::port::job_store::mocks::InMemoryJobStore;
    use crate::port::time_provider::mocks::ManualTimeProvider;
    use serde_json::json;

    #[tokio::test]
    async fn test_reclaims_stalled_jobs_across_queues() {
        let clock = Arc::new(ManualTimeProvider::new(0));
        let queue = Arc::new(JobQueue::new(
            Arc::new(InMemoryJobStore::new()),
            clock.clone(),
            Arc::new(SequentialIdProvider::new("job")),
        ));
        let reports = queue
            .enqueue("reports", "generate", json!({}), JobOptions::new().attempts(2))
            .await
            .unwrap();
        let audits = queue
            .enqueue("audits", "record", json!({}), JobOptions::new().attempts(1))
            .await
            .unwrap();
        queue.claim("reports").await.unwrap().unwrap();
        queue.claim("audits").await.unwrap().unwrap();

        let reclaimer = StallReclaimer::new(queue.clone(), Duration::from_secs(30), Duration::from_secs(1));

        // Fresh heartbeats are left alone
        clock.advance(10_000);
        assert_eq!(reclaimer.reclaim_all().await.unwrap().total(), 0);

        clock.advance(25_000);
        let stats = reclaimer.reclaim_all().await.unwrap();
        assert_eq!(stats, ReclaimStats { requeued: 1, failed: 1 });
        assert_eq!(reports.state().await.unwrap(), Some(JobState::Waiting));
        assert_eq!(audits.state().await.unwrap(), Some(JobState::Failed));
    }

    #[tokio::test]
    async fn test_zero_check_interval_is_clamped() {
        let queue = Arc::new(JobQueue::new(
            Arc::new(InMemoryJobStore::new()),
            Arc::new(ManualTimeProvider::new(0)),
            Arc::new(SequentialIdProvider::new("job")),
        ));
        let reclaimer = StallReclaimer::new(queue, Duration::from_secs(30), Duration::ZERO);
        assert_eq!(reclaimer.check_interval(), MIN_TICK_INTERVAL);

        let (shutdown_tx, token) = shutdown_channel();
        let running = tokio::spawn(reclaimer.run(token));
        tokio::time::sleep(Duration::from_millis(20)).await;
        shutdown_tx.shutdown();
        running.await.unwrap();
    }

    #[tokio::test]
    async fn test_heartbeat_keeps_job_alive() {
        let clock = Arc::new(ManualTimeProvider::new(0));
        let queue = Arc::new(JobQueue::new(
            Arc::new(InMemoryJobStore::new()),
            clock.clone(),
            Arc::new(SequentialIdProvider::new("job")),
        ));
        queue
            .enqueue("reports", "generate", json!({}), JobOptions::new())
            .await
            .unwrap();
        let job = queue.claim("reports").await.unwrap().unwrap();
        let reclaimer = StallReclaimer::new(queue.clone(), Duration::from_secs(30), Duration::from_secs(1));

        clock.advance(20_000);
        assert!(queue.heartbeat(&job).await.unwrap());
        clock.advance(20_000);

        assert_eq!(reclaimer.reclaim_all().await.unwrap().total(), 0);
    }
}
