// Maintenance Service
// Scheduled removal of old finished jobs

use crate::application::queue::JobQueue;
use crate::application::worker::constants::MIN_TICK_INTERVAL;
use crate::application::worker::ShutdownToken;
use crate::error::Result;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::interval;
use tracing::{error, info, warn};

/// How finished jobs are cleaned up
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MaintenanceConfig {
    /// Finished jobs younger than this are kept
    pub grace: Duration,
    /// Max jobs removed per queue per run
    pub limit: u64,
    /// Time between runs (at least 1ms)
    pub interval: Duration,
}

impl Default for MaintenanceConfig {
    fn default() -> Self {
        Self {
            grace: Duration::from_secs(7 * 24 * 3600),
            limit: 1000,
            interval: Duration::from_secs(3600),
        }
    }
}

/// Maintenance scheduler
///
/// Runs `clean` over every queue the store knows, in the background
pub struct MaintenanceScheduler {
    queue: Arc<JobQueue>,
    config: MaintenanceConfig,
}

impl MaintenanceScheduler {
    pub fn new(queue: Arc<JobQueue>, mut config: MaintenanceConfig) -> Self {
        config.interval = config.interval.max(MIN_TICK_INTERVAL);
        Self { queue, config }
    }

    pub fn config(&self) -> &MaintenanceConfig {
        &self.config
    }

    /// Run maintenance loop (background task) until shutdown
    pub async fn run(self, mut shutdown: ShutdownToken) {
        info!(
            interval_secs = self.config.interval.as_secs(),
            grace_secs = self.config.grace.as_secs(),
            limit = self.config.limit,
            "Maintenance scheduler started"
        );

        let mut tick = interval(self.config.interval);

        loop {
            tokio::select! {
                _ = tick.tick() => {
                    if let Err(e) = self.run_now().await {
                        error!(error = %e, "Scheduled maintenance failed");
                    }
                }
                _ = shutdown.wait() => break,
            }
        }
        info!("Maintenance scheduler stopped");
    }

    /// Clean every queue once; returns how many jobs were removed.
    ///
    /// A failing queue is logged and skipped so the others still get cleaned.
    pub async fn run_now(&self) -> Result<u64> {
        let mut removed = 0;
        for queue in self.queue.queues().await? {
            match self
                .queue
                .clean(&queue, self.config.grace, self.config.limit)
                .await
            {
                Ok(n) => removed += n,
                Err(e) => warn!(queue = %queue, error = %e, "Cleaning queue failed"),
            }
        }

        info!(removed = removed, "Maintenance completed");
        Ok(removed)
    }
}
