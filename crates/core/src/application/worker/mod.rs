// Worker - Job consumption loop for one queue

pub mod constants;
mod rate_limiter;
mod shutdown;

use constants::*;
pub use rate_limiter::{RateLimit, RateLimiter};
pub use shutdown::{shutdown_channel, ShutdownSender, ShutdownToken};

use crate::application::panic_guard::{execute_guarded, PanicGuardResult};
use crate::application::queue::JobQueue;
use crate::domain::Job;
use crate::error::{JobProcessingError, Result};
use crate::port::job_processor::ProcessResult;
use crate::port::JobProcessor;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time::{sleep, Instant};
use tracing::{debug, error, info, warn};

/// Tuning for one worker
#[derive(Debug, Clone)]
pub struct WorkerOptions {
    /// Jobs run at the same time (at least 1)
    pub concurrency: usize,
    /// Optional cap on job starts per window
    pub rate_limit: Option<RateLimit>,
    /// Sleep between claims while the queue is empty
    pub poll_interval: Duration,
    /// Applies to jobs without their own `timeout_ms`
    pub job_timeout: Option<Duration>,
    pub heartbeat_interval: Duration,
    /// How long shutdown waits for in-flight jobs before aborting them
    pub shutdown_grace: Duration,
}

impl Default for WorkerOptions {
    fn default() -> Self {
        Self {
            concurrency: DEFAULT_CONCURRENCY,
            rate_limit: None,
            poll_interval: DEFAULT_POLL_INTERVAL,
            job_timeout: None,
            heartbeat_interval: DEFAULT_HEARTBEAT_INTERVAL,
            shutdown_grace: DEFAULT_SHUTDOWN_GRACE,
        }
    }
}

impl WorkerOptions {
    pub fn concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    pub fn rate_limit(mut self, max: u32, window: Duration) -> Self {
        self.rate_limit = Some(RateLimit::new(max, window));
        self
    }

    pub fn poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub fn job_timeout(mut self, job_timeout: Duration) -> Self {
        self.job_timeout = Some(job_timeout);
        self
    }

    pub fn heartbeat_interval(mut self, heartbeat_interval: Duration) -> Self {
        self.heartbeat_interval = heartbeat_interval;
        self
    }

    pub fn shutdown_grace(mut self, shutdown_grace: Duration) -> Self {
        self.shutdown_grace = shutdown_grace;
        self
    }
}

/// Worker processes jobs from one queue with a bounded number of concurrent jobs.
///
/// A concurrency permit is taken *before* claiming, so the worker never holds
/// more active jobs than `concurrency`, not even briefly.
pub struct Worker {
    queue_name: String,
    queue: Arc<JobQueue>,
    processor: Arc<dyn JobProcessor>,
    options: WorkerOptions,
    permits: Arc<Semaphore>,
    rate_limiter: Option<RateLimiter>,
}

impl Worker {
    pub fn new(
        queue_name: impl Into<String>,
        queue: Arc<JobQueue>,
        processor: Arc<dyn JobProcessor>,
        options: WorkerOptions,
    ) -> Self {
        let concurrency = options.concurrency.max(1);
        Self {
            queue_name: queue_name.into(),
            queue,
            processor,
            permits: Arc::new(Semaphore::new(concurrency)),
            rate_limiter: options.rate_limit.map(RateLimiter::new),
            options,
        }
    }

    pub fn queue_name(&self) -> &str {
        &self.queue_name
    }

    pub fn options(&self) -> &WorkerOptions {
        &self.options
    }

    /// Run worker loop with graceful shutdown support
    pub async fn run(&self, mut shutdown: ShutdownToken) -> Result<()> {
        info!(
            queue = %self.queue_name,
            concurrency = self.options.concurrency,
            rate_limit = ?self.options.rate_limit,
            "Worker started"
        );
        let mut in_flight: JoinSet<()> = JoinSet::new();

        loop {
            while let Some(joined) = in_flight.try_join_next() {
                log_join_error(&self.queue_name, joined);
            }
            if shutdown.is_shutdown() {
                break;
            }

            let permit = tokio::select! {
                permit = Arc::clone(&self.permits).acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
                _ = shutdown.wait() => break,
            };

            if let Some(limiter) = &self.rate_limiter {
                if let Err(wait) = limiter.try_acquire() {
                    drop(permit);
                    debug!(queue = %self.queue_name, wait_ms = wait.as_millis() as u64, "Rate limit reached");
                    tokio::select! {
                        _ = sleep(wait) => continue,
                        _ = shutdown.wait() => break,
                    }
                }
            }

            let pause = match self.queue.claim(&self.queue_name).await {
                Ok(Some(job)) => {
                    let queue = Arc::clone(&self.queue);
                    let processor = Arc::clone(&self.processor);
                    let options = self.options.clone();
                    in_flight.spawn(async move {
                        let _permit = permit;
                        execute_job(&queue, processor.as_ref(), &job, &options).await;
                    });
                    continue;
                }
                Ok(None) => self.options.poll_interval,
                Err(e) => {
                    error!(queue = %self.queue_name, error = %e, "Worker error");
                    ERROR_RECOVERY_SLEEP_DURATION
                }
            };

            // Nothing started: hand back the permit and the rate-limit slot
            drop(permit);
            if let Some(limiter) = &self.rate_limiter {
                limiter.refund();
            }
            tokio::select! {
                _ = sleep(pause) => {},
                _ = shutdown.wait() => break,
            }
        }

        info!(queue = %self.queue_name, in_flight = in_flight.len(), "Worker shutting down");
        let aborted = self.drain(in_flight).await;
        info!(queue = %self.queue_name, aborted = aborted, "Worker stopped");
        Ok(())
    }

    // Wait for running jobs up to the grace period. Aborted jobs stay active
    // in the store and are picked up by stall reclaim.
    async fn drain(&self, mut in_flight: JoinSet<()>) -> usize {
        let deadline = Instant::now() + self.options.shutdown_grace;
        loop {
            match tokio::time::timeout_at(deadline, in_flight.join_next()).await {
                Ok(Some(joined)) => log_join_error(&self.queue_name, joined),
                Ok(None) => return 0,
                Err(_) => {
                    let aborted = in_flight.len();
                    warn!(
                        queue = %self.queue_name,
                        aborted = aborted,
                        "Grace period elapsed, aborting in-flight jobs"
                    );
                    in_flight.abort_all();
                    while in_flight.join_next().await.is_some() {}
                    return aborted;
                }
            }
        }
    }

    /// Claim and run one job inline (returns true if a job was processed)
    pub async fn process_next_job(&self) -> Result<bool> {
        match self.queue.claim(&self.queue_name).await? {
            Some(job) => {
                execute_job(&self.queue, self.processor.as_ref(), &job, &self.options).await;
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

fn log_join_error(queue: &str, joined: std::result::Result<(), tokio::task::JoinError>) {
    if let Err(join_err) = joined {
        if !join_err.is_cancelled() {
            error!(queue = %queue, error = %join_err, "Job task failed");
        }
    }
}

/// Run the processor for one claimed job and record the outcome.
///
/// Errors, timeouts and panics all take the queue's failure path; none of
/// them propagate to the worker loop.
async fn execute_job(queue: &JobQueue, processor: &dyn JobProcessor, job: &Job, options: &WorkerOptions) {
    let timeout = job
        .timeout_ms
        .map(|ms| Duration::from_millis(ms.max(0) as u64))
        .or(options.job_timeout);

    debug!(queue = %job.queue, job_id = %job.id, name = %job.name, attempt = job.attempts_made, "Processing job");

    let run = async {
        let guarded = execute_guarded(processor.process(job));
        match timeout {
            Some(limit) => match tokio::time::timeout(limit, guarded).await {
                Ok(result) => result,
                Err(_) => PanicGuardResult::Success(Err(JobProcessingError::Timeout(
                    limit.as_millis() as i64,
                ))),
            },
            None => guarded.await,
        }
    };
    tokio::pin!(run);

    let period = options.heartbeat_interval.max(MIN_TICK_INTERVAL);
    let mut heartbeat = tokio::time::interval_at(Instant::now() + period, period);
    let outcome: ProcessResult = loop {
        tokio::select! {
            result = &mut run => break match result {
                PanicGuardResult::Success(result) => result,
                PanicGuardResult::Panicked(msg) => {
                    error!(queue = %job.queue, job_id = %job.id, panic_msg = %msg, "Processor panicked");
                    Err(JobProcessingError::Panicked(msg))
                }
            },
            _ = heartbeat.tick() => {
                if let Err(e) = queue.heartbeat(job).await {
                    warn!(queue = %job.queue, job_id = %job.id, error = %e, "Heartbeat failed");
                }
            }
        }
    };

    let recorded = match outcome {
        Ok(return_value) => queue.complete(job, return_value).await.map(|_| ()),
        Err(e) => queue.fail(job, &e).await.map(|_| ()),
    };
    if let Err(e) = recorded {
        // The job stays active; stall reclaim returns it to the queue
        error!(queue = %job.queue, job_id = %job.id, error = %e, "Failed to record job outcome");
    }
}
