// Job Queue - producer, consumer and admin API over the durable store
//
// Every state change is a single store operation. Transitions out of
// `active` carry the job's lease, so a worker that lost its job (reclaimed or
// removed) turns into a logged no-op instead of clobbering newer state.

use crate::application::retry::{RetryDecision, RetryPolicy};
use crate::domain::error::DomainError;
use crate::domain::queue::validate_name;
use crate::domain::{
    DefaultJobOptions, Job, JobId, JobOptions, JobPayload, JobState, QueueConfig, QueueMetrics,
    RetentionPolicy,
};
use crate::error::{AppError, JobProcessingError, Result};
use crate::port::{IdProvider, JobStore, ReclaimStats, TimeProvider};
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;
use tracing::{debug, info, warn};

/// What happened to an active job after a failed attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureOutcome {
    /// Another attempt is scheduled at `run_at` (epoch ms)
    Retrying { run_at: i64 },
    /// No attempts left; the job is now `failed`
    Failed,
    /// The job was reclaimed or removed while it ran; nothing was written
    LeaseLost,
}

/// Reference to an enqueued job
#[derive(Clone)]
pub struct JobHandle {
    job: Job,
    store: Arc<dyn JobStore>,
}

impl std::fmt::Debug for JobHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobHandle")
            .field("queue", &self.job.queue)
            .field("id", &self.job.id)
            .finish()
    }
}

impl JobHandle {
    pub fn id(&self) -> &JobId {
        &self.job.id
    }

    pub fn queue(&self) -> &str {
        &self.job.queue
    }

    /// The job as it was when the handle was created
    pub fn job(&self) -> &Job {
        &self.job
    }

    /// Current state read from the store; None once the job was removed
    pub async fn state(&self) -> Result<Option<JobState>> {
        Ok(self
            .store
            .find(&self.job.queue, &self.job.id)
            .await?
            .map(|job| job.state))
    }

    /// Fresh copy of the job from the store
    pub async fn refresh(&self) -> Result<Option<Job>> {
        self.store.find(&self.job.queue, &self.job.id).await
    }

    pub async fn remove(&self) -> Result<bool> {
        self.store.remove(&self.job.queue, &self.job.id).await
    }
}

/// Queue service shared by producers (handlers), workers and maintenance.
///
/// Holds no job state of its own: per-queue default options are the only
/// in-memory data, and losing them just falls back to `DefaultJobOptions`.
pub struct JobQueue {
    store: Arc<dyn JobStore>,
    time_provider: Arc<dyn TimeProvider>,
    id_provider: Arc<dyn IdProvider>,
    retry_policy: RetryPolicy,
    defaults: RwLock<HashMap<String, DefaultJobOptions>>,
}

pub(crate) fn invalid(err: DomainError) -> AppError {
    match err {
        DomainError::ValidationError(msg) => AppError::Validation(msg),
        other => AppError::Domain(other),
    }
}

impl JobQueue {
    pub fn new(
        store: Arc<dyn JobStore>,
        time_provider: Arc<dyn TimeProvider>,
        id_provider: Arc<dyn IdProvider>,
    ) -> Self {
        Self {
            retry_policy: RetryPolicy::new(Arc::clone(&time_provider)),
            store,
            time_provider,
            id_provider,
            defaults: RwLock::new(HashMap::new()),
        }
    }

    pub fn store(&self) -> &Arc<dyn JobStore> {
        &self.store
    }

    pub fn now_millis(&self) -> i64 {
        self.time_provider.now_millis()
    }

    /// Set the default job options for one queue
    pub fn configure(&self, config: QueueConfig) -> Result<()> {
        validate_name("queue", &config.name).map_err(invalid)?;
        if config.defaults.attempts < 1 {
            return Err(AppError::Validation(format!(
                "default attempts must be at least 1 (queue {})",
                config.name
            )));
        }
        debug!(queue = %config.name, defaults = ?config.defaults, "Queue configured");
        self.defaults
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(config.name, config.defaults);
        Ok(())
    }

    pub fn defaults_for(&self, queue: &str) -> DefaultJobOptions {
        self.defaults
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(queue)
            .cloned()
            .unwrap_or_default()
    }

    fn validate_options(options: &JobOptions) -> Result<()> {
        if let Some(attempts) = options.attempts {
            if attempts < 1 {
                return Err(AppError::Validation(format!(
                    "attempts must be at least 1, got {}",
                    attempts
                )));
            }
        }
        if let Some(delay_ms) = options.delay_ms {
            if delay_ms < 0 {
                return Err(AppError::Validation(format!(
                    "delay must not be negative, got {}ms",
                    delay_ms
                )));
            }
        }
        if let Some(backoff) = options.backoff {
            if backoff.delay_ms < 0 {
                return Err(AppError::Validation(format!(
                    "backoff delay must not be negative, got {}ms",
                    backoff.delay_ms
                )));
            }
        }
        if let Some(timeout_ms) = options.timeout_ms {
            if timeout_ms <= 0 {
                return Err(AppError::Validation(format!(
                    "timeout must be positive, got {}ms",
                    timeout_ms
                )));
            }
        }
        if let Some(id) = &options.job_id {
            validate_name("job id", id).map_err(invalid)?;
        }
        Ok(())
    }

    /// Persist a new job in `waiting` (or `delayed` when a delay is given).
    ///
    /// Enqueueing a caller-chosen `job_id` that already exists changes
    /// nothing and returns a handle to the existing job.
    pub async fn enqueue(
        &self,
        queue: &str,
        name: &str,
        data: serde_json::Value,
        options: JobOptions,
    ) -> Result<JobHandle> {
        validate_name("queue", queue).map_err(invalid)?;
        validate_name("job", name).map_err(invalid)?;
        Self::validate_options(&options)?;

        let id = options
            .job_id
            .clone()
            .unwrap_or_else(|| self.id_provider.generate_id());
        let now = self.time_provider.now_millis();
        if let Some(delay_ms) = options.delay_ms {
            if now.checked_add(delay_ms).is_none() {
                return Err(AppError::Validation(format!(
                    "delay of {}ms is out of range",
                    delay_ms
                )));
            }
        }
        let defaults = self.defaults_for(queue);
        let job = Job::new(id, now, queue, name, JobPayload::new(data))
            .with_options(&defaults, &options);

        if !self.store.insert(&job).await? {
            debug!(queue = %queue, job_id = %job.id, "Job id already exists, returning existing job");
            let existing = self.store.find(queue, &job.id).await?.unwrap_or(job);
            return Ok(self.handle(existing));
        }

        info!(
            queue = %queue,
            job_id = %job.id,
            name = %name,
            state = %job.state,
            priority = job.priority,
            attempts_max = job.attempts_max,
            "Job enqueued"
        );
        Ok(self.handle(job))
    }

    fn handle(&self, job: Job) -> JobHandle {
        JobHandle {
            job,
            store: Arc::clone(&self.store),
        }
    }

    pub async fn get_job(&self, queue: &str, id: &str) -> Result<Option<Job>> {
        self.store.find(queue, &id.to_string()).await
    }

    /// Delete a job in any state. A missing id is not an error.
    ///
    /// Removing an active job does not interrupt its processor; the worker's
    /// later completion finds its lease gone and writes nothing.
    pub async fn remove_job(&self, queue: &str, id: &str) -> Result<bool> {
        let removed = self.store.remove(queue, &id.to_string()).await?;
        if removed {
            info!(queue = %queue, job_id = %id, "Job removed");
        } else {
            debug!(queue = %queue, job_id = %id, "Remove requested for unknown job");
        }
        Ok(removed)
    }

    pub async fn pause(&self, queue: &str) -> Result<()> {
        validate_name("queue", queue).map_err(invalid)?;
        self.store.set_paused(queue, true).await?;
        info!(queue = %queue, "Queue paused");
        Ok(())
    }

    pub async fn resume(&self, queue: &str) -> Result<()> {
        validate_name("queue", queue).map_err(invalid)?;
        self.store.set_paused(queue, false).await?;
        info!(queue = %queue, "Queue resumed");
        Ok(())
    }

    pub async fn is_paused(&self, queue: &str) -> Result<bool> {
        self.store.is_paused(queue).await
    }

    pub async fn metrics(&self, queue: &str) -> Result<QueueMetrics> {
        self.store.metrics(queue).await
    }

    /// Remove up to `limit` finished jobs older than `grace`, oldest first
    pub async fn clean(&self, queue: &str, grace: Duration, limit: u64) -> Result<u64> {
        let grace_ms = i64::try_from(grace.as_millis()).unwrap_or(i64::MAX);
        let cutoff = self.time_provider.now_millis().saturating_sub(grace_ms);
        let removed = self.store.clean(queue, cutoff, limit).await?;
        if removed > 0 {
            info!(queue = %queue, removed = removed, cutoff = cutoff, "Finished jobs cleaned");
        }
        Ok(removed)
    }

    pub async fn queues(&self) -> Result<Vec<String>> {
        self.store.queue_names().await
    }

    /// Promote due delayed jobs, then atomically claim the next waiting one
    pub async fn claim(&self, queue: &str) -> Result<Option<Job>> {
        let now = self.time_provider.now_millis();
        let promoted = self.store.promote_delayed(queue, now).await?;
        if promoted > 0 {
            debug!(queue = %queue, promoted = promoted, "Delayed jobs promoted");
        }

        let job = self.store.claim_next(queue, now).await?;
        if let Some(job) = &job {
            debug!(
                queue = %queue,
                job_id = %job.id,
                name = %job.name,
                attempt = job.attempts_made,
                "Job claimed"
            );
        }
        Ok(job)
    }

    /// Refresh the heartbeat of a running job. False means the lease is gone.
    pub async fn heartbeat(&self, job: &Job) -> Result<bool> {
        let alive = self
            .store
            .heartbeat(&job.lease(), self.time_provider.now_millis())
            .await?;
        if !alive {
            debug!(queue = %job.queue, job_id = %job.id, "Heartbeat for lost lease");
        }
        Ok(alive)
    }

    /// active -> completed, then apply `remove_on_complete`
    pub async fn complete(&self, job: &Job, return_value: Option<serde_json::Value>) -> Result<bool> {
        let now = self.time_provider.now_millis();
        let done = self
            .store
            .complete(&job.lease(), return_value.as_ref(), now)
            .await?;
        if !done {
            warn!(
                queue = %job.queue,
                job_id = %job.id,
                attempt = job.attempts_made,
                "Completion ignored, job no longer held by this worker"
            );
            return Ok(false);
        }

        info!(queue = %job.queue, job_id = %job.id, attempt = job.attempts_made, "Job completed");
        self.apply_retention(job, JobState::Completed, job.remove_on_complete)
            .await;
        Ok(true)
    }

    /// Route a failed attempt: delayed retry while attempts remain, else failed
    pub async fn fail(&self, job: &Job, error: &JobProcessingError) -> Result<FailureOutcome> {
        let now = self.time_provider.now_millis();
        let reason = error.to_string();
        let lease = job.lease();

        let outcome = match self.retry_policy.should_retry(job) {
            RetryDecision::Retry { run_at, .. } => {
                if self.store.retry_later(&lease, run_at, &reason, now).await? {
                    FailureOutcome::Retrying { run_at }
                } else {
                    FailureOutcome::LeaseLost
                }
            }
            RetryDecision::Failed => {
                if self.store.fail(&lease, &reason, now).await? {
                    FailureOutcome::Failed
                } else {
                    FailureOutcome::LeaseLost
                }
            }
        };

        match outcome {
            FailureOutcome::Retrying { run_at } => {
                warn!(
                    queue = %job.queue,
                    job_id = %job.id,
                    attempt = job.attempts_made,
                    attempts_max = job.attempts_max,
                    run_at = run_at,
                    error = %reason,
                    "Job attempt failed, retry scheduled"
                );
            }
            FailureOutcome::Failed => {
                warn!(
                    queue = %job.queue,
                    job_id = %job.id,
                    attempts_made = job.attempts_made,
                    error = %reason,
                    "Job failed permanently"
                );
                self.apply_retention(job, JobState::Failed, job.remove_on_fail)
                    .await;
            }
            FailureOutcome::LeaseLost => {
                warn!(
                    queue = %job.queue,
                    job_id = %job.id,
                    attempt = job.attempts_made,
                    error = %reason,
                    "Failure ignored, job no longer held by this worker"
                );
            }
        }
        Ok(outcome)
    }

    /// Manually re-queue a failed job with a fresh attempt budget
    pub async fn retry_job(&self, queue: &str, id: &str) -> Result<bool> {
        let requeued = self
            .store
            .requeue_failed(queue, &id.to_string(), self.time_provider.now_millis())
            .await?;
        if requeued {
            info!(queue = %queue, job_id = %id, "Failed job re-queued");
        }
        Ok(requeued)
    }

    /// Return active jobs with no heartbeat for `threshold` to waiting (or failed)
    pub async fn reclaim_stalled(&self, queue: &str, threshold: Duration) -> Result<ReclaimStats> {
        let now = self.time_provider.now_millis();
        let threshold_ms = i64::try_from(threshold.as_millis()).unwrap_or(i64::MAX);
        let stats = self
            .store
            .reclaim_stalled(queue, now.saturating_sub(threshold_ms), now)
            .await?;
        if stats.total() > 0 {
            warn!(
                queue = %queue,
                requeued = stats.requeued,
                failed = stats.failed,
                "Stalled jobs reclaimed"
            );
        }
        Ok(stats)
    }

    // Retention runs after the transition is durable; a failure here only
    // leaves extra finished rows for `clean` to pick up later.
    async fn apply_retention(&self, job: &Job, state: JobState, policy: RetentionPolicy) {
        let result = match policy {
            RetentionPolicy::KeepAll => return,
            RetentionPolicy::Remove => self.store.remove(&job.queue, &job.id).await.map(u64::from),
            RetentionPolicy::KeepLatest(keep) => self.store.trim(&job.queue, state, keep).await,
        };
        match result {
            Ok(removed) => {
                debug!(queue = %job.queue, job_id = %job.id, policy = %policy, removed = removed, "Retention applied")
            }
            Err(e) => {
                warn!(queue = %job.queue, job_id = %job.id, policy = %policy, error = %e, "Retention failed")
            }
        }
    }
}
