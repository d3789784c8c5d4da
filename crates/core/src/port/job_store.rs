// Job Store Port (Interface)
//
// The durable store is the single source of truth for job state. Every
// transition here must be atomic at the store level: no in-process lock
// substitutes for it when workers run in several processes.

use crate::domain::{Job, JobId, JobLease, JobState, QueueMetrics};
use crate::error::Result;
use async_trait::async_trait;

/// Result of a stall-reclaim sweep
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReclaimStats {
    /// Stalled jobs moved back to waiting
    pub requeued: u64,
    /// Stalled jobs with no attempts left, moved to failed
    pub failed: u64,
}

impl ReclaimStats {
    pub fn total(&self) -> u64 {
        self.requeued + self.failed
    }
}

/// Persistence interface for jobs and queue flags
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Insert a new job. Returns false (and changes nothing) if the id already exists in the queue.
    async fn insert(&self, job: &Job) -> Result<bool>;

    /// Find job by queue and id
    async fn find(&self, queue: &str, id: &JobId) -> Result<Option<Job>>;

    /// Delete a job in any state. Returns false if it did not exist.
    async fn remove(&self, queue: &str, id: &JobId) -> Result<bool>;

    /// Move delayed jobs whose `scheduled_at <= now` to waiting
    async fn promote_delayed(&self, queue: &str, now_millis: i64) -> Result<u64>;

    /// Atomically move the next claimable job to active.
    ///
    /// Picks a waiting job with `scheduled_at <= now`, highest priority first,
    /// then enqueue order; increments `attempts_made`; stamps `started_at` and
    /// `heartbeat_at`. Returns None when the queue is paused or empty.
    async fn claim_next(&self, queue: &str, now_millis: i64) -> Result<Option<Job>>;

    /// Refresh the heartbeat of an active job. False if the lease is no longer held.
    async fn heartbeat(&self, lease: &JobLease, now_millis: i64) -> Result<bool>;

    /// active -> completed, if the lease is still held
    async fn complete(
        &self,
        lease: &JobLease,
        return_value: Option<&serde_json::Value>,
        now_millis: i64,
    ) -> Result<bool>;

    /// active -> delayed (or waiting when `scheduled_at <= now`), if the lease is still held
    async fn retry_later(
        &self,
        lease: &JobLease,
        scheduled_at: i64,
        reason: &str,
        now_millis: i64,
    ) -> Result<bool>;

    /// active -> failed, if the lease is still held
    async fn fail(&self, lease: &JobLease, reason: &str, now_millis: i64) -> Result<bool>;

    /// failed -> waiting with attempts reset
    async fn requeue_failed(&self, queue: &str, id: &JobId, now_millis: i64) -> Result<bool>;

    /// Reclaim active jobs whose heartbeat is older than `heartbeat_before`
    async fn reclaim_stalled(
        &self,
        queue: &str,
        heartbeat_before: i64,
        now_millis: i64,
    ) -> Result<ReclaimStats>;

    /// Count jobs by state and read the paused flag
    async fn metrics(&self, queue: &str) -> Result<QueueMetrics>;

    /// Persist the paused flag of a queue
    async fn set_paused(&self, queue: &str, paused: bool) -> Result<()>;

    async fn is_paused(&self, queue: &str) -> Result<bool>;

    /// Delete up to `limit` completed/failed jobs finished before `finished_before`, oldest first
    async fn clean(&self, queue: &str, finished_before: i64, limit: u64) -> Result<u64>;

    /// Keep only the newest `keep` jobs in a finished state, deleting the rest
    async fn trim(&self, queue: &str, state: JobState, keep: u32) -> Result<u64>;

    /// Every queue that has jobs or a persisted flag
    async fn queue_names(&self) -> Result<Vec<String>>;
}

// ============================================================================
// Mock Implementations for Testing
// ============================================================================

pub mod mocks {
    use super::*;
    use crate::error::AppError;
    use std::collections::{HashMap, HashSet};
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Mutex;

    #[derive(Default)]
    struct Inner {
        // (queue, id) -> (insertion sequence, job)
        jobs: HashMap<(String, String), (u64, Job)>,
        paused: HashSet<String>,
        known_queues: HashSet<String>,
        next_seq: u64,
    }

    /// In-memory store. One mutex makes every operation atomic, which models
    /// the single-writer guarantee the SQLite adapter gets from the database.
    #[derive(Default)]
    pub struct InMemoryJobStore {
        inner: Mutex<Inner>,
        unavailable: AtomicBool,
    }

    impl InMemoryJobStore {
        pub fn new() -> Self {
            Self::default()
        }

        /// Simulate an outage: every call fails with QueueUnavailable
        pub fn set_unavailable(&self, unavailable: bool) {
            self.unavailable.store(unavailable, Ordering::SeqCst);
        }

        /// Overwrite a stored job (test setup only)
        pub fn put(&self, job: Job) {
            let mut inner = self.inner.lock().unwrap();
            let key = (job.queue.clone(), job.id.clone());
            let seq = match inner.jobs.get(&key) {
                Some((seq, _)) => *seq,
                None => {
                    inner.next_seq += 1;
                    inner.next_seq
                }
            };
            inner.known_queues.insert(job.queue.clone());
            inner.jobs.insert(key, (seq, job));
        }

        fn lock(&self) -> Result<std::sync::MutexGuard<'_, Inner>> {
            if self.unavailable.load(Ordering::SeqCst) {
                return Err(AppError::QueueUnavailable(
                    "in-memory store marked unavailable".to_string(),
                ));
            }
            self.inner
                .lock()
                .map_err(|_| AppError::Internal("job store mutex poisoned".to_string()))
        }

        fn with_lease<F>(&self, lease: &JobLease, f: F) -> Result<bool>
        where
            F: FnOnce(&mut Job) -> crate::domain::error::Result<()>,
        {
            let mut inner = self.lock()?;
            let key = (lease.queue.clone(), lease.job_id.clone());
            match inner.jobs.get_mut(&key) {
                Some((_, job))
                    if job.state == JobState::Active && job.attempts_made == lease.attempt =>
                {
                    f(job)?;
                    Ok(true)
                }
                _ => Ok(false),
            }
        }
    }

    #[async_trait]
    impl JobStore for InMemoryJobStore {
        async fn insert(&self, job: &Job) -> Result<bool> {
            let mut inner = self.lock()?;
            let key = (job.queue.clone(), job.id.clone());
            if inner.jobs.contains_key(&key) {
                return Ok(false);
            }
            inner.next_seq += 1;
            let seq = inner.next_seq;
            inner.known_queues.insert(job.queue.clone());
            inner.jobs.insert(key, (seq, job.clone()));
            Ok(true)
        }

        async fn find(&self, queue: &str, id: &JobId) -> Result<Option<Job>> {
            let inner = self.lock()?;
            Ok(inner
                .jobs
                .get(&(queue.to_string(), id.clone()))
                .map(|(_, job)| job.clone()))
        }

        async fn remove(&self, queue: &str, id: &JobId) -> Result<bool> {
            let mut inner = self.lock()?;
            Ok(inner.jobs.remove(&(queue.to_string(), id.clone())).is_some())
        }

        async fn promote_delayed(&self, queue: &str, now_millis: i64) -> Result<u64> {
            let mut inner = self.lock()?;
            let mut promoted = 0;
            for (_, job) in inner.jobs.values_mut().filter(|(_, j)| j.queue == queue) {
                if job.promote(now_millis) {
                    promoted += 1;
                }
            }
            Ok(promoted)
        }

        async fn claim_next(&self, queue: &str, now_millis: i64) -> Result<Option<Job>> {
            let mut inner = self.lock()?;
            if inner.paused.contains(queue) {
                return Ok(None);
            }

            let next = inner
                .jobs
                .iter()
                .filter(|(_, (_, j))| {
                    j.queue == queue && j.is_claimable(now_millis) && j.has_attempts_left()
                })
                .min_by_key(|(_, (seq, j))| (-(j.priority as i64), j.created_at, *seq))
                .map(|(key, _)| key.clone());

            match next {
                Some(key) => {
                    let (_, job) = inner
                        .jobs
                        .get_mut(&key)
                        .ok_or_else(|| AppError::Internal("claimed job vanished".to_string()))?;
                    job.claim(now_millis)?;
                    Ok(Some(job.clone()))
                }
                None => Ok(None),
            }
        }

        async fn heartbeat(&self, lease: &JobLease, now_millis: i64) -> Result<bool> {
            self.with_lease(lease, |job| {
                job.heartbeat_at = Some(now_millis);
                Ok(())
            })
        }

        async fn complete(
            &self,
            lease: &JobLease,
            return_value: Option<&serde_json::Value>,
            now_millis: i64,
        ) -> Result<bool> {
            self.with_lease(lease, |job| job.complete(now_millis, return_value.cloned()))
        }

        async fn retry_later(
            &self,
            lease: &JobLease,
            scheduled_at: i64,
            reason: &str,
            now_millis: i64,
        ) -> Result<bool> {
            self.with_lease(lease, |job| job.retry_at(scheduled_at, reason, now_millis))
        }

        async fn fail(&self, lease: &JobLease, reason: &str, now_millis: i64) -> Result<bool> {
            self.with_lease(lease, |job| job.fail(reason, now_millis))
        }

        async fn requeue_failed(&self, queue: &str, id: &JobId, now_millis: i64) -> Result<bool> {
            let mut inner = self.lock()?;
            match inner.jobs.get_mut(&(queue.to_string(), id.clone())) {
                Some((_, job)) if job.state == JobState::Failed => {
                    job.requeue(now_millis)?;
                    Ok(true)
                }
                _ => Ok(false),
            }
        }

        async fn reclaim_stalled(
            &self,
            queue: &str,
            heartbeat_before: i64,
            now_millis: i64,
        ) -> Result<ReclaimStats> {
            let mut inner = self.lock()?;
            let mut stats = ReclaimStats::default();
            for (_, job) in inner.jobs.values_mut() {
                let stalled = job.queue == queue
                    && job.state == JobState::Active
                    && job.heartbeat_at.unwrap_or(i64::MIN) < heartbeat_before;
                if !stalled {
                    continue;
                }
                match job.reclaim(now_millis)? {
                    JobState::Waiting => stats.requeued += 1,
                    _ => stats.failed += 1,
                }
            }
            Ok(stats)
        }

        async fn metrics(&self, queue: &str) -> Result<QueueMetrics> {
            let inner = self.lock()?;
            let mut metrics = QueueMetrics {
                paused: inner.paused.contains(queue),
                ..Default::default()
            };
            for (_, job) in inner.jobs.values().filter(|(_, j)| j.queue == queue) {
                match job.state {
                    JobState::Waiting => metrics.waiting += 1,
                    JobState::Delayed => metrics.delayed += 1,
                    JobState::Active => metrics.active += 1,
                    JobState::Completed => metrics.completed += 1,
                    JobState::Failed => metrics.failed += 1,
                }
            }
            Ok(metrics)
        }

        async fn set_paused(&self, queue: &str, paused: bool) -> Result<()> {
            let mut inner = self.lock()?;
            inner.known_queues.insert(queue.to_string());
            if paused {
                inner.paused.insert(queue.to_string());
            } else {
                inner.paused.remove(queue);
            }
            Ok(())
        }

        async fn is_paused(&self, queue: &str) -> Result<bool> {
            Ok(self.lock()?.paused.contains(queue))
        }

        async fn clean(&self, queue: &str, finished_before: i64, limit: u64) -> Result<u64> {
            let mut inner = self.lock()?;
            let mut candidates: Vec<((String, String), i64)> = inner
                .jobs
                .iter()
                .filter_map(|(key, (_, j))| match j.finished_at {
                    Some(at) if j.queue == queue && j.state.is_finished() && at < finished_before => {
                        Some((key.clone(), at))
                    }
                    _ => None,
                })
                .collect();
            candidates.sort_by_key(|(_, at)| *at);

            let mut removed = 0;
            for (key, _) in candidates.into_iter().take(limit as usize) {
                inner.jobs.remove(&key);
                removed += 1;
            }
            Ok(removed)
        }

        async fn trim(&self, queue: &str, state: JobState, keep: u32) -> Result<u64> {
            let mut inner = self.lock()?;
            let mut finished: Vec<((String, String), i64, u64)> = inner
                .jobs
                .iter()
                .filter(|(_, (_, j))| j.queue == queue && j.state == state)
                .map(|(key, (seq, j))| (key.clone(), j.finished_at.unwrap_or(0), *seq))
                .collect();
            // Newest first
            finished.sort_by(|a, b| (b.1, b.2).cmp(&(a.1, a.2)));

            let mut removed = 0;
            for (key, _, _) in finished.into_iter().skip(keep as usize) {
                inner.jobs.remove(&key);
                removed += 1;
            }
            Ok(removed)
        }

        async fn queue_names(&self) -> Result<Vec<String>> {
            let inner = self.lock()?;
            let mut names: Vec<String> = inner.known_queues.iter().cloned().collect();
            names.sort();
            Ok(names)
        }
    }
}
