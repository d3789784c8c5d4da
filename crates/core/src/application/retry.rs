// Retry logic
use crate::domain::Job;
use crate::port::TimeProvider;
use std::sync::Arc;
use tracing::{info, warn};

/// Retry decision result
#[derive(Debug, PartialEq, Eq)]
pub enum RetryDecision {
    /// Retry the job after `delay_ms`, no earlier than `run_at` (epoch ms)
    Retry { delay_ms: i64, run_at: i64 },
    /// Do not retry, job has failed permanently
    Failed,
}

/// Decides what happens to an active job whose attempt just failed.
///
/// Uses the job's own backoff policy:
/// - fixed: `delay`
/// - exponential: `delay * 2^(attempts_made - 1)`
pub struct RetryPolicy {
    time_provider: Arc<dyn TimeProvider>,
}

impl RetryPolicy {
    pub fn new(time_provider: Arc<dyn TimeProvider>) -> Self {
        Self { time_provider }
    }

    /// `job.attempts_made` already counts the attempt that failed
    pub fn should_retry(&self, job: &Job) -> RetryDecision {
        if !job.has_attempts_left() {
            warn!(
                job_id = %job.id,
                attempts_made = %job.attempts_made,
                attempts_max = %job.attempts_max,
                "Max retry attempts reached"
            );
            return RetryDecision::Failed;
        }

        let delay_ms = job.backoff.delay_for(job.attempts_made);
        let run_at = self.time_provider.now_millis().saturating_add(delay_ms);

        info!(
            job_id = %job.id,
            attempt = %job.attempts_made,
            attempts_max = %job.attempts_max,
            backoff = %job.backoff.kind,
            delay_ms = %delay_ms,
            "Scheduling retry"
        );

        RetryDecision::Retry { delay_ms, run_at }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{BackoffPolicy, JobPayload};
    use crate::port::time_provider::mocks::ManualTimeProvider;

    fn failed_attempt(attempts_made: i32, attempts_max: i32, backoff: BackoffPolicy) -> Job {
        let mut job = Job::new("j1", 0, "q", "work", JobPayload::new(serde_json::json!({})));
        job.attempts_made = attempts_made;
        job.attempts_max = attempts_max;
        job.backoff = backoff;
        job
    }

    #[test]
    fn test_exponential_delays_per_attempt() {
        let policy = RetryPolicy::new(Arc::new(ManualTimeProvider::new(10_000)));
        let backoff = BackoffPolicy::exponential(100);

        assert_eq!(
            policy.should_retry(&failed_attempt(1, 4, backoff)),
            RetryDecision::Retry { delay_ms: 100, run_at: 10_100 }
        );
        assert_eq!(
            policy.should_retry(&failed_attempt(2, 4, backoff)),
            RetryDecision::Retry { delay_ms: 200, run_at: 10_200 }
        );
        assert_eq!(
            policy.should_retry(&failed_attempt(3, 4, backoff)),
            RetryDecision::Retry { delay_ms: 400, run_at: 10_400 }
        );
    }

    #[test]
    fn test_exhausted_attempts_fail() {
        let policy = RetryPolicy::new(Arc::new(ManualTimeProvider::new(0)));
        assert_eq!(
            policy.should_retry(&failed_attempt(3, 3, BackoffPolicy::fixed(100))),
            RetryDecision::Failed
        );
    }
}
