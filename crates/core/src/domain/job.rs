// Job Domain Model

use crate::domain::error::{DomainError, Result};
use crate::domain::queue::{DefaultJobOptions, QueueId};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Job ID (UUID v4 unless supplied by the caller)
pub type JobId = String;

/// Priority (higher number = claimed first)
pub type Priority = i32;

/// Job State
///
/// ```text
/// waiting ──claim──> active ──ok──────────────> completed
///    ^                 │ ├──error, attempts left──> delayed ──due──> waiting
///    │                 │ └──error, exhausted──────> failed
///    └──stall reclaim──┘                                │
///    └──────────────────────────manual retry────────────┘
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    Waiting,
    Delayed,
    Active,
    Completed,
    Failed,
}

impl JobState {
    pub const ALL: [JobState; 5] = [
        JobState::Waiting,
        JobState::Delayed,
        JobState::Active,
        JobState::Completed,
        JobState::Failed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Waiting => "waiting",
            JobState::Delayed => "delayed",
            JobState::Active => "active",
            JobState::Completed => "completed",
            JobState::Failed => "failed",
        }
    }

    /// Completed and failed jobs only leave their state through removal or manual retry
    pub fn is_finished(&self) -> bool {
        matches!(self, JobState::Completed | JobState::Failed)
    }

    pub fn can_transition_to(&self, next: JobState) -> bool {
        use JobState::*;
        matches!(
            (self, next),
            (Waiting, Active)
                | (Delayed, Waiting)
                | (Active, Completed)
                | (Active, Failed)
                | (Active, Delayed)
                | (Active, Waiting)
                | (Failed, Waiting)
        )
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobState {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "waiting" => Ok(JobState::Waiting),
            "delayed" => Ok(JobState::Delayed),
            "active" => Ok(JobState::Active),
            "completed" => Ok(JobState::Completed),
            "failed" => Ok(JobState::Failed),
            other => Err(DomainError::UnknownState(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackoffKind {
    Fixed,
    Exponential,
}

impl fmt::Display for BackoffKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackoffKind::Fixed => f.write_str("fixed"),
            BackoffKind::Exponential => f.write_str("exponential"),
        }
    }
}

impl FromStr for BackoffKind {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "fixed" => Ok(BackoffKind::Fixed),
            "exponential" => Ok(BackoffKind::Exponential),
            other => Err(DomainError::ValidationError(format!(
                "unknown backoff type: {}",
                other
            ))),
        }
    }
}

/// Delay strategy applied between attempts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackoffPolicy {
    #[serde(rename = "type")]
    pub kind: BackoffKind,
    #[serde(rename = "delay")]
    pub delay_ms: i64,
}

impl BackoffPolicy {
    pub fn fixed(delay_ms: i64) -> Self {
        Self {
            kind: BackoffKind::Fixed,
            delay_ms,
        }
    }

    pub fn exponential(delay_ms: i64) -> Self {
        Self {
            kind: BackoffKind::Exponential,
            delay_ms,
        }
    }

    /// Delay before the next attempt, given how many attempts have been made.
    ///
    /// fixed: `delay`; exponential: `delay * 2^(attempts_made - 1)`
    pub fn delay_for(&self, attempts_made: i32) -> i64 {
        let base = self.delay_ms.max(0);
        match self.kind {
            BackoffKind::Fixed => base,
            BackoffKind::Exponential => {
                let exponent = (attempts_made.max(1) - 1).min(62) as u32;
                base.saturating_mul(1i64 << exponent)
            }
        }
    }
}

/// How many finished jobs a queue keeps around
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum RetentionPolicy {
    #[default]
    KeepAll,
    Remove,
    KeepLatest(u32),
}

impl From<bool> for RetentionPolicy {
    fn from(remove: bool) -> Self {
        if remove {
            RetentionPolicy::Remove
        } else {
            RetentionPolicy::KeepAll
        }
    }
}

impl From<u32> for RetentionPolicy {
    fn from(keep: u32) -> Self {
        RetentionPolicy::KeepLatest(keep)
    }
}

// Compact column form: "keep", "remove", "keep:N"
impl fmt::Display for RetentionPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RetentionPolicy::KeepAll => f.write_str("keep"),
            RetentionPolicy::Remove => f.write_str("remove"),
            RetentionPolicy::KeepLatest(n) => write!(f, "keep:{}", n),
        }
    }
}

impl FromStr for RetentionPolicy {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "keep" => Ok(RetentionPolicy::KeepAll),
            "remove" => Ok(RetentionPolicy::Remove),
            other => other
                .strip_prefix("keep:")
                .and_then(|n| n.parse().ok())
                .map(RetentionPolicy::KeepLatest)
                .ok_or_else(|| {
                    DomainError::ValidationError(format!("unknown retention policy: {}", other))
                }),
        }
    }
}

/// Job Payload (JSON serializable)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobPayload(serde_json::Value);

impl JobPayload {
    pub fn new(value: serde_json::Value) -> Self {
        Self(value)
    }

    pub fn as_value(&self) -> &serde_json::Value {
        &self.0
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.0.get(key).and_then(|v| v.as_str())
    }
}

/// Caller overrides applied on top of the queue's default job options
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JobOptions {
    /// Caller-chosen id; enqueueing an existing id is a no-op returning the existing job
    pub job_id: Option<JobId>,
    pub delay_ms: Option<i64>,
    pub attempts: Option<i32>,
    pub backoff: Option<BackoffPolicy>,
    pub priority: Option<Priority>,
    pub remove_on_complete: Option<RetentionPolicy>,
    pub remove_on_fail: Option<RetentionPolicy>,
    pub timeout_ms: Option<i64>,
}

impl JobOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn job_id(mut self, id: impl Into<String>) -> Self {
        self.job_id = Some(id.into());
        self
    }

    pub fn delay_ms(mut self, delay_ms: i64) -> Self {
        self.delay_ms = Some(delay_ms);
        self
    }

    pub fn attempts(mut self, attempts: i32) -> Self {
        self.attempts = Some(attempts);
        self
    }

    pub fn backoff(mut self, backoff: BackoffPolicy) -> Self {
        self.backoff = Some(backoff);
        self
    }

    pub fn priority(mut self, priority: Priority) -> Self {
        self.priority = Some(priority);
        self
    }

    pub fn remove_on_complete(mut self, policy: impl Into<RetentionPolicy>) -> Self {
        self.remove_on_complete = Some(policy.into());
        self
    }

    pub fn remove_on_fail(mut self, policy: impl Into<RetentionPolicy>) -> Self {
        self.remove_on_fail = Some(policy.into());
        self
    }

    pub fn timeout_ms(mut self, timeout_ms: i64) -> Self {
        self.timeout_ms = Some(timeout_ms);
        self
    }
}

/// Proof of a claim: which attempt of which job a worker is running.
///
/// Every transition out of `active` is conditioned on the lease still matching,
/// so a worker whose job was reclaimed or removed cannot overwrite it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobLease {
    pub queue: QueueId,
    pub job_id: JobId,
    pub attempt: i32,
}

/// Job Entity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub queue: QueueId,
    pub name: String,
    pub data: JobPayload,
    pub state: JobState,
    pub priority: Priority,

    // Retry accounting
    pub attempts_made: i32,
    pub attempts_max: i32,
    pub backoff: BackoffPolicy,

    // Timing (epoch ms)
    pub created_at: i64,
    pub scheduled_at: i64,
    pub started_at: Option<i64>,
    pub heartbeat_at: Option<i64>,
    pub finished_at: Option<i64>,
    pub timeout_ms: Option<i64>,

    // Retention
    pub remove_on_complete: RetentionPolicy,
    pub remove_on_fail: RetentionPolicy,

    // Outcome
    pub failed_reason: Option<String>,
    pub return_value: Option<serde_json::Value>,
}

impl Job {
    /// Create a new waiting job
    ///
    /// # Arguments
    ///
    /// * `id` - Unique job ID (injected, not generated)
    /// * `created_at` - Creation timestamp in epoch ms (injected, not system time)
    /// * `queue` - Queue name
    /// * `name` - Job kind within the queue
    /// * `data` - Job payload
    pub fn new(
        id: impl Into<String>,
        created_at: i64,
        queue: impl Into<String>,
        name: impl Into<String>,
        data: JobPayload,
    ) -> Self {
        let defaults = DefaultJobOptions::default();
        Self {
            id: id.into(),
            queue: queue.into(),
            name: name.into(),
            data,
            state: JobState::Waiting,
            priority: defaults.priority,
            attempts_made: 0,
            attempts_max: defaults.attempts,
            backoff: defaults.backoff,
            created_at,
            scheduled_at: created_at,
            started_at: None,
            heartbeat_at: None,
            finished_at: None,
            timeout_ms: defaults.timeout_ms,
            remove_on_complete: defaults.remove_on_complete,
            remove_on_fail: defaults.remove_on_fail,
            failed_reason: None,
            return_value: None,
        }
    }

    /// Apply queue defaults, then caller overrides. A positive delay makes the job `delayed`.
    pub fn with_options(mut self, defaults: &DefaultJobOptions, options: &JobOptions) -> Self {
        self.attempts_max = options.attempts.unwrap_or(defaults.attempts);
        self.backoff = options.backoff.unwrap_or(defaults.backoff);
        self.priority = options.priority.unwrap_or(defaults.priority);
        self.remove_on_complete = options
            .remove_on_complete
            .unwrap_or(defaults.remove_on_complete);
        self.remove_on_fail = options.remove_on_fail.unwrap_or(defaults.remove_on_fail);
        self.timeout_ms = options.timeout_ms.or(defaults.timeout_ms);

        let delay_ms = options.delay_ms.unwrap_or(0);
        if delay_ms > 0 {
            self.state = JobState::Delayed;
            self.scheduled_at = self.created_at.saturating_add(delay_ms);
        } else {
            self.state = JobState::Waiting;
            self.scheduled_at = self.created_at;
        }
        self
    }

    pub fn lease(&self) -> JobLease {
        JobLease {
            queue: self.queue.clone(),
            job_id: self.id.clone(),
            attempt: self.attempts_made,
        }
    }

    pub fn has_attempts_left(&self) -> bool {
        self.attempts_made < self.attempts_max
    }

    /// Waiting and due
    pub fn is_claimable(&self, now_millis: i64) -> bool {
        self.state == JobState::Waiting && self.scheduled_at <= now_millis
    }

    fn transition(&mut self, next: JobState) -> Result<()> {
        if !self.state.can_transition_to(next) {
            return Err(DomainError::InvalidStateTransition {
                from: self.state.to_string(),
                to: next.to_string(),
            });
        }
        self.state = next;
        Ok(())
    }

    /// waiting -> active, consuming one attempt
    pub fn claim(&mut self, now_millis: i64) -> Result<()> {
        if !self.has_attempts_left() {
            return Err(DomainError::InvalidStateTransition {
                from: format!("{} (attempts exhausted)", self.state),
                to: JobState::Active.to_string(),
            });
        }
        self.transition(JobState::Active)?;
        self.attempts_made += 1;
        self.started_at = Some(now_millis);
        self.heartbeat_at = Some(now_millis);
        Ok(())
    }

    /// delayed -> waiting once `scheduled_at` is reached; returns whether it moved
    pub fn promote(&mut self, now_millis: i64) -> bool {
        if self.state == JobState::Delayed && self.scheduled_at <= now_millis {
            self.state = JobState::Waiting;
            true
        } else {
            false
        }
    }

    /// active -> completed
    pub fn complete(
        &mut self,
        now_millis: i64,
        return_value: Option<serde_json::Value>,
    ) -> Result<()> {
        self.transition(JobState::Completed)?;
        self.finished_at = Some(now_millis);
        self.heartbeat_at = None;
        self.return_value = return_value;
        Ok(())
    }

    /// active -> delayed (or waiting when already due) for the next attempt
    pub fn retry_at(
        &mut self,
        scheduled_at: i64,
        reason: impl Into<String>,
        now_millis: i64,
    ) -> Result<()> {
        let next = if scheduled_at > now_millis {
            JobState::Delayed
        } else {
            JobState::Waiting
        };
        self.transition(next)?;
        self.scheduled_at = scheduled_at;
        self.heartbeat_at = None;
        self.failed_reason = Some(reason.into());
        Ok(())
    }

    /// active -> failed (terminal)
    pub fn fail(&mut self, reason: impl Into<String>, now_millis: i64) -> Result<()> {
        self.transition(JobState::Failed)?;
        self.finished_at = Some(now_millis);
        self.heartbeat_at = None;
        self.failed_reason = Some(reason.into());
        Ok(())
    }

    /// Stalled active job goes back to waiting, or fails once attempts are exhausted
    pub fn reclaim(&mut self, now_millis: i64) -> Result<JobState> {
        if self.has_attempts_left() {
            self.transition(JobState::Waiting)?;
            self.scheduled_at = now_millis;
            self.heartbeat_at = None;
        } else {
            self.fail(STALLED_REASON, now_millis)?;
        }
        Ok(self.state)
    }

    /// failed -> waiting with a fresh attempt budget
    pub fn requeue(&mut self, now_millis: i64) -> Result<()> {
        self.transition(JobState::Waiting)?;
        self.attempts_made = 0;
        self.scheduled_at = now_millis;
        self.started_at = None;
        self.finished_at = None;
        self.failed_reason = None;
        Ok(())
    }
}

/// Failure reason recorded when a stalled job runs out of attempts
pub const STALLED_REASON: &str = "job stalled more than allowable limit";
