// Queue Domain Model

use crate::domain::error::{DomainError, Result};
use crate::domain::job::{BackoffPolicy, Priority, RetentionPolicy};
use serde::{Deserialize, Serialize};

/// Queue identifier
pub type QueueId = String;

/// Maximum length for queue and job names
pub const MAX_NAME_LEN: usize = 64;

/// Job options every job on a queue starts from
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DefaultJobOptions {
    pub attempts: i32,
    pub backoff: BackoffPolicy,
    pub priority: Priority,
    pub remove_on_complete: RetentionPolicy,
    pub remove_on_fail: RetentionPolicy,
    pub timeout_ms: Option<i64>,
}

impl Default for DefaultJobOptions {
    fn default() -> Self {
        Self {
            attempts: 3,
            backoff: BackoffPolicy::exponential(1000),
            priority: 0,
            remove_on_complete: RetentionPolicy::KeepAll,
            remove_on_fail: RetentionPolicy::KeepAll,
            timeout_ms: None,
        }
    }
}

/// Queue configuration
#[derive(Debug, Clone)]
pub struct QueueConfig {
    pub name: QueueId,
    pub defaults: DefaultJobOptions,
}

impl QueueConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            defaults: DefaultJobOptions::default(),
        }
    }

    pub fn with_defaults(mut self, defaults: DefaultJobOptions) -> Self {
        self.defaults = defaults;
        self
    }
}

/// Point-in-time snapshot of a queue. Counts are read per state and may be
/// slightly inconsistent with each other under concurrent mutation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueMetrics {
    pub waiting: i64,
    pub active: i64,
    pub completed: i64,
    pub failed: i64,
    pub delayed: i64,
    pub paused: bool,
}

impl QueueMetrics {
    /// Jobs not yet finished
    pub fn pending(&self) -> i64 {
        self.waiting + self.delayed + self.active
    }

    pub fn total(&self) -> i64 {
        self.pending() + self.completed + self.failed
    }
}

/// Validate a queue or job name: non-empty, bounded, `[A-Za-z0-9_.:-]`
pub fn validate_name(kind: &str, value: &str) -> Result<()> {
    if value.is_empty() {
        return Err(DomainError::ValidationError(format!(
            "{} name cannot be empty",
            kind
        )));
    }
    if value.len() > MAX_NAME_LEN {
        return Err(DomainError::ValidationError(format!(
            "{} name too long ({} > {})",
            kind,
            value.len(),
            MAX_NAME_LEN
        )));
    }
    if !value
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.' | ':'))
    {
        return Err(DomainError::ValidationError(format!(
            "{} name must be alphanumeric (plus _ - . :): {}",
            kind, value
        )));
    }
    Ok(())
}
