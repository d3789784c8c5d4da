// Domain Layer - Pure business logic and entities

pub mod error;
pub mod event;
pub mod job;
pub mod queue;

// Re-exports
pub use error::DomainError;
pub use event::{DomainEvent, EventId, EventSource, PendingEvents};
pub use job::{
    BackoffKind, BackoffPolicy, Job, JobId, JobLease, JobOptions, JobPayload, JobState, Priority,
    RetentionPolicy,
};
pub use queue::{DefaultJobOptions, QueueConfig, QueueId, QueueMetrics};
