// Central Error Type for the Application

use thiserror::Error;

/// Application-level error type
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Domain error: {0}")]
    Domain(#[from] crate::domain::DomainError),

    #[error(transparent)]
    HandlerExecution(#[from] HandlerExecutionError),

    #[error(transparent)]
    JobProcessing(#[from] JobProcessingError),

    /// The durable store cannot be reached. Nothing is buffered in memory;
    /// the caller retries with its own backoff.
    #[error("Queue unavailable: {0}")]
    QueueUnavailable(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias using AppError
pub type Result<T> = std::result::Result<T, AppError>;

/// One synchronous handler that failed while an event was dispatched
#[derive(Debug)]
pub struct HandlerFailure {
    pub handler: String,
    pub error: AppError,
}

/// Every handler failure collected during one synchronous publish
#[derive(Error, Debug)]
#[error(
    "{} handler(s) failed for event {} ({}): {}",
    .failures.len(),
    .event_type,
    .event_id,
    summarize(.failures)
)]
pub struct HandlerExecutionError {
    pub event_id: String,
    pub event_type: String,
    pub failures: Vec<HandlerFailure>,
}

impl HandlerExecutionError {
    pub fn handler_names(&self) -> Vec<&str> {
        self.failures.iter().map(|f| f.handler.as_str()).collect()
    }
}

fn summarize(failures: &[HandlerFailure]) -> String {
    failures
        .iter()
        .map(|f| format!("{}: {}", f.handler, f.error))
        .collect::<Vec<_>>()
        .join("; ")
}

/// Processor failure. Retried by the queue until attempts are exhausted.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum JobProcessingError {
    #[error("Processor failed: {0}")]
    Failed(String),

    #[error("Job timed out after {0}ms")]
    Timeout(i64),

    #[error("Processor panicked: {0}")]
    Panicked(String),

    #[error("No processor registered for job name '{0}'")]
    MissingProcessor(String),
}

impl JobProcessingError {
    pub fn failed(message: impl Into<String>) -> Self {
        JobProcessingError::Failed(message.into())
    }
}

// Processors that use `?` on core operations fail with the error message
impl From<AppError> for JobProcessingError {
    fn from(err: AppError) -> Self {
        match err {
            AppError::JobProcessing(inner) => inner,
            other => JobProcessingError::Failed(other.to_string()),
        }
    }
}
