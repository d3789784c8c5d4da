// Event Handler Port
// Application code reacts to domain events by implementing this trait

use crate::domain::DomainEvent;
use crate::error::Result;
use async_trait::async_trait;
use futures::future::BoxFuture;

/// Reaction to one event type.
///
/// Handlers should be idempotent and fast; anything slow or retryable belongs
/// in a job enqueued from the handler.
#[async_trait]
pub trait EventHandler: Send + Sync {
    /// Name used in logs and in `HandlerExecutionError`
    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }

    async fn handle(&self, event: &DomainEvent) -> Result<()>;
}

/// Handler backed by an async closure
pub struct FnHandler<F> {
    name: String,
    f: F,
}

#[async_trait]
impl<F> EventHandler for FnHandler<F>
where
    F: Fn(DomainEvent) -> BoxFuture<'static, Result<()>> + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn handle(&self, event: &DomainEvent) -> Result<()> {
        (self.f)(event.clone()).await
    }
}

/// Wrap an async closure as a handler
///
/// ```ignore
/// let handler = handler_fn("log", |event| Box::pin(async move {
///     tracing::info!(event_id = %event.event_id(), "seen");
///     Ok(())
/// }));
/// ```
pub fn handler_fn<F>(name: impl Into<String>, f: F) -> FnHandler<F>
where
    F: Fn(DomainEvent) -> BoxFuture<'static, Result<()>> + Send + Sync,
{
    FnHandler {
        name: name.into(),
        f,
    }
}

// ============================================================================
// Mock Implementations for Testing
// ============================================================================

pub mod mocks {
    use super::*;
    use crate::error::AppError;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    /// Mock handler behavior
    #[derive(Debug, Clone)]
    pub enum MockBehavior {
        Succeed,
        Fail(String),
        Panic(String),
        /// Sleep, then succeed
        Sleep(Duration),
    }

    /// Records every event it sees, into a log that can be shared between handlers
    pub struct RecordingHandler {
        name: String,
        behavior: MockBehavior,
        log: Arc<Mutex<Vec<(String, DomainEvent)>>>,
    }

    impl RecordingHandler {
        pub fn new(name: impl Into<String>, behavior: MockBehavior) -> Self {
            Self::with_log(name, behavior, Arc::new(Mutex::new(Vec::new())))
        }

        /// Several handlers appending to one log show dispatch order
        pub fn with_log(
            name: impl Into<String>,
            behavior: MockBehavior,
            log: Arc<Mutex<Vec<(String, DomainEvent)>>>,
        ) -> Self {
            Self {
                name: name.into(),
                behavior,
                log,
            }
        }

        pub fn calls(&self) -> usize {
            self.log
                .lock()
                .unwrap()
                .iter()
                .filter(|(name, _)| name == &self.name)
                .count()
        }

        pub fn seen(&self) -> Vec<DomainEvent> {
            self.log
                .lock()
                .unwrap()
                .iter()
                .filter(|(name, _)| name == &self.name)
                .map(|(_, event)| event.clone())
                .collect()
        }
    }

    #[async_trait]
    impl EventHandler for RecordingHandler {
        fn name(&self) -> &str {
            &self.name
        }

        async fn handle(&self, event: &DomainEvent) -> Result<()> {
            if let MockBehavior::Sleep(duration) = &self.behavior {
                tokio::time::sleep(*duration).await;
            }
            self.log
                .lock()
                .unwrap()
                .push((self.name.clone(), event.clone()));

            match &self.behavior {
                MockBehavior::Succeed | MockBehavior::Sleep(_) => Ok(()),
                MockBehavior::Fail(msg) => Err(AppError::Internal(msg.clone())),
                MockBehavior::Panic(msg) => panic!("{}", msg),
            }
        }
    }
}
