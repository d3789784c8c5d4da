//! Event Dispatcher - in-process publish/subscribe for domain events
//!
//! Two delivery modes:
//! - Sync: handlers run one after another in registration order; every handler
//!   runs even if an earlier one failed, and all failures come back to the
//!   publisher as one `HandlerExecutionError`.
//! - Async: each handler invocation is spawned as its own task; `publish`
//!   returns immediately and failures are only logged.
//!
//! The dispatcher never retries. Retryable work belongs in the job queue.

use crate::application::panic_guard::{execute_guarded, PanicGuardResult};
use crate::domain::{DomainEvent, EventSource};
use crate::error::{AppError, HandlerExecutionError, HandlerFailure, Result};
use crate::port::EventHandler;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

/// Delivery mode for `publish`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DispatchMode {
    /// Await every handler, in registration order, and report failures
    #[default]
    Sync,
    /// Spawn every handler and return immediately; failures are logged
    Async,
}

type HandlerList = Vec<Arc<dyn EventHandler>>;

// Counts one async handler task; dropped when the task finishes or is aborted
struct RunningGuard {
    running: Arc<AtomicUsize>,
    idle: Arc<Notify>,
}

impl Drop for RunningGuard {
    fn drop(&mut self) {
        if self.running.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.idle.notify_waiters();
        }
    }
}

/// Routes domain events to the handlers subscribed to their type.
///
/// Registrations are process-local. Subscribing the same handler twice makes
/// it run twice per event; avoiding that is the caller's job.
pub struct EventDispatcher {
    handlers: RwLock<HashMap<String, HandlerList>>,
    mode: DispatchMode,
    in_flight: Mutex<JoinSet<()>>,
    running: Arc<AtomicUsize>,
    idle: Arc<Notify>,
    closed: AtomicBool,
}

impl Default for EventDispatcher {
    fn default() -> Self {
        Self::new(DispatchMode::default())
    }
}

impl EventDispatcher {
    pub fn new(mode: DispatchMode) -> Self {
        Self {
            handlers: RwLock::new(HashMap::new()),
            mode,
            in_flight: Mutex::new(JoinSet::new()),
            running: Arc::new(AtomicUsize::new(0)),
            idle: Arc::new(Notify::new()),
            closed: AtomicBool::new(false),
        }
    }

    pub fn mode(&self) -> DispatchMode {
        self.mode
    }

    /// Register a handler for an event type (appended after existing handlers)
    pub fn subscribe(&self, event_type: impl Into<String>, handler: Arc<dyn EventHandler>) {
        let event_type = event_type.into();
        debug!(event_type = %event_type, handler = %handler.name(), "Handler subscribed");
        self.handlers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(event_type)
            .or_default()
            .push(handler);
    }

    /// Remove the first registration of this exact handler instance.
    /// Returns false (no-op) when it was not registered.
    pub fn unsubscribe(&self, event_type: &str, handler: &Arc<dyn EventHandler>) -> bool {
        let mut handlers = self.handlers.write().unwrap_or_else(PoisonError::into_inner);
        let Some(list) = handlers.get_mut(event_type) else {
            return false;
        };
        let target = Arc::as_ptr(handler) as *const ();
        let Some(pos) = list.iter().position(|h| Arc::as_ptr(h) as *const () == target) else {
            return false;
        };
        list.remove(pos);
        if list.is_empty() {
            handlers.remove(event_type);
        }
        debug!(event_type = %event_type, handler = %handler.name(), "Handler unsubscribed");
        true
    }

    pub fn handler_count(&self, event_type: &str) -> usize {
        self.handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(event_type)
            .map_or(0, Vec::len)
    }

    // Publish iterates over a copy so (un)subscribe during dispatch is safe
    fn snapshot(&self, event_type: &str) -> HandlerList {
        self.handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(event_type)
            .cloned()
            .unwrap_or_default()
    }

    /// Publish using the dispatcher's configured mode
    pub async fn publish(&self, event: &DomainEvent) -> Result<()> {
        self.publish_with_mode(event, self.mode).await
    }

    pub async fn publish_with_mode(&self, event: &DomainEvent, mode: DispatchMode) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(AppError::InvalidState(
                "event dispatcher is shut down".to_string(),
            ));
        }

        let handlers = self.snapshot(event.event_type());
        if handlers.is_empty() {
            debug!(
                event_id = %event.event_id(),
                event_type = %event.event_type(),
                "No handlers registered"
            );
            return Ok(());
        }

        match mode {
            DispatchMode::Sync => self.dispatch_sync(event, handlers).await,
            DispatchMode::Async => {
                self.dispatch_async(event, handlers);
                Ok(())
            }
        }
    }

    async fn dispatch_sync(&self, event: &DomainEvent, handlers: HandlerList) -> Result<()> {
        let mut failures = Vec::new();

        for handler in handlers {
            let name = handler.name().to_string();
            let error = match execute_guarded(handler.handle(event)).await {
                PanicGuardResult::Success(Ok(())) => {
                    debug!(event_id = %event.event_id(), handler = %name, "Handler completed");
                    continue;
                }
                PanicGuardResult::Success(Err(e)) => e,
                PanicGuardResult::Panicked(msg) => {
                    AppError::Internal(format!("handler panicked: {}", msg))
                }
            };
            warn!(
                event_id = %event.event_id(),
                event_type = %event.event_type(),
                handler = %name,
                error = %error,
                "Handler failed"
            );
            failures.push(HandlerFailure {
                handler: name,
                error,
            });
        }

        if failures.is_empty() {
            Ok(())
        } else {
            Err(HandlerExecutionError {
                event_id: event.event_id().to_string(),
                event_type: event.event_type().to_string(),
                failures,
            }
            .into())
        }
    }

    fn dispatch_async(&self, event: &DomainEvent, handlers: HandlerList) {
        let event = Arc::new(event.clone());
        let mut in_flight = self.in_flight.lock().unwrap_or_else(PoisonError::into_inner);

        // Reap finished tasks so the set does not grow without bound
        reap(&mut in_flight);

        for handler in handlers {
            let event = Arc::clone(&event);
            self.running.fetch_add(1, Ordering::SeqCst);
            let guard = RunningGuard {
                running: Arc::clone(&self.running),
                idle: Arc::clone(&self.idle),
            };
            in_flight.spawn(async move {
                let _guard = guard;
                let name = handler.name().to_string();
                match execute_guarded(handler.handle(&event)).await {
                    PanicGuardResult::Success(Ok(())) => {
                        debug!(event_id = %event.event_id(), handler = %name, "Async handler completed");
                    }
                    PanicGuardResult::Success(Err(e)) => {
                        error!(
                            event_id = %event.event_id(),
                            event_type = %event.event_type(),
                            handler = %name,
                            error = %e,
                            "Async handler failed"
                        );
                    }
                    PanicGuardResult::Panicked(msg) => {
                        error!(
                            event_id = %event.event_id(),
                            event_type = %event.event_type(),
                            handler = %name,
                            panic_msg = %msg,
                            "Async handler panicked"
                        );
                    }
                }
            });
        }
    }

    /// Publish several independent events.
    ///
    /// No ordering or atomicity across events. Every event is attempted; the
    /// first failure is returned and later ones are logged.
    pub async fn publish_all<I>(&self, events: I) -> Result<()>
    where
        I: IntoIterator<Item = DomainEvent>,
    {
        let mut first_error: Option<AppError> = None;
        for event in events {
            if let Err(e) = self.publish(&event).await {
                if first_error.is_none() {
                    first_error = Some(e);
                } else {
                    warn!(event_id = %event.event_id(), error = %e, "Additional publish failure");
                }
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Publish everything an aggregate recorded, emptying its pending list
    pub async fn publish_pending(&self, source: &mut impl EventSource) -> Result<()> {
        let events = source.take_pending_events();
        self.publish_all(events).await
    }

    /// Number of async handler tasks still running
    pub fn in_flight(&self) -> usize {
        self.running.load(Ordering::SeqCst)
    }

    /// Wait until every async handler task (including ones spawned while
    /// draining) has finished. Concurrent callers all wait.
    pub async fn drain(&self) {
        self.drain_until(None).await;
    }

    /// Stop accepting publishes, wait up to `grace` for async handlers, then
    /// abort the rest. Returns how many tasks were aborted.
    pub async fn shutdown(&self, grace: Duration) -> usize {
        self.closed.store(true, Ordering::SeqCst);
        let aborted = self.drain_until(Some(Instant::now() + grace)).await;
        info!(aborted = aborted, "Event dispatcher shut down");
        aborted
    }

    fn tasks(&self) -> std::sync::MutexGuard<'_, JoinSet<()>> {
        self.in_flight.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn drain_until(&self, deadline: Option<Instant>) -> usize {
        loop {
            // Created before the check so a task finishing in between still wakes us
            let idle = self.idle.notified();
            if self.running.load(Ordering::SeqCst) == 0 {
                reap(&mut self.tasks());
                return 0;
            }

            match deadline {
                None => idle.await,
                Some(deadline) => {
                    if tokio::time::timeout_at(deadline, idle).await.is_err() {
                        let mut tasks = self.tasks();
                        let aborted = self.running.load(Ordering::SeqCst);
                        warn!(aborted = aborted, "Aborting async handlers after grace period");
                        tasks.abort_all();
                        return aborted;
                    }
                }
            }
        }
    }
}

fn reap(tasks: &mut JoinSet<()>) {
    while let Some(joined) = tasks.try_join_next() {
        if let Err(join_err) = joined {
            if !join_err.is_cancelled() {
                error!(error = %join_err, "Async handler task failed");
            }
        }
    }
}
