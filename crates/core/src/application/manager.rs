// Queue Manager - processor registration and worker lifecycle

use crate::application::queue::{invalid, JobQueue};
use crate::application::worker::{shutdown_channel, ShutdownSender, ShutdownToken, Worker, WorkerOptions};
use crate::domain::queue::validate_name;
use crate::error::{AppError, Result};
use crate::port::{JobProcessor, ProcessorRegistry};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::task::JoinSet;
use tracing::{error, info};

struct PendingWorker {
    queue: String,
    processor: Arc<dyn JobProcessor>,
    options: WorkerOptions,
}

#[derive(Default)]
struct State {
    pending: Vec<PendingWorker>,
    registries: BTreeMap<String, ProcessorRegistry>,
    worker_options: HashMap<String, WorkerOptions>,
    workers: JoinSet<()>,
    started: bool,
    stopped: bool,
}

/// Owns the workers of a process.
///
/// Processors are registered either whole-queue (`register_processor`) or
/// per job name (`register_job_processor`, routed by a `ProcessorRegistry`).
/// Nothing runs until `start`; `shutdown` stops every worker and waits for
/// each to drain within its own grace period.
pub struct QueueManager {
    queue: Arc<JobQueue>,
    state: Mutex<State>,
    shutdown_tx: ShutdownSender,
    // Keeps the channel open while no worker is running
    _shutdown_rx: ShutdownToken,
}

impl QueueManager {
    pub fn new(queue: Arc<JobQueue>) -> Self {
        let (shutdown_tx, shutdown_rx) = shutdown_channel();
        Self {
            queue,
            state: Mutex::new(State::default()),
            shutdown_tx,
            _shutdown_rx: shutdown_rx,
        }
    }

    pub fn queue(&self) -> &Arc<JobQueue> {
        &self.queue
    }

    fn state(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Attach a processor to a whole queue. Spawns its worker right away when
    /// the manager is already started.
    pub fn register_processor(
        &self,
        queue: impl Into<String>,
        processor: Arc<dyn JobProcessor>,
        options: WorkerOptions,
    ) -> Result<()> {
        let queue = queue.into();
        validate_name("queue", &queue).map_err(invalid)?;

        let mut state = self.state();
        if state.stopped {
            return Err(AppError::InvalidState("queue manager is shut down".to_string()));
        }
        if state.registries.contains_key(&queue) {
            return Err(AppError::Validation(format!(
                "queue {} already has job-name processors",
                queue
            )));
        }

        let worker = PendingWorker {
            queue,
            processor,
            options,
        };
        if state.started {
            self.spawn_worker(&mut state.workers, worker);
        } else {
            state.pending.push(worker);
        }
        Ok(())
    }

    /// Attach a processor to one job name of a queue. Must happen before `start`.
    pub fn register_job_processor(
        &self,
        queue: impl Into<String>,
        job_name: impl Into<String>,
        processor: Arc<dyn JobProcessor>,
    ) -> Result<()> {
        let queue = queue.into();
        let job_name = job_name.into();
        validate_name("queue", &queue).map_err(invalid)?;
        validate_name("job", &job_name).map_err(invalid)?;

        let mut state = self.state();
        if state.started || state.stopped {
            return Err(AppError::InvalidState(
                "job processors must be registered before start".to_string(),
            ));
        }
        if state.pending.iter().any(|w| w.queue == queue) {
            return Err(AppError::Validation(format!(
                "queue {} already has a queue-wide processor",
                queue
            )));
        }
        state
            .registries
            .entry(queue)
            .or_default()
            .insert(job_name, processor);
        Ok(())
    }

    /// Worker options used for a queue served through `register_job_processor`
    pub fn set_worker_options(&self, queue: impl Into<String>, options: WorkerOptions) {
        self.state().worker_options.insert(queue.into(), options);
    }

    /// Spawn one worker per registered queue
    pub fn start(&self) -> Result<()> {
        let mut state = self.state();
        if state.started || state.stopped {
            return Err(AppError::InvalidState(
                "queue manager already started".to_string(),
            ));
        }
        state.started = true;

        let registries = std::mem::take(&mut state.registries);
        for (queue, registry) in registries {
            info!(queue = %queue, job_names = ?registry.job_names(), "Registering job processors");
            let options = state.worker_options.get(&queue).cloned().unwrap_or_default();
            state.pending.push(PendingWorker {
                queue,
                processor: Arc::new(registry),
                options,
            });
        }

        let pending = std::mem::take(&mut state.pending);
        for worker in pending {
            self.spawn_worker(&mut state.workers, worker);
        }
        info!(workers = state.workers.len(), "Queue manager started");
        Ok(())
    }

    fn spawn_worker(&self, workers: &mut JoinSet<()>, pending: PendingWorker) {
        let token = self.shutdown_tx.subscribe();
        let worker = Worker::new(
            pending.queue,
            Arc::clone(&self.queue),
            pending.processor,
            pending.options,
        );
        workers.spawn(async move {
            if let Err(e) = worker.run(token).await {
                error!(queue = %worker.queue_name(), error = %e, "Worker exited with error");
            }
        });
    }

    pub fn worker_count(&self) -> usize {
        self.state().workers.len()
    }

    /// Signal every worker to stop and wait until all have drained
    pub async fn shutdown(&self) {
        let mut workers = {
            let mut state = self.state();
            state.stopped = true;
            std::mem::take(&mut state.workers)
        };
        info!(workers = workers.len(), "Queue manager shutting down");
        self.shutdown_tx.shutdown();

        while let Some(joined) = workers.join_next().await {
            if let Err(e) = joined {
                error!(error = %e, "Worker task failed");
            }
        }
        info!("Queue manager stopped");
    }
}
