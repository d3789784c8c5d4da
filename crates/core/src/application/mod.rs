// Application Layer - Use Cases and Business Logic

pub mod dispatcher;
pub mod maintenance;
pub mod manager;
pub mod panic_guard;
pub mod queue;
pub mod recovery;
pub mod retry;
pub mod worker;

// Re-exports
pub use dispatcher::{DispatchMode, EventDispatcher};
pub use maintenance::{MaintenanceConfig, MaintenanceScheduler};
pub use manager::QueueManager;
pub use queue::{FailureOutcome, JobHandle, JobQueue};
pub use recovery::StallReclaimer;
pub use retry::{RetryDecision, RetryPolicy};
pub use worker::{
    shutdown_channel, RateLimit, ShutdownSender, ShutdownToken, Worker, WorkerOptions,
};
