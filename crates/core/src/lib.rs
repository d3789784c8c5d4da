// Budgetflow Core - Event dispatch, job queue state machine, workers
// NO infrastructure dependencies (hexagonal architecture)

pub mod application;
pub mod domain;
pub mod error;
pub mod port;

pub use error::{AppError, HandlerExecutionError, HandlerFailure, JobProcessingError, Result};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
