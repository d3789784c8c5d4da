// Port Layer - Interfaces for external dependencies

pub mod event_handler;
pub mod id_provider; // For deterministic testing
pub mod job_processor;
pub mod job_store;
pub mod time_provider;

// Re-exports
pub use event_handler::EventHandler;
pub use id_provider::IdProvider;
pub use job_processor::{processor_fn, JobProcessor, ProcessorRegistry};
pub use job_store::{JobStore, ReclaimStats};
pub use time_provider::TimeProvider;
