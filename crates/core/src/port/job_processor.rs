// Job Processor Port
// The only way application code supplies queue-consumption logic

use crate::domain::Job;
use crate::error::JobProcessingError;
use async_trait::async_trait;
use futures::future::BoxFuture;
use std::collections::HashMap;
use std::sync::Arc;

/// Outcome of one processing attempt; `Ok` may carry a return value stored on the job
pub type ProcessResult = std::result::Result<Option<serde_json::Value>, JobProcessingError>;

/// Executes jobs claimed from a queue
#[async_trait]
pub trait JobProcessor: Send + Sync {
    async fn process(&self, job: &Job) -> ProcessResult;
}

/// Processor backed by an async closure
pub struct FnProcessor<F> {
    f: F,
}

#[async_trait]
impl<F> JobProcessor for FnProcessor<F>
where
    F: Fn(Job) -> BoxFuture<'static, ProcessResult> + Send + Sync,
{
    async fn process(&self, job: &Job) -> ProcessResult {
        (self.f)(job.clone()).await
    }
}

/// Wrap an async closure as a processor
pub fn processor_fn<F>(f: F) -> FnProcessor<F>
where
    F: Fn(Job) -> BoxFuture<'static, ProcessResult> + Send + Sync,
{
    FnProcessor { f }
}

/// Routes jobs of one queue to a processor per job name
#[derive(Default, Clone)]
pub struct ProcessorRegistry {
    processors: HashMap<String, Arc<dyn JobProcessor>>,
}

impl ProcessorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) the processor for a job name
    pub fn register(mut self, job_name: impl Into<String>, processor: Arc<dyn JobProcessor>) -> Self {
        self.processors.insert(job_name.into(), processor);
        self
    }

    pub fn insert(&mut self, job_name: impl Into<String>, processor: Arc<dyn JobProcessor>) {
        self.processors.insert(job_name.into(), processor);
    }

    pub fn contains(&self, job_name: &str) -> bool {
        self.processors.contains_key(job_name)
    }

    pub fn job_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.processors.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

#[async_trait]
impl JobProcessor for ProcessorRegistry {
    async fn process(&self, job: &Job) -> ProcessResult {
        match self.processors.get(&job.name) {
            Some(processor) => processor.process(job).await,
            None => Err(JobProcessingError::MissingProcessor(job.name.clone())),
        }
    }
}

// ============================================================================
// Mock Implementations for Testing
// ============================================================================

pub mod mocks {
    use super::*;
    use std::sync::Mutex;
    use std::time::Duration;

    /// Mock processor behavior
    #[derive(Debug, Clone)]
    pub enum MockBehavior {
        /// Always succeed
        Success,
        /// Always fail with message
        Fail(String),
        /// Fail the first N attempts, then succeed
        FailTimes(usize),
        /// Panic with message (for panic isolation testing)
        Panic(String),
        /// Sleep, then succeed
        Sleep(Duration),
    }

    /// Mock processor that records every attempt as `(job_id, attempts_made)`
    pub struct MockProcessor {
        behavior: MockBehavior,
        calls: Mutex<Vec<(String, i32)>>,
    }

    impl MockProcessor {
        pub fn new(behavior: MockBehavior) -> Self {
            Self {
                behavior,
                calls: Mutex::new(Vec::new()),
            }
        }

        pub fn new_success() -> Self {
            Self::new(MockBehavior::Success)
        }

        pub fn new_fail(message: impl Into<String>) -> Self {
            Self::new(MockBehavior::Fail(message.into()))
        }

        pub fn call_count(&self) -> usize {
            self.calls.lock().unwrap().len()
        }

        pub fn calls(&self) -> Vec<(String, i32)> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl JobProcessor for MockProcessor {
        async fn process(&self, job: &Job) -> ProcessResult {
            let call_number = {
                let mut calls = self.calls.lock().unwrap();
                calls.push((job.id.clone(), job.attempts_made));
                calls.len()
            };

            match &self.behavior {
                MockBehavior::Success => Ok(Some(serde_json::json!({"processed": job.id}))),
                MockBehavior::Fail(msg) => Err(JobProcessingError::Failed(msg.clone())),
                MockBehavior::FailTimes(n) => {
                    if call_number <= *n {
                        Err(JobProcessingError::Failed(format!("attempt {} failed", call_number)))
                    } else {
                        Ok(None)
                    }
                }
                MockBehavior::Panic(msg) => panic!("{}", msg),
                MockBehavior::Sleep(duration) => {
                    tokio::time::sleep(*duration).await;
                    Ok(None)
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::mocks::MockProcessor;
    use super::*;
    use crate::domain::JobPayload;
    use serde_json::json;

    fn job(name: &str) -> Job {
        Job::new("j1", 0, "reports", name, JobPayload::new(json!({})))
    }

    #[tokio::test]
    async fn test_registry_routes_by_job_name() {
        let generate = Arc::new(MockProcessor::new_success());
        let export = Arc::new(MockProcessor::new_fail("disk full"));
        let registry = ProcessorRegistry::new()
            .register("generate", generate.clone())
            .register("export", export.clone());

        assert!(registry.process(&job("generate")).await.is_ok());
        assert_eq!(
            registry.process(&job("export")).await,
            Err(JobProcessingError::Failed("disk full".to_string()))
        );
        assert_eq!(generate.call_count(), 1);
        assert_eq!(export.call_count(), 1);
        assert_eq!(registry.job_names(), vec!["export", "generate"]);
    }

    #[tokio::test]
    async fn test_registry_unknown_job_name() {
        let registry = ProcessorRegistry::new();
        assert_eq!(
            registry.process(&job("archive")).await,
            Err(JobProcessingError::MissingProcessor("archive".to_string()))
        );
    }

    #[tokio::test]
    async fn test_processor_fn_receives_job() {
        let processor = processor_fn(|job: Job| {
            Box::pin(async move { Ok(Some(json!({"name": job.name}))) })
        });
        assert_eq!(
            processor.process(&job("generate")).await,
            Ok(Some(json!({"name": "generate"})))
        );
    }
}
