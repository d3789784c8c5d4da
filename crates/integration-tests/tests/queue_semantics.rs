//! Job queue behaviour on SQLite: attempts, delays, backoff, pause, retries

mod common;

use budgetflow_core::application::{FailureOutcome, Worker, WorkerOptions};
use budgetflow_core::application::shutdown_channel;
use budgetflow_core::domain::{BackoffPolicy, Job, JobOptions, JobState};
use budgetflow_core::port::job_processor::mocks::{MockBehavior, MockProcessor};
use budgetflow_core::port::job_processor::processor_fn;
use budgetflow_core::port::time_provider::mocks::ManualTimeProvider;
use budgetflow_core::JobProcessingError;
use common::{queue_on, wait_for_state, TestDb};
use serde_json::json;
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

const T0: i64 = 1_700_000_000_000;

fn fast_worker() -> WorkerOptions {
    WorkerOptions::default().poll_interval(Duration::from_millis(10))
}

#[tokio::test]
async fn test_always_failing_job_is_attempted_exactly_attempts_max_times() {
    let db = TestDb::new("attempts");
    let queue = db.queue().await;
    let processor = Arc::new(MockProcessor::new_fail("renderer crashed"));
    let (shutdown_tx, token) = shutdown_channel();
    let worker = Worker::new("reports", queue.clone(), processor.clone(), fast_worker());
    let running = tokio::spawn(async move { worker.run(token).await });

    let handle = queue
        .enqueue(
            "reports",
            "generate",
            json!({"budgetId": "b-1"}),
            JobOptions::new().attempts(3).backoff(BackoffPolicy::fixed(0)),
        )
        .await
        .unwrap();

    let failed = wait_for_state(&queue, "reports", handle.id(), JobState::Failed).await;
    shutdown_tx.shutdown();
    running.await.unwrap().unwrap();

    assert_eq!(failed.attempts_made, 3);
    assert_eq!(processor.call_count(), 3);
    assert_eq!(
        failed.failed_reason,
        Some(JobProcessingError::failed("renderer crashed").to_string())
    );
}

#[tokio::test]
async fn test_delayed_job_is_not_claimable_before_its_delay() {
    let db = TestDb::new("delay");
    let clock = Arc::new(ManualTimeProvider::new(T0));
    let queue = queue_on(db.open().await, clock.clone());

    let handle = queue
        .enqueue(
            "notifications",
            "send",
            json!({}),
            JobOptions::new().delay_ms(5_000),
        )
        .await
        .unwrap();
    assert_eq!(handle.job().state, JobState::Delayed);

    assert!(queue.claim("notifications").await.unwrap().is_none());
    clock.advance(4_999);
    assert!(queue.claim("notifications").await.unwrap().is_none());
    clock.advance(1);
    let job = queue.claim("notifications").await.unwrap().unwrap();
    assert_eq!(&job.id, handle.id());
    assert_eq!(job.attempts_made, 1);
}

#[tokio::test]
async fn test_exponential_backoff_doubles_between_attempts() {
    let db = TestDb::new("backoff");
    let clock = Arc::new(ManualTimeProvider::new(T0));
    let queue = queue_on(db.open().await, clock.clone());

    queue
        .enqueue(
            "reports",
            "generate",
            json!({}),
            JobOptions::new()
                .attempts(4)
                .backoff(BackoffPolicy::exponential(1_000)),
        )
        .await
        .unwrap();

    let mut delays = Vec::new();
    for _ in 0..3 {
        let job = queue.claim("reports").await.unwrap().unwrap();
        let failed_at = queue.now_millis();
        let outcome = queue
            .fail(&job, &JobProcessingError::failed("timeout upstream"))
            .await
            .unwrap();
        let run_at = match outcome {
            FailureOutcome::Retrying { run_at } => run_at,
            other => panic!("expected a retry, got {:?}", other),
        };
        delays.push(run_at - failed_at);

        clock.set(run_at - 1);
        assert!(
            queue.claim("reports").await.unwrap().is_none(),
            "retry must wait for its backoff"
        );
        clock.set(run_at);
    }
    assert_eq!(delays, vec![1_000, 2_000, 4_000]);

    let last = queue.claim("reports").await.unwrap().unwrap();
    assert_eq!(last.attempts_made, 4);
    assert_eq!(
        queue
            .fail(&last, &JobProcessingError::failed("timeout upstream"))
            .await
            .unwrap(),
        FailureOutcome::Failed
    );
}

#[tokio::test]
async fn test_remove_missing_job_succeeds() {
    let db = TestDb::new("remove");
    let queue = db.queue().await;

    assert!(!queue.remove_job("reports", "no-such-job").await.unwrap());

    let handle = queue
        .enqueue("reports", "generate", json!({}), JobOptions::new())
        .await
        .unwrap();
    assert!(handle.remove().await.unwrap());
    assert!(handle.state().await.unwrap().is_none());
    assert!(!handle.remove().await.unwrap());
}

#[tokio::test]
async fn test_paused_queue_holds_jobs_until_resumed() {
    let db = TestDb::new("pause");
    let queue = db.queue().await;
    let processor = Arc::new(MockProcessor::new_success());
    let (shutdown_tx, token) = shutdown_channel();
    let worker = Worker::new("audits", queue.clone(), processor.clone(), fast_worker());
    let running = tokio::spawn(async move { worker.run(token).await });

    queue.pause("audits").await.unwrap();
    let handle = queue
        .enqueue("audits", "record", json!({"action": "rejected"}), JobOptions::new())
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(processor.call_count(), 0);
    let metrics = queue.metrics("audits").await.unwrap();
    assert!(metrics.paused);
    assert_eq!(metrics.waiting, 1);

    queue.resume("audits").await.unwrap();
    wait_for_state(&queue, "audits", handle.id(), JobState::Completed).await;
    shutdown_tx.shutdown();
    running.await.unwrap().unwrap();

    assert!(!queue.is_paused("audits").await.unwrap());
    assert_eq!(processor.call_count(), 1);
}

#[tokio::test]
async fn test_pause_lets_the_active_job_finish_and_holds_new_ones() {
    let db = TestDb::new("pause-active");
    let queue = db.queue().await;
    let processor = Arc::new(MockProcessor::new(MockBehavior::Sleep(Duration::from_millis(300))));
    let (shutdown_tx, token) = shutdown_channel();
    let worker = Worker::new("audits", queue.clone(), processor.clone(), fast_worker());
    let running = tokio::spawn(async move { worker.run(token).await });

    let first = queue
        .enqueue("audits", "record", json!({"action": "approved"}), JobOptions::new())
        .await
        .unwrap();
    wait_for_state(&queue, "audits", first.id(), JobState::Active).await;

    queue.pause("audits").await.unwrap();
    let second = queue
        .enqueue("audits", "record", json!({"action": "rejected"}), JobOptions::new())
        .await
        .unwrap();

    let done = wait_for_state(&queue, "audits", first.id(), JobState::Completed).await;
    assert_eq!(done.attempts_made, 1);

    tokio::time::sleep(Duration::from_millis(100)).await;
    let held = queue.get_job("audits", second.id()).await.unwrap().unwrap();
    assert_eq!(held.state, JobState::Waiting);
    assert_eq!(processor.call_count(), 1);

    queue.resume("audits").await.unwrap();
    wait_for_state(&queue, "audits", second.id(), JobState::Completed).await;
    shutdown_tx.shutdown();
    running.await.unwrap().unwrap();

    assert_eq!(processor.call_count(), 2);
}

#[tokio::test]
async fn test_report_generation_succeeds_on_third_attempt() {
    let db = TestDb::new("report-retry");
    let queue = db.queue().await;

    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();
    let processor = Arc::new(processor_fn(move |job: Job| {
        let attempt = counter.fetch_add(1, Ordering::SeqCst) + 1;
        Box::pin(async move {
            if attempt < 3 {
                Err(JobProcessingError::failed(format!(
                    "report service unavailable (attempt {})",
                    attempt
                )))
            } else {
                Ok(Some(json!({
                    "reportId": format!("report-{}", job.data.get_str("budgetId").unwrap_or("?")),
                })))
            }
        })
    }));

    let (shutdown_tx, token) = shutdown_channel();
    let worker = Worker::new("reports", queue.clone(), processor, fast_worker());
    let running = tokio::spawn(async move { worker.run(token).await });

    let handle = queue
        .enqueue(
            "reports",
            "generate",
            json!({"budgetId": "b-77"}),
            JobOptions::new()
                .attempts(3)
                .backoff(BackoffPolicy::exponential(20)),
        )
        .await
        .unwrap();

    let done = wait_for_state(&queue, "reports", handle.id(), JobState::Completed).await;
    shutdown_tx.shutdown();
    running.await.unwrap().unwrap();

    assert_eq!(calls.load(Ordering::SeqCst), 3);
    assert_eq!(done.attempts_made, 3);
    assert_eq!(done.return_value, Some(json!({"reportId": "report-b-77"})));
    assert!(done.finished_at.is_some());
}

#[tokio::test]
async fn test_manual_retry_restores_a_failed_job() {
    let db = TestDb::new("manual-retry");
    let queue = db.queue().await;

    let handle = queue
        .enqueue("audits", "record", json!({}), JobOptions::new().attempts(1))
        .await
        .unwrap();
    let job = queue.claim("audits").await.unwrap().unwrap();
    assert_eq!(
        queue
            .fail(&job, &JobProcessingError::failed("disk full"))
            .await
            .unwrap(),
        FailureOutcome::Failed
    );

    assert!(queue.retry_job("audits", handle.id()).await.unwrap());
    let restored = handle.refresh().await.unwrap().unwrap();
    assert_eq!(restored.state, JobState::Waiting);
    assert_eq!(restored.attempts_made, 0);

    // Only failed jobs can be retried
    assert!(!queue.retry_job("audits", handle.id()).await.unwrap());
}

#[tokio::test]
async fn test_remove_on_complete_deletes_the_row() {
    let db = TestDb::new("retention");
    let queue = db.queue().await;

    let handle = queue
        .enqueue(
            "notifications",
            "send",
            json!({}),
            JobOptions::new().remove_on_complete(true),
        )
        .await
        .unwrap();
    let job = queue.claim("notifications").await.unwrap().unwrap();
    assert!(queue.complete(&job, None).await.unwrap());

    assert!(queue.get_job("notifications", handle.id()).await.unwrap().is_none());
    assert_eq!(queue.metrics("notifications").await.unwrap().completed, 0);
}

#[tokio::test]
async fn test_priority_then_fifo_order() {
    let db = TestDb::new("order");
    let queue = db.queue().await;

    let mut ids = Vec::new();
    for (i, priority) in [0, 5, 0, 5].into_iter().enumerate() {
        let handle = queue
            .enqueue(
                "reports",
                "generate",
                json!({"n": i}),
                JobOptions::new().priority(priority),
            )
            .await
            .unwrap();
        ids.push(handle.id().clone());
    }

    let mut claimed = Vec::new();
    while let Some(job) = queue.claim("reports").await.unwrap() {
        claimed.push(job.id);
    }
    assert_eq!(claimed, vec![ids[1].clone(), ids[3].clone(), ids[0].clone(), ids[2].clone()]);
    assert_eq!(claimed.iter().collect::<HashSet<_>>().len(), 4);
}
