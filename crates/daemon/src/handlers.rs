// Budget event handlers
// Each handler only enqueues; the slow work happens in processors.rs

use async_trait::async_trait;
use budgetflow_core::application::{EventDispatcher, JobQueue};
use budgetflow_core::domain::queue::validate_name;
use budgetflow_core::domain::{DomainEvent, JobOptions};
use budgetflow_core::port::EventHandler;
use budgetflow_core::{AppError, Result};
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, info, warn};

pub const BUDGET_APPROVED: &str = "BudgetApproved";
pub const BUDGET_REJECTED: &str = "BudgetRejected";

pub const NOTIFICATIONS_QUEUE: &str = "notifications";
pub const REPORTS_QUEUE: &str = "reports";
pub const AUDITS_QUEUE: &str = "audits";

pub const SEND_JOB: &str = "send";
pub const GENERATE_JOB: &str = "generate";
pub const RECORD_JOB: &str = "record";

fn budget_id(event: &DomainEvent) -> Result<&str> {
    event.payload_str("budgetId").ok_or_else(|| {
        AppError::Validation(format!(
            "{} event {} has no budgetId",
            event.event_type(),
            event.event_id()
        ))
    })
}

/// Job id derived from the event so a redelivered event does not enqueue twice
fn job_options_for(job_name: &str, event: &DomainEvent) -> JobOptions {
    let id = format!("{}:{}", job_name, event.event_id());
    match validate_name("job id", &id) {
        Ok(()) => JobOptions::new().job_id(id),
        Err(e) => {
            // Redelivery of this event will enqueue a second job
            warn!(
                event_id = %event.event_id(),
                job = job_name,
                error = %e,
                "Event id unusable as job id, falling back to a generated id"
            );
            JobOptions::new()
        }
    }
}

/// Sends the approval notification and kicks off the budget report
pub struct BudgetApprovedHandler {
    queue: Arc<JobQueue>,
}

impl BudgetApprovedHandler {
    pub fn new(queue: Arc<JobQueue>) -> Self {
        Self { queue }
    }
}

#[async_trait]
impl EventHandler for BudgetApprovedHandler {
    fn name(&self) -> &str {
        "budget_approved_jobs"
    }

    async fn handle(&self, event: &DomainEvent) -> Result<()> {
        let budget_id = budget_id(event)?;
        let data = json!({
            "budgetId": budget_id,
            "eventId": event.event_id(),
            "approvedBy": event.payload().get("approvedBy").cloned(),
        });

        self.queue
            .enqueue(
                NOTIFICATIONS_QUEUE,
                SEND_JOB,
                json!({ "kind": "budget_approved", "budget": data }),
                job_options_for(SEND_JOB, event),
            )
            .await?;
        self.queue
            .enqueue(
                REPORTS_QUEUE,
                GENERATE_JOB,
                data,
                job_options_for(GENERATE_JOB, event),
            )
            .await?;

        debug!(event_id = %event.event_id(), budget_id = %budget_id, "Approval jobs enqueued");
        Ok(())
    }
}

/// Records the rejection in the audit trail
pub struct BudgetRejectedHandler {
    queue: Arc<JobQueue>,
}

impl BudgetRejectedHandler {
    pub fn new(queue: Arc<JobQueue>) -> Self {
        Self { queue }
    }
}

#[async_trait]
impl EventHandler for BudgetRejectedHandler {
    fn name(&self) -> &str {
        "budget_rejected_audit"
    }

    async fn handle(&self, event: &DomainEvent) -> Result<()> {
        let budget_id = budget_id(event)?;
        self.queue
            .enqueue(
                AUDITS_QUEUE,
                RECORD_JOB,
                json!({
                    "budgetId": budget_id,
                    "eventId": event.event_id(),
                    "action": "rejected",
                    "reason": event.payload().get("reason").cloned(),
                    "occurredAt": event.occurred_at(),
                }),
                job_options_for(RECORD_JOB, event),
            )
            .await?;
        Ok(())
    }
}

/// Logs every budget decision it is subscribed to
pub struct DecisionLogHandler;

#[async_trait]
impl EventHandler for DecisionLogHandler {
    fn name(&self) -> &str {
        "decision_log"
    }

    async fn handle(&self, event: &DomainEvent) -> Result<()> {
        info!(
            event_id = %event.event_id(),
            event_type = %event.event_type(),
            budget_id = event.payload_str("budgetId").unwrap_or("-"),
            "Budget decision"
        );
        Ok(())
    }
}

/// Subscribe the budget handlers to their events
pub fn register(dispatcher: &EventDispatcher, queue: &Arc<JobQueue>) {
    let log: Arc<dyn EventHandler> = Arc::new(DecisionLogHandler);

    dispatcher.subscribe(
        BUDGET_APPROVED,
        Arc::new(BudgetApprovedHandler::new(Arc::clone(queue))),
    );
    dispatcher.subscribe(BUDGET_APPROVED, Arc::clone(&log));

    dispatcher.subscribe(
        BUDGET_REJECTED,
        Arc::new(BudgetRejectedHandler::new(Arc::clone(queue))),
    );
    dispatcher.subscribe(BUDGET_REJECTED, log);
}

#[cfg(test)]
mod tests {
    use super::*;
    use budgetflow_core::application::DispatchMode;
    use budgetflow_core::domain::JobState;
    use budgetflow_core::port::id_provider::mocks::SequentialIdProvider;
    use budgetflow_core::port::job_store::mocks::InMemoryJobStore;
    use budgetflow_core::port::time_provider::mocks::ManualTimeProvider;

    fn job_queue() -> Arc<JobQueue> {
        Arc::new(JobQueue::new(
            Arc::new(InMemoryJobStore::new()),
            Arc::new(ManualTimeProvider::new(1_000)),
            Arc::new(SequentialIdProvider::new("job")),
        ))
    }

    fn approved(event_id: &str) -> DomainEvent {
        DomainEvent::with_identity(
            event_id,
            1_000,
            BUDGET_APPROVED,
            json!({"budgetId": "b-42", "approvedBy": "u-7"}),
        )
    }

    #[tokio::test]
    async fn test_approval_enqueues_notification_and_report() {
        let queue = job_queue();
        let dispatcher = EventDispatcher::new(DispatchMode::Sync);
        register(&dispatcher, &queue);
        assert_eq!(dispatcher.handler_count(BUDGET_APPROVED), 2);

        dispatcher.publish(&approved("evt-1")).await.unwrap();

        let send = queue
            .get_job(NOTIFICATIONS_QUEUE, "send:evt-1")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(send.state, JobState::Waiting);
        assert_eq!(send.data.as_value()["budget"]["budgetId"], "b-42");

        let report = queue
            .get_job(REPORTS_QUEUE, "generate:evt-1")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(report.data.get_str("eventId"), Some("evt-1"));
    }

    #[tokio::test]
    async fn test_redelivered_event_does_not_duplicate_jobs() {
        let queue = job_queue();
        let dispatcher = EventDispatcher::new(DispatchMode::Sync);
        register(&dispatcher, &queue);

        dispatcher.publish(&approved("evt-1")).await.unwrap();
        dispatcher.publish(&approved("evt-1")).await.unwrap();

        let metrics = queue.metrics(REPORTS_QUEUE).await.unwrap();
        assert_eq!(metrics.waiting, 1);
    }

    #[tokio::test]
    async fn test_event_id_unusable_as_job_id_still_enqueues() {
        let queue = job_queue();
        let dispatcher = EventDispatcher::new(DispatchMode::Sync);
        register(&dispatcher, &queue);

        dispatcher.publish(&approved("evt 1/retry")).await.unwrap();

        assert!(queue
            .get_job(REPORTS_QUEUE, "generate:evt 1/retry")
            .await
            .unwrap()
            .is_none());
        let metrics = queue.metrics(REPORTS_QUEUE).await.unwrap();
        assert_eq!(metrics.waiting, 1);
        let metrics = queue.metrics(NOTIFICATIONS_QUEUE).await.unwrap();
        assert_eq!(metrics.waiting, 1);
    }

    #[tokio::test]
    async fn test_rejection_enqueues_audit_record() {
        let queue = job_queue();
        let dispatcher = EventDispatcher::new(DispatchMode::Sync);
        register(&dispatcher, &queue);

        let event = DomainEvent::with_identity(
            "evt-9",
            2_000,
            BUDGET_REJECTED,
            json!({"budgetId": "b-1", "reason": "over limit"}),
        );
        dispatcher.publish(&event).await.unwrap();

        let audit = queue
            .get_job(AUDITS_QUEUE, "record:evt-9")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(audit.data.get_str("action"), Some("rejected"));
        assert_eq!(audit.data.get_str("reason"), Some("over limit"));
        assert_eq!(queue.metrics(NOTIFICATIONS_QUEUE).await.unwrap().total(), 0);
    }

    #[tokio::test]
    async fn test_missing_budget_id_is_reported_as_handler_failure() {
        let queue = job_queue();
        let dispatcher = EventDispatcher::new(DispatchMode::Sync);
        register(&dispatcher, &queue);

        let event = DomainEvent::with_identity("evt-2", 1, BUDGET_APPROVED, json!({}));
        let err = dispatcher.publish(&event).await.unwrap_err();
        match err {
            AppError::HandlerExecution(e) => {
                assert_eq!(e.failures.len(), 1);
                assert_eq!(e.failures[0].handler, "budget_approved_jobs");
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
