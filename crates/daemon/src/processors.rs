// Job processors for the budget queues

use crate::handlers::{
    AUDITS_QUEUE, GENERATE_JOB, NOTIFICATIONS_QUEUE, RECORD_JOB, REPORTS_QUEUE, SEND_JOB,
};
use async_trait::async_trait;
use budgetflow_core::domain::{BackoffPolicy, DefaultJobOptions, Job, QueueConfig, RetentionPolicy};
use budgetflow_core::port::job_processor::ProcessResult;
use budgetflow_core::port::JobProcessor;
use budgetflow_core::JobProcessingError;
use serde_json::json;
use std::sync::Arc;
use tracing::info;

fn required<'a>(
    job: &Job,
    value: &'a serde_json::Value,
    key: &str,
) -> Result<&'a str, JobProcessingError> {
    value.get(key).and_then(|v| v.as_str()).ok_or_else(|| {
        JobProcessingError::failed(format!("job {} payload is missing {}", job.id, key))
    })
}

/// notifications/send
pub struct NotificationProcessor;

#[async_trait]
impl JobProcessor for NotificationProcessor {
    async fn process(&self, job: &Job) -> ProcessResult {
        let data = job.data.as_value();
        let kind = required(job, data, "kind")?;
        let budget_id = match data.get("budget") {
            Some(budget) => required(job, budget, "budgetId")?,
            None => {
                return Err(JobProcessingError::failed(format!(
                    "job {} payload is missing budget.budgetId",
                    job.id
                )))
            }
        };

        info!(
            job_id = %job.id,
            kind = %kind,
            budget_id = %budget_id,
            attempt = job.attempts_made,
            "Notification sent"
        );
        Ok(Some(json!({ "delivered": true, "kind": kind })))
    }
}

/// reports/generate
pub struct ReportProcessor;

#[async_trait]
impl JobProcessor for ReportProcessor {
    async fn process(&self, job: &Job) -> ProcessResult {
        let budget_id = required(job, job.data.as_value(), "budgetId")?;
        let report_id = format!("report-{}", budget_id);

        info!(job_id = %job.id, budget_id = %budget_id, report_id = %report_id, "Report generated");
        Ok(Some(json!({ "reportId": report_id, "budgetId": budget_id })))
    }
}

/// audits/record
pub struct AuditProcessor;

#[async_trait]
impl JobProcessor for AuditProcessor {
    async fn process(&self, job: &Job) -> ProcessResult {
        let data = job.data.as_value();
        let budget_id = required(job, data, "budgetId")?;
        let action = required(job, data, "action")?;

        info!(
            job_id = %job.id,
            budget_id = %budget_id,
            action = %action,
            reason = data.get("reason").and_then(|v| v.as_str()).unwrap_or("-"),
            "Audit entry recorded"
        );
        Ok(None)
    }
}

/// (queue, job name, processor) triples served by the daemon
pub fn registrations() -> Vec<(&'static str, &'static str, Arc<dyn JobProcessor>)> {
    vec![
        (NOTIFICATIONS_QUEUE, SEND_JOB, Arc::new(NotificationProcessor)),
        (REPORTS_QUEUE, GENERATE_JOB, Arc::new(ReportProcessor)),
        (AUDITS_QUEUE, RECORD_JOB, Arc::new(AuditProcessor)),
    ]
}

/// Default job options per queue
pub fn queue_configs() -> Vec<QueueConfig> {
    vec![
        QueueConfig::new(NOTIFICATIONS_QUEUE).with_defaults(DefaultJobOptions {
            attempts: 5,
            backoff: BackoffPolicy::exponential(2000),
            remove_on_complete: RetentionPolicy::KeepLatest(500),
            ..DefaultJobOptions::default()
        }),
        QueueConfig::new(REPORTS_QUEUE).with_defaults(DefaultJobOptions {
            attempts: 3,
            backoff: BackoffPolicy::exponential(1000),
            timeout_ms: Some(60_000),
            ..DefaultJobOptions::default()
        }),
        // Audit entries must land eventually; keep trying on a steady cadence
        QueueConfig::new(AUDITS_QUEUE).with_defaults(DefaultJobOptions {
            attempts: 10,
            backoff: BackoffPolicy::fixed(5000),
            ..DefaultJobOptions::default()
        }),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use budgetflow_core::domain::JobPayload;

    fn job(queue: &str, name: &str, data: serde_json::Value) -> Job {
        Job::new("job-1".to_string(), 1_000, queue, name, JobPayload::new(data))
    }

    #[tokio::test]
    async fn test_report_processor_returns_report_id() {
        let job = job(REPORTS_QUEUE, GENERATE_JOB, json!({"budgetId": "b-42"}));
        let value = ReportProcessor.process(&job).await.unwrap().unwrap();
        assert_eq!(value["reportId"], "report-b-42");
    }

    #[tokio::test]
    async fn test_notification_processor_requires_budget() {
        let ok = job(
            NOTIFICATIONS_QUEUE,
            SEND_JOB,
            json!({"kind": "budget_approved", "budget": {"budgetId": "b-1"}}),
        );
        assert!(NotificationProcessor.process(&ok).await.is_ok());

        let missing = job(NOTIFICATIONS_QUEUE, SEND_JOB, json!({"kind": "budget_approved"}));
        let err = NotificationProcessor.process(&missing).await.unwrap_err();
        assert!(matches!(err, JobProcessingError::Failed(ref msg) if msg.contains("budgetId")));
    }

    #[tokio::test]
    async fn test_audit_processor_has_no_return_value() {
        let job = job(
            AUDITS_QUEUE,
            RECORD_JOB,
            json!({"budgetId": "b-1", "action": "rejected"}),
        );
        assert_eq!(AuditProcessor.process(&job).await.unwrap(), None);
    }

    #[test]
    fn test_every_registered_queue_is_configured() {
        let configured: Vec<String> = queue_configs().into_iter().map(|c| c.name).collect();
        for (queue, _, _) in registrations() {
            assert!(configured.iter().any(|c| c == queue), "{} has no config", queue);
        }
    }
}
