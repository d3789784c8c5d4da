// Event feed: JSON-lines events from stdin, published through the dispatcher

use anyhow::{Context, Result};
use budgetflow_core::application::{EventDispatcher, ShutdownToken};
use budgetflow_core::domain::DomainEvent;
use serde::Deserialize;
use std::sync::Arc;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tracing::{error, info, warn};

/// One line of the feed: `{"type": "BudgetApproved", "payload": {...}}`.
/// `eventId` and `occurredAt` are optional and generated when absent.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FeedLine {
    #[serde(rename = "type")]
    event_type: String,
    #[serde(default)]
    payload: serde_json::Value,
    event_id: Option<String>,
    occurred_at: Option<i64>,
}

pub fn parse_event(line: &str) -> Result<DomainEvent> {
    let line: FeedLine = serde_json::from_str(line).context("malformed event line")?;
    if line.event_type.trim().is_empty() {
        anyhow::bail!("event type cannot be empty");
    }

    let fresh = DomainEvent::new(line.event_type, line.payload);
    let event = match line.event_id {
        Some(id) => DomainEvent::with_identity(
            id,
            line.occurred_at.unwrap_or_else(|| fresh.occurred_at()),
            fresh.event_type(),
            fresh.payload().clone(),
        ),
        None => fresh,
    };
    Ok(event)
}

/// Publish every line until EOF or shutdown. Returns how many events were
/// dispatched without handler errors.
pub async fn run<R>(reader: R, dispatcher: Arc<EventDispatcher>, mut shutdown: ShutdownToken) -> usize
where
    R: AsyncBufRead + Unpin,
{
    let mut lines = reader.lines();
    let mut published = 0;

    loop {
        let line = tokio::select! {
            line = lines.next_line() => line,
            _ = shutdown.wait() => break,
        };

        let line = match line {
            Ok(Some(line)) => line,
            Ok(None) => {
                info!(published = published, "Event feed closed");
                break;
            }
            Err(e) => {
                error!(error = %e, "Event feed read failed");
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }

        let event = match parse_event(&line) {
            Ok(event) => event,
            Err(e) => {
                warn!(error = %e, "Skipping event line");
                continue;
            }
        };

        match dispatcher.publish(&event).await {
            Ok(()) => published += 1,
            Err(e) => warn!(
                event_id = %event.event_id(),
                event_type = %event.event_type(),
                error = %e,
                "Event published with errors"
            ),
        }
    }
    published
}

#[cfg(test)]
mod tests {
    use super::*;
    use budgetflow_core::application::{shutdown_channel, DispatchMode};
    use budgetflow_core::port::event_handler::mocks::{MockBehavior, RecordingHandler};
    use tokio::io::BufReader;

    #[test]
    fn test_parse_event_with_identity() {
        let event = parse_event(
            r#"{"type":"BudgetApproved","eventId":"evt-1","occurredAt":42,"payload":{"budgetId":"b1"}}"#,
        )
        .unwrap();
        assert_eq!(event.event_id(), "evt-1");
        assert_eq!(event.occurred_at(), 42);
        assert_eq!(event.payload_str("budgetId"), Some("b1"));
    }

    #[test]
    fn test_parse_event_generates_missing_identity() {
        let event = parse_event(r#"{"type":"BudgetRejected"}"#).unwrap();
        assert_eq!(event.event_type(), "BudgetRejected");
        assert!(!event.event_id().is_empty());
        assert!(event.payload().is_null());
    }

    #[test]
    fn test_parse_event_rejects_bad_lines() {
        assert!(parse_event("not json").is_err());
        assert!(parse_event(r#"{"payload":{}}"#).is_err());
        assert!(parse_event(r#"{"type":"  "}"#).is_err());
    }

    #[tokio::test]
    async fn test_run_publishes_each_valid_line() {
        let dispatcher = Arc::new(EventDispatcher::new(DispatchMode::Sync));
        let handler = Arc::new(RecordingHandler::new("recorder", MockBehavior::Succeed));
        dispatcher.subscribe("BudgetApproved", handler.clone());

        let input = concat!(
            "{\"type\":\"BudgetApproved\",\"eventId\":\"a\"}\n",
            "\n",
            "garbage\n",
            "{\"type\":\"BudgetApproved\",\"eventId\":\"b\"}\n",
        );
        let (_tx, token) = shutdown_channel();
        let published = run(BufReader::new(input.as_bytes()), dispatcher, token).await;

        assert_eq!(published, 2);
        let seen: Vec<String> = handler
            .seen()
            .iter()
            .map(|e| e.event_id().to_string())
            .collect();
        assert_eq!(seen, vec!["a", "b"]);
    }
}
