//! Downstream event handlers

use async_trait::async_trait;
use tracing::info;

use super::error::RelayError;
use crate::transfer::types::{EVENT_TRANSFER_COMPLETED, OutboxEvent, TransferCompletedPayload};

/// Consumer of one outbox event type.
///
/// Delivery is at-least-once: the same event may be handed over again if
/// marking it processed failed, so handlers should tolerate repeats.
#[async_trait]
pub trait EventHandler: Send + Sync {
    /// Event type this handler is registered under
    fn event_type(&self) -> &str;

    async fn handle(&self, event: &OutboxEvent) -> Result<(), RelayError>;
}

/// Logs every completed transfer
#[derive(Debug, Default, Clone, Copy)]
pub struct TransferCompletedLogger;

#[async_trait]
impl EventHandler for TransferCompletedLogger {
    fn event_type(&self) -> &str {
        EVENT_TRANSFER_COMPLETED
    }

    async fn handle(&self, event: &OutboxEvent) -> Result<(), RelayError> {
        let payload: TransferCompletedPayload = serde_json::from_value(event.payload.clone())?;

        info!(
            event_id = event.id,
            transfer_id = %payload.transfer_id,
            from = %payload.from_account_id,
            to = %payload.to_account_id,
            amount = payload.amount,
            state = %payload.state,
            "Transfer completed event processed"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn event(payload: serde_json::Value) -> OutboxEvent {
        OutboxEvent {
            id: 1,
            aggregate_type: "transfer".into(),
            aggregate_id: "TRF1".into(),
            event_type: EVENT_TRANSFER_COMPLETED.into(),
            payload,
            created_at: Utc::now(),
            processed_at: None,
        }
    }

    #[tokio::test]
    async fn test_logger_accepts_valid_payload() {
        let payload = serde_json::json!({
            "transfer_id": "TRF1",
            "from_account_id": "1",
            "to_account_id": "2",
            "amount": 1000,
            "state": "COMPLETED",
            "created_at": "2024-01-01T00:00:00Z",
            "completed_at": "2024-01-01T00:00:01Z",
        });
        assert!(TransferCompletedLogger.handle(&event(payload)).await.is_ok());
    }

    #[tokio::test]
    async fn test_logger_rejects_malformed_payload() {
        let err = TransferCompletedLogger
            .handle(&event(serde_json::json!({"transfer_id": 5})))
            .await
            .unwrap_err();
        assert!(matches!(err, RelayError::Payload(_)));
    }
}
