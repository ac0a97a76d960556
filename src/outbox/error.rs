//! Outbox relay errors
//!
//! Delivery errors are per event. The relay logs them and leaves the row
//! unprocessed; they never leave a poll cycle.

use thiserror::Error;

use crate::transfer::TransferError;

#[derive(Error, Debug)]
pub enum RelayError {
    #[error("No handler registered for event type: {0}")]
    UnknownEventType(String),

    #[error("Invalid event payload: {0}")]
    Payload(#[from] serde_json::Error),

    #[error("Handler failed: {0}")]
    Handler(String),

    #[error("Outbox store error: {0}")]
    Store(#[from] TransferError),
}

impl RelayError {
    pub fn code(&self) -> &'static str {
        match self {
            RelayError::UnknownEventType(_) => "UNKNOWN_EVENT_TYPE",
            RelayError::Payload(_) => "INVALID_PAYLOAD",
            RelayError::Handler(_) => "HANDLER_FAILED",
            RelayError::Store(_) => "STORE_ERROR",
        }
    }
}
