//! Transactional Outbox Relay
//!
//! Transfer commits write an outbox row in the same unit of work. This module
//! delivers those rows to downstream handlers at least once, without any
//! distributed transaction between the database and the consumers.

pub mod error;
pub mod handler;
pub mod relay;

pub use error::RelayError;
pub use handler::{EventHandler, TransferCompletedLogger};
pub use relay::{OutboxRelay, PollReport, RelayConfig, RelayState};
