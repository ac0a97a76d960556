//! Money Transfer - Atomic Transfers with a Transactional Outbox
//!
//! Account-to-account transfers that debit, credit, record a double-entry
//! ledger pair and enqueue a downstream notification in one unit of work.
//!
//! # Modules
//!
//! - [`transfer`] - Transfer engine, unit of work, stores and backends
//! - [`outbox`] - Outbox relay delivering completed-transfer events
//! - [`gateway`] - HTTP surface
//! - [`db`] - PostgreSQL pool and migrations
//! - [`config`] - YAML configuration
//! - [`logging`] - Tracing subscriber setup

pub mod config;
pub mod db;
pub mod gateway;
pub mod logging;
pub mod outbox;
pub mod transfer;

// Convenient re-exports at crate root
pub use outbox::{OutboxRelay, RelayConfig, RelayState};
pub use transfer::{
    Account, AccountId, EngineConfig, TransferEngine, TransferError, TransferService,
};
