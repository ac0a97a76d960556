//! Account-to-Account Transfers
//!
//! Moves value between two accounts atomically with a double-entry ledger and
//! a transactional outbox.
//!
//! # Flow
//!
//! ```text
//! validate (amount > 0, from != to)
//!   └─ unit of work (repeatable read)
//!        ├─ lock accounts in ascending id order (FOR UPDATE)
//!        ├─ re-check existence and balance under the lock
//!        ├─ debit source / credit destination
//!        ├─ write DEBIT + CREDIT transactions, transfer row, outbox row
//!        └─ commit  (any failure: rollback, nothing observable)
//! ```
//!
//! # Invariants
//!
//! 1. **Conservation**: committed transfers never change the sum of balances
//! 2. **No Negative Balance**: the balance check runs after the row lock
//! 3. **Outbox Coupling**: a transfer row exists iff its outbox row exists
//! 4. **Deadlock Freedom**: every unit of work locks accounts in the same order

pub mod adapters;
pub mod engine;
pub mod error;
pub mod ids;
pub mod store;
pub mod types;
pub mod uow;

mod integration_tests;

// Re-exports for convenience
pub use engine::{
    EngineConfig, MemoryTransferEngine, PgTransferEngine, TransferEngine, TransferService,
};
pub use error::TransferError;
pub use ids::{CounterIdGenerator, IdGenerator, PgSequenceIdGenerator, UlidIdGenerator};
pub use store::{AccountStore, LedgerStore};
pub use types::{
    Account, AccountId, LedgerTransaction, OutboxEvent, Stan, TransactionState, TransactionType,
    Transfer, TransferCompletedPayload, TransferId,
};
pub use uow::{IsolationLevel, UnitOfWorkCoordinator, UnitOfWorkFactory};
