//! Store capability traits
//!
//! The engine depends only on these traits. Every mutating call takes the
//! caller's open unit-of-work handle; read paths run outside any unit of work
//! and see the committed state.

use async_trait::async_trait;

use super::error::TransferError;
use super::types::{Account, AccountId, OutboxEvent, Transfer, TransferId};

/// Account rows: locking reads and full-row writes inside a unit of work
#[async_trait]
pub trait AccountStore: Send + Sync + 'static {
    type Uow: Send + 'static;

    /// Read one account and hold an exclusive lock on it until `uow` ends.
    ///
    /// Fails with [`TransferError::AccountNotFound`] if absent.
    async fn get_for_update(
        &self,
        uow: &mut Self::Uow,
        id: &AccountId,
    ) -> Result<Account, TransferError>;

    /// Write the full account row. Fails with
    /// [`TransferError::AccountNotFound`] if the row no longer exists.
    async fn update(&self, uow: &mut Self::Uow, account: &Account) -> Result<(), TransferError>;

    async fn get_by_id(&self, id: &AccountId) -> Result<Account, TransferError>;

    /// All accounts ordered by id
    async fn list(&self) -> Result<Vec<Account>, TransferError>;
}

/// Transfers, their ledger transactions, and the outbox
#[async_trait]
pub trait LedgerStore: Send + Sync + 'static {
    type Uow: Send + 'static;

    /// Insert both ledger transactions, the transfer row and its
    /// `transfer_completed` outbox row inside `uow`.
    async fn persist(&self, uow: &mut Self::Uow, transfer: &Transfer) -> Result<(), TransferError>;

    /// Transfer with both transactions attached
    async fn get_by_id(&self, id: &TransferId) -> Result<Transfer, TransferError>;

    /// All transfers, most recent first
    async fn list(&self) -> Result<Vec<Transfer>, TransferError>;

    /// Up to `limit` unprocessed outbox rows, oldest first
    async fn fetch_unprocessed_outbox(&self, limit: usize)
    -> Result<Vec<OutboxEvent>, TransferError>;

    /// Set `processed_at` for one row. Marking a processed row again is a
    /// no-op and keeps the first timestamp.
    async fn mark_outbox_processed(&self, id: i64) -> Result<(), TransferError>;
}
