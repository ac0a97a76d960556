//! In-memory backend
//!
//! Committed tables sit behind one `RwLock`. Account row locks are per-row
//! async mutexes whose owned guards live in the unit of work, so a second
//! unit of work locking the same row waits until the first one ends.
//! Writes are staged in the unit of work and applied in one step on commit;
//! rollback (or dropping the handle) discards them.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::OwnedMutexGuard;

use crate::transfer::error::TransferError;
use crate::transfer::store::{AccountStore, LedgerStore};
use crate::transfer::types::{
    Account, AccountId, NewOutboxEvent, OutboxEvent, Transfer, TransferId,
};
use crate::transfer::uow::{IsolationLevel, UnitOfWorkFactory};

#[derive(Debug, Default)]
struct Tables {
    accounts: BTreeMap<AccountId, Account>,
    transfers: HashMap<TransferId, Transfer>,
    /// Commit order of transfers
    transfer_log: Vec<TransferId>,
    outbox: BTreeMap<i64, OutboxEvent>,
    next_outbox_id: i64,
}

/// Pending work of one in-memory unit of work
pub struct MemoryUnitOfWork {
    row_guards: HashMap<AccountId, OwnedMutexGuard<()>>,
    account_writes: BTreeMap<AccountId, Account>,
    transfers: Vec<Transfer>,
    outbox: Vec<NewOutboxEvent>,
    finished: bool,
}

impl MemoryUnitOfWork {
    fn new() -> Self {
        Self {
            row_guards: HashMap::new(),
            account_writes: BTreeMap::new(),
            transfers: Vec::new(),
            outbox: Vec::new(),
            finished: false,
        }
    }

    /// Accounts currently locked by this unit of work
    pub fn locked_accounts(&self) -> Vec<AccountId> {
        let mut ids: Vec<_> = self.row_guards.keys().cloned().collect();
        ids.sort();
        ids
    }

    fn ensure_open(&self) -> Result<(), TransferError> {
        if self.finished {
            return Err(TransferError::SystemError(
                "unit of work already finished".to_string(),
            ));
        }
        Ok(())
    }
}

/// Non-durable store implementing the unit-of-work factory and both store traits
pub struct MemoryStore {
    tables: RwLock<Tables>,
    row_locks: Mutex<HashMap<AccountId, Arc<tokio::sync::Mutex<()>>>>,
    lock_timeout: Option<Duration>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            tables: RwLock::new(Tables {
                next_outbox_id: 1,
                ..Tables::default()
            }),
            row_locks: Mutex::new(HashMap::new()),
            lock_timeout: None,
        }
    }

    /// Store provisioned with `accounts`
    pub fn with_accounts(accounts: impl IntoIterator<Item = Account>) -> Self {
        let store = Self::new();
        if let Ok(mut tables) = store.tables.write() {
            for account in accounts {
                tables.accounts.insert(account.id.clone(), account);
            }
        }
        store
    }

    /// Bound how long `get_for_update` waits for a row lock
    pub fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = Some(timeout);
        self
    }

    /// Sum of all committed balances
    pub fn total_balance(&self) -> Result<i64, TransferError> {
        Ok(self.read()?.accounts.values().map(|a| a.balance).sum())
    }

    /// Number of committed outbox rows, processed or not
    pub fn outbox_len(&self) -> Result<usize, TransferError> {
        Ok(self.read()?.outbox.len())
    }

    /// Outbox rows for one aggregate id
    pub fn outbox_for(&self, aggregate_id: &str) -> Result<Vec<OutboxEvent>, TransferError> {
        Ok(self
            .read()?
            .outbox
            .values()
            .filter(|e| e.aggregate_id == aggregate_id)
            .cloned()
            .collect())
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, Tables>, TransferError> {
        self.tables
            .read()
            .map_err(|_| TransferError::SystemError("memory store lock poisoned".to_string()))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, Tables>, TransferError> {
        self.tables
            .write()
            .map_err(|_| TransferError::SystemError("memory store lock poisoned".to_string()))
    }

    fn row_lock(&self, id: &AccountId) -> Result<Arc<tokio::sync::Mutex<()>>, TransferError> {
        let mut locks = self
            .row_locks
            .lock()
            .map_err(|_| TransferError::SystemError("row lock table poisoned".to_string()))?;
        Ok(locks.entry(id.clone()).or_default().clone())
    }

    fn committed_account(&self, id: &AccountId) -> Result<Account, TransferError> {
        self.read()?
            .accounts
            .get(id)
            .cloned()
            .ok_or_else(|| TransferError::AccountNotFound(id.to_string()))
    }
}

#[async_trait]
impl UnitOfWorkFactory for MemoryStore {
    type Uow = MemoryUnitOfWork;

    // Row locks serialize conflicting writers at every isolation level
    async fn begin(&self, _isolation: IsolationLevel) -> Result<MemoryUnitOfWork, TransferError> {
        Ok(MemoryUnitOfWork::new())
    }

    async fn commit(&self, uow: &mut MemoryUnitOfWork) -> Result<(), TransferError> {
        uow.ensure_open()?;
        {
            let mut tables = self.write()?;

            for id in uow.account_writes.keys() {
                if !tables.accounts.contains_key(id) {
                    return Err(TransferError::AccountNotFound(id.to_string()));
                }
            }
            for t in &uow.transfers {
                if tables.transfers.contains_key(&t.id) {
                    return Err(TransferError::Database(format!(
                        "duplicate transfer id {}",
                        t.id
                    )));
                }
            }

            for (id, account) in std::mem::take(&mut uow.account_writes) {
                tables.accounts.insert(id, account);
            }
            for t in std::mem::take(&mut uow.transfers) {
                tables.transfer_log.push(t.id.clone());
                tables.transfers.insert(t.id.clone(), t);
            }
            for new in std::mem::take(&mut uow.outbox) {
                let id = tables.next_outbox_id;
                tables.next_outbox_id += 1;
                tables.outbox.insert(
                    id,
                    OutboxEvent {
                        id,
                        aggregate_type: new.aggregate_type,
                        aggregate_id: new.aggregate_id,
                        event_type: new.event_type,
                        payload: new.payload,
                        created_at: new.created_at,
                        processed_at: None,
                    },
                );
            }
        }
        uow.finished = true;
        uow.row_guards.clear();
        Ok(())
    }

    async fn rollback(&self, uow: MemoryUnitOfWork) -> Result<(), TransferError> {
        if !uow.finished {
            tracing::debug!(
                staged_transfers = uow.transfers.len(),
                locked = uow.row_guards.len(),
                "Discarding in-memory unit of work"
            );
        }
        drop(uow);
        Ok(())
    }
}

#[async_trait]
impl AccountStore for MemoryStore {
    type Uow = MemoryUnitOfWork;

    async fn get_for_update(
        &self,
        uow: &mut MemoryUnitOfWork,
        id: &AccountId,
    ) -> Result<Account, TransferError> {
        uow.ensure_open()?;

        if !uow.row_guards.contains_key(id) {
            // Missing rows have nothing to lock
            self.committed_account(id)?;

            let lock = self.row_lock(id)?;
            let guard = match self.lock_timeout {
                Some(limit) => tokio::time::timeout(limit, lock.lock_owned())
                    .await
                    .map_err(|_| TransferError::LockTimeout)?,
                None => lock.lock_owned().await,
            };
            uow.row_guards.insert(id.clone(), guard);
        }

        if let Some(staged) = uow.account_writes.get(id) {
            return Ok(staged.clone());
        }
        self.committed_account(id)
    }

    async fn update(
        &self,
        uow: &mut MemoryUnitOfWork,
        account: &Account,
    ) -> Result<(), TransferError> {
        uow.ensure_open()?;
        self.committed_account(&account.id)?;
        if !uow.row_guards.contains_key(&account.id) {
            return Err(TransferError::SystemError(format!(
                "account {} updated without holding its lock",
                account.id
            )));
        }
        uow.account_writes
            .insert(account.id.clone(), account.clone());
        Ok(())
    }

    async fn get_by_id(&self, id: &AccountId) -> Result<Account, TransferError> {
        self.committed_account(id)
    }

    async fn list(&self) -> Result<Vec<Account>, TransferError> {
        Ok(self.read()?.accounts.values().cloned().collect())
    }
}

#[async_trait]
impl LedgerStore for MemoryStore {
    type Uow = MemoryUnitOfWork;

    async fn persist(
        &self,
        uow: &mut MemoryUnitOfWork,
        transfer: &Transfer,
    ) -> Result<(), TransferError> {
        uow.ensure_open()?;
        let staged = uow.transfers.iter().any(|t| t.id == transfer.id);
        if staged || self.read()?.transfers.contains_key(&transfer.id) {
            return Err(TransferError::Database(format!(
                "duplicate transfer id {}",
                transfer.id
            )));
        }

        let event = NewOutboxEvent::transfer_completed(transfer)?;
        uow.transfers.push(transfer.clone());
        uow.outbox.push(event);
        Ok(())
    }

    async fn get_by_id(&self, id: &TransferId) -> Result<Transfer, TransferError> {
        self.read()?
            .transfers
            .get(id)
            .cloned()
            .ok_or_else(|| TransferError::TransferNotFound(id.to_string()))
    }

    async fn list(&self) -> Result<Vec<Transfer>, TransferError> {
        let tables = self.read()?;
        let mut out: Vec<Transfer> = tables
            .transfer_log
            .iter()
            .rev()
            .filter_map(|id| tables.transfers.get(id).cloned())
            .collect();
        // Stable: equal timestamps keep newest-commit-first
        out.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(out)
    }

    async fn fetch_unprocessed_outbox(
        &self,
        limit: usize,
    ) -> Result<Vec<OutboxEvent>, TransferError> {
        let tables = self.read()?;
        let mut pending: Vec<OutboxEvent> = tables
            .outbox
            .values()
            .filter(|e| !e.is_processed())
            .cloned()
            .collect();
        pending.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        pending.truncate(limit);
        Ok(pending)
    }

    async fn mark_outbox_processed(&self, id: i64) -> Result<(), TransferError> {
        let mut tables = self.write()?;
        let event = tables
            .outbox
            .get_mut(&id)
            .ok_or_else(|| TransferError::Database(format!("outbox event {id} not found")))?;
        if event.processed_at.is_none() {
            event.processed_at = Some(Utc::now());
        }
        Ok(())
    }
}
