//! Transfer Engine
//!
//! Validates a transfer, locks both accounts in ascending id order, moves the
//! balance and records the double-entry ledger plus its outbox row, all inside
//! one unit of work. Either everything commits or nothing is observable.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;

use super::adapters::{MemoryStore, PgAccountStore, PgLedgerStore, PgUnitOfWorkFactory};
use super::error::TransferError;
use super::ids::IdGenerator;
use super::store::{AccountStore, LedgerStore};
use super::types::{Account, AccountId, Transfer, TransferId};
use super::uow::{IsolationLevel, UnitOfWorkCoordinator, UnitOfWorkFactory};

/// Engine tuning
#[derive(Debug, Clone, Copy)]
pub struct EngineConfig {
    pub isolation: IsolationLevel,
    /// Deadline for one transfer's unit of work
    pub deadline: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            isolation: IsolationLevel::RepeatableRead,
            deadline: Duration::from_secs(10),
        }
    }
}

/// Transfer orchestrator over pluggable stores
pub struct TransferEngine<F, A, L>
where
    F: UnitOfWorkFactory,
    A: AccountStore<Uow = F::Uow>,
    L: LedgerStore<Uow = F::Uow>,
{
    coordinator: UnitOfWorkCoordinator<F>,
    accounts: Arc<A>,
    ledger: Arc<L>,
    ids: Arc<dyn IdGenerator>,
    isolation: IsolationLevel,
}

/// Engine over the in-memory backend
pub type MemoryTransferEngine = TransferEngine<MemoryStore, MemoryStore, MemoryStore>;

/// Engine over the PostgreSQL backend
pub type PgTransferEngine = TransferEngine<PgUnitOfWorkFactory, PgAccountStore, PgLedgerStore>;

impl MemoryTransferEngine {
    /// Engine whose three store roles are all served by `store`
    pub fn in_memory(
        store: Arc<MemoryStore>,
        ids: Arc<dyn IdGenerator>,
        config: EngineConfig,
    ) -> Self {
        TransferEngine::new(store.clone(), store.clone(), store, ids, config)
    }
}

impl<F, A, L> TransferEngine<F, A, L>
where
    F: UnitOfWorkFactory,
    A: AccountStore<Uow = F::Uow>,
    L: LedgerStore<Uow = F::Uow>,
{
    pub fn new(
        factory: Arc<F>,
        accounts: Arc<A>,
        ledger: Arc<L>,
        ids: Arc<dyn IdGenerator>,
        config: EngineConfig,
    ) -> Self {
        Self {
            coordinator: UnitOfWorkCoordinator::new(factory, config.deadline),
            accounts,
            ledger,
            ids,
            isolation: config.isolation,
        }
    }

    /// Ledger store, shared with the outbox relay
    pub fn ledger(&self) -> Arc<L> {
        self.ledger.clone()
    }

    /// Move `amount` from `from` to `to`.
    ///
    /// Returns the COMPLETED transfer. On any error nothing was committed.
    pub async fn create_transfer(
        &self,
        from: &AccountId,
        to: &AccountId,
        amount: i64,
    ) -> Result<Transfer, TransferError> {
        if amount <= 0 {
            return Err(TransferError::InvalidAmount);
        }
        if from == to {
            return Err(TransferError::SameAccount);
        }

        let accounts = self.accounts.clone();
        let ledger = self.ledger.clone();
        let ids = self.ids.clone();
        let from_id = from.clone();
        let to_id = to.clone();

        let result = self
            .coordinator
            .run(self.isolation, move |uow| {
                Box::pin(async move {
                    Self::transfer_in_uow(uow, &*accounts, &*ledger, &*ids, &from_id, &to_id, amount)
                        .await
                })
            })
            .await;

        match &result {
            Ok(transfer) => tracing::info!(
                transfer_id = %transfer.id,
                stan = %transfer.debit_tx.stan,
                from = %from,
                to = %to,
                amount,
                "Transfer completed"
            ),
            Err(e) if e.is_domain() => tracing::info!(
                from = %from,
                to = %to,
                amount,
                code = e.code(),
                "Transfer rejected"
            ),
            Err(e) => tracing::error!(
                from = %from,
                to = %to,
                amount,
                error = %e,
                "Transfer failed"
            ),
        }

        result
    }

    async fn transfer_in_uow(
        uow: &mut F::Uow,
        accounts: &A,
        ledger: &L,
        ids: &dyn IdGenerator,
        from: &AccountId,
        to: &AccountId,
        amount: i64,
    ) -> Result<Transfer, TransferError> {
        // Global lock order: ascending account id, whatever the direction
        let (first, second) = if from < to { (from, to) } else { (to, from) };
        let first_locked = accounts.get_for_update(uow, first).await?;
        let second_locked = accounts.get_for_update(uow, second).await?;
        let (mut source, mut destination) = if first == from {
            (first_locked, second_locked)
        } else {
            (second_locked, first_locked)
        };

        if source.balance < amount {
            return Err(TransferError::InsufficientFunds);
        }

        let transfer_id = ids.next_transfer_id().await?;
        let stan = ids.next_stan().await?;
        let mut transfer =
            Transfer::pending(transfer_id, stan, &source, &destination, amount, Utc::now());

        source.balance -= amount;
        destination.balance = destination
            .balance
            .checked_add(amount)
            .ok_or_else(|| TransferError::SystemError("balance overflow".to_string()))?;
        accounts.update(uow, &source).await?;
        accounts.update(uow, &destination).await?;

        transfer.complete(Utc::now());
        ledger.persist(uow, &transfer).await?;

        tracing::debug!(
            transfer_id = %transfer.id,
            source_balance = source.balance,
            destination_balance = destination.balance,
            "Transfer staged"
        );
        Ok(transfer)
    }

    pub async fn get_transfer(&self, id: &TransferId) -> Result<Transfer, TransferError> {
        self.ledger.get_by_id(id).await
    }

    /// Most recent first
    pub async fn list_transfers(&self) -> Result<Vec<Transfer>, TransferError> {
        self.ledger.list().await
    }

    pub async fn list_accounts(&self) -> Result<Vec<Account>, TransferError> {
        self.accounts.list().await
    }

    pub async fn account_by_id(&self, id: &AccountId) -> Result<Account, TransferError> {
        self.accounts.get_by_id(id).await
    }
}

/// Object-safe engine boundary consumed by request handlers
#[async_trait]
pub trait TransferService: Send + Sync {
    async fn create_transfer(
        &self,
        from: &AccountId,
        to: &AccountId,
        amount: i64,
    ) -> Result<Transfer, TransferError>;

    async fn get_transfer(&self, id: &TransferId) -> Result<Transfer, TransferError>;

    async fn list_transfers(&self) -> Result<Vec<Transfer>, TransferError>;

    async fn list_accounts(&self) -> Result<Vec<Account>, TransferError>;

    async fn account_by_id(&self, id: &AccountId) -> Result<Account, TransferError>;
}

#[async_trait]
impl<F, A, L> TransferService for TransferEngine<F, A, L>
where
    F: UnitOfWorkFactory,
    A: AccountStore<Uow = F::Uow>,
    L: LedgerStore<Uow = F::Uow>,
{
    async fn create_transfer(
        &self,
        from: &AccountId,
        to: &AccountId,
        amount: i64,
    ) -> Result<Transfer, TransferError> {
        TransferEngine::create_transfer(self, from, to, amount).await
    }

    async fn get_transfer(&self, id: &TransferId) -> Result<Transfer, TransferError> {
        TransferEngine::get_transfer(self, id).await
    }

    async fn list_transfers(&self) -> Result<Vec<Transfer>, TransferError> {
        TransferEngine::list_transfers(self).await
    }

    async fn list_accounts(&self) -> Result<Vec<Account>, TransferError> {
        TransferEngine::list_accounts(self).await
    }

    async fn account_by_id(&self, id: &AccountId) -> Result<Account, TransferError> {
        TransferEngine::account_by_id(self, id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transfer::adapters::MemoryUnitOfWork;
    use crate::transfer::ids::CounterIdGenerator;
    use crate::transfer::types::TransactionState;
    use std::sync::Mutex;

    fn seeded() -> Arc<MemoryStore> {
        Arc::new(MemoryStore::with_accounts([
            Account::new("1", "Mark", 10_000),
            Account::new("2", "Jane", 5_000),
            Account::new("3", "Adam", 0),
        ]))
    }

    fn engine(store: &Arc<MemoryStore>) -> MemoryTransferEngine {
        MemoryTransferEngine::in_memory(
            store.clone(),
            Arc::new(CounterIdGenerator::starting_at(0)),
            EngineConfig::default(),
        )
    }

    /// Records the order in which rows are locked
    struct RecordingAccounts {
        inner: Arc<MemoryStore>,
        locked: Mutex<Vec<AccountId>>,
    }

    #[async_trait]
    impl AccountStore for RecordingAccounts {
        type Uow = MemoryUnitOfWork;

        async fn get_for_update(
            &self,
            uow: &mut MemoryUnitOfWork,
            id: &AccountId,
        ) -> Result<Account, TransferError> {
            self.locked.lock().unwrap().push(id.clone());
            self.inner.get_for_update(uow, id).await
        }

        async fn update(
            &self,
            uow: &mut MemoryUnitOfWork,
            account: &Account,
        ) -> Result<(), TransferError> {
            self.inner.update(uow, account).await
        }

        async fn get_by_id(&self, id: &AccountId) -> Result<Account, TransferError> {
            AccountStore::get_by_id(&*self.inner, id).await
        }

        async fn list(&self) -> Result<Vec<Account>, TransferError> {
            AccountStore::list(&*self.inner).await
        }
    }

    #[tokio::test]
    async fn test_transfer_uses_injected_ids() {
        let store = seeded();
        let engine = engine(&store);

        let t = engine
            .create_transfer(&"1".into(), &"2".into(), 1_000)
            .await
            .unwrap();

        assert_eq!(t.id.as_str(), "TRF1");
        assert_eq!(t.debit_tx.stan.as_str(), "TRX2");
        assert_eq!(t.credit_tx.stan, t.debit_tx.stan);
        assert_eq!(t.state, TransactionState::Completed);
        assert!(t.completed_at.is_some());
        assert!(t.is_balanced());
    }

    #[tokio::test]
    async fn test_locks_taken_in_ascending_order_both_directions() {
        let store = seeded();
        let recorder = Arc::new(RecordingAccounts {
            inner: store.clone(),
            locked: Mutex::new(Vec::new()),
        });
        let engine = TransferEngine::new(
            store.clone(),
            recorder.clone(),
            store.clone(),
            Arc::new(CounterIdGenerator::starting_at(0)),
            EngineConfig::default(),
        );

        engine
            .create_transfer(&"2".into(), &"1".into(), 100)
            .await
            .unwrap();
        engine
            .create_transfer(&"1".into(), &"2".into(), 100)
            .await
            .unwrap();

        let order: Vec<String> = recorder
            .locked
            .lock()
            .unwrap()
            .iter()
            .map(|id| id.to_string())
            .collect();
        assert_eq!(order, vec!["1", "2", "1", "2"]);
    }

    #[tokio::test]
    async fn test_validation_happens_before_locking() {
        let store = seeded();
        let recorder = Arc::new(RecordingAccounts {
            inner: store.clone(),
            locked: Mutex::new(Vec::new()),
        });
        let engine = TransferEngine::new(
            store.clone(),
            recorder.clone(),
            store.clone(),
            Arc::new(CounterIdGenerator::starting_at(0)),
            EngineConfig::default(),
        );

        let err = engine
            .create_transfer(&"1".into(), &"1".into(), 500)
            .await
            .unwrap_err();
        assert_eq!(err, TransferError::SameAccount);
        let err = engine
            .create_transfer(&"1".into(), &"2".into(), 0)
            .await
            .unwrap_err();
        assert_eq!(err, TransferError::InvalidAmount);

        assert!(recorder.locked.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_missing_account_rolls_back() {
        let store = seeded();
        let engine = engine(&store);

        let err = engine
            .create_transfer(&"1".into(), &"99".into(), 10)
            .await
            .unwrap_err();
        assert_eq!(err, TransferError::AccountNotFound("99".into()));
        assert_eq!(store.total_balance().unwrap(), 15_000);
        assert_eq!(store.outbox_len().unwrap(), 0);
    }

    #[tokio::test]
    async fn test_exact_balance_can_be_drained() {
        let store = seeded();
        let engine = engine(&store);

        engine
            .create_transfer(&"2".into(), &"3".into(), 5_000)
            .await
            .unwrap();
        assert_eq!(engine.account_by_id(&"2".into()).await.unwrap().balance, 0);
        assert_eq!(engine.account_by_id(&"3".into()).await.unwrap().balance, 5_000);
    }

    #[tokio::test]
    async fn test_service_trait_object_delegates() {
        let store = seeded();
        let service: Arc<dyn TransferService> = Arc::new(engine(&store));

        let t = service
            .create_transfer(&"1".into(), &"3".into(), 250)
            .await
            .unwrap();
        let loaded = service.get_transfer(&t.id).await.unwrap();
        assert_eq!(loaded, t);
        assert_eq!(service.list_transfers().await.unwrap().len(), 1);
        assert_eq!(service.list_accounts().await.unwrap().len(), 3);
    }
}
