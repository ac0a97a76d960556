//! Integration Tests for Transfers
//!
//! End-to-end engine scenarios over the in-memory backend, including outbox
//! delivery through the relay. No database needed.

#[cfg(test)]
mod integration_tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use async_trait::async_trait;

    use crate::outbox::{EventHandler, OutboxRelay, RelayConfig, RelayError};
    use crate::transfer::adapters::{MemoryStore, MemoryUnitOfWork};
    use crate::transfer::engine::{EngineConfig, MemoryTransferEngine, TransferEngine};
    use crate::transfer::error::TransferError;
    use crate::transfer::ids::CounterIdGenerator;
    use crate::transfer::store::{AccountStore, LedgerStore};
    use crate::transfer::types::{
        Account, AccountId, OutboxEvent, TransactionState, Transfer, TransferId,
    };

    fn seeded() -> Arc<MemoryStore> {
        Arc::new(
            MemoryStore::with_accounts([
                Account::new("A", "Alice", 10_000),
                Account::new("B", "Bob", 5_000),
                Account::new("C", "Carol", 0),
            ])
            .with_lock_timeout(Duration::from_secs(5)),
        )
    }

    fn engine(store: &Arc<MemoryStore>) -> MemoryTransferEngine {
        MemoryTransferEngine::in_memory(
            store.clone(),
            Arc::new(CounterIdGenerator::starting_at(0)),
            EngineConfig::default(),
        )
    }

    async fn balance(engine: &MemoryTransferEngine, id: &str) -> i64 {
        engine.account_by_id(&id.into()).await.unwrap().balance
    }

    fn a() -> AccountId {
        AccountId::from("A")
    }

    fn b() -> AccountId {
        AccountId::from("B")
    }

    /// Counts deliveries and succeeds
    struct CountingHandler {
        delivered: AtomicUsize,
    }

    #[async_trait]
    impl EventHandler for CountingHandler {
        fn event_type(&self) -> &str {
            "transfer_completed"
        }

        async fn handle(&self, _event: &OutboxEvent) -> Result<(), RelayError> {
            self.delivered.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    /// Ledger whose persist always fails after the balances were staged
    struct FailingLedger {
        inner: Arc<MemoryStore>,
        panic: bool,
    }

    #[async_trait]
    impl LedgerStore for FailingLedger {
        type Uow = MemoryUnitOfWork;

        async fn persist(
            &self,
            _uow: &mut MemoryUnitOfWork,
            _transfer: &Transfer,
        ) -> Result<(), TransferError> {
            if self.panic {
                panic!("ledger write exploded");
            }
            Err(TransferError::Database("disk full".into()))
        }

        async fn get_by_id(&self, id: &TransferId) -> Result<Transfer, TransferError> {
            LedgerStore::get_by_id(&*self.inner, id).await
        }

        async fn list(&self) -> Result<Vec<Transfer>, TransferError> {
            LedgerStore::list(&*self.inner).await
        }

        async fn fetch_unprocessed_outbox(
            &self,
            limit: usize,
        ) -> Result<Vec<OutboxEvent>, TransferError> {
            self.inner.fetch_unprocessed_outbox(limit).await
        }

        async fn mark_outbox_processed(&self, id: i64) -> Result<(), TransferError> {
            self.inner.mark_outbox_processed(id).await
        }
    }

    // ========================================================================
    // Scenarios
    // ========================================================================

    /// A=10000, B=5000: A -> B 1000 completes with one unprocessed outbox row
    #[tokio::test]
    async fn test_happy_path_transfer() {
        let store = seeded();
        let engine = engine(&store);

        let t = engine.create_transfer(&a(), &b(), 1_000).await.unwrap();

        assert_eq!(t.state, TransactionState::Completed);
        assert_eq!(t.amount, 1_000);
        assert_eq!(balance(&engine, "A").await, 9_000);
        assert_eq!(balance(&engine, "B").await, 6_000);

        let rows = store.outbox_for(t.id.as_str()).unwrap();
        assert_eq!(rows.len(), 1);
        assert!(!rows[0].is_processed());
        assert_eq!(rows[0].payload["amount"], 1_000);
    }

    /// C=0: C -> B fails, B unchanged
    #[tokio::test]
    async fn test_insufficient_funds() {
        let store = seeded();
        let engine = engine(&store);

        let err = engine
            .create_transfer(&"C".into(), &b(), 1_000)
            .await
            .unwrap_err();

        assert_eq!(err, TransferError::InsufficientFunds);
        assert_eq!(balance(&engine, "B").await, 5_000);
        assert_eq!(balance(&engine, "C").await, 0);
        assert!(engine.list_transfers().await.unwrap().is_empty());
        assert_eq!(store.outbox_len().unwrap(), 0);
    }

    #[tokio::test]
    async fn test_same_account_rejected() {
        let store = seeded();
        let engine = engine(&store);

        let err = engine.create_transfer(&a(), &a(), 500).await.unwrap_err();
        assert_eq!(err, TransferError::SameAccount);
        assert_eq!(balance(&engine, "A").await, 10_000);
        assert_eq!(store.outbox_len().unwrap(), 0);
    }

    #[tokio::test]
    async fn test_zero_and_negative_amount_rejected() {
        let store = seeded();
        let engine = engine(&store);

        for amount in [0, -100] {
            let err = engine.create_transfer(&a(), &b(), amount).await.unwrap_err();
            assert_eq!(err, TransferError::InvalidAmount);
        }
        assert_eq!(store.total_balance().unwrap(), 15_000);
    }

    /// 10 x A -> B 100 and 10 x B -> A 100 concurrently: no deadlock, net zero
    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_symmetric_concurrent_transfers() {
        let store = seeded();
        let engine = Arc::new(engine(&store));

        let mut handles = Vec::new();
        for i in 0..20 {
            let engine = engine.clone();
            let (from, to) = if i % 2 == 0 { (a(), b()) } else { (b(), a()) };
            handles.push(tokio::spawn(async move {
                engine.create_transfer(&from, &to, 100).await
            }));
        }

        let all = tokio::time::timeout(Duration::from_secs(10), futures::future::join_all(handles))
            .await
            .expect("transfers deadlocked");
        for joined in all {
            let t = joined.unwrap().unwrap();
            assert_eq!(t.state, TransactionState::Completed);
        }

        assert_eq!(balance(&engine, "A").await, 10_000);
        assert_eq!(balance(&engine, "B").await, 5_000);
        assert_eq!(engine.list_transfers().await.unwrap().len(), 20);
    }

    /// Relay delivers scenario 1's event once; a second poll dispatches nothing
    #[tokio::test]
    async fn test_relay_marks_processed_and_second_poll_is_idle() {
        let store = seeded();
        let engine = engine(&store);
        let t = engine.create_transfer(&a(), &b(), 1_000).await.unwrap();

        let handler = Arc::new(CountingHandler {
            delivered: AtomicUsize::new(0),
        });
        let relay = OutboxRelay::new(store.clone(), RelayConfig::default()).with_handler(handler.clone());

        let first = relay.poll_once().await;
        assert_eq!((first.fetched, first.delivered, first.failed), (1, 1, 0));
        let rows = store.outbox_for(t.id.as_str()).unwrap();
        assert!(rows[0].processed_at.is_some());

        let second = relay.poll_once().await;
        assert_eq!((second.fetched, second.delivered, second.failed), (0, 0, 0));
        assert_eq!(handler.delivered.load(Ordering::SeqCst), 1);
    }

    // ========================================================================
    // Atomicity
    // ========================================================================

    #[tokio::test]
    async fn test_ledger_failure_leaves_no_partial_effect() {
        let store = seeded();
        let engine = TransferEngine::new(
            store.clone(),
            store.clone(),
            Arc::new(FailingLedger {
                inner: store.clone(),
                panic: false,
            }),
            Arc::new(CounterIdGenerator::starting_at(0)),
            EngineConfig::default(),
        );

        let err = engine.create_transfer(&a(), &b(), 1_000).await.unwrap_err();
        assert_eq!(err, TransferError::Database("disk full".into()));
        assert_eq!(AccountStore::get_by_id(&*store, &a()).await.unwrap().balance, 10_000);
        assert_eq!(AccountStore::get_by_id(&*store, &b()).await.unwrap().balance, 5_000);
        assert_eq!(store.outbox_len().unwrap(), 0);
    }

    #[tokio::test]
    async fn test_panic_mid_transfer_rolls_back_and_releases_locks() {
        let store = seeded();
        let panicking = Arc::new(TransferEngine::new(
            store.clone(),
            store.clone(),
            Arc::new(FailingLedger {
                inner: store.clone(),
                panic: true,
            }),
            Arc::new(CounterIdGenerator::starting_at(0)),
            EngineConfig::default(),
        ));

        let joined = tokio::spawn(async move { panicking.create_transfer(&a(), &b(), 1_000).await }).await;
        assert!(joined.is_err_and(|e| e.is_panic()));
        assert_eq!(store.total_balance().unwrap(), 15_000);

        // Row locks were released by the rollback
        let healthy = engine(&store);
        let t = tokio::time::timeout(
            Duration::from_secs(1),
            healthy.create_transfer(&a(), &b(), 10),
        )
        .await
        .expect("locks still held")
        .unwrap();
        assert_eq!(t.state, TransactionState::Completed);
    }

    // ========================================================================
    // Invariants
    // ========================================================================

    #[tokio::test]
    async fn test_every_transfer_has_exactly_one_outbox_row() {
        let store = seeded();
        let engine = engine(&store);

        engine.create_transfer(&a(), &b(), 700).await.unwrap();
        engine.create_transfer(&b(), &"C".into(), 300).await.unwrap();
        let _ = engine.create_transfer(&"C".into(), &a(), 10_000).await;
        engine.create_transfer(&"C".into(), &a(), 300).await.unwrap();

        let transfers = engine.list_transfers().await.unwrap();
        assert_eq!(transfers.len(), 3);
        for t in &transfers {
            let rows = store.outbox_for(t.id.as_str()).unwrap();
            assert_eq!(rows.len(), 1, "transfer {}", t.id);
            assert!(Some(rows[0].created_at) <= t.completed_at);
        }
        assert_eq!(store.outbox_len().unwrap(), 3);
        assert_eq!(store.total_balance().unwrap(), 15_000);
    }

    #[tokio::test]
    async fn test_get_transfer_round_trips_legs() {
        let store = seeded();
        let engine = engine(&store);
        let created = engine.create_transfer(&a(), &b(), 42).await.unwrap();

        let loaded = engine.get_transfer(&created.id).await.unwrap();
        assert_eq!(loaded, created);
        assert_eq!(loaded.debit_tx.note, "Transfer to Bob");
        assert_eq!(loaded.credit_tx.note, "Transfer from Alice");

        let err = engine
            .get_transfer(&TransferId::from("TRF404"))
            .await
            .unwrap_err();
        assert_eq!(err, TransferError::TransferNotFound("TRF404".into()));
    }
}
