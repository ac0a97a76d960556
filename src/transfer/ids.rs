//! Identifier generation
//!
//! Transfers are identified as `TRF<n>` and ledger tickets as `TRX<n>`. The
//! generator is injected into the engine so tests can use deterministic ids.

use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use sqlx::PgPool;

use super::error::TransferError;
use super::types::{Stan, TransferId};

pub const TRANSFER_PREFIX: &str = "TRF";
pub const TRANSACTION_PREFIX: &str = "TRX";

/// Source of unique transfer and transaction identifiers.
///
/// Implementations must never hand out the same id twice, including under
/// concurrent callers.
#[async_trait]
pub trait IdGenerator: Send + Sync {
    async fn next_transfer_id(&self) -> Result<TransferId, TransferError>;

    async fn next_stan(&self) -> Result<Stan, TransferError>;
}

/// In-process monotonic counter shared by both id kinds
#[derive(Debug)]
pub struct CounterIdGenerator {
    counter: AtomicU64,
}

impl CounterIdGenerator {
    /// Counter starting after `start` (first id is `start + 1`)
    pub fn starting_at(start: u64) -> Self {
        Self {
            counter: AtomicU64::new(start),
        }
    }

    /// Counter seeded from the wall clock so restarts do not reuse ids
    pub fn from_clock() -> Self {
        let nanos = chrono::Utc::now()
            .timestamp_nanos_opt()
            .unwrap_or_default()
            .max(0) as u64;
        Self::starting_at(nanos)
    }

    fn next(&self) -> u64 {
        self.counter.fetch_add(1, Ordering::Relaxed) + 1
    }
}

impl Default for CounterIdGenerator {
    fn default() -> Self {
        Self::from_clock()
    }
}

#[async_trait]
impl IdGenerator for CounterIdGenerator {
    async fn next_transfer_id(&self) -> Result<TransferId, TransferError> {
        Ok(TransferId::new(format!("{TRANSFER_PREFIX}{}", self.next())))
    }

    async fn next_stan(&self) -> Result<Stan, TransferError> {
        Ok(Stan::new(format!("{TRANSACTION_PREFIX}{}", self.next())))
    }
}

/// ULID-backed ids: the 128-bit ULID rendered as a decimal integer.
///
/// Needs no coordination between processes.
#[derive(Debug, Default, Clone, Copy)]
pub struct UlidIdGenerator;

#[async_trait]
impl IdGenerator for UlidIdGenerator {
    async fn next_transfer_id(&self) -> Result<TransferId, TransferError> {
        Ok(TransferId::new(format!(
            "{TRANSFER_PREFIX}{}",
            u128::from(ulid::Ulid::new())
        )))
    }

    async fn next_stan(&self) -> Result<Stan, TransferError> {
        Ok(Stan::new(format!(
            "{TRANSACTION_PREFIX}{}",
            u128::from(ulid::Ulid::new())
        )))
    }
}

/// PostgreSQL sequence-backed ids (`transfer_code_seq`, `transaction_code_seq`)
#[derive(Debug, Clone)]
pub struct PgSequenceIdGenerator {
    pool: PgPool,
}

impl PgSequenceIdGenerator {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn nextval(&self, sequence: &str) -> Result<i64, TransferError> {
        let id = sqlx::query_scalar::<_, i64>("SELECT nextval($1::regclass)")
            .bind(sequence)
            .fetch_one(&self.pool)
            .await?;
        Ok(id)
    }
}

#[async_trait]
impl IdGenerator for PgSequenceIdGenerator {
    async fn next_transfer_id(&self) -> Result<TransferId, TransferError> {
        let n = self.nextval("money_transfer.transfer_code_seq").await?;
        Ok(TransferId::new(format!("{TRANSFER_PREFIX}{n}")))
    }

    async fn next_stan(&self) -> Result<Stan, TransferError> {
        let n = self.nextval("money_transfer.transaction_code_seq").await?;
        Ok(Stan::new(format!("{TRANSACTION_PREFIX}{n}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_counter_ids_are_prefixed_and_sequential() {
        let ids = CounterIdGenerator::starting_at(0);
        assert_eq!(ids.next_transfer_id().await.unwrap().as_str(), "TRF1");
        assert_eq!(ids.next_stan().await.unwrap().as_str(), "TRX2");
        assert_eq!(ids.next_transfer_id().await.unwrap().as_str(), "TRF3");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_counter_ids_unique_under_concurrency() {
        let ids = Arc::new(CounterIdGenerator::from_clock());
        let mut handles = Vec::new();
        for _ in 0..8 {
            let ids = ids.clone();
            handles.push(tokio::spawn(async move {
                let mut out = Vec::new();
                for _ in 0..250 {
                    out.push(ids.next_transfer_id().await.unwrap());
                }
                out
            }));
        }

        let mut seen = HashSet::new();
        for h in handles {
            for id in h.await.unwrap() {
                assert!(seen.insert(id), "duplicate id");
            }
        }
        assert_eq!(seen.len(), 2000);
    }

    #[tokio::test]
    async fn test_ulid_ids_are_numeric() {
        let ids = UlidIdGenerator;
        let t = ids.next_transfer_id().await.unwrap();
        let s = ids.next_stan().await.unwrap();
        assert!(t.as_str().starts_with("TRF"));
        assert!(s.as_str().starts_with("TRX"));
        assert!(t.as_str()[3..].parse::<u128>().is_ok());
        assert_ne!(t.as_str()[3..], s.as_str()[3..]);
    }
}
