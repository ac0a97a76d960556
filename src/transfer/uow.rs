//! Unit of Work
//!
//! A unit of work is a bounded set of store operations that commits or rolls
//! back as a whole. [`UnitOfWorkCoordinator::run`] owns the handle for its
//! entire life: every exit path (success, error, deadline, panic) ends in
//! exactly one terminal action.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::FutureExt;
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};

use super::error::TransferError;

/// Isolation level requested when a unit of work is opened
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IsolationLevel {
    ReadCommitted,
    #[default]
    RepeatableRead,
    Serializable,
}

impl IsolationLevel {
    /// SQL fragment for `SET TRANSACTION ISOLATION LEVEL ...`
    pub fn as_sql(&self) -> &'static str {
        match self {
            IsolationLevel::ReadCommitted => "READ COMMITTED",
            IsolationLevel::RepeatableRead => "REPEATABLE READ",
            IsolationLevel::Serializable => "SERIALIZABLE",
        }
    }

    /// Transfers require at least REPEATABLE READ
    pub fn is_repeatable_read_or_stronger(&self) -> bool {
        matches!(
            self,
            IsolationLevel::RepeatableRead | IsolationLevel::Serializable
        )
    }
}

/// Storage backend capable of opening units of work.
///
/// `commit` borrows the handle so that a failed commit can still be followed
/// by `rollback` of the same handle. Backends that already discarded the
/// handle on a failed commit treat that rollback as a no-op.
#[async_trait]
pub trait UnitOfWorkFactory: Send + Sync + 'static {
    type Uow: Send + 'static;

    async fn begin(&self, isolation: IsolationLevel) -> Result<Self::Uow, TransferError>;

    async fn commit(&self, uow: &mut Self::Uow) -> Result<(), TransferError>;

    async fn rollback(&self, uow: Self::Uow) -> Result<(), TransferError>;
}

/// Runs a closure inside one unit of work with guaranteed commit-or-rollback
pub struct UnitOfWorkCoordinator<F: UnitOfWorkFactory> {
    factory: Arc<F>,
    deadline: Duration,
}

impl<F: UnitOfWorkFactory> Clone for UnitOfWorkCoordinator<F> {
    fn clone(&self) -> Self {
        Self {
            factory: self.factory.clone(),
            deadline: self.deadline,
        }
    }
}

impl<F: UnitOfWorkFactory> UnitOfWorkCoordinator<F> {
    pub fn new(factory: Arc<F>, deadline: Duration) -> Self {
        Self { factory, deadline }
    }

    /// Open a unit of work at `isolation` and hand it to `body`.
    ///
    /// - `body` returns `Ok`: commit. If commit fails, rollback and return the
    ///   commit error.
    /// - `body` returns `Err`: rollback and return that error.
    /// - `body` exceeds the deadline: rollback and return
    ///   [`TransferError::Timeout`].
    /// - `body` panics: rollback, then resume the panic.
    ///
    /// Rollback failures are logged and never replace the error being returned.
    pub async fn run<T, B>(&self, isolation: IsolationLevel, body: B) -> Result<T, TransferError>
    where
        T: Send,
        B: for<'u> FnOnce(&'u mut F::Uow) -> BoxFuture<'u, Result<T, TransferError>> + Send,
    {
        let mut uow = self.factory.begin(isolation).await?;

        let outcome = {
            let fut = AssertUnwindSafe(body(&mut uow)).catch_unwind();
            tokio::time::timeout(self.deadline, fut).await
        };

        match outcome {
            Ok(Ok(Ok(value))) => match self.factory.commit(&mut uow).await {
                Ok(()) => Ok(value),
                Err(commit_err) => {
                    tracing::warn!(error = %commit_err, "Unit of work commit failed, rolling back");
                    self.rollback_logged(uow).await;
                    Err(commit_err)
                }
            },
            Ok(Ok(Err(e))) => {
                tracing::debug!(error = %e, "Unit of work body failed, rolling back");
                self.rollback_logged(uow).await;
                Err(e)
            }
            Ok(Err(panic)) => {
                tracing::error!("Unit of work body panicked, rolling back");
                self.rollback_logged(uow).await;
                std::panic::resume_unwind(panic)
            }
            Err(_elapsed) => {
                tracing::warn!(
                    deadline_ms = self.deadline.as_millis() as u64,
                    "Unit of work deadline exceeded, rolling back"
                );
                self.rollback_logged(uow).await;
                Err(TransferError::Timeout(format!(
                    "unit of work exceeded {}ms",
                    self.deadline.as_millis()
                )))
            }
        }
    }

    async fn rollback_logged(&self, uow: F::Uow) {
        if let Err(e) = self.factory.rollback(uow).await {
            tracing::error!(error = %e, "Unit of work rollback failed");
        }
    }
}
