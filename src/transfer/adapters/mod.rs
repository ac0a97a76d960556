//! Store Backends
//!
//! Two implementations of [`UnitOfWorkFactory`](super::uow::UnitOfWorkFactory),
//! [`AccountStore`](super::store::AccountStore) and
//! [`LedgerStore`](super::store::LedgerStore) behind the same contract:
//! a durable PostgreSQL backend and a non-durable in-memory one.

pub mod memory;
pub mod postgres;

pub use memory::{MemoryStore, MemoryUnitOfWork};
pub use postgres::{PgAccountStore, PgLedgerStore, PgUnitOfWork, PgUnitOfWorkFactory};
