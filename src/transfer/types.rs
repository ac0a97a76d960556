//! Transfer Core Types
//!
//! Accounts, double-entry ledger transactions, the transfer aggregate and
//! the outbox row that announces a completed transfer.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Aggregate type written on every transfer outbox row
pub const AGGREGATE_TRANSFER: &str = "transfer";

/// Event type emitted once a transfer has been committed
pub const EVENT_TRANSFER_COMPLETED: &str = "transfer_completed";

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_string())
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }
    };
}

string_id!(
    /// Opaque account identifier.
    ///
    /// Ordering is the global lock order: accounts touched by one transfer are
    /// always locked in ascending `AccountId` order.
    AccountId
);

string_id!(
    /// Transfer identifier (`TRF<n>`)
    TransferId
);

string_id!(
    /// Ticket shared by the debit and credit halves of one transfer (`TRX<n>`)
    Stan
);

/// Account row. Balance is in minor currency units and never negative.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub id: AccountId,
    pub name: String,
    pub balance: i64,
}

impl Account {
    pub fn new(id: impl Into<AccountId>, name: impl Into<String>, balance: i64) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            balance,
        }
    }
}

/// Ledger transaction direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransactionType {
    Debit,
    Credit,
}

impl TransactionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionType::Debit => "DEBIT",
            TransactionType::Credit => "CREDIT",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "DEBIT" => Some(TransactionType::Debit),
            "CREDIT" => Some(TransactionType::Credit),
            _ => None,
        }
    }
}

impl fmt::Display for TransactionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle state shared by transfers and their ledger transactions.
///
/// Only `Pending -> Completed` is ever applied by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransactionState {
    Pending,
    Completed,
    Failed,
}

impl TransactionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionState::Pending => "PENDING",
            TransactionState::Completed => "COMPLETED",
            TransactionState::Failed => "FAILED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "PENDING" => Some(TransactionState::Pending),
            "COMPLETED" => Some(TransactionState::Completed),
            "FAILED" => Some(TransactionState::Failed),
            _ => None,
        }
    }

    #[inline]
    pub fn is_terminal(&self) -> bool {
        matches!(self, TransactionState::Completed | TransactionState::Failed)
    }
}

impl fmt::Display for TransactionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Payment source tag on a ledger transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentSource {
    Transfer,
}

impl PaymentSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentSource::Transfer => "TRANSFER",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "TRANSFER" => Some(PaymentSource::Transfer),
            _ => None,
        }
    }
}

/// One half (debit or credit) of a money movement
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerTransaction {
    pub stan: Stan,
    pub amount: i64,
    pub transaction_type: TransactionType,
    pub state: TransactionState,
    pub payment_source: PaymentSource,
    pub note: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl LedgerTransaction {
    /// New PENDING transfer leg
    pub fn pending(
        stan: Stan,
        amount: i64,
        transaction_type: TransactionType,
        note: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            stan,
            amount,
            transaction_type,
            state: TransactionState::Pending,
            payment_source: PaymentSource::Transfer,
            note: note.into(),
            created_at: now,
            updated_at: now,
        }
    }
}

/// Transfer aggregate: the transfer row plus its owned debit/credit legs
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transfer {
    pub id: TransferId,
    pub from_account_id: AccountId,
    pub to_account_id: AccountId,
    pub amount: i64,
    pub state: TransactionState,
    pub debit_tx: LedgerTransaction,
    pub credit_tx: LedgerTransaction,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Transfer {
    /// Build a PENDING transfer with a DEBIT leg against `from` and a CREDIT
    /// leg against `to`, both sharing `stan` and `amount`.
    pub fn pending(
        id: TransferId,
        stan: Stan,
        from: &Account,
        to: &Account,
        amount: i64,
        now: DateTime<Utc>,
    ) -> Self {
        let debit_tx = LedgerTransaction::pending(
            stan.clone(),
            amount,
            TransactionType::Debit,
            format!("Transfer to {}", to.name),
            now,
        );
        let credit_tx = LedgerTransaction::pending(
            stan,
            amount,
            TransactionType::Credit,
            format!("Transfer from {}", from.name),
            now,
        );

        Self {
            id,
            from_account_id: from.id.clone(),
            to_account_id: to.id.clone(),
            amount,
            state: TransactionState::Pending,
            debit_tx,
            credit_tx,
            created_at: now,
            completed_at: None,
        }
    }

    /// Mark the transfer and both legs COMPLETED.
    ///
    /// No-op when already terminal, so a completed transfer never regresses.
    pub fn complete(&mut self, now: DateTime<Utc>) {
        if self.state.is_terminal() {
            return;
        }
        self.state = TransactionState::Completed;
        self.completed_at = Some(now);
        for leg in [&mut self.debit_tx, &mut self.credit_tx] {
            leg.state = TransactionState::Completed;
            leg.updated_at = now;
        }
    }

    /// Double-entry invariant: both legs carry the transfer amount and share a stan
    pub fn is_balanced(&self) -> bool {
        self.amount > 0
            && self.debit_tx.amount == self.amount
            && self.credit_tx.amount == self.amount
            && self.debit_tx.stan == self.credit_tx.stan
            && self.debit_tx.transaction_type == TransactionType::Debit
            && self.credit_tx.transaction_type == TransactionType::Credit
    }

    /// Payload announced downstream through the outbox
    pub fn completed_payload(&self) -> TransferCompletedPayload {
        TransferCompletedPayload {
            transfer_id: self.id.clone(),
            from_account_id: self.from_account_id.clone(),
            to_account_id: self.to_account_id.clone(),
            amount: self.amount,
            state: self.state,
            created_at: self.created_at,
            completed_at: self.completed_at,
        }
    }
}

/// Body of a `transfer_completed` outbox event
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferCompletedPayload {
    pub transfer_id: TransferId,
    pub from_account_id: AccountId,
    pub to_account_id: AccountId,
    pub amount: i64,
    pub state: TransactionState,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// Outbox row, written in the same unit of work as the transfer it describes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutboxEvent {
    pub id: i64,
    pub aggregate_type: String,
    pub aggregate_id: String,
    pub event_type: String,
    pub payload: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
}

impl OutboxEvent {
    #[inline]
    pub fn is_processed(&self) -> bool {
        self.processed_at.is_some()
    }
}

/// Outbox row before the store assigns its id
#[derive(Debug, Clone, PartialEq)]
pub struct NewOutboxEvent {
    pub aggregate_type: String,
    pub aggregate_id: String,
    pub event_type: String,
    pub payload: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

impl NewOutboxEvent {
    /// `transfer_completed` row for a completed transfer
    pub fn transfer_completed(transfer: &Transfer) -> Result<Self, serde_json::Error> {
        Ok(Self {
            aggregate_type: AGGREGATE_TRANSFER.to_string(),
            aggregate_id: transfer.id.to_string(),
            event_type: EVENT_TRANSFER_COMPLETED.to_string(),
            payload: serde_json::to_value(transfer.completed_payload())?,
            created_at: transfer.completed_at.unwrap_or(transfer.created_at),
        })
    }
}
