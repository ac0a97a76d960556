//! Transfer Error Types
//!
//! Domain failures are returned unchanged to callers and are not retryable
//! without different input. Infrastructure failures always leave the unit of
//! work rolled back and may be retried by the caller.

use thiserror::Error;

/// Transfer error types
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransferError {
    // === Validation Errors ===
    #[error("Amount must be greater than zero")]
    InvalidAmount,

    #[error("Cannot transfer to same account")]
    SameAccount,

    #[error("Insufficient funds")]
    InsufficientFunds,

    // === Lookup Errors ===
    #[error("Account not found: {0}")]
    AccountNotFound(String),

    #[error("Transfer not found: {0}")]
    TransferNotFound(String),

    // === Transient Errors ===
    #[error("Timed out waiting for account lock")]
    LockTimeout,

    #[error("Concurrent update conflict: {0}")]
    SerializationConflict(String),

    #[error("Operation timed out: {0}")]
    Timeout(String),

    #[error("Database error: {0}")]
    Database(String),

    // === System Errors ===
    #[error("Payload error: {0}")]
    Payload(String),

    #[error("Internal system error: {0}")]
    SystemError(String),
}

impl TransferError {
    /// Get the error code for API responses
    pub fn code(&self) -> &'static str {
        match self {
            TransferError::InvalidAmount => "INVALID_AMOUNT",
            TransferError::SameAccount => "SAME_ACCOUNT",
            TransferError::InsufficientFunds => "INSUFFICIENT_FUNDS",
            TransferError::AccountNotFound(_) => "ACCOUNT_NOT_FOUND",
            TransferError::TransferNotFound(_) => "TRANSFER_NOT_FOUND",
            TransferError::LockTimeout => "LOCK_TIMEOUT",
            TransferError::SerializationConflict(_) => "SERIALIZATION_CONFLICT",
            TransferError::Timeout(_) => "TIMEOUT",
            TransferError::Database(_) => "DATABASE_ERROR",
            TransferError::Payload(_) => "PAYLOAD_ERROR",
            TransferError::SystemError(_) => "SYSTEM_ERROR",
        }
    }

    /// Get HTTP status code suggestion
    pub fn http_status(&self) -> u16 {
        match self {
            TransferError::InvalidAmount | TransferError::SameAccount => 400,
            TransferError::AccountNotFound(_) | TransferError::TransferNotFound(_) => 404,
            TransferError::InsufficientFunds => 422,
            TransferError::SerializationConflict(_) => 409,
            TransferError::LockTimeout | TransferError::Timeout(_) => 503,
            TransferError::Database(_)
            | TransferError::Payload(_)
            | TransferError::SystemError(_) => 500,
        }
    }

    /// Domain failures: caller input was wrong, retrying unchanged cannot succeed
    pub fn is_domain(&self) -> bool {
        matches!(
            self,
            TransferError::InvalidAmount
                | TransferError::SameAccount
                | TransferError::InsufficientFunds
                | TransferError::AccountNotFound(_)
                | TransferError::TransferNotFound(_)
        )
    }

    /// Transient infrastructure failures: the unit of work was rolled back with
    /// no observable effect and the same call may be retried
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            TransferError::LockTimeout
                | TransferError::SerializationConflict(_)
                | TransferError::Timeout(_)
                | TransferError::Database(_)
        )
    }
}

impl From<sqlx::Error> for TransferError {
    fn from(e: sqlx::Error) -> Self {
        match &e {
            sqlx::Error::Database(db_err) => match db_err.code().as_deref() {
                // lock_not_available (lock_timeout / NOWAIT)
                Some("55P03") => TransferError::LockTimeout,
                // serialization_failure, deadlock_detected
                Some("40001") | Some("40P01") => {
                    TransferError::SerializationConflict(db_err.message().to_string())
                }
                // query_canceled (statement_timeout)
                Some("57014") => TransferError::Timeout(db_err.message().to_string()),
                _ => TransferError::Database(e.to_string()),
            },
            sqlx::Error::PoolTimedOut => {
                TransferError::Timeout("connection pool acquire timed out".to_string())
            }
            _ => TransferError::Database(e.to_string()),
        }
    }
}

impl From<serde_json::Error> for TransferError {
    fn from(e: serde_json::Error) -> Self {
        TransferError::Payload(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        assert_eq!(TransferError::SameAccount.code(), "SAME_ACCOUNT");
        assert_eq!(TransferError::InsufficientFunds.code(), "INSUFFICIENT_FUNDS");
        assert_eq!(
            TransferError::AccountNotFound("9".into()).code(),
            "ACCOUNT_NOT_FOUND"
        );
        assert_eq!(TransferError::LockTimeout.code(), "LOCK_TIMEOUT");
    }

    #[test]
    fn test_http_status() {
        assert_eq!(TransferError::InvalidAmount.http_status(), 400);
        assert_eq!(TransferError::SameAccount.http_status(), 400);
        assert_eq!(TransferError::InsufficientFunds.http_status(), 422);
        assert_eq!(TransferError::TransferNotFound("x".into()).http_status(), 404);
        assert_eq!(TransferError::Timeout("t".into()).http_status(), 503);
        assert_eq!(TransferError::Database("d".into()).http_status(), 500);
    }

    #[test]
    fn test_domain_errors_are_not_retryable() {
        let domain = [
            TransferError::InvalidAmount,
            TransferError::SameAccount,
            TransferError::InsufficientFunds,
            TransferError::AccountNotFound("1".into()),
            TransferError::TransferNotFound("TRF1".into()),
        ];
        for e in domain {
            assert!(e.is_domain(), "{e:?}");
            assert!(!e.is_retryable(), "{e:?}");
            assert!(e.http_status() < 500, "{e:?}");
        }
    }

    #[test]
    fn test_transient_errors_are_retryable() {
        let transient = [
            TransferError::LockTimeout,
            TransferError::SerializationConflict("40001".into()),
            TransferError::Timeout("deadline".into()),
            TransferError::Database("connection reset".into()),
        ];
        for e in transient {
            assert!(e.is_retryable(), "{e:?}");
            assert!(!e.is_domain(), "{e:?}");
        }
        assert!(!TransferError::Payload("bad".into()).is_retryable());
    }

    #[test]
    fn test_sqlx_pool_timeout_maps_to_timeout() {
        let e: TransferError = sqlx::Error::PoolTimedOut.into();
        assert!(matches!(e, TransferError::Timeout(_)));
        let e: TransferError = sqlx::Error::PoolClosed.into();
        assert!(matches!(e, TransferError::Database(_)));
    }

    #[test]
    fn test_display() {
        assert_eq!(TransferError::InsufficientFunds.to_string(), "Insufficient funds");
        assert_eq!(
            TransferError::SameAccount.to_string(),
            "Cannot transfer to same account"
        );
    }
}
