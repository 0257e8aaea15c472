//! Error types for the Moneta ledger.

use crate::AccountId;
use rust_decimal::Decimal;
use thiserror::Error;

/// Main error type for ledger operations.
///
/// Store backends translate their native failures into these kinds so the
/// caller can decide on retries without knowing which store is in use.
#[derive(Error, Debug)]
pub enum LedgerError {
    /// Referenced row does not exist.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Foreign-key, unique, not-null or check constraint rejected a write.
    #[error("Constraint violation ({constraint}): {message}")]
    ConstraintViolation { constraint: String, message: String },

    /// Gave up waiting for a row lock held by another transaction.
    #[error("Lock wait timeout: {0}")]
    LockWaitTimeout(String),

    /// The store aborted the transaction to preserve serializability.
    #[error("Serialization failure: {0}")]
    SerializationFailure(String),

    /// The unit of work or a store call ran past its deadline and was cancelled.
    #[error("Operation timed out: {0}")]
    Timeout(String),

    /// Rollback failed after the unit of work had already failed.
    #[error("Rollback failed ({rollback}) after error: {original}")]
    RollbackFailed {
        #[source]
        original: Box<LedgerError>,
        rollback: Box<LedgerError>,
    },

    /// Commit failed after the unit of work succeeded. No effect may be assumed.
    #[error("Commit failed: {0}")]
    CommitFailed(#[source] Box<LedgerError>),

    /// Request can never succeed (non-positive amount, self transfer).
    #[error("Invalid transfer: {0}")]
    InvalidTransfer(String),

    /// Source balance would go negative and the policy forbids it.
    #[error("Insufficient funds in account {account_id}: balance would be {balance}")]
    InsufficientFunds {
        account_id: AccountId,
        balance: Decimal,
    },

    /// Accounts hold different currencies and the policy forbids it.
    #[error("Currency mismatch: {from} -> {to}")]
    CurrencyMismatch { from: String, to: String },

    /// Any other store failure (connection loss, protocol error, ...).
    #[error("Database error: {0}")]
    DatabaseError(String),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    ConfigurationError(String),

    /// Internal invariant broken.
    #[error("Internal error: {0}")]
    InternalError(String),
}

impl LedgerError {
    /// Check if this error is retryable.
    ///
    /// Only contention signals qualify. A failed commit is not retryable
    /// because the caller cannot know whether the effects were applied.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            LedgerError::LockWaitTimeout(_)
                | LedgerError::SerializationFailure(_)
                | LedgerError::Timeout(_)
        )
    }

    /// Get suggested retry delay in milliseconds.
    pub fn retry_after_ms(&self) -> Option<u64> {
        match self {
            LedgerError::LockWaitTimeout(_) => Some(50),
            LedgerError::SerializationFailure(_) => Some(10),
            LedgerError::Timeout(_) => Some(100),
            _ => None,
        }
    }

    /// Get a stable error code for callers that map errors onto an API.
    pub fn error_code(&self) -> &'static str {
        match self {
            LedgerError::NotFound(_) => "NOT_FOUND",
            LedgerError::ConstraintViolation { .. } => "CONSTRAINT_VIOLATION",
            LedgerError::LockWaitTimeout(_) => "LOCK_WAIT_TIMEOUT",
            LedgerError::SerializationFailure(_) => "SERIALIZATION_FAILURE",
            LedgerError::Timeout(_) => "TIMEOUT",
            LedgerError::RollbackFailed { .. } => "ROLLBACK_FAILED",
            LedgerError::CommitFailed(_) => "COMMIT_FAILED",
            LedgerError::InvalidTransfer(_) => "INVALID_TRANSFER",
            LedgerError::InsufficientFunds { .. } => "INSUFFICIENT_FUNDS",
            LedgerError::CurrencyMismatch { .. } => "CURRENCY_MISMATCH",
            LedgerError::DatabaseError(_) => "DATABASE_ERROR",
            LedgerError::ConfigurationError(_) => "CONFIGURATION_ERROR",
            LedgerError::InternalError(_) => "INTERNAL_ERROR",
        }
    }

    /// Combine a unit-of-work failure with the failure of its rollback.
    pub fn rollback_failed(original: LedgerError, rollback: LedgerError) -> Self {
        LedgerError::RollbackFailed {
            original: Box::new(original),
            rollback: Box::new(rollback),
        }
    }

    /// Wrap a commit failure.
    pub fn commit_failed(cause: LedgerError) -> Self {
        LedgerError::CommitFailed(Box::new(cause))
    }
}

/// Result type alias for ledger operations.
pub type Result<T> = std::result::Result<T, LedgerError>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;

    #[test]
    fn test_contention_errors_are_retryable() {
        assert!(LedgerError::LockWaitTimeout("accounts 1".into()).is_retryable());
        assert!(LedgerError::SerializationFailure("40001".into()).is_retryable());
        assert!(LedgerError::Timeout("unit of work".into()).is_retryable());
    }

    #[test]
    fn test_fatal_errors_are_not_retryable() {
        assert!(!LedgerError::NotFound("account 9".into()).is_retryable());
        assert!(!LedgerError::ConstraintViolation {
            constraint: "entries_account_id_fkey".into(),
            message: "violates foreign key".into(),
        }
        .is_retryable());
        assert!(!LedgerError::commit_failed(LedgerError::DatabaseError("eof".into()))
            .is_retryable());
    }

    #[test]
    fn test_rollback_failure_keeps_both_errors() {
        let err = LedgerError::rollback_failed(
            LedgerError::LockWaitTimeout("account 1".into()),
            LedgerError::DatabaseError("connection reset".into()),
        );

        let rendered = err.to_string();
        assert!(rendered.contains("connection reset"));
        assert!(rendered.contains("account 1"));
        assert_eq!(err.error_code(), "ROLLBACK_FAILED");
        assert!(!err.is_retryable());
        assert!(err.source().is_some());
    }

    #[test]
    fn test_retry_hints() {
        assert_eq!(
            LedgerError::LockWaitTimeout(String::new()).retry_after_ms(),
            Some(50)
        );
        assert_eq!(LedgerError::NotFound(String::new()).retry_after_ms(), None);
    }
}
