//! Error types for SagaLedger operations.

use crate::{AccountId, TransactionId, TransferId};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Main error type for SagaLedger operations.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SagaError {
    /// Amount is zero or negative.
    #[error("Invalid amount {amount}: must be greater than zero")]
    InvalidAmount { amount: Decimal },

    /// Account id is empty, too long, or has characters outside `[A-Za-z0-9_-]`.
    #[error("Invalid account id: {0:?}")]
    InvalidAccount(AccountId),

    /// Participant list is empty or contains duplicates.
    #[error("Invalid participants: {0}")]
    InvalidParticipants(String),

    /// Withdraw would make the balance negative.
    #[error("Insufficient funds in {account}: required {required}, available {available}")]
    InsufficientFunds {
        account: AccountId,
        required: Decimal,
        available: Decimal,
    },

    /// Create against a transaction whose participants have all joined.
    #[error("Transaction {0} already in progress")]
    InProgress(TransactionId),

    /// Cancel against a transaction whose participants have all joined.
    #[error("Transaction {0} already in progress, cannot cancel")]
    AlreadyInProgress(TransactionId),

    /// Create against a cancelled transaction.
    #[error("Transaction {0} exists but was cancelled")]
    AlreadyCancelled(TransactionId),

    /// Start against a transfer id that already has state.
    #[error("Transfer {0} already started")]
    AlreadyStarted(TransferId),

    /// Explicit create against an existing ledger.
    #[error("Account {0} exists already")]
    AlreadyExists(AccountId),

    /// Ledger entity was never created.
    #[error("Account not found: {0}")]
    AccountNotFound(AccountId),

    /// Mediator entity was never created.
    #[error("Transaction not found: {0}")]
    TransactionNotFound(TransactionId),

    /// Sequencer has no state for this id.
    #[error("Transfer not found: {0}")]
    TransferNotFound(TransferId),

    /// Journal append raced with another writer.
    #[error("Concurrency conflict on {stream}: expected version {expected}, found {actual}")]
    ConcurrencyConflict {
        stream: String,
        expected: u64,
        actual: u64,
    },

    /// A cross-entity reaction could not be delivered.
    #[error("Delivery failed: {0}")]
    DeliveryFailed(String),

    /// Coordinator is not accepting commands.
    #[error("Coordinator busy, retry after {retry_after_ms}ms")]
    CoordinatorBusy { retry_after_ms: u64 },

    /// Configuration error.
    #[error("Configuration error: {0}")]
    ConfigurationError(String),

    /// Internal error.
    #[error("Internal error: {0}")]
    InternalError(String),
}

/// Error classes from the error handling design.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    /// Rejected synchronously; no state change.
    Validation,
    /// Rejected with a typed reason against current state.
    Conflict,
    /// Read or command against an entity that does not exist.
    NotFound,
    /// Storage, delivery, or lifecycle failure.
    Infrastructure,
}

impl SagaError {
    /// Classify this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            SagaError::InvalidAmount { .. }
            | SagaError::InvalidAccount(_)
            | SagaError::InvalidParticipants(_) => ErrorKind::Validation,
            SagaError::InsufficientFunds { .. }
            | SagaError::InProgress(_)
            | SagaError::AlreadyInProgress(_)
            | SagaError::AlreadyCancelled(_)
            | SagaError::AlreadyStarted(_)
            | SagaError::AlreadyExists(_) => ErrorKind::Conflict,
            SagaError::AccountNotFound(_)
            | SagaError::TransactionNotFound(_)
            | SagaError::TransferNotFound(_) => ErrorKind::NotFound,
            SagaError::ConcurrencyConflict { .. }
            | SagaError::DeliveryFailed(_)
            | SagaError::CoordinatorBusy { .. }
            | SagaError::ConfigurationError(_)
            | SagaError::InternalError(_) => ErrorKind::Infrastructure,
        }
    }

    /// Check if this error is retryable.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            SagaError::ConcurrencyConflict { .. }
                | SagaError::DeliveryFailed(_)
                | SagaError::CoordinatorBusy { .. }
        )
    }

    /// Get error code for replies.
    pub fn error_code(&self) -> &'static str {
        match self {
            SagaError::InvalidAmount { .. } => "INVALID_AMOUNT",
            SagaError::InvalidAccount(_) => "INVALID_ACCOUNT",
            SagaError::InvalidParticipants(_) => "INVALID_PARTICIPANTS",
            SagaError::InsufficientFunds { .. } => "INSUFFICIENT_FUNDS",
            SagaError::InProgress(_) => "IN_PROGRESS",
            SagaError::AlreadyInProgress(_) => "ALREADY_IN_PROGRESS",
            SagaError::AlreadyCancelled(_) => "ALREADY_CANCELLED",
            SagaError::AlreadyStarted(_) => "ALREADY_STARTED",
            SagaError::AlreadyExists(_) => "ALREADY_EXISTS",
            SagaError::AccountNotFound(_) => "ACCOUNT_NOT_FOUND",
            SagaError::TransactionNotFound(_) => "TRANSACTION_NOT_FOUND",
            SagaError::TransferNotFound(_) => "TRANSFER_NOT_FOUND",
            SagaError::ConcurrencyConflict { .. } => "CONCURRENCY_CONFLICT",
            SagaError::DeliveryFailed(_) => "DELIVERY_FAILED",
            SagaError::CoordinatorBusy { .. } => "COORDINATOR_BUSY",
            SagaError::ConfigurationError(_) => "CONFIGURATION_ERROR",
            SagaError::InternalError(_) => "INTERNAL_ERROR",
        }
    }
}

/// Result type alias for SagaLedger operations.
pub type Result<T> = std::result::Result<T, SagaError>;

/// Structured error reply returned to callers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RejectionReason {
    /// Error code.
    pub code: String,
    /// Error class.
    pub kind: ErrorKind,
    /// Human-readable message.
    pub message: String,
}

impl From<&SagaError> for RejectionReason {
    fn from(error: &SagaError) -> Self {
        Self {
            code: error.error_code().to_string(),
            kind: error.kind(),
            message: error.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_classification() {
        let err = SagaError::InvalidAmount {
            amount: Decimal::ZERO,
        };
        assert_eq!(err.kind(), ErrorKind::Validation);
        assert!(!err.is_retryable());

        let err = SagaError::InvalidAccount(AccountId::new(""));
        assert_eq!(err.kind(), ErrorKind::Validation);
        assert_eq!(err.error_code(), "INVALID_ACCOUNT");

        let err = SagaError::AlreadyInProgress(TransactionId::new("tx-1"));
        assert_eq!(err.kind(), ErrorKind::Conflict);

        let err = SagaError::AccountNotFound(AccountId::new("ghost"));
        assert_eq!(err.kind(), ErrorKind::NotFound);

        let err = SagaError::DeliveryFailed("ledger unreachable".into());
        assert_eq!(err.kind(), ErrorKind::Infrastructure);
        assert!(err.is_retryable());
    }

    #[test]
    fn test_rejection_reason() {
        let err = SagaError::InsufficientFunds {
            account: AccountId::new("alice"),
            required: Decimal::from(150),
            available: Decimal::from(100),
        };
        let reason = RejectionReason::from(&err);
        assert_eq!(reason.code, "INSUFFICIENT_FUNDS");
        assert_eq!(reason.kind, ErrorKind::Conflict);
        assert!(reason.message.contains("alice"));
    }
}
