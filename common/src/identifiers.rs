//! Identifier types for SagaLedger entities.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::{Result, SagaError};

/// Identifier of a ledger account (one Ledger entity per account).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AccountId(String);

impl AccountId {
    /// Create a new account ID.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Get the ID as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Validate the account ID format.
    pub fn is_valid(&self) -> bool {
        // non-empty, alphanumeric with underscores and dashes
        !self.0.is_empty()
            && self.0.len() <= 64
            && self
                .0
                .chars()
                .all(|c| c.is_alphanumeric() || c == '_' || c == '-')
    }

    /// Reject ids that fail [`AccountId::is_valid`].
    pub fn validate(&self) -> Result<()> {
        if self.is_valid() {
            Ok(())
        } else {
            Err(SagaError::InvalidAccount(self.clone()))
        }
    }
}

impl fmt::Display for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for AccountId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for AccountId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Identifier of a multi-party transaction.
///
/// Ledger entities use it as their dedup key, the mediator is keyed by it,
/// and a transfer shares the id of the transaction it creates.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TransactionId(String);

impl TransactionId {
    /// Create a transaction ID from a caller supplied key.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generate a fresh, time-ordered transaction ID (UUID v7).
    pub fn generate() -> Self {
        Self(Uuid::now_v7().to_string())
    }

    /// Get the ID as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for TransactionId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for TransactionId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// A transfer is driven under the id of the transaction it creates.
pub type TransferId = TransactionId;

/// Identifier of a participant enrolled in a mediated transaction.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ParticipantId(String);

impl ParticipantId {
    /// Create a new participant ID.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Get the ID as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ParticipantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for ParticipantId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<&AccountId> for ParticipantId {
    fn from(account: &AccountId) -> Self {
        Self(account.0.clone())
    }
}

impl From<AccountId> for ParticipantId {
    fn from(account: AccountId) -> Self {
        Self(account.0)
    }
}

impl From<&ParticipantId> for AccountId {
    fn from(participant: &ParticipantId) -> Self {
        Self(participant.0.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transaction_id_generation() {
        let id1 = TransactionId::generate();
        let id2 = TransactionId::generate();
        assert_ne!(id1, id2);
        assert!(Uuid::parse_str(id1.as_str()).is_ok());
    }

    #[test]
    fn test_account_id_validation() {
        assert!(AccountId::new("alice").is_valid());
        assert!(AccountId::new("wallet_42-eu").is_valid());
        assert!(!AccountId::new("").is_valid());
        assert!(!AccountId::new("has space").is_valid());
        assert!(AccountId::new("alice").validate().is_ok());
        assert!(matches!(
            AccountId::new("").validate(),
            Err(SagaError::InvalidAccount(_))
        ));
    }

    #[test]
    fn test_participant_account_conversion() {
        let account = AccountId::new("alice");
        let participant = ParticipantId::from(&account);
        assert_eq!(participant.as_str(), "alice");
        assert_eq!(AccountId::from(&participant), account);
    }

    #[test]
    fn test_ids_serialize_transparently() {
        let id = TransactionId::new("tx-1");
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"tx-1\"");
    }
}
