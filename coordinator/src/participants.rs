//! Participant adapters.
//!
//! The mediator only knows participants by id and kind. When a transaction
//! changes phase, each participant is driven through the adapter registered for
//! its kind. The set of kinds is closed; adding one means adding a variant and
//! an adapter, and the compiler points at every dispatch site.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use sagaledger_common::{AccountId, ParticipantId, Result, TransactionId};

use crate::ledgers::Ledgers;

/// Kinds of entity that can take part in a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ParticipantKind {
    /// A ledger account.
    Ledger,
}

impl fmt::Display for ParticipantKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParticipantKind::Ledger => write!(f, "LEDGER"),
        }
    }
}

/// Drives one kind of participant through the transaction phases.
#[async_trait]
pub trait ParticipantAdapter: Send + Sync {
    /// Every participant joined: execute the pending side.
    async fn initialized(&self, transaction_id: &TransactionId, participant: &ParticipantId)
        -> Result<()>;

    /// Transaction cancelled: drop the pending side.
    async fn cancel(&self, transaction_id: &TransactionId, participant: &ParticipantId) -> Result<()>;

    /// Every participant executed: release bookkeeping.
    async fn complete(&self, transaction_id: &TransactionId, participant: &ParticipantId)
        -> Result<()>;
}

/// Adapter for ledger accounts.
pub struct LedgerAdapter {
    ledgers: Arc<Ledgers>,
}

impl LedgerAdapter {
    pub fn new(ledgers: Arc<Ledgers>) -> Self {
        Self { ledgers }
    }
}

#[async_trait]
impl ParticipantAdapter for LedgerAdapter {
    async fn initialized(
        &self,
        transaction_id: &TransactionId,
        participant: &ParticipantId,
    ) -> Result<()> {
        debug!(transaction_id = %transaction_id, participant = %participant, "Executing ledger side");
        self.ledgers
            .execute(&AccountId::from(participant), transaction_id)
            .await
    }

    async fn cancel(&self, transaction_id: &TransactionId, participant: &ParticipantId) -> Result<()> {
        debug!(transaction_id = %transaction_id, participant = %participant, "Cancelling ledger side");
        self.ledgers
            .cancel(&AccountId::from(participant), transaction_id)
            .await
    }

    async fn complete(
        &self,
        transaction_id: &TransactionId,
        participant: &ParticipantId,
    ) -> Result<()> {
        self.ledgers
            .complete(&AccountId::from(participant), transaction_id)
            .await
    }
}

/// One adapter per participant kind.
pub struct AdapterTable {
    ledger: LedgerAdapter,
}

impl AdapterTable {
    /// Build the table.
    pub fn new(ledgers: Arc<Ledgers>) -> Self {
        Self {
            ledger: LedgerAdapter::new(ledgers),
        }
    }

    /// Adapter for a kind.
    pub fn for_kind(&self, kind: ParticipantKind) -> &dyn ParticipantAdapter {
        match kind {
            ParticipantKind::Ledger => &self.ledger,
        }
    }
}
