//! Command surface of all ledger accounts.

use std::sync::Arc;

use rust_decimal::Decimal;
use tracing::instrument;

use sagaledger_common::{AccountId, Result, TransactionId};
use sagaledger_ledger::{LedgerEngine, LedgerEvent, LedgerState, LedgerStatus};

use crate::dispatcher::EventSink;
use crate::entity_store::EntityStore;
use crate::journal::EventJournal;

/// Ledger runtime: one single-writer entity per account.
pub struct Ledgers {
    engine: LedgerEngine,
    store: EntityStore<LedgerState>,
}

impl Ledgers {
    /// Create a ledger runtime.
    pub fn new(
        journal: Arc<dyn EventJournal<LedgerEvent>>,
        sink: Arc<dyn EventSink<LedgerEvent>>,
    ) -> Self {
        Self {
            engine: LedgerEngine::new(),
            store: EntityStore::new(journal, sink),
        }
    }

    /// Open an account explicitly.
    pub async fn create(&self, account: &AccountId) -> Result<LedgerStatus> {
        let state = self
            .store
            .execute(account, |state| self.engine.create(account, state))
            .await?;
        Ok(snapshot(account, state))
    }

    /// Register a pending deposit.
    #[instrument(skip(self))]
    pub async fn deposit(
        &self,
        account: &AccountId,
        amount: Decimal,
        transaction_id: &TransactionId,
    ) -> Result<LedgerStatus> {
        let state = self
            .store
            .execute(account, |state| {
                self.engine.deposit(account, state, amount, transaction_id)
            })
            .await?;
        Ok(snapshot(account, state))
    }

    /// Register a pending withdraw.
    #[instrument(skip(self))]
    pub async fn withdraw(
        &self,
        account: &AccountId,
        amount: Decimal,
        transaction_id: &TransactionId,
    ) -> Result<LedgerStatus> {
        let state = self
            .store
            .execute(account, |state| {
                self.engine.withdraw(account, state, amount, transaction_id)
            })
            .await?;
        Ok(snapshot(account, state))
    }

    /// Execute a pending operation.
    pub async fn execute(&self, account: &AccountId, transaction_id: &TransactionId) -> Result<()> {
        self.store
            .execute(account, |state| self.engine.execute(account, state, transaction_id))
            .await?;
        Ok(())
    }

    /// Cancel a pending operation.
    pub async fn cancel(&self, account: &AccountId, transaction_id: &TransactionId) -> Result<()> {
        self.store
            .execute(account, |state| self.engine.cancel(account, state, transaction_id))
            .await?;
        Ok(())
    }

    /// Release the dedup entry of a completed transaction.
    pub async fn complete(&self, account: &AccountId, transaction_id: &TransactionId) -> Result<()> {
        self.store
            .execute(account, |state| self.engine.complete(account, state, transaction_id))
            .await?;
        Ok(())
    }

    /// Read-only status.
    pub async fn status(&self, account: &AccountId) -> Result<LedgerStatus> {
        let state = self.store.state(account).await?;
        self.engine.status(account, state.as_ref())
    }

    /// Hand every journaled ledger event to the dispatcher again.
    pub async fn republish(&self) -> Result<usize> {
        self.store.republish().await
    }
}

// Deposit and withdraw always leave an account behind; an empty state only
// happens for a rejected withdraw, which returns before this point.
fn snapshot(account: &AccountId, state: Option<LedgerState>) -> LedgerStatus {
    match state {
        Some(state) => LedgerStatus::of(account, &state),
        None => LedgerStatus::empty(account),
    }
}
