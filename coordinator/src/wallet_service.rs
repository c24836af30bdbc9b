//! Wallet operations without a sequencer.
//!
//! Single-account deposits and withdraws still go through a one-participant
//! mediator transaction, so every balance change is executed by the same
//! join/execute protocol as a transfer.

use std::sync::Arc;

use rust_decimal::Decimal;
use tracing::{info, instrument, warn};

use sagaledger_common::{ensure_positive, AccountId, Result, SagaError, TransactionId};
use sagaledger_ledger::LedgerStatus;

use crate::ledgers::Ledgers;
use crate::transaction_mediator::{ParticipantRef, TransactionMediator, TransactionStatus};

/// Wallet facade over ledgers and the mediator.
pub struct WalletService {
    ledgers: Arc<Ledgers>,
    mediator: Arc<TransactionMediator>,
}

impl WalletService {
    pub fn new(ledgers: Arc<Ledgers>, mediator: Arc<TransactionMediator>) -> Self {
        Self { ledgers, mediator }
    }

    /// Open a wallet.
    pub async fn create_wallet(&self, account: &AccountId) -> Result<LedgerStatus> {
        self.ledgers.create(account).await
    }

    /// Deposit into one wallet.
    #[instrument(skip(self))]
    pub async fn deposit(
        &self,
        account: &AccountId,
        amount: Decimal,
        transaction_id: &TransactionId,
    ) -> Result<LedgerStatus> {
        let amount = ensure_positive(amount)?;
        if !self.open(transaction_id, vec![ParticipantRef::ledger(account)]).await? {
            return self.ledgers.status(account).await;
        }
        self.ledgers.deposit(account, amount, transaction_id).await
    }

    /// Withdraw from one wallet.
    #[instrument(skip(self))]
    pub async fn withdraw(
        &self,
        account: &AccountId,
        amount: Decimal,
        transaction_id: &TransactionId,
    ) -> Result<LedgerStatus> {
        let amount = ensure_positive(amount)?;
        if !self.open(transaction_id, vec![ParticipantRef::ledger(account)]).await? {
            return self.ledgers.status(account).await;
        }
        match self.ledgers.withdraw(account, amount, transaction_id).await {
            Ok(status) => Ok(status),
            Err(e) => {
                self.abandon(transaction_id).await;
                Err(e)
            }
        }
    }

    /// Wallet status.
    pub async fn status(&self, account: &AccountId) -> Result<LedgerStatus> {
        self.ledgers.status(account).await
    }

    /// Move funds between two wallets under one mediator transaction.
    #[instrument(skip(self))]
    pub async fn transfer(
        &self,
        transaction_id: &TransactionId,
        from: &AccountId,
        to: &AccountId,
        amount: Decimal,
    ) -> Result<TransactionStatus> {
        let amount = ensure_positive(amount)?;
        if from == to {
            return Err(SagaError::InvalidParticipants(format!(
                "transfer from {from} to itself"
            )));
        }

        let participants = vec![ParticipantRef::ledger(from), ParticipantRef::ledger(to)];
        if self.open(transaction_id, participants).await? {
            if let Err(e) = self.ledgers.withdraw(from, amount, transaction_id).await {
                self.abandon(transaction_id).await;
                return Err(e);
            }
            self.ledgers.deposit(to, amount, transaction_id).await?;
            info!(transaction_id = %transaction_id, from = %from, to = %to, amount = %amount, "Direct transfer requested");
        }
        self.mediator.status(transaction_id).await
    }

    /// Create the mediator transaction. Returns false if it is already under way.
    async fn open(
        &self,
        transaction_id: &TransactionId,
        participants: Vec<ParticipantRef>,
    ) -> Result<bool> {
        match self.mediator.create(transaction_id, participants).await {
            Ok(_) => Ok(true),
            Err(SagaError::InProgress(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    async fn abandon(&self, transaction_id: &TransactionId) {
        if let Err(e) = self.mediator.cancel(transaction_id).await {
            warn!(transaction_id = %transaction_id, error = %e, "Could not cancel abandoned transaction");
        }
    }
}
