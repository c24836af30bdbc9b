//! Cross-entity reactions.
//!
//! Each listener turns events of one entity kind into commands on another.
//! All of them are safe to run more than once per event.

use std::sync::Arc;

use async_trait::async_trait;
use futures::future::try_join_all;
use tracing::{debug, info};

use sagaledger_common::{ParticipantId, Result};
use sagaledger_ledger::LedgerEvent;

use crate::dispatcher::{DomainEvent, EventHandler};
use crate::ledgers::Ledgers;
use crate::participants::AdapterTable;
use crate::transaction_mediator::{JoinOutcome, MediatorEvent, TransactionMediator};
use crate::transfer_workflow::TransferWorkflow;

/// Reports ledger progress to the mediator.
pub struct LedgerListener {
    mediator: Arc<TransactionMediator>,
    ledgers: Arc<Ledgers>,
}

impl LedgerListener {
    pub fn new(mediator: Arc<TransactionMediator>, ledgers: Arc<Ledgers>) -> Self {
        Self { mediator, ledgers }
    }
}

#[async_trait]
impl EventHandler for LedgerListener {
    fn name(&self) -> &'static str {
        "ledger-listener"
    }

    async fn handle(&self, event: &DomainEvent) -> Result<()> {
        let DomainEvent::Ledger(event) = event else {
            return Ok(());
        };

        match event {
            LedgerEvent::DepositInitiated {
                account,
                transaction_id,
                ..
            }
            | LedgerEvent::WithdrawInitiated {
                account,
                transaction_id,
                ..
            } => {
                let outcome = self
                    .mediator
                    .join(transaction_id, &ParticipantId::from(account))
                    .await?;
                if outcome == JoinOutcome::Cancelled {
                    info!(
                        account = %account,
                        transaction_id = %transaction_id,
                        "Releasing side of cancelled transaction"
                    );
                    self.ledgers.cancel(account, transaction_id).await?;
                }
            }
            LedgerEvent::BalanceIncreased {
                account,
                transaction_id,
                ..
            }
            | LedgerEvent::BalanceDecreased {
                account,
                transaction_id,
                ..
            } => {
                self.mediator
                    .executed(transaction_id, &ParticipantId::from(account))
                    .await?;
            }
            LedgerEvent::Created { .. }
            | LedgerEvent::TransactionCancelled { .. }
            | LedgerEvent::TransactionCompleted { .. } => {}
        }
        Ok(())
    }
}

/// Fans mediator phase transitions out to every participant.
pub struct MediatorListener {
    adapters: AdapterTable,
}

impl MediatorListener {
    pub fn new(adapters: AdapterTable) -> Self {
        Self { adapters }
    }
}

#[async_trait]
impl EventHandler for MediatorListener {
    fn name(&self) -> &'static str {
        "mediator-listener"
    }

    async fn handle(&self, event: &DomainEvent) -> Result<()> {
        let DomainEvent::Mediator(event) = event else {
            return Ok(());
        };

        let (transaction_id, participants) = match event {
            MediatorEvent::Initialized {
                transaction_id,
                participants,
            }
            | MediatorEvent::Cancelled {
                transaction_id,
                participants,
            }
            | MediatorEvent::Completed {
                transaction_id,
                participants,
            } => (transaction_id, participants),
            MediatorEvent::Created { .. }
            | MediatorEvent::ParticipantJoined { .. }
            | MediatorEvent::ParticipantExecuted { .. } => return Ok(()),
        };

        // Participants are independent entities; notify them concurrently.
        try_join_all(participants.iter().map(|participant| {
            let adapter = self.adapters.for_kind(participant.kind);
            async move {
                match event {
                    MediatorEvent::Initialized { .. } => {
                        adapter.initialized(transaction_id, &participant.id).await
                    }
                    MediatorEvent::Cancelled { .. } => {
                        adapter.cancel(transaction_id, &participant.id).await
                    }
                    _ => adapter.complete(transaction_id, &participant.id).await,
                }
            }
        }))
        .await?;
        Ok(())
    }
}

/// Signals the sequencer once its transaction completes.
///
/// Transfer ids and transaction ids coincide. Transactions without a sequencer
/// (single-account operations, direct transfers) are ignored by the sequencer.
pub struct TransferListener {
    workflow: Arc<TransferWorkflow>,
}

impl TransferListener {
    pub fn new(workflow: Arc<TransferWorkflow>) -> Self {
        Self { workflow }
    }
}

#[async_trait]
impl EventHandler for TransferListener {
    fn name(&self) -> &'static str {
        "transfer-listener"
    }

    async fn handle(&self, event: &DomainEvent) -> Result<()> {
        if let DomainEvent::Mediator(MediatorEvent::Completed { transaction_id, .. }) = event {
            debug!(transfer_id = %transaction_id, "Forwarding completion to sequencer");
            self.workflow.complete(transaction_id)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatcher::DiscardSink;
    use crate::journal::InMemoryJournal;
    use crate::transaction_mediator::ParticipantRef;
    use rust_decimal::Decimal;
    use sagaledger_common::{AccountId, TransactionId};

    #[tokio::test]
    async fn test_late_join_releases_reservation() {
        let ledgers = Arc::new(Ledgers::new(
            Arc::new(InMemoryJournal::new()),
            Arc::new(DiscardSink),
        ));
        let mediator = Arc::new(TransactionMediator::new(
            Arc::new(InMemoryJournal::new()),
            Arc::new(DiscardSink),
        ));
        let listener = LedgerListener::new(mediator.clone(), ledgers.clone());

        let alice = AccountId::new("alice");
        let seed = TransactionId::new("seed");
        ledgers.deposit(&alice, Decimal::from(100), &seed).await.unwrap();
        ledgers.execute(&alice, &seed).await.unwrap();

        let tx = TransactionId::new("t1");
        mediator
            .create(&tx, vec![ParticipantRef::ledger(&alice), ParticipantRef::ledger("bob")])
            .await
            .unwrap();
        mediator.cancel(&tx).await.unwrap();

        let status = ledgers.withdraw(&alice, Decimal::from(40), &tx).await.unwrap();
        assert_eq!(status.reserved, Decimal::from(40));

        let event = DomainEvent::Ledger(LedgerEvent::WithdrawInitiated {
            account: alice.clone(),
            transaction_id: tx.clone(),
            amount: Decimal::from(40),
        });
        listener.handle(&event).await.unwrap();
        listener.handle(&event).await.unwrap();

        let status = ledgers.status(&alice).await.unwrap();
        assert_eq!(status.balance, Decimal::from(100));
        assert_eq!(status.reserved, Decimal::ZERO);
        assert!(status.pending_transactions.is_empty());
    }
}
