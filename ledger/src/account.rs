//! Ledger account state.

use std::collections::{BTreeMap, BTreeSet};

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::debug;

use sagaledger_common::{AccountId, Aggregate, TransactionId};

use crate::journal::{LedgerEvent, TransactionType};

/// A deposit or withdraw awaiting execution or cancellation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingTransaction {
    /// Transaction this operation belongs to.
    pub transaction_id: TransactionId,
    /// Amount to move.
    pub amount: Decimal,
    /// Deposit or withdraw.
    pub transaction_type: TransactionType,
}

impl PendingTransaction {
    /// Whether this is a withdraw (holds a reservation).
    pub fn is_withdraw(&self) -> bool {
        self.transaction_type == TransactionType::Withdraw
    }
}

/// State of one ledger account.
///
/// A transaction id is in at most one of `pending_transactions` and
/// `executed_transactions`. Reserved funds are not part of `balance`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LedgerState {
    /// Spendable balance.
    pub balance: Decimal,
    /// Funds held by pending withdraws.
    pub reserved: Decimal,
    /// Operations awaiting execute or cancel.
    pub pending_transactions: BTreeMap<TransactionId, PendingTransaction>,
    /// Executed transactions not yet acknowledged as complete.
    pub executed_transactions: BTreeSet<TransactionId>,
}

impl LedgerState {
    /// Whether this id is pending or executed.
    pub fn already_seen(&self, transaction_id: &TransactionId) -> bool {
        self.pending_transactions.contains_key(transaction_id)
            || self.executed_transactions.contains(transaction_id)
    }

    /// Whether this id is pending.
    pub fn is_pending(&self, transaction_id: &TransactionId) -> bool {
        self.pending_transactions.contains_key(transaction_id)
    }

    /// Get a pending operation.
    pub fn pending(&self, transaction_id: &TransactionId) -> Option<&PendingTransaction> {
        self.pending_transactions.get(transaction_id)
    }

    /// Whether `amount` can be withdrawn.
    pub fn has_balance(&self, amount: Decimal) -> bool {
        self.balance - amount >= Decimal::ZERO
    }

    /// Total funds held (spendable plus reserved).
    pub fn total(&self) -> Decimal {
        self.balance + self.reserved
    }

    fn add_pending(&mut self, pending: PendingTransaction) {
        if pending.is_withdraw() {
            debug!(amount = %pending.amount, "Reserving funds");
            self.balance -= pending.amount;
            self.reserved += pending.amount;
        }
        self.pending_transactions
            .insert(pending.transaction_id.clone(), pending);
    }

    fn remove_pending(&mut self, transaction_id: &TransactionId) -> Option<PendingTransaction> {
        let pending = self.pending_transactions.remove(transaction_id)?;
        if pending.is_withdraw() {
            debug!(amount = %pending.amount, "Un-reserving funds");
            self.balance += pending.amount;
            self.reserved -= pending.amount;
        }
        Some(pending)
    }

    fn execute(&mut self, transaction_id: &TransactionId) {
        if let Some(pending) = self.remove_pending(transaction_id) {
            match pending.transaction_type {
                TransactionType::Deposit => self.balance += pending.amount,
                TransactionType::Withdraw => self.balance -= pending.amount,
            }
            self.executed_transactions.insert(pending.transaction_id);
        }
    }
}

impl Aggregate for LedgerState {
    type Id = AccountId;
    type Event = LedgerEvent;
    const KIND: &'static str = "ledger";

    fn apply(&mut self, event: &LedgerEvent) {
        match event {
            LedgerEvent::Created { .. } => {}
            LedgerEvent::DepositInitiated {
                transaction_id,
                amount,
                ..
            } => self.add_pending(PendingTransaction {
                transaction_id: transaction_id.clone(),
                amount: *amount,
                transaction_type: TransactionType::Deposit,
            }),
            LedgerEvent::WithdrawInitiated {
                transaction_id,
                amount,
                ..
            } => self.add_pending(PendingTransaction {
                transaction_id: transaction_id.clone(),
                amount: *amount,
                transaction_type: TransactionType::Withdraw,
            }),
            LedgerEvent::BalanceIncreased { transaction_id, .. }
            | LedgerEvent::BalanceDecreased { transaction_id, .. } => {
                self.execute(transaction_id)
            }
            LedgerEvent::TransactionCancelled { transaction_id, .. } => {
                self.remove_pending(transaction_id);
            }
            LedgerEvent::TransactionCompleted { transaction_id, .. } => {
                self.executed_transactions.remove(transaction_id);
            }
        }
    }
}
