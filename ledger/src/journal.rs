//! Ledger events.
//!
//! Each event is an entry in the account's append-only journal. The ledger
//! state is the fold of these entries, see [`crate::account::LedgerState`].

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use sagaledger_common::{AccountId, TransactionId};

/// Kind of a pending ledger operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransactionType {
    /// Funds will be credited on execute.
    Deposit,
    /// Funds are reserved now and debited on execute.
    Withdraw,
}

/// Events emitted by a ledger account.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LedgerEvent {
    /// Account explicitly opened.
    Created { account: AccountId },
    /// Deposit registered as pending.
    DepositInitiated {
        account: AccountId,
        transaction_id: TransactionId,
        amount: Decimal,
    },
    /// Withdraw registered as pending; funds reserved.
    WithdrawInitiated {
        account: AccountId,
        transaction_id: TransactionId,
        amount: Decimal,
    },
    /// Pending deposit executed.
    BalanceIncreased {
        account: AccountId,
        transaction_id: TransactionId,
        amount: Decimal,
    },
    /// Pending withdraw executed.
    BalanceDecreased {
        account: AccountId,
        transaction_id: TransactionId,
        amount: Decimal,
    },
    /// Pending operation dropped; reservation released.
    TransactionCancelled {
        account: AccountId,
        transaction_id: TransactionId,
    },
    /// Coordinator acknowledged completion; dedup entry released.
    TransactionCompleted {
        account: AccountId,
        transaction_id: TransactionId,
    },
}

impl LedgerEvent {
    /// Account that emitted the event.
    pub fn account(&self) -> &AccountId {
        match self {
            LedgerEvent::Created { account }
            | LedgerEvent::DepositInitiated { account, .. }
            | LedgerEvent::WithdrawInitiated { account, .. }
            | LedgerEvent::BalanceIncreased { account, .. }
            | LedgerEvent::BalanceDecreased { account, .. }
            | LedgerEvent::TransactionCancelled { account, .. }
            | LedgerEvent::TransactionCompleted { account, .. } => account,
        }
    }

    /// Transaction the event refers to, if any.
    pub fn transaction_id(&self) -> Option<&TransactionId> {
        match self {
            LedgerEvent::Created { .. } => None,
            LedgerEvent::DepositInitiated { transaction_id, .. }
            | LedgerEvent::WithdrawInitiated { transaction_id, .. }
            | LedgerEvent::BalanceIncreased { transaction_id, .. }
            | LedgerEvent::BalanceDecreased { transaction_id, .. }
            | LedgerEvent::TransactionCancelled { transaction_id, .. }
            | LedgerEvent::TransactionCompleted { transaction_id, .. } => Some(transaction_id),
        }
    }

    /// Short event name for logs and metrics.
    pub fn name(&self) -> &'static str {
        match self {
            LedgerEvent::Created { .. } => "Created",
            LedgerEvent::DepositInitiated { .. } => "DepositInitiated",
            LedgerEvent::WithdrawInitiated { .. } => "WithdrawInitiated",
            LedgerEvent::BalanceIncreased { .. } => "BalanceIncreased",
            LedgerEvent::BalanceDecreased { .. } => "BalanceDecreased",
            LedgerEvent::TransactionCancelled { .. } => "TransactionCancelled",
            LedgerEvent::TransactionCompleted { .. } => "TransactionCompleted",
        }
    }
}
