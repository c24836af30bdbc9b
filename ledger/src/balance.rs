//! Read-only account status.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use sagaledger_common::AccountId;

use crate::account::{LedgerState, PendingTransaction};

/// Snapshot returned by ledger commands and status queries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerStatus {
    /// Account identifier.
    pub account: AccountId,
    /// Spendable balance (excludes reserved funds).
    pub balance: Decimal,
    /// Funds reserved by pending withdraws.
    pub reserved: Decimal,
    /// Operations awaiting execute or cancel.
    pub pending_transactions: Vec<PendingTransaction>,
}

impl LedgerStatus {
    /// Project a status from account state.
    pub fn of(account: &AccountId, state: &LedgerState) -> Self {
        Self {
            account: account.clone(),
            balance: state.balance,
            reserved: state.reserved,
            pending_transactions: state.pending_transactions.values().cloned().collect(),
        }
    }

    /// Status of an account with no history.
    pub fn empty(account: &AccountId) -> Self {
        Self::of(account, &LedgerState::default())
    }

    /// Total funds held (spendable plus reserved).
    pub fn total(&self) -> Decimal {
        self.balance + self.reserved
    }
}
