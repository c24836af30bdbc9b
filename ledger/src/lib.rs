//! SagaLedger Ledger
//!
//! Event-sourced account ledger with two-phase operations: deposits and
//! withdraws are registered as pending, then executed or cancelled.

pub mod account;
pub mod balance;
pub mod engine;
pub mod journal;

pub use account::{LedgerState, PendingTransaction};
pub use balance::LedgerStatus;
pub use engine::LedgerEngine;
pub use journal::{LedgerEvent, TransactionType};
