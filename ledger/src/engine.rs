//! Ledger command handling.
//!
//! Every handler is a pure decision over the current account state: it
//! validates the command and returns the events to emit. Replayed commands
//! (an id already pending or executed) decide no events and the caller replies
//! with the current status.

use rust_decimal::Decimal;
use tracing::info;

use sagaledger_common::{ensure_positive, AccountId, Result, SagaError, TransactionId};

use crate::account::LedgerState;
use crate::balance::LedgerStatus;
use crate::journal::{LedgerEvent, TransactionType};

/// Decision engine for ledger accounts.
#[derive(Debug, Clone, Copy, Default)]
pub struct LedgerEngine;

impl LedgerEngine {
    /// Create a new ledger engine.
    pub fn new() -> Self {
        Self
    }

    /// Open an account explicitly.
    pub fn create(
        &self,
        account: &AccountId,
        state: Option<&LedgerState>,
    ) -> Result<Vec<LedgerEvent>> {
        if state.is_some() {
            return Err(SagaError::AlreadyExists(account.clone()));
        }
        info!(account = %account, "Account created");
        Ok(vec![LedgerEvent::Created {
            account: account.clone(),
        }])
    }

    /// Register a pending deposit.
    pub fn deposit(
        &self,
        account: &AccountId,
        state: Option<&LedgerState>,
        amount: Decimal,
        transaction_id: &TransactionId,
    ) -> Result<Vec<LedgerEvent>> {
        let amount = ensure_positive(amount)?;

        if state.is_some_and(|s| s.already_seen(transaction_id)) {
            return Ok(Vec::new());
        }

        info!(
            account = %account,
            transaction_id = %transaction_id,
            amount = %amount,
            "Deposit requested"
        );
        Ok(vec![LedgerEvent::DepositInitiated {
            account: account.clone(),
            transaction_id: transaction_id.clone(),
            amount,
        }])
    }

    /// Register a pending withdraw, reserving the funds.
    pub fn withdraw(
        &self,
        account: &AccountId,
        state: Option<&LedgerState>,
        amount: Decimal,
        transaction_id: &TransactionId,
    ) -> Result<Vec<LedgerEvent>> {
        let amount = ensure_positive(amount)?;

        if state.is_some_and(|s| s.already_seen(transaction_id)) {
            return Ok(Vec::new());
        }

        let available = state.map(|s| s.balance).unwrap_or(Decimal::ZERO);
        if available < amount {
            info!(
                account = %account,
                amount = %amount,
                available = %available,
                "Insufficient balance to withdraw"
            );
            return Err(SagaError::InsufficientFunds {
                account: account.clone(),
                required: amount,
                available,
            });
        }

        info!(
            account = %account,
            transaction_id = %transaction_id,
            amount = %amount,
            "Withdraw requested"
        );
        Ok(vec![LedgerEvent::WithdrawInitiated {
            account: account.clone(),
            transaction_id: transaction_id.clone(),
            amount,
        }])
    }

    /// Execute a pending operation. Unknown ids are a no-op.
    pub fn execute(
        &self,
        account: &AccountId,
        state: Option<&LedgerState>,
        transaction_id: &TransactionId,
    ) -> Result<Vec<LedgerEvent>> {
        let Some(pending) = state.and_then(|s| s.pending(transaction_id)) else {
            return Ok(Vec::new());
        };

        let event = match pending.transaction_type {
            TransactionType::Deposit => {
                info!(account = %account, transaction_id = %transaction_id, amount = %pending.amount, "Deposit executed");
                LedgerEvent::BalanceIncreased {
                    account: account.clone(),
                    transaction_id: transaction_id.clone(),
                    amount: pending.amount,
                }
            }
            TransactionType::Withdraw => {
                info!(account = %account, transaction_id = %transaction_id, amount = %pending.amount, "Withdraw executed");
                LedgerEvent::BalanceDecreased {
                    account: account.clone(),
                    transaction_id: transaction_id.clone(),
                    amount: pending.amount,
                }
            }
        };
        Ok(vec![event])
    }

    /// Cancel a pending operation. Unknown ids are a no-op.
    pub fn cancel(
        &self,
        account: &AccountId,
        state: Option<&LedgerState>,
        transaction_id: &TransactionId,
    ) -> Result<Vec<LedgerEvent>> {
        if !state.is_some_and(|s| s.is_pending(transaction_id)) {
            return Ok(Vec::new());
        }
        info!(account = %account, transaction_id = %transaction_id, "Transaction cancelled");
        Ok(vec![LedgerEvent::TransactionCancelled {
            account: account.clone(),
            transaction_id: transaction_id.clone(),
        }])
    }

    /// Acknowledge completion, releasing the dedup entry.
    ///
    /// Always emits on an existing account, whether or not the id is tracked.
    /// An account that was never created has nothing to release.
    pub fn complete(
        &self,
        account: &AccountId,
        state: Option<&LedgerState>,
        transaction_id: &TransactionId,
    ) -> Result<Vec<LedgerEvent>> {
        if state.is_none() {
            return Ok(Vec::new());
        }
        info!(account = %account, transaction_id = %transaction_id, "Transaction completed");
        Ok(vec![LedgerEvent::TransactionCompleted {
            account: account.clone(),
            transaction_id: transaction_id.clone(),
        }])
    }

    /// Read-only status.
    pub fn status(&self, account: &AccountId, state: Option<&LedgerState>) -> Result<LedgerStatus> {
        state
            .map(|s| LedgerStatus::of(account, s))
            .ok_or_else(|| SagaError::AccountNotFound(account.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use sagaledger_common::{apply_all, Aggregate};

    fn account() -> AccountId {
        AccountId::new("alice")
    }

    fn tx(id: &str) -> TransactionId {
        TransactionId::new(id)
    }

    /// Run a decision and apply its events, returning what was emitted.
    fn run(
        state: &mut Option<LedgerState>,
        history: &mut Vec<LedgerEvent>,
        decide: impl FnOnce(Option<&LedgerState>) -> Result<Vec<LedgerEvent>>,
    ) -> Result<Vec<LedgerEvent>> {
        let events = decide(state.as_ref())?;
        apply_all(state, &events);
        history.extend(events.iter().cloned());
        Ok(events)
    }

    fn funded(amount: i64) -> (Option<LedgerState>, Vec<LedgerEvent>) {
        let engine = LedgerEngine::new();
        let mut state = None;
        let mut history = Vec::new();
        run(&mut state, &mut history, |s| {
            engine.deposit(&account(), s, Decimal::from(amount), &tx("seed"))
        })
        .unwrap();
        run(&mut state, &mut history, |s| {
            engine.execute(&account(), s, &tx("seed"))
        })
        .unwrap();
        (state, history)
    }

    #[test]
    fn test_deposit_full_cycle() {
        let engine = LedgerEngine::new();
        let mut state = None;
        let mut history = Vec::new();

        let events = run(&mut state, &mut history, |s| {
            engine.deposit(&account(), s, Decimal::from(100), &tx("t1"))
        })
        .unwrap();
        assert!(matches!(events[0], LedgerEvent::DepositInitiated { .. }));
        assert_eq!(state.as_ref().unwrap().balance, Decimal::ZERO);

        let events = run(&mut state, &mut history, |s| {
            engine.execute(&account(), s, &tx("t1"))
        })
        .unwrap();
        assert!(matches!(events[0], LedgerEvent::BalanceIncreased { .. }));
        assert_eq!(state.as_ref().unwrap().balance, Decimal::from(100));

        let events = run(&mut state, &mut history, |s| {
            engine.complete(&account(), s, &tx("t1"))
        })
        .unwrap();
        assert!(matches!(events[0], LedgerEvent::TransactionCompleted { .. }));
        assert!(state.as_ref().unwrap().executed_transactions.is_empty());
    }

    #[test]
    fn test_double_deposit_before_execution() {
        let engine = LedgerEngine::new();
        let mut state = None;
        let mut history = Vec::new();

        let first = run(&mut state, &mut history, |s| {
            engine.deposit(&account(), s, Decimal::from(100), &tx("t1"))
        })
        .unwrap();
        let second = run(&mut state, &mut history, |s| {
            engine.deposit(&account(), s, Decimal::from(100), &tx("t1"))
        })
        .unwrap();

        assert_eq!(first.len(), 1);
        assert!(second.is_empty());
        assert_eq!(state.unwrap().pending_transactions.len(), 1);
    }

    #[test]
    fn test_double_deposit_after_execution() {
        let engine = LedgerEngine::new();
        let (mut state, mut history) = funded(100);

        let events = run(&mut state, &mut history, |s| {
            engine.deposit(&account(), s, Decimal::from(100), &tx("seed"))
        })
        .unwrap();

        assert!(events.is_empty());
        assert_eq!(state.unwrap().balance, Decimal::from(100));
    }

    #[test]
    fn test_withdraw_insufficient_funds() {
        let engine = LedgerEngine::new();
        let (mut state, mut history) = funded(100);

        let result = run(&mut state, &mut history, |s| {
            engine.withdraw(&account(), s, Decimal::from(101), &tx("t2"))
        });

        assert!(matches!(result, Err(SagaError::InsufficientFunds { .. })));
        assert_eq!(history.len(), 2);
        assert_eq!(state.unwrap().balance, Decimal::from(100));
    }

    #[test]
    fn test_withdraw_on_missing_account_is_insufficient() {
        let engine = LedgerEngine::new();
        let result = engine.withdraw(&account(), None, Decimal::from(1), &tx("t1"));
        assert!(matches!(result, Err(SagaError::InsufficientFunds { .. })));
    }

    #[test]
    fn test_non_positive_amounts_rejected() {
        let engine = LedgerEngine::new();
        let (state, _) = funded(100);
        let result = engine.deposit(&account(), state.as_ref(), Decimal::ZERO, &tx("t1"));
        assert!(matches!(result, Err(SagaError::InvalidAmount { .. })));
        let result = engine.withdraw(&account(), state.as_ref(), Decimal::from(-5), &tx("t1"));
        assert!(matches!(result, Err(SagaError::InvalidAmount { .. })));
    }

    #[test]
    fn test_execute_after_cancel_is_noop() {
        let engine = LedgerEngine::new();
        let (mut state, mut history) = funded(100);

        run(&mut state, &mut history, |s| {
            engine.withdraw(&account(), s, Decimal::from(40), &tx("t1"))
        })
        .unwrap();
        let cancelled = run(&mut state, &mut history, |s| {
            engine.cancel(&account(), s, &tx("t1"))
        })
        .unwrap();
        assert!(matches!(cancelled[0], LedgerEvent::TransactionCancelled { .. }));

        let executed = run(&mut state, &mut history, |s| {
            engine.execute(&account(), s, &tx("t1"))
        })
        .unwrap();
        assert!(executed.is_empty());

        let state = state.unwrap();
        assert_eq!(state.balance, Decimal::from(100));
        assert_eq!(state.reserved, Decimal::ZERO);
    }

    #[test]
    fn test_cancel_unknown_is_noop() {
        let engine = LedgerEngine::new();
        let (state, _) = funded(10);
        assert!(engine
            .cancel(&account(), state.as_ref(), &tx("nope"))
            .unwrap()
            .is_empty());
        assert!(engine.cancel(&account(), None, &tx("nope")).unwrap().is_empty());
    }

    #[test]
    fn test_complete_always_emits_on_existing_account() {
        let engine = LedgerEngine::new();
        let (state, _) = funded(10);
        let events = engine.complete(&account(), state.as_ref(), &tx("never-seen")).unwrap();
        assert_eq!(events.len(), 1);
        assert!(engine.complete(&account(), None, &tx("t")).unwrap().is_empty());
    }

    #[test]
    fn test_create_and_status() {
        let engine = LedgerEngine::new();
        assert!(matches!(
            engine.status(&account(), None),
            Err(SagaError::AccountNotFound(_))
        ));

        let events = engine.create(&account(), None).unwrap();
        let state = LedgerState::replay(&events).unwrap();
        let status = engine.status(&account(), Some(&state)).unwrap();
        assert_eq!(status.balance, Decimal::ZERO);

        assert!(matches!(
            engine.create(&account(), Some(&state)),
            Err(SagaError::AlreadyExists(_))
        ));
    }

    #[derive(Debug, Clone)]
    enum Command {
        Deposit(u32, u8),
        Withdraw(u32, u8),
        Execute(u8),
        Cancel(u8),
        Complete(u8),
    }

    fn command() -> impl Strategy<Value = Command> {
        prop_oneof![
            (1u32..500, 0u8..8).prop_map(|(a, t)| Command::Deposit(a, t)),
            (1u32..500, 0u8..8).prop_map(|(a, t)| Command::Withdraw(a, t)),
            (0u8..8).prop_map(Command::Execute),
            (0u8..8).prop_map(Command::Cancel),
            (0u8..8).prop_map(Command::Complete),
        ]
    }

    fn apply_command(
        engine: &LedgerEngine,
        state: Option<&LedgerState>,
        command: &Command,
    ) -> Result<Vec<LedgerEvent>> {
        let id = |t: &u8| tx(&format!("t{t}"));
        match command {
            Command::Deposit(a, t) => engine.deposit(&account(), state, Decimal::from(*a), &id(t)),
            Command::Withdraw(a, t) => engine.withdraw(&account(), state, Decimal::from(*a), &id(t)),
            Command::Execute(t) => engine.execute(&account(), state, &id(t)),
            Command::Cancel(t) => engine.cancel(&account(), state, &id(t)),
            Command::Complete(t) => engine.complete(&account(), state, &id(t)),
        }
    }

    proptest! {
        #[test]
        fn prop_balance_never_negative(commands in proptest::collection::vec(command(), 0..60)) {
            let engine = LedgerEngine::new();
            let mut state: Option<LedgerState> = None;
            let mut history = Vec::new();

            for command in &commands {
                let before = history.len();
                let result = run(&mut state, &mut history, |s| apply_command(&engine, s, command));
                if let Err(SagaError::InsufficientFunds { .. }) = result {
                    prop_assert_eq!(history.len(), before);
                }
                if let Some(s) = &state {
                    prop_assert!(s.balance >= Decimal::ZERO);
                    prop_assert!(s.reserved >= Decimal::ZERO);
                    for id in s.pending_transactions.keys() {
                        prop_assert!(!s.executed_transactions.contains(id));
                    }
                }
            }
        }

        #[test]
        fn prop_replay_is_deterministic(commands in proptest::collection::vec(command(), 0..60)) {
            let engine = LedgerEngine::new();
            let mut state: Option<LedgerState> = None;
            let mut history = Vec::new();
            for command in &commands {
                let _ = run(&mut state, &mut history, |s| apply_command(&engine, s, command));
            }

            let first = LedgerState::replay(&history);
            let second = LedgerState::replay(&history);
            prop_assert_eq!(&first, &second);
            prop_assert_eq!(&first, &state);
        }
    }
}
