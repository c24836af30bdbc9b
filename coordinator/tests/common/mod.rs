//! Shared helpers for coordinator integration tests.

#![allow(dead_code)]

use std::time::Duration;

use rust_decimal::Decimal;
use sagaledger_common::{AccountId, TransactionId};
use sagaledger_coordinator::{Coordinator, CoordinatorConfig, Storage};

/// Configuration with short backoffs.
pub fn fast_config() -> CoordinatorConfig {
    let mut config = CoordinatorConfig::default();
    config.drain_timeout = Duration::from_secs(10);
    config.workflow.retry_backoff = Duration::from_millis(1);
    config.dispatcher.retry_backoff_base = Duration::from_millis(1);
    config.dispatcher.retry_backoff_max = Duration::from_millis(10);
    config
}

/// A running coordinator over the given storage.
pub async fn started(config: CoordinatorConfig, storage: Storage) -> Coordinator {
    let coordinator = Coordinator::with_storage(config, "test-node".to_string(), storage);
    coordinator.start().await.expect("coordinator starts");
    coordinator
}

/// Credit `amount` to `account` and wait for it to settle.
pub async fn fund(coordinator: &Coordinator, account: &str, amount: i64) {
    coordinator
        .wallet_deposit(
            &AccountId::new(account),
            Decimal::from(amount),
            &TransactionId::new(format!("fund-{account}-{amount}")),
        )
        .await
        .expect("funding deposit accepted");
    settle(coordinator).await;
}

pub async fn settle(coordinator: &Coordinator) {
    assert!(coordinator.drain().await, "coordinator did not settle");
}

pub async fn balance(coordinator: &Coordinator, account: &str) -> Decimal {
    coordinator
        .account_status(&AccountId::new(account))
        .await
        .map(|status| status.balance)
        .unwrap_or(Decimal::ZERO)
}

pub async fn reserved(coordinator: &Coordinator, account: &str) -> Decimal {
    coordinator
        .account_status(&AccountId::new(account))
        .await
        .map(|status| status.reserved)
        .unwrap_or(Decimal::ZERO)
}
