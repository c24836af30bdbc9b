//! Simulation controller.

use std::collections::BTreeSet;
use std::time::Duration;

use anyhow::{bail, ensure};
use rust_decimal::Decimal;
use serde::Serialize;
use tracing::{info, warn};

use sagaledger_common::{AccountId, TransactionId, TransferId};
use sagaledger_coordinator::{
    Coordinator, CoordinatorConfig, MetricsSnapshot, TransferStatus,
};

use crate::metrics::SimulationMetrics;
use crate::scenario::{AssertCondition, Scenario, ScenarioStep};

/// Outcome of one scenario run.
#[derive(Debug, Clone, Serialize)]
pub struct SimulationReport {
    pub scenario: String,
    /// Funds deposited into the system.
    pub funded: Decimal,
    /// Sum of balance and reservations over every account at the end.
    pub held: Decimal,
    /// Reservations left over at the end.
    pub reserved: Decimal,
    pub transfers: SimulationMetrics,
    pub coordinator: MetricsSnapshot,
}

impl SimulationReport {
    /// Money was neither created nor destroyed and nothing stayed reserved.
    pub fn is_consistent(&self) -> bool {
        self.funded == self.held && self.reserved.is_zero()
    }
}

/// Controls the simulation.
pub struct SimulationController {
    /// Coordinator under test.
    coordinator: Coordinator,
    /// Scenario being run.
    scenario: Scenario,
    /// Accounts opened so far.
    accounts: BTreeSet<AccountId>,
    /// Transfers started so far.
    transfers: Vec<TransferId>,
    /// Funds deposited by the scenario.
    funded: Decimal,
    /// Simulation metrics.
    metrics: SimulationMetrics,
}

impl SimulationController {
    /// Create a controller with a fresh coordinator configured for `scenario`.
    pub fn new(scenario: Scenario, speed: f64) -> anyhow::Result<Self> {
        let mut config = CoordinatorConfig::default();
        config.dispatcher.duplicate_delivery_rate = scenario.duplicate_delivery_rate;
        config.workflow.retry_backoff = scale(config.workflow.retry_backoff, speed);
        config.dispatcher.retry_backoff_base = scale(config.dispatcher.retry_backoff_base, speed);
        config.validate()?;

        Ok(Self {
            coordinator: Coordinator::new(config, format!("simulator-{}", scenario.name)),
            scenario,
            accounts: BTreeSet::new(),
            transfers: Vec::new(),
            funded: Decimal::ZERO,
            metrics: SimulationMetrics::new(),
        })
    }

    /// Run every step, then check conservation.
    pub async fn run(mut self) -> anyhow::Result<SimulationReport> {
        info!(
            scenario = %self.scenario.name,
            description = %self.scenario.description,
            steps = self.scenario.steps.len(),
            "Running scenario"
        );

        self.coordinator.start().await?;

        let steps = std::mem::take(&mut self.scenario.steps);
        for step in &steps {
            self.execute_step(step).await?;
        }
        self.settle().await?;

        let report = self.report().await?;
        self.coordinator.stop().await?;
        Ok(report)
    }

    /// Execute a single scenario step.
    async fn execute_step(&mut self, step: &ScenarioStep) -> anyhow::Result<()> {
        match step {
            ScenarioStep::OpenAccount { account, balance } => {
                let account = AccountId::new(account.as_str());
                self.coordinator.create_account(&account).await?;
                if *balance > 0 {
                    let amount = Decimal::from(*balance);
                    self.coordinator
                        .wallet_deposit(&account, amount, &TransactionId::new(format!("open-{account}")))
                        .await?;
                    self.settle().await?;
                    self.funded += amount;
                }
                info!(account = %account, balance, "Account opened");
                self.accounts.insert(account);
            }
            ScenarioStep::Transfer {
                id,
                from,
                to,
                amount,
            } => {
                let transfer_id = TransferId::new(id.as_str());
                self.coordinator.start_transfer(
                    &transfer_id,
                    AccountId::new(from.as_str()),
                    AccountId::new(to.as_str()),
                    Decimal::from(*amount),
                )?;
                self.metrics.record_started();
                self.transfers.push(transfer_id);
            }
            ScenarioStep::Settle => self.settle().await?,
            ScenarioStep::Assert { condition } => self.check(condition).await?,
        }

        Ok(())
    }

    async fn settle(&self) -> anyhow::Result<()> {
        ensure!(
            self.coordinator.drain().await,
            "coordinator did not settle within the drain timeout"
        );
        Ok(())
    }

    async fn check(&self, condition: &AssertCondition) -> anyhow::Result<()> {
        match condition {
            AssertCondition::TransferCompleted { id } => {
                self.expect_transfer(id, TransferStatus::Completed)
            }
            AssertCondition::TransferCancelled { id } => {
                self.expect_transfer(id, TransferStatus::Cancelled)
            }
            AssertCondition::BalanceEquals { account, amount } => {
                let status = self
                    .coordinator
                    .account_status(&AccountId::new(account.as_str()))
                    .await?;
                let expected = Decimal::from(*amount);
                if status.balance != expected {
                    bail!(
                        "balance of {} is {}, expected {}",
                        account,
                        status.balance,
                        expected
                    );
                }
                Ok(())
            }
        }
    }

    fn expect_transfer(&self, id: &str, expected: TransferStatus) -> anyhow::Result<()> {
        let record = self.coordinator.transfer_status(&TransferId::new(id))?;
        if record.status != expected {
            bail!(
                "transfer {} is {:?}, expected {:?}",
                id,
                record.status,
                expected
            );
        }
        Ok(())
    }

    async fn report(&mut self) -> anyhow::Result<SimulationReport> {
        for transfer_id in &self.transfers {
            let record = self.coordinator.transfer_status(transfer_id)?;
            let latency_ms = (record.updated_at - record.created_at)
                .num_milliseconds()
                .max(0) as u64;
            match record.status {
                TransferStatus::Completed => self.metrics.record_completed(latency_ms),
                TransferStatus::Cancelled => self.metrics.record_cancelled(latency_ms),
                status => {
                    warn!(transfer_id = %transfer_id, status = ?status, "Transfer unfinished");
                    self.metrics.record_unfinished();
                }
            }
        }

        let mut held = Decimal::ZERO;
        let mut reserved = Decimal::ZERO;
        for account in &self.accounts {
            let status = self.coordinator.account_status(account).await?;
            held += status.total();
            reserved += status.reserved;
        }

        Ok(SimulationReport {
            scenario: self.scenario.name.clone(),
            funded: self.funded,
            held,
            reserved,
            transfers: self.metrics.clone(),
            coordinator: self.coordinator.metrics(),
        })
    }
}

fn scale(delay: Duration, speed: f64) -> Duration {
    if speed > 0.0 {
        delay.div_f64(speed)
    } else {
        delay
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[tokio::test]
    async fn test_named_scenarios_conserve_money() {
        for name in ["happy-path", "insufficient-funds", "duplicate-storm"] {
            let scenario = Scenario::load(name).unwrap();
            let controller = SimulationController::new(scenario, 100.0).unwrap();
            let report = controller.run().await.unwrap();
            assert!(report.is_consistent(), "{name}: {report:?}");
            assert_eq!(report.transfers.unfinished_transfers, 0);
        }
    }

    #[tokio::test]
    async fn test_random_scenario_conserves_money() {
        let scenario = Scenario::random(&mut StdRng::seed_from_u64(42), 4, 30, 100, 0.2);
        let controller = SimulationController::new(scenario, 100.0).unwrap();
        let report = controller.run().await.unwrap();

        assert!(report.is_consistent(), "{report:?}");
        assert_eq!(report.funded, Decimal::from(400));
        assert_eq!(
            report.transfers.completed_transfers + report.transfers.cancelled_transfers,
            30
        );
    }
}
