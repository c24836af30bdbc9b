//! Simulation scenarios.

use rand::Rng;
use serde::{Deserialize, Serialize};

/// A simulation scenario.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Scenario {
    /// Scenario name.
    pub name: String,
    /// Description.
    pub description: String,
    /// Probability that the dispatcher delivers an event twice.
    pub duplicate_delivery_rate: f64,
    /// Steps in the scenario.
    pub steps: Vec<ScenarioStep>,
}

/// A step in a scenario.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ScenarioStep {
    /// Open an account, funding it when `balance` is positive.
    OpenAccount { account: String, balance: u64 },
    /// Start a sequenced transfer. Does not wait for it.
    Transfer {
        id: String,
        from: String,
        to: String,
        amount: u64,
    },
    /// Wait until every delivery and sequencer is idle.
    Settle,
    /// Assert a condition.
    Assert { condition: AssertCondition },
}

/// Conditions that can be asserted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum AssertCondition {
    /// Transfer reached Completed.
    TransferCompleted { id: String },
    /// Transfer was compensated.
    TransferCancelled { id: String },
    /// Account balance equals.
    BalanceEquals { account: String, amount: u64 },
}

impl Scenario {
    /// Load a fixed scenario by name.
    pub fn load(name: &str) -> anyhow::Result<Self> {
        match name {
            "happy-path" => Ok(Self::happy_path()),
            "insufficient-funds" => Ok(Self::insufficient_funds()),
            "duplicate-storm" => Ok(Self::duplicate_storm()),
            _ => Err(anyhow::anyhow!("Unknown scenario: {}", name)),
        }
    }

    /// Two chained transfers between three accounts.
    fn happy_path() -> Self {
        Self {
            name: "happy-path".to_string(),
            description: "Chained transfers that all complete".to_string(),
            duplicate_delivery_rate: 0.0,
            steps: vec![
                open("ACC_A", 1000),
                open("ACC_B", 0),
                open("ACC_C", 500),
                transfer("T1", "ACC_A", "ACC_B", 300),
                ScenarioStep::Settle,
                transfer("T2", "ACC_B", "ACC_C", 100),
                ScenarioStep::Settle,
                assert(AssertCondition::TransferCompleted { id: "T1".to_string() }),
                assert(AssertCondition::TransferCompleted { id: "T2".to_string() }),
                assert(balance("ACC_A", 700)),
                assert(balance("ACC_B", 200)),
                assert(balance("ACC_C", 600)),
            ],
        }
    }

    /// A transfer the source cannot cover is compensated.
    fn insufficient_funds() -> Self {
        Self {
            name: "insufficient-funds".to_string(),
            description: "Withdraw rejected, transfer compensated".to_string(),
            duplicate_delivery_rate: 0.0,
            steps: vec![
                open("ACC_A", 100),
                open("ACC_B", 0),
                transfer("T1", "ACC_A", "ACC_B", 500),
                transfer("T2", "ACC_A", "ACC_B", 40),
                ScenarioStep::Settle,
                assert(AssertCondition::TransferCancelled { id: "T1".to_string() }),
                assert(AssertCondition::TransferCompleted { id: "T2".to_string() }),
                assert(balance("ACC_A", 60)),
                assert(balance("ACC_B", 40)),
            ],
        }
    }

    /// Opposing transfers with every event delivered twice.
    fn duplicate_storm() -> Self {
        let mut steps = vec![open("ACC_A", 1000), open("ACC_B", 1000)];
        for i in 0..10 {
            let (from, to) = if i % 2 == 0 {
                ("ACC_A", "ACC_B")
            } else {
                ("ACC_B", "ACC_A")
            };
            steps.push(transfer(&format!("T{i}"), from, to, 50));
        }
        steps.push(ScenarioStep::Settle);
        steps.push(assert(balance("ACC_A", 1000)));
        steps.push(assert(balance("ACC_B", 1000)));

        Self {
            name: "duplicate-storm".to_string(),
            description: "Every delivery duplicated; funds must move once".to_string(),
            duplicate_delivery_rate: 1.0,
            steps,
        }
    }

    /// Concurrent random transfers between `accounts` funded accounts.
    ///
    /// Some transfers overdraw and get compensated; only conservation is asserted.
    pub fn random<R: Rng>(
        rng: &mut R,
        accounts: usize,
        transfers: usize,
        initial_balance: u64,
        duplicate_delivery_rate: f64,
    ) -> Self {
        let names: Vec<String> = (0..accounts.max(2)).map(|i| format!("ACC_{i}")).collect();
        let mut steps: Vec<ScenarioStep> = names
            .iter()
            .map(|name| open(name, initial_balance))
            .collect();

        for i in 0..transfers {
            let from = rng.gen_range(0..names.len());
            let mut to = rng.gen_range(0..names.len());
            while to == from {
                to = rng.gen_range(0..names.len());
            }
            let amount = rng.gen_range(1..=initial_balance.max(2) / 2);
            steps.push(transfer(&format!("R{i}"), &names[from], &names[to], amount));
        }
        steps.push(ScenarioStep::Settle);

        Self {
            name: "random".to_string(),
            description: format!("{transfers} random transfers across {} accounts", names.len()),
            duplicate_delivery_rate,
            steps,
        }
    }
}

fn open(account: &str, balance: u64) -> ScenarioStep {
    ScenarioStep::OpenAccount {
        account: account.to_string(),
        balance,
    }
}

fn transfer(id: &str, from: &str, to: &str, amount: u64) -> ScenarioStep {
    ScenarioStep::Transfer {
        id: id.to_string(),
        from: from.to_string(),
        to: to.to_string(),
        amount,
    }
}

fn balance(account: &str, amount: u64) -> AssertCondition {
    AssertCondition::BalanceEquals {
        account: account.to_string(),
        amount,
    }
}

fn assert(condition: AssertCondition) -> ScenarioStep {
    ScenarioStep::Assert { condition }
}
