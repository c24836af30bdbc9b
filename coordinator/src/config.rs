//! Coordinator configuration.

use std::time::Duration;

use sagaledger_common::{Result, SagaError};

use crate::transfer_workflow::TransferStep;

/// What the sequencer does once a step has used all its attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Exhaustion {
    /// Route to another step.
    Failover(TransferStep),
    /// Stop driving; the transfer waits for an external completion signal.
    Terminal,
}

/// Retry policy for a single sequencer step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StepPolicy {
    /// Attempts before the step is exhausted.
    pub max_attempts: u32,
    /// Action on exhaustion.
    pub on_exhaustion: Exhaustion,
}

impl StepPolicy {
    /// Retry `max_attempts` times, then run `step`.
    pub fn failover(max_attempts: u32, step: TransferStep) -> Self {
        Self {
            max_attempts,
            on_exhaustion: Exhaustion::Failover(step),
        }
    }

    /// Retry `max_attempts` times, then stop.
    pub fn terminal(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            on_exhaustion: Exhaustion::Terminal,
        }
    }
}

/// Transfer sequencer configuration.
#[derive(Debug, Clone)]
pub struct WorkflowConfig {
    /// Policy for the create-transaction step.
    pub create_transaction: StepPolicy,
    /// Policy for the withdraw step.
    pub withdraw: StepPolicy,
    /// Policy for the deposit step.
    pub deposit: StepPolicy,
    /// Policy for the compensating cancel step.
    pub cancel: StepPolicy,
    /// Delay between attempts of the same step.
    pub retry_backoff: Duration,
}

impl WorkflowConfig {
    /// Policy for a step.
    pub fn policy(&self, step: TransferStep) -> StepPolicy {
        match step {
            TransferStep::CreateTransaction => self.create_transaction,
            TransferStep::Withdraw => self.withdraw,
            TransferStep::Deposit => self.deposit,
            TransferStep::Cancel => self.cancel,
        }
    }

    /// Set the same attempt bound on every step.
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.create_transaction.max_attempts = max_attempts;
        self.withdraw.max_attempts = max_attempts;
        self.deposit.max_attempts = max_attempts;
        self.cancel.max_attempts = max_attempts;
        self
    }
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            create_transaction: StepPolicy::failover(5, TransferStep::Cancel),
            withdraw: StepPolicy::failover(5, TransferStep::Cancel),
            deposit: StepPolicy::failover(5, TransferStep::Cancel),
            cancel: StepPolicy::terminal(5),
            retry_backoff: Duration::from_millis(200),
        }
    }
}

/// Event delivery configuration.
#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    /// First redelivery delay.
    pub retry_backoff_base: Duration,
    /// Cap on the redelivery delay.
    pub retry_backoff_max: Duration,
    /// Give up after this many attempts. `None` retries until acknowledged.
    pub max_delivery_attempts: Option<u32>,
    /// Probability of delivering an acknowledged event a second time.
    pub duplicate_delivery_rate: f64,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            retry_backoff_base: Duration::from_millis(50),
            retry_backoff_max: Duration::from_secs(5),
            max_delivery_attempts: None,
            duplicate_delivery_rate: 0.0,
        }
    }
}

/// Main coordinator configuration.
#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    /// Node ID, generated when absent.
    pub node_id: Option<String>,
    /// Sequencer configuration.
    pub workflow: WorkflowConfig,
    /// Dispatcher configuration.
    pub dispatcher: DispatcherConfig,
    /// How long shutdown waits for in-flight work.
    pub drain_timeout: Duration,
    /// Log level.
    pub log_level: String,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            node_id: None,
            workflow: WorkflowConfig::default(),
            dispatcher: DispatcherConfig::default(),
            drain_timeout: Duration::from_secs(30),
            log_level: "info".to_string(),
        }
    }
}

impl CoordinatorConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(id) = std::env::var("SAGALEDGER_NODE_ID") {
            config.node_id = Some(id);
        }

        if let Some(attempts) = env_parse::<u32>("SAGALEDGER_MAX_STEP_ATTEMPTS") {
            config.workflow = config.workflow.with_max_attempts(attempts);
        }

        if let Some(ms) = env_parse::<u64>("SAGALEDGER_STEP_BACKOFF_MS") {
            config.workflow.retry_backoff = Duration::from_millis(ms);
        }

        if let Some(ms) = env_parse::<u64>("SAGALEDGER_DELIVERY_BACKOFF_MS") {
            config.dispatcher.retry_backoff_base = Duration::from_millis(ms);
        }

        if let Some(rate) = env_parse::<f64>("SAGALEDGER_DUPLICATE_DELIVERY_RATE") {
            config.dispatcher.duplicate_delivery_rate = rate;
        }

        if let Ok(level) = std::env::var("LOG_LEVEL") {
            config.log_level = level;
        }

        config
    }

    /// Validate configuration.
    pub fn validate(&self) -> Result<()> {
        for step in TransferStep::ALL {
            if self.workflow.policy(step).max_attempts == 0 {
                return Err(SagaError::ConfigurationError(format!(
                    "Step {step} must allow at least one attempt"
                )));
            }
        }

        if self.dispatcher.max_delivery_attempts == Some(0) {
            return Err(SagaError::ConfigurationError(
                "Max delivery attempts cannot be 0".to_string(),
            ));
        }

        let rate = self.dispatcher.duplicate_delivery_rate;
        if !(0.0..=1.0).contains(&rate) {
            return Err(SagaError::ConfigurationError(format!(
                "Duplicate delivery rate {rate} is outside [0, 1]"
            )));
        }

        if self.dispatcher.retry_backoff_base > self.dispatcher.retry_backoff_max {
            return Err(SagaError::ConfigurationError(
                "Delivery backoff base cannot exceed max backoff".to_string(),
            ));
        }

        Ok(())
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|value| value.parse().ok())
}
