//! Transfer sequencer.
//!
//! Drives one transfer through create-transaction, withdraw and deposit, each
//! step retried under its own [`StepPolicy`](crate::config::StepPolicy). An
//! exhausted step fails over to the compensating cancel step. The cursor lives
//! in the [`WorkflowStore`], so a restarted coordinator re-issues the step that
//! was in flight.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{error, info, instrument, warn};

use sagaledger_common::{ensure_positive, AccountId, Result, SagaError, TransferId};

use crate::config::{Exhaustion, WorkflowConfig};
use crate::ledgers::Ledgers;
use crate::metrics::SharedMetrics;
use crate::transaction_mediator::{ParticipantRef, TransactionMediator};
use crate::workflow_store::WorkflowStore;

/// Sequencer status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransferStatus {
    Initiated,
    TransactionCreated,
    WithdrawRequested,
    DepositRequested,
    Cancelled,
    Completed,
}

impl TransferStatus {
    /// Check if this is a terminal status.
    pub fn is_terminal(&self) -> bool {
        matches!(self, TransferStatus::Cancelled | TransferStatus::Completed)
    }
}

/// Sequencer steps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TransferStep {
    CreateTransaction,
    Withdraw,
    Deposit,
    /// Compensation.
    Cancel,
}

impl TransferStep {
    /// Every step.
    pub const ALL: [TransferStep; 4] = [
        TransferStep::CreateTransaction,
        TransferStep::Withdraw,
        TransferStep::Deposit,
        TransferStep::Cancel,
    ];

    /// Status reached and step to run next once this step succeeds.
    fn on_success(self) -> (TransferStatus, Option<TransferStep>) {
        match self {
            TransferStep::CreateTransaction => {
                (TransferStatus::TransactionCreated, Some(TransferStep::Withdraw))
            }
            TransferStep::Withdraw => (TransferStatus::WithdrawRequested, Some(TransferStep::Deposit)),
            TransferStep::Deposit => (TransferStatus::DepositRequested, None),
            TransferStep::Cancel => (TransferStatus::Cancelled, None),
        }
    }
}

impl fmt::Display for TransferStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TransferStep::CreateTransaction => "create-transaction",
            TransferStep::Withdraw => "withdraw",
            TransferStep::Deposit => "deposit",
            TransferStep::Cancel => "cancel",
        };
        f.write_str(name)
    }
}

/// What a transfer moves.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transfer {
    pub from: AccountId,
    pub to: AccountId,
    pub amount: Decimal,
}

/// Durable state of one sequencer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransferRecord {
    pub transfer_id: TransferId,
    pub transfer: Transfer,
    pub status: TransferStatus,
    /// Step in flight. `None` once the sequencer has nothing left to drive.
    pub cursor: Option<TransferStep>,
    /// Failed attempts of the step in flight.
    pub attempts: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TransferRecord {
    /// A freshly started transfer.
    pub fn new(transfer_id: TransferId, transfer: Transfer) -> Self {
        let now = Utc::now();
        Self {
            transfer_id,
            transfer,
            status: TransferStatus::Initiated,
            cursor: Some(TransferStep::CreateTransaction),
            attempts: 0,
            created_at: now,
            updated_at: now,
        }
    }

    fn next_step(&self) -> Option<TransferStep> {
        if self.status.is_terminal() {
            None
        } else {
            self.cursor
        }
    }
}

/// Performs the external call behind each step.
///
/// Every step must be idempotent: a step is re-issued after a failure, after a
/// restart, and possibly after it already took effect.
#[async_trait]
pub trait StepExecutor: Send + Sync {
    async fn execute(&self, step: TransferStep, transfer_id: &TransferId, transfer: &Transfer)
        -> Result<()>;
}

/// Steps backed by the mediator and the ledgers.
pub struct SagaSteps {
    mediator: Arc<TransactionMediator>,
    ledgers: Arc<Ledgers>,
}

impl SagaSteps {
    pub fn new(mediator: Arc<TransactionMediator>, ledgers: Arc<Ledgers>) -> Self {
        Self { mediator, ledgers }
    }
}

#[async_trait]
impl StepExecutor for SagaSteps {
    async fn execute(
        &self,
        step: TransferStep,
        transfer_id: &TransferId,
        transfer: &Transfer,
    ) -> Result<()> {
        match step {
            TransferStep::CreateTransaction => {
                let participants = vec![
                    ParticipantRef::ledger(&transfer.from),
                    ParticipantRef::ledger(&transfer.to),
                ];
                self.mediator.create(transfer_id, participants).await?;
            }
            TransferStep::Withdraw => {
                self.ledgers
                    .withdraw(&transfer.from, transfer.amount, transfer_id)
                    .await?;
            }
            TransferStep::Deposit => {
                self.ledgers
                    .deposit(&transfer.to, transfer.amount, transfer_id)
                    .await?;
            }
            TransferStep::Cancel => match self.mediator.cancel(transfer_id).await {
                // Create never took effect, so there is nothing to compensate.
                Err(SagaError::TransactionNotFound(_)) => {
                    info!(transfer_id = %transfer_id, "No transaction to cancel");
                }
                result => result?,
            },
        }
        Ok(())
    }
}

/// Runs every transfer sequencer.
pub struct TransferWorkflow {
    config: WorkflowConfig,
    store: Arc<WorkflowStore>,
    steps: Arc<dyn StepExecutor>,
    metrics: SharedMetrics,
    drivers: DashMap<TransferId, Arc<Mutex<()>>>,
    running: AtomicUsize,
    halted: AtomicBool,
}

impl TransferWorkflow {
    /// Create a sequencer runtime.
    pub fn new(
        config: WorkflowConfig,
        store: Arc<WorkflowStore>,
        steps: Arc<dyn StepExecutor>,
        metrics: SharedMetrics,
    ) -> Self {
        Self {
            config,
            store,
            steps,
            metrics,
            drivers: DashMap::new(),
            running: AtomicUsize::new(0),
            halted: AtomicBool::new(false),
        }
    }

    /// Start a transfer. Returns once the cursor is stored; steps run in the background.
    #[instrument(skip_all, fields(transfer_id = %transfer_id))]
    pub fn start(
        self: &Arc<Self>,
        transfer_id: &TransferId,
        from: AccountId,
        to: AccountId,
        amount: Decimal,
    ) -> Result<()> {
        let amount = ensure_positive(amount)?;
        if from == to {
            return Err(SagaError::InvalidParticipants(format!(
                "transfer from {from} to itself"
            )));
        }

        let record = TransferRecord::new(transfer_id.clone(), Transfer { from, to, amount });
        self.store.insert_new(record)?;
        self.metrics.transfer_started();
        info!(transfer_id = %transfer_id, amount = %amount, "Transfer started");

        self.spawn_driver(transfer_id.clone());
        Ok(())
    }

    /// External completion signal. A no-op for unknown or terminal transfers.
    pub fn complete(&self, transfer_id: &TransferId) -> Result<()> {
        let updated = self.store.update_active(transfer_id, |record| {
            record.status = TransferStatus::Completed;
            record.cursor = None;
            record.attempts = 0;
        });
        if updated.is_some() {
            self.metrics.transfer_completed();
            info!(transfer_id = %transfer_id, "Transfer completed");
        }
        Ok(())
    }

    /// Current record.
    pub fn status(&self, transfer_id: &TransferId) -> Result<TransferRecord> {
        self.store
            .get(transfer_id)
            .ok_or_else(|| SagaError::TransferNotFound(transfer_id.clone()))
    }

    /// Re-drive every stored transfer that still has a step in flight.
    ///
    /// A transfer parked before its deposit step gets a fresh round of the
    /// cancel step, since no completion signal can reach it. Transfers parked
    /// after the deposit stay parked awaiting completion. Returns the number
    /// of transfers resumed.
    pub fn recover(self: &Arc<Self>) -> usize {
        let mut resumed = 0;
        for record in self.store.active() {
            self.metrics.transfer_recovered();
            let step = match record.next_step() {
                Some(step) => step,
                None if record.status == TransferStatus::DepositRequested => continue,
                None => {
                    let parked = self.store.update_active(&record.transfer_id, |r| {
                        r.cursor = Some(TransferStep::Cancel);
                        r.attempts = 0;
                    });
                    if parked.is_none() {
                        continue;
                    }
                    TransferStep::Cancel
                }
            };
            info!(
                transfer_id = %record.transfer_id,
                step = %step,
                attempts = record.attempts,
                "Resuming transfer"
            );
            self.spawn_driver(record.transfer_id);
            resumed += 1;
        }
        resumed
    }

    /// Transfers awaiting the completion signal.
    pub fn awaiting_completion(&self) -> Vec<TransferRecord> {
        self.store
            .active()
            .into_iter()
            .filter(|record| record.cursor.is_none())
            .collect()
    }

    /// Drivers currently running.
    pub fn running(&self) -> usize {
        self.running.load(Ordering::SeqCst)
    }

    /// Stop driving. Drivers exit after their current attempt.
    pub fn halt(&self) {
        self.halted.store(true, Ordering::SeqCst);
    }

    fn spawn_driver(self: &Arc<Self>, transfer_id: TransferId) {
        self.running.fetch_add(1, Ordering::SeqCst);
        let workflow = self.clone();
        tokio::spawn(async move {
            workflow.drive(&transfer_id).await;
            workflow.running.fetch_sub(1, Ordering::SeqCst);
        });
    }

    async fn drive(&self, transfer_id: &TransferId) {
        let driver = self
            .drivers
            .entry(transfer_id.clone())
            .or_default()
            .value()
            .clone();
        let _guard = driver.lock().await;

        loop {
            if self.halted.load(Ordering::SeqCst) {
                return;
            }
            let Some(record) = self.store.get(transfer_id) else {
                return;
            };
            let Some(step) = record.next_step() else {
                return;
            };

            match self.steps.execute(step, transfer_id, &record.transfer).await {
                Ok(()) => self.advance(transfer_id, step),
                Err(e) => {
                    if !self.retry_or_exhaust(&record, step, &e) {
                        return;
                    }
                    tokio::time::sleep(self.config.retry_backoff).await;
                }
            }
        }
    }

    fn advance(&self, transfer_id: &TransferId, step: TransferStep) {
        let (status, next) = step.on_success();
        let updated = self.store.update_active(transfer_id, |record| {
            record.status = status;
            record.cursor = next;
            record.attempts = 0;
        });

        match updated {
            Some(_) => {
                info!(transfer_id = %transfer_id, step = %step, status = ?status, "Transfer step succeeded");
                if status == TransferStatus::Cancelled {
                    self.metrics.transfer_cancelled();
                }
            }
            None => info!(
                transfer_id = %transfer_id,
                step = %step,
                "Transfer already terminal, step result discarded"
            ),
        }
    }

    /// Record a failed attempt. Returns false when the driver should stop.
    fn retry_or_exhaust(&self, record: &TransferRecord, step: TransferStep, e: &SagaError) -> bool {
        let transfer_id = &record.transfer_id;
        let attempts = record.attempts + 1;
        let policy = self.config.policy(step);
        self.metrics.step_retry();

        if attempts < policy.max_attempts {
            warn!(
                transfer_id = %transfer_id,
                step = %step,
                attempt = attempts,
                max_attempts = policy.max_attempts,
                error = %e,
                "Transfer step failed, retrying"
            );
            return self
                .store
                .update_active(transfer_id, |r| r.attempts = attempts)
                .is_some();
        }

        self.metrics.step_exhausted();
        match policy.on_exhaustion {
            Exhaustion::Failover(next) => {
                warn!(
                    transfer_id = %transfer_id,
                    step = %step,
                    failover = %next,
                    error = %e,
                    "Transfer step exhausted, failing over"
                );
                self.store
                    .update_active(transfer_id, |r| {
                        r.cursor = Some(next);
                        r.attempts = 0;
                    })
                    .is_some()
            }
            Exhaustion::Terminal => {
                error!(
                    transfer_id = %transfer_id,
                    step = %step,
                    status = ?record.status,
                    error = %e,
                    "Transfer step exhausted, awaiting completion signal"
                );
                self.store.update_active(transfer_id, |r| {
                    r.cursor = None;
                    r.attempts = attempts;
                });
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StepPolicy;
    use crate::metrics::Metrics;
    use parking_lot::Mutex as SyncMutex;
    use std::time::Duration;

    /// Records calls and fails the configured steps.
    struct ScriptedSteps {
        fail: Vec<TransferStep>,
        calls: SyncMutex<Vec<TransferStep>>,
    }

    impl ScriptedSteps {
        fn failing(fail: Vec<TransferStep>) -> Arc<Self> {
            Arc::new(Self {
                fail,
                calls: SyncMutex::new(Vec::new()),
            })
        }

        fn count(&self, step: TransferStep) -> usize {
            self.calls.lock().iter().filter(|s| **s == step).count()
        }
    }

    #[async_trait]
    impl StepExecutor for ScriptedSteps {
        async fn execute(
            &self,
            step: TransferStep,
            _transfer_id: &TransferId,
            _transfer: &Transfer,
        ) -> Result<()> {
            self.calls.lock().push(step);
            if self.fail.contains(&step) {
                Err(SagaError::DeliveryFailed(format!("{step} unavailable")))
            } else {
                Ok(())
            }
        }
    }

    fn workflow(steps: Arc<ScriptedSteps>, config: WorkflowConfig) -> Arc<TransferWorkflow> {
        Arc::new(TransferWorkflow::new(
            config,
            Arc::new(WorkflowStore::new()),
            steps,
            Arc::new(Metrics::new()),
        ))
    }

    fn fast() -> WorkflowConfig {
        WorkflowConfig {
            retry_backoff: Duration::from_millis(1),
            ..Default::default()
        }
    }

    async fn settle(workflow: &TransferWorkflow) {
        for _ in 0..1000 {
            if workflow.running() == 0 {
                return;
            }
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
        panic!("workflow did not settle");
    }

    fn start(workflow: &Arc<TransferWorkflow>, id: &str, amount: i64) -> Result<()> {
        workflow.start(
            &TransferId::new(id),
            AccountId::new("a"),
            AccountId::new("b"),
            Decimal::from(amount),
        )
    }

    #[tokio::test]
    async fn test_steps_run_in_order() {
        let steps = ScriptedSteps::failing(vec![]);
        let workflow = workflow(steps.clone(), fast());

        start(&workflow, "t1", 50).unwrap();
        settle(&workflow).await;

        assert_eq!(
            *steps.calls.lock(),
            vec![
                TransferStep::CreateTransaction,
                TransferStep::Withdraw,
                TransferStep::Deposit
            ]
        );
        let record = workflow.status(&TransferId::new("t1")).unwrap();
        assert_eq!(record.status, TransferStatus::DepositRequested);
        assert_eq!(record.cursor, None);

        workflow.complete(&TransferId::new("t1")).unwrap();
        assert_eq!(
            workflow.status(&TransferId::new("t1")).unwrap().status,
            TransferStatus::Completed
        );
    }

    #[tokio::test]
    async fn test_start_validation() {
        let workflow = workflow(ScriptedSteps::failing(vec![]), fast());
        assert!(matches!(
            start(&workflow, "t1", 0),
            Err(SagaError::InvalidAmount { .. })
        ));
        start(&workflow, "t1", 5).unwrap();
        assert!(matches!(
            start(&workflow, "t1", 5),
            Err(SagaError::AlreadyStarted(_))
        ));
        assert!(matches!(
            workflow.status(&TransferId::new("missing")),
            Err(SagaError::TransferNotFound(_))
        ));
        settle(&workflow).await;
    }

    #[tokio::test]
    async fn test_exhausted_withdraw_fails_over_to_cancel() {
        let steps = ScriptedSteps::failing(vec![TransferStep::Withdraw]);
        let workflow = workflow(steps.clone(), fast());

        start(&workflow, "t1", 50).unwrap();
        settle(&workflow).await;

        assert_eq!(steps.count(TransferStep::Withdraw), 5);
        assert_eq!(steps.count(TransferStep::Cancel), 1);
        assert_eq!(steps.count(TransferStep::Deposit), 0);
        assert_eq!(
            workflow.status(&TransferId::new("t1")).unwrap().status,
            TransferStatus::Cancelled
        );
    }

    #[tokio::test]
    async fn test_terminal_policy_parks_transfer() {
        let steps = ScriptedSteps::failing(vec![TransferStep::Deposit, TransferStep::Cancel]);
        let config = WorkflowConfig {
            cancel: StepPolicy::terminal(2),
            ..fast()
        };
        let workflow = workflow(steps.clone(), config);

        start(&workflow, "t1", 50).unwrap();
        settle(&workflow).await;

        assert_eq!(steps.count(TransferStep::Cancel), 2);
        let record = workflow.status(&TransferId::new("t1")).unwrap();
        assert_eq!(record.status, TransferStatus::WithdrawRequested);
        assert_eq!(record.cursor, None);
        assert_eq!(workflow.awaiting_completion().len(), 1);

        workflow.complete(&TransferId::new("t1")).unwrap();
        assert_eq!(
            workflow.status(&TransferId::new("t1")).unwrap().status,
            TransferStatus::Completed
        );
    }

    #[tokio::test]
    async fn test_recover_resumes_parked_compensation() {
        let store = Arc::new(WorkflowStore::new());
        let metrics = Arc::new(Metrics::new());
        let config = WorkflowConfig {
            cancel: StepPolicy::terminal(2),
            ..fast()
        };

        let failing = ScriptedSteps::failing(vec![TransferStep::Withdraw, TransferStep::Cancel]);
        let first = Arc::new(TransferWorkflow::new(
            config.clone(),
            store.clone(),
            failing,
            metrics.clone(),
        ));
        start(&first, "parked", 50).unwrap();
        settle(&first).await;

        let healthy = ScriptedSteps::failing(vec![]);
        let done = Arc::new(TransferWorkflow::new(
            config.clone(),
            store.clone(),
            healthy.clone(),
            metrics.clone(),
        ));
        start(&done, "awaiting", 50).unwrap();
        settle(&done).await;
        assert_eq!(done.awaiting_completion().len(), 2);

        let second = Arc::new(TransferWorkflow::new(config, store, healthy.clone(), metrics));
        assert_eq!(second.recover(), 1);
        settle(&second).await;

        assert_eq!(healthy.count(TransferStep::Cancel), 1);
        assert_eq!(
            second.status(&TransferId::new("parked")).unwrap().status,
            TransferStatus::Cancelled
        );
        let awaiting = second.status(&TransferId::new("awaiting")).unwrap();
        assert_eq!(awaiting.status, TransferStatus::DepositRequested);
        assert_eq!(awaiting.cursor, None);
    }

    #[tokio::test]
    async fn test_complete_is_noop_when_terminal_or_unknown() {
        let steps = ScriptedSteps::failing(vec![TransferStep::Withdraw]);
        let workflow = workflow(steps, fast());
        start(&workflow, "t1", 50).unwrap();
        settle(&workflow).await;

        workflow.complete(&TransferId::new("t1")).unwrap();
        workflow.complete(&TransferId::new("unknown")).unwrap();
        assert_eq!(
            workflow.status(&TransferId::new("t1")).unwrap().status,
            TransferStatus::Cancelled
        );
    }
}
