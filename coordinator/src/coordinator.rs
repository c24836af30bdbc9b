//! Core coordinator implementation.
//!
//! Wires the ledgers, the mediator and the transfer sequencer to one
//! dispatcher and exposes the command surface. Commands that change state are
//! only accepted while running.

use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use rust_decimal::Decimal;
use tokio::sync::mpsc;
use tokio::time::{timeout, Duration};
use tracing::{debug, info, instrument, warn};

use sagaledger_common::{
    AccountId, ParticipantId, Result, SagaError, TransactionId, TransferId,
};
use sagaledger_ledger::{LedgerEvent, LedgerStatus};

use crate::config::CoordinatorConfig;
use crate::dispatcher::{self, Dispatcher, DispatcherHandle};
use crate::journal::{EventJournal, InMemoryJournal};
use crate::ledgers::Ledgers;
use crate::listeners::{LedgerListener, MediatorListener, TransferListener};
use crate::metrics::{Metrics, MetricsSnapshot, SharedMetrics};
use crate::participants::AdapterTable;
use crate::state::CoordinatorState;
use crate::transaction_mediator::{
    JoinOutcome, MediatorEvent, ParticipantRef, TransactionMediator, TransactionStatus,
};
use crate::transfer_workflow::{SagaSteps, StepExecutor, TransferRecord, TransferWorkflow};
use crate::wallet_service::WalletService;
use crate::workflow_store::WorkflowStore;

/// Durable state shared by successive coordinator instances.
#[derive(Clone)]
pub struct Storage {
    pub ledger_journal: Arc<dyn EventJournal<LedgerEvent>>,
    pub mediator_journal: Arc<dyn EventJournal<MediatorEvent>>,
    pub workflows: Arc<WorkflowStore>,
}

impl Storage {
    /// Fresh in-memory storage.
    pub fn in_memory() -> Self {
        Self {
            ledger_journal: Arc::new(InMemoryJournal::new()),
            mediator_journal: Arc::new(InMemoryJournal::new()),
            workflows: Arc::new(WorkflowStore::new()),
        }
    }
}

/// What [`Coordinator::recover`] found.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RecoveryReport {
    /// Journaled events handed to the dispatcher again.
    pub events_republished: usize,
    /// Transfers whose driver was restarted.
    pub transfers_resumed: usize,
}

/// The coordinator.
pub struct Coordinator {
    /// Configuration.
    config: CoordinatorConfig,
    /// Node ID for this coordinator instance.
    node_id: String,
    /// Current coordinator state.
    state: Arc<RwLock<CoordinatorState>>,
    ledgers: Arc<Ledgers>,
    mediator: Arc<TransactionMediator>,
    workflow: Arc<TransferWorkflow>,
    wallets: WalletService,
    events: DispatcherHandle,
    /// Dispatcher until `start` spawns it.
    dispatcher: Mutex<Option<Dispatcher>>,
    metrics: SharedMetrics,
    /// Shutdown signal sender.
    shutdown_tx: mpsc::Sender<()>,
    /// Shutdown signal receiver, handed to the dispatcher.
    shutdown_rx: Mutex<Option<mpsc::Receiver<()>>>,
}

impl Coordinator {
    /// Create a coordinator over fresh in-memory storage.
    pub fn new(config: CoordinatorConfig, node_id: String) -> Self {
        Self::with_storage(config, node_id, Storage::in_memory())
    }

    /// Create a coordinator over existing storage.
    pub fn with_storage(config: CoordinatorConfig, node_id: String, storage: Storage) -> Self {
        Self::with_step_layer(config, node_id, storage, |steps| steps)
    }

    /// Create a coordinator whose sequencer steps are wrapped by `layer`.
    pub fn with_step_layer<F>(
        config: CoordinatorConfig,
        node_id: String,
        storage: Storage,
        layer: F,
    ) -> Self
    where
        F: FnOnce(Arc<dyn StepExecutor>) -> Arc<dyn StepExecutor>,
    {
        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);
        let metrics: SharedMetrics = Arc::new(Metrics::new());

        let (events, mut dispatcher) = dispatcher::channel(config.dispatcher.clone(), metrics.clone());
        let sink = Arc::new(events.clone());

        let ledgers = Arc::new(Ledgers::new(storage.ledger_journal.clone(), sink.clone()));
        let mediator = Arc::new(TransactionMediator::new(
            storage.mediator_journal.clone(),
            sink,
        ));
        let steps: Arc<dyn StepExecutor> =
            Arc::new(SagaSteps::new(mediator.clone(), ledgers.clone()));
        let steps = layer(steps);
        let workflow = Arc::new(TransferWorkflow::new(
            config.workflow.clone(),
            storage.workflows.clone(),
            steps,
            metrics.clone(),
        ));

        dispatcher.register(Arc::new(LedgerListener::new(
            mediator.clone(),
            ledgers.clone(),
        )));
        dispatcher.register(Arc::new(MediatorListener::new(AdapterTable::new(
            ledgers.clone(),
        ))));
        dispatcher.register(Arc::new(TransferListener::new(workflow.clone())));

        Self {
            config,
            node_id,
            state: Arc::new(RwLock::new(CoordinatorState::Starting)),
            wallets: WalletService::new(ledgers.clone(), mediator.clone()),
            ledgers,
            mediator,
            workflow,
            events,
            dispatcher: Mutex::new(Some(dispatcher)),
            metrics,
            shutdown_tx,
            shutdown_rx: Mutex::new(Some(shutdown_rx)),
        }
    }

    /// Start the coordinator: spawn the dispatcher, recover, then accept commands.
    #[instrument(skip(self))]
    pub async fn start(&self) -> Result<()> {
        info!(node_id = %self.node_id, "Starting coordinator");

        let dispatcher = self.dispatcher.lock().take();
        let shutdown_rx = self.shutdown_rx.lock().take();
        let (Some(dispatcher), Some(shutdown_rx)) = (dispatcher, shutdown_rx) else {
            return Err(SagaError::InternalError(
                "coordinator already started".to_string(),
            ));
        };
        tokio::spawn(dispatcher.run(shutdown_rx));

        *self.state.write() = CoordinatorState::Recovering;
        let report = self.recover().await?;
        *self.state.write() = CoordinatorState::Running;

        info!(
            node_id = %self.node_id,
            events_republished = report.events_republished,
            transfers_resumed = report.transfers_resumed,
            "Coordinator started successfully"
        );
        Ok(())
    }

    /// Stop the coordinator gracefully.
    #[instrument(skip(self))]
    pub async fn stop(&self) -> Result<()> {
        info!(node_id = %self.node_id, "Stopping coordinator");

        *self.state.write() = CoordinatorState::ShuttingDown;

        if !self.drain().await {
            warn!(
                in_flight = self.events.in_flight(),
                running = self.workflow.running(),
                "Drain timed out, stopping with work in flight"
            );
        }

        self.workflow.halt();
        let _ = self.shutdown_tx.send(()).await;

        *self.state.write() = CoordinatorState::Stopped;

        info!(node_id = %self.node_id, "Coordinator stopped");
        Ok(())
    }

    /// Re-deliver journaled events and resume unfinished transfers.
    ///
    /// Deliveries that were queued when the previous instance stopped are gone;
    /// every reaction is idempotent, so the whole history is delivered again.
    pub async fn recover(&self) -> Result<RecoveryReport> {
        let events_republished =
            self.ledgers.republish().await? + self.mediator.republish().await?;
        let transfers_resumed = self.workflow.recover();

        if events_republished > 0 || transfers_resumed > 0 {
            info!(events_republished, transfers_resumed, "Recovery complete");
        }
        Ok(RecoveryReport {
            events_republished,
            transfers_resumed,
        })
    }

    /// Wait until no delivery and no sequencer step is in flight.
    ///
    /// Returns false if the drain timeout expired first.
    pub async fn drain(&self) -> bool {
        timeout(self.config.drain_timeout, async {
            loop {
                let in_flight = self.events.in_flight();
                let running = self.workflow.running();
                if in_flight == 0 && running == 0 {
                    break;
                }
                debug!(in_flight, running, "Waiting for in-flight work");
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .is_ok()
    }

    // --- Ledger ---

    /// Open a ledger account.
    pub async fn create_account(&self, account: &AccountId) -> Result<LedgerStatus> {
        self.ensure_accepting()?;
        self.track(self.wallets.create_wallet(account).await)
    }

    /// Register a pending deposit on a ledger.
    pub async fn deposit(
        &self,
        account: &AccountId,
        amount: Decimal,
        transaction_id: &TransactionId,
    ) -> Result<LedgerStatus> {
        self.ensure_accepting()?;
        self.track(self.ledgers.deposit(account, amount, transaction_id).await)
    }

    /// Register a pending withdraw on a ledger.
    pub async fn withdraw(
        &self,
        account: &AccountId,
        amount: Decimal,
        transaction_id: &TransactionId,
    ) -> Result<LedgerStatus> {
        self.ensure_accepting()?;
        self.track(self.ledgers.withdraw(account, amount, transaction_id).await)
    }

    /// Execute a pending ledger operation.
    pub async fn execute(&self, account: &AccountId, transaction_id: &TransactionId) -> Result<()> {
        self.ensure_accepting()?;
        self.track(self.ledgers.execute(account, transaction_id).await)
    }

    /// Cancel a pending ledger operation.
    pub async fn cancel(&self, account: &AccountId, transaction_id: &TransactionId) -> Result<()> {
        self.ensure_accepting()?;
        self.track(self.ledgers.cancel(account, transaction_id).await)
    }

    /// Acknowledge completion on a ledger.
    pub async fn complete(&self, account: &AccountId, transaction_id: &TransactionId) -> Result<()> {
        self.ensure_accepting()?;
        self.track(self.ledgers.complete(account, transaction_id).await)
    }

    /// Ledger status.
    pub async fn account_status(&self, account: &AccountId) -> Result<LedgerStatus> {
        self.ledgers.status(account).await
    }

    // --- Mediator ---

    /// Create a mediator transaction.
    pub async fn create_transaction(
        &self,
        transaction_id: &TransactionId,
        participants: Vec<ParticipantRef>,
    ) -> Result<TransactionStatus> {
        self.ensure_accepting()?;
        self.track(self.mediator.create(transaction_id, participants).await)
    }

    /// Report a participant join.
    pub async fn join(
        &self,
        transaction_id: &TransactionId,
        participant: &ParticipantId,
    ) -> Result<JoinOutcome> {
        self.ensure_accepting()?;
        self.track(self.mediator.join(transaction_id, participant).await)
    }

    /// Report a participant execution.
    pub async fn executed(
        &self,
        transaction_id: &TransactionId,
        participant: &ParticipantId,
    ) -> Result<()> {
        self.ensure_accepting()?;
        self.track(self.mediator.executed(transaction_id, participant).await)
    }

    /// Cancel a mediator transaction.
    pub async fn cancel_transaction(&self, transaction_id: &TransactionId) -> Result<()> {
        self.ensure_accepting()?;
        self.track(self.mediator.cancel(transaction_id).await)
    }

    /// Mediator status.
    pub async fn transaction_status(&self, transaction_id: &TransactionId) -> Result<TransactionStatus> {
        self.mediator.status(transaction_id).await
    }

    // --- Sequencer ---

    /// Start a sequenced transfer.
    #[instrument(skip(self, from, to))]
    pub fn start_transfer(
        &self,
        transfer_id: &TransferId,
        from: AccountId,
        to: AccountId,
        amount: Decimal,
    ) -> Result<()> {
        self.ensure_accepting()?;
        self.track(self.workflow.start(transfer_id, from, to, amount))
    }

    /// External completion signal for a transfer.
    pub fn complete_transfer(&self, transfer_id: &TransferId) -> Result<()> {
        self.ensure_accepting()?;
        self.track(self.workflow.complete(transfer_id))
    }

    /// Sequencer status.
    pub fn transfer_status(&self, transfer_id: &TransferId) -> Result<TransferRecord> {
        self.workflow.status(transfer_id)
    }

    // --- Wallet ---

    /// Deposit into a wallet under a one-participant transaction.
    pub async fn wallet_deposit(
        &self,
        account: &AccountId,
        amount: Decimal,
        transaction_id: &TransactionId,
    ) -> Result<LedgerStatus> {
        self.ensure_accepting()?;
        self.track(self.wallets.deposit(account, amount, transaction_id).await)
    }

    /// Withdraw from a wallet under a one-participant transaction.
    pub async fn wallet_withdraw(
        &self,
        account: &AccountId,
        amount: Decimal,
        transaction_id: &TransactionId,
    ) -> Result<LedgerStatus> {
        self.ensure_accepting()?;
        self.track(self.wallets.withdraw(account, amount, transaction_id).await)
    }

    /// Transfer between wallets without a sequencer.
    pub async fn direct_transfer(
        &self,
        transaction_id: &TransactionId,
        from: &AccountId,
        to: &AccountId,
        amount: Decimal,
    ) -> Result<TransactionStatus> {
        self.ensure_accepting()?;
        self.track(self.wallets.transfer(transaction_id, from, to, amount).await)
    }

    // --- Operational ---

    /// Check if the coordinator is accepting requests.
    pub fn is_accepting_requests(&self) -> bool {
        self.state.read().accepts_requests()
    }

    /// Get the current coordinator state.
    pub fn state(&self) -> CoordinatorState {
        *self.state.read()
    }

    /// Node ID.
    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    /// Current metrics.
    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    // --- Private methods ---

    fn ensure_accepting(&self) -> Result<()> {
        if self.is_accepting_requests() {
            Ok(())
        } else {
            Err(SagaError::CoordinatorBusy {
                retry_after_ms: 1000,
            })
        }
    }

    fn track<T>(&self, result: Result<T>) -> Result<T> {
        if let Err(e) = &result {
            self.metrics.command_rejected();
            debug!(code = e.error_code(), error = %e, "Command rejected");
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_test_config() -> CoordinatorConfig {
        let mut config = CoordinatorConfig::default();
        config.drain_timeout = Duration::from_secs(5);
        config.workflow.retry_backoff = Duration::from_millis(1);
        config
    }

    #[tokio::test]
    async fn test_coordinator_creation() {
        let coordinator = Coordinator::new(create_test_config(), "test-node-1".to_string());

        assert_eq!(coordinator.state(), CoordinatorState::Starting);
        assert!(!coordinator.is_accepting_requests());
    }

    #[tokio::test]
    async fn test_coordinator_start_stop() {
        let coordinator = Coordinator::new(create_test_config(), "test-node-1".to_string());

        coordinator.start().await.unwrap();
        assert_eq!(coordinator.state(), CoordinatorState::Running);
        assert!(coordinator.start().await.is_err());

        coordinator.stop().await.unwrap();
        assert_eq!(coordinator.state(), CoordinatorState::Stopped);
    }

    #[tokio::test]
    async fn test_commands_rejected_until_running() {
        let coordinator = Coordinator::new(create_test_config(), "test-node-1".to_string());

        let result = coordinator.create_account(&AccountId::new("alice")).await;
        assert!(matches!(result, Err(SagaError::CoordinatorBusy { .. })));
    }

    #[tokio::test]
    async fn test_wallet_deposit_settles() {
        let coordinator = Coordinator::new(create_test_config(), "test-node-1".to_string());
        coordinator.start().await.unwrap();

        let alice = AccountId::new("alice");
        let tx = TransactionId::new("dep-1");
        coordinator
            .wallet_deposit(&alice, Decimal::from(25), &tx)
            .await
            .unwrap();
        assert!(coordinator.drain().await);

        let status = coordinator.account_status(&alice).await.unwrap();
        assert_eq!(status.balance, Decimal::from(25));
        assert!(status.pending_transactions.is_empty());

        let transaction = coordinator.transaction_status(&tx).await.unwrap();
        assert_eq!(
            transaction.status,
            crate::transaction_mediator::MediatorStatus::Completed
        );
    }
}
