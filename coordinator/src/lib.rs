//! SagaLedger Coordinator
//!
//! Hosts the event-sourced ledgers, the transaction mediator and the transfer
//! sequencer, and wires them together through an at-least-once dispatcher.
//! Funds move between ledgers only after every participant has joined and
//! executed its side of a transaction.

pub mod commands;
pub mod config;
pub mod coordinator;
pub mod dispatcher;
pub mod entity_store;
pub mod journal;
pub mod ledgers;
pub mod listeners;
pub mod metrics;
pub mod participants;
pub mod state;
pub mod transaction_mediator;
pub mod transfer_workflow;
pub mod wallet_service;
pub mod workflow_store;

pub use config::CoordinatorConfig;
pub use coordinator::{Coordinator, RecoveryReport, Storage};
pub use metrics::MetricsSnapshot;
pub use state::CoordinatorState;
pub use transaction_mediator::{JoinOutcome, MediatorStatus, ParticipantRef, TransactionStatus};
pub use transfer_workflow::{StepExecutor, Transfer, TransferRecord, TransferStatus, TransferStep};
