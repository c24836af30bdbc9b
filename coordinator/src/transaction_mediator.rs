//! Transaction mediator.
//!
//! Tracks the join and execute phases of an N-party transaction:
//!
//! ```text
//! Waiting --(all join)--> Initiated --(all execute)--> Completed
//! Waiting --(cancel)--> Cancelled
//! ```
//!
//! The last join and the last execute each emit two events, so listeners that
//! only care about phase transitions never recount participants.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use sagaledger_common::{Aggregate, ParticipantId, Result, SagaError, TransactionId};

use crate::dispatcher::EventSink;
use crate::entity_store::EntityStore;
use crate::journal::EventJournal;
use crate::participants::ParticipantKind;

/// Mediator status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MediatorStatus {
    /// Waiting for participants to join.
    #[default]
    Waiting,
    /// Every participant joined; executions under way.
    Initiated,
    /// Cancelled before initiation. Terminal.
    Cancelled,
    /// Every participant executed. Terminal.
    Completed,
}

impl MediatorStatus {
    /// Check if this is a terminal status.
    pub fn is_terminal(&self) -> bool {
        matches!(self, MediatorStatus::Cancelled | MediatorStatus::Completed)
    }
}

/// A participant as named at creation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ParticipantRef {
    /// Participant identifier.
    pub id: ParticipantId,
    /// Kind, used to pick the adapter.
    pub kind: ParticipantKind,
}

impl ParticipantRef {
    /// A ledger account participant.
    pub fn ledger(id: impl Into<ParticipantId>) -> Self {
        Self {
            id: id.into(),
            kind: ParticipantKind::Ledger,
        }
    }
}

/// Per-participant progress.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Participant {
    /// Participant identifier.
    pub id: ParticipantId,
    /// Kind, used to pick the adapter.
    pub kind: ParticipantKind,
    /// Reserved its side of the transaction.
    pub joined: bool,
    /// Applied its side after initiation.
    pub executed: bool,
}

/// Events emitted by a mediator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MediatorEvent {
    /// Transaction opened with a fixed participant set.
    Created {
        transaction_id: TransactionId,
        participants: Vec<ParticipantRef>,
    },
    /// One participant joined.
    ParticipantJoined {
        transaction_id: TransactionId,
        participant: ParticipantId,
    },
    /// Every participant joined; participants may now execute.
    Initialized {
        transaction_id: TransactionId,
        participants: Vec<ParticipantRef>,
    },
    /// One participant executed.
    ParticipantExecuted {
        transaction_id: TransactionId,
        participant: ParticipantId,
    },
    /// Every participant executed.
    Completed {
        transaction_id: TransactionId,
        participants: Vec<ParticipantRef>,
    },
    /// Cancelled before initiation; participants release their side.
    Cancelled {
        transaction_id: TransactionId,
        participants: Vec<ParticipantRef>,
    },
}

impl MediatorEvent {
    /// Transaction the event belongs to.
    pub fn transaction_id(&self) -> &TransactionId {
        match self {
            MediatorEvent::Created { transaction_id, .. }
            | MediatorEvent::ParticipantJoined { transaction_id, .. }
            | MediatorEvent::Initialized { transaction_id, .. }
            | MediatorEvent::ParticipantExecuted { transaction_id, .. }
            | MediatorEvent::Completed { transaction_id, .. }
            | MediatorEvent::Cancelled { transaction_id, .. } => transaction_id,
        }
    }

    /// Short event name for logs and metrics.
    pub fn name(&self) -> &'static str {
        match self {
            MediatorEvent::Created { .. } => "Created",
            MediatorEvent::ParticipantJoined { .. } => "ParticipantJoined",
            MediatorEvent::Initialized { .. } => "Initialized",
            MediatorEvent::ParticipantExecuted { .. } => "ParticipantExecuted",
            MediatorEvent::Completed { .. } => "Completed",
            MediatorEvent::Cancelled { .. } => "Cancelled",
        }
    }
}

/// State of one transaction. The participant set is fixed at creation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MediatorState {
    /// Progress keyed by participant.
    pub participants: BTreeMap<ParticipantId, Participant>,
    /// Current phase.
    pub status: MediatorStatus,
}

impl MediatorState {
    /// Whether every participant has joined.
    pub fn all_joined(&self) -> bool {
        self.participants.values().all(|p| p.joined)
    }

    fn remaining(&self, pending: impl Fn(&Participant) -> bool) -> usize {
        self.participants.values().filter(|p| pending(p)).count()
    }

    fn refs(&self) -> Vec<ParticipantRef> {
        self.participants
            .values()
            .map(|p| ParticipantRef {
                id: p.id.clone(),
                kind: p.kind,
            })
            .collect()
    }
}

impl Aggregate for MediatorState {
    type Id = TransactionId;
    type Event = MediatorEvent;
    const KIND: &'static str = "transaction";

    fn apply(&mut self, event: &MediatorEvent) {
        match event {
            MediatorEvent::Created { participants, .. } => {
                self.participants = participants
                    .iter()
                    .map(|p| {
                        let participant = Participant {
                            id: p.id.clone(),
                            kind: p.kind,
                            joined: false,
                            executed: false,
                        };
                        (p.id.clone(), participant)
                    })
                    .collect();
                self.status = MediatorStatus::Waiting;
            }
            MediatorEvent::ParticipantJoined { participant, .. } => {
                if let Some(p) = self.participants.get_mut(participant) {
                    p.joined = true;
                }
            }
            MediatorEvent::Initialized { .. } => self.status = MediatorStatus::Initiated,
            MediatorEvent::ParticipantExecuted { participant, .. } => {
                if let Some(p) = self.participants.get_mut(participant) {
                    p.executed = true;
                }
            }
            MediatorEvent::Completed { .. } => self.status = MediatorStatus::Completed,
            MediatorEvent::Cancelled { .. } => self.status = MediatorStatus::Cancelled,
        }
    }
}

/// Read-only projection of a transaction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionStatus {
    pub transaction_id: TransactionId,
    pub status: MediatorStatus,
    pub participants: Vec<Participant>,
}

impl TransactionStatus {
    fn of(transaction_id: &TransactionId, state: &MediatorState) -> Self {
        Self {
            transaction_id: transaction_id.clone(),
            status: state.status,
            participants: state.participants.values().cloned().collect(),
        }
    }
}

/// Result of a join notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JoinOutcome {
    /// Joined; others are still outstanding.
    Joined,
    /// Joined as the last participant; the transaction is initiated.
    Initialized,
    /// Nothing to do: unknown transaction or participant, or already joined.
    Ignored,
    /// The transaction was cancelled. The joiner must release its side.
    Cancelled,
}

fn decide_create(
    transaction_id: &TransactionId,
    state: Option<&MediatorState>,
    participants: &[ParticipantRef],
) -> Result<Vec<MediatorEvent>> {
    match state {
        None => {
            if participants.is_empty() {
                return Err(SagaError::InvalidParticipants(
                    "at least one participant is required".to_string(),
                ));
            }
            let mut seen = std::collections::BTreeSet::new();
            if let Some(duplicate) = participants.iter().find(|p| !seen.insert(&p.id)) {
                return Err(SagaError::InvalidParticipants(format!(
                    "participant {} listed twice",
                    duplicate.id
                )));
            }
            Ok(vec![MediatorEvent::Created {
                transaction_id: transaction_id.clone(),
                participants: participants.to_vec(),
            }])
        }
        Some(state) if state.status == MediatorStatus::Cancelled => {
            Err(SagaError::AlreadyCancelled(transaction_id.clone()))
        }
        Some(state) if state.all_joined() => Err(SagaError::InProgress(transaction_id.clone())),
        Some(_) => Ok(Vec::new()),
    }
}

fn decide_join(
    transaction_id: &TransactionId,
    state: Option<&MediatorState>,
    participant: &ParticipantId,
) -> (Vec<MediatorEvent>, JoinOutcome) {
    let Some(state) = state else {
        return (Vec::new(), JoinOutcome::Ignored);
    };
    let Some(current) = state.participants.get(participant) else {
        return (Vec::new(), JoinOutcome::Ignored);
    };
    if state.status == MediatorStatus::Cancelled {
        return (Vec::new(), JoinOutcome::Cancelled);
    }
    if current.joined {
        return (Vec::new(), JoinOutcome::Ignored);
    }

    let mut events = vec![MediatorEvent::ParticipantJoined {
        transaction_id: transaction_id.clone(),
        participant: participant.clone(),
    }];
    if state.remaining(|p| !p.joined) == 1 {
        events.push(MediatorEvent::Initialized {
            transaction_id: transaction_id.clone(),
            participants: state.refs(),
        });
        (events, JoinOutcome::Initialized)
    } else {
        (events, JoinOutcome::Joined)
    }
}

fn decide_executed(
    transaction_id: &TransactionId,
    state: Option<&MediatorState>,
    participant: &ParticipantId,
) -> Vec<MediatorEvent> {
    let Some(state) = state else {
        return Vec::new();
    };
    if state.status == MediatorStatus::Cancelled {
        return Vec::new();
    }
    match state.participants.get(participant) {
        Some(current) if !current.executed => {}
        _ => return Vec::new(),
    }

    let mut events = vec![MediatorEvent::ParticipantExecuted {
        transaction_id: transaction_id.clone(),
        participant: participant.clone(),
    }];
    if state.remaining(|p| !p.executed) == 1 {
        events.push(MediatorEvent::Completed {
            transaction_id: transaction_id.clone(),
            participants: state.refs(),
        });
    }
    events
}

fn decide_cancel(
    transaction_id: &TransactionId,
    state: Option<&MediatorState>,
) -> Result<Vec<MediatorEvent>> {
    let state = state.ok_or_else(|| SagaError::TransactionNotFound(transaction_id.clone()))?;
    if state.status == MediatorStatus::Cancelled {
        return Ok(Vec::new());
    }
    if state.all_joined() {
        return Err(SagaError::AlreadyInProgress(transaction_id.clone()));
    }
    Ok(vec![MediatorEvent::Cancelled {
        transaction_id: transaction_id.clone(),
        participants: state.refs(),
    }])
}

/// Command surface of all mediator instances.
pub struct TransactionMediator {
    store: EntityStore<MediatorState>,
}

impl TransactionMediator {
    /// Create a mediator runtime.
    pub fn new(
        journal: Arc<dyn EventJournal<MediatorEvent>>,
        sink: Arc<dyn EventSink<MediatorEvent>>,
    ) -> Self {
        Self {
            store: EntityStore::new(journal, sink),
        }
    }

    /// Create a transaction, or return its status if creation already happened.
    #[instrument(skip_all, fields(transaction_id = %transaction_id))]
    pub async fn create(
        &self,
        transaction_id: &TransactionId,
        participants: Vec<ParticipantRef>,
    ) -> Result<TransactionStatus> {
        let state = self
            .store
            .execute(transaction_id, |state| {
                decide_create(transaction_id, state, &participants)
            })
            .await?;
        let state = state.ok_or_else(|| {
            SagaError::InternalError(format!("transaction {transaction_id} missing after create"))
        })?;
        info!(
            transaction_id = %transaction_id,
            participants = state.participants.len(),
            status = ?state.status,
            "Transaction created"
        );
        Ok(TransactionStatus::of(transaction_id, &state))
    }

    /// Record that a participant has registered its pending side.
    pub async fn join(
        &self,
        transaction_id: &TransactionId,
        participant: &ParticipantId,
    ) -> Result<JoinOutcome> {
        let (_, outcome) = self
            .store
            .execute_with(transaction_id, |state| {
                Ok(decide_join(transaction_id, state, participant))
            })
            .await?;

        match outcome {
            JoinOutcome::Initialized => {
                info!(transaction_id = %transaction_id, participant = %participant, "Transaction initiated")
            }
            JoinOutcome::Cancelled => {
                warn!(transaction_id = %transaction_id, participant = %participant, "Join after cancellation")
            }
            JoinOutcome::Joined | JoinOutcome::Ignored => {
                debug!(transaction_id = %transaction_id, participant = %participant, outcome = ?outcome, "Join handled")
            }
        }
        Ok(outcome)
    }

    /// Record that a participant has executed its side.
    pub async fn executed(
        &self,
        transaction_id: &TransactionId,
        participant: &ParticipantId,
    ) -> Result<()> {
        let state = self
            .store
            .execute(transaction_id, |state| {
                Ok(decide_executed(transaction_id, state, participant))
            })
            .await?;
        debug!(
            transaction_id = %transaction_id,
            participant = %participant,
            status = ?state.map(|s| s.status),
            "Execution handled"
        );
        Ok(())
    }

    /// Cancel a transaction that has not been initiated.
    #[instrument(skip_all, fields(transaction_id = %transaction_id))]
    pub async fn cancel(&self, transaction_id: &TransactionId) -> Result<()> {
        self.store
            .execute(transaction_id, |state| decide_cancel(transaction_id, state))
            .await?;
        info!(transaction_id = %transaction_id, "Transaction cancelled");
        Ok(())
    }

    /// Read-only status.
    pub async fn status(&self, transaction_id: &TransactionId) -> Result<TransactionStatus> {
        self.store
            .state(transaction_id)
            .await?
            .map(|state| TransactionStatus::of(transaction_id, &state))
            .ok_or_else(|| SagaError::TransactionNotFound(transaction_id.clone()))
    }

    /// Hand every journaled mediator event to the dispatcher again.
    pub async fn republish(&self) -> Result<usize> {
        self.store.republish().await
    }
}
