//! Durable cursor store for transfer sequencers.

use chrono::Utc;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use sagaledger_common::{Result, SagaError, TransferId};

use crate::transfer_workflow::TransferRecord;

/// Sequencer records by transfer id.
///
/// Shared between coordinator instances so a restarted coordinator picks up
/// where the previous one stopped.
#[derive(Default)]
pub struct WorkflowStore {
    records: DashMap<TransferId, TransferRecord>,
}

impl WorkflowStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a record for a transfer id that has no state yet.
    pub fn insert_new(&self, record: TransferRecord) -> Result<()> {
        match self.records.entry(record.transfer_id.clone()) {
            Entry::Occupied(entry) => Err(SagaError::AlreadyStarted(entry.key().clone())),
            Entry::Vacant(entry) => {
                entry.insert(record);
                Ok(())
            }
        }
    }

    /// Current record.
    pub fn get(&self, transfer_id: &TransferId) -> Option<TransferRecord> {
        self.records.get(transfer_id).map(|r| r.value().clone())
    }

    /// Mutate a record unless it is already terminal.
    ///
    /// Returns the updated record, or `None` if the record is missing or
    /// terminal and nothing changed.
    pub fn update_active(
        &self,
        transfer_id: &TransferId,
        update: impl FnOnce(&mut TransferRecord),
    ) -> Option<TransferRecord> {
        let mut record = self.records.get_mut(transfer_id)?;
        if record.status.is_terminal() {
            return None;
        }
        update(record.value_mut());
        record.updated_at = Utc::now();
        Some(record.value().clone())
    }

    /// Every record that has not reached a terminal status.
    pub fn active(&self) -> Vec<TransferRecord> {
        let mut records: Vec<TransferRecord> = self
            .records
            .iter()
            .filter(|r| !r.status.is_terminal())
            .map(|r| r.value().clone())
            .collect();
        records.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        records
    }

    /// Number of records.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}
