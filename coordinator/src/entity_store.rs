//! Single-writer entity runtime.
//!
//! Each entity id gets one cell guarded by an async mutex: commands against the
//! same id are serialized, commands against different ids run concurrently. A
//! cell is hydrated from the journal on first use.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::Mutex;
use tracing::{debug, instrument};

use sagaledger_common::{apply_all, Aggregate, Result};

use crate::dispatcher::EventSink;
use crate::journal::EventJournal;

struct Cell<A> {
    hydrated: bool,
    version: u64,
    state: Option<A>,
}

impl<A> Default for Cell<A> {
    fn default() -> Self {
        Self {
            hydrated: false,
            version: 0,
            state: None,
        }
    }
}

/// Runtime for all instances of one aggregate type.
pub struct EntityStore<A: Aggregate> {
    journal: Arc<dyn EventJournal<A::Event>>,
    sink: Arc<dyn EventSink<A::Event>>,
    cells: DashMap<A::Id, Arc<Mutex<Cell<A>>>>,
}

impl<A: Aggregate> EntityStore<A> {
    /// Create a store over a journal, publishing committed events to `sink`.
    pub fn new(
        journal: Arc<dyn EventJournal<A::Event>>,
        sink: Arc<dyn EventSink<A::Event>>,
    ) -> Self {
        Self {
            journal,
            sink,
            cells: DashMap::new(),
        }
    }

    /// Run a command whose decision only produces events.
    pub async fn execute<F>(&self, id: &A::Id, decide: F) -> Result<Option<A>>
    where
        F: FnOnce(Option<&A>) -> Result<Vec<A::Event>> + Send,
    {
        let (state, ()) = self
            .execute_with(id, |state| decide(state).map(|events| (events, ())))
            .await?;
        Ok(state)
    }

    /// Run a command against the current state of `id`.
    ///
    /// The decision sees the state as of all previously committed commands on
    /// this id. Its events are appended as one unit, applied, then handed to
    /// the sink. A rejected decision leaves no trace.
    #[instrument(skip_all, fields(entity = A::KIND, id = %id))]
    pub async fn execute_with<F, T>(&self, id: &A::Id, decide: F) -> Result<(Option<A>, T)>
    where
        F: FnOnce(Option<&A>) -> Result<(Vec<A::Event>, T)> + Send,
        T: Send,
    {
        let cell = self.cell(id);
        let mut cell = cell.lock().await;
        self.hydrate(id, &mut cell).await?;

        let (events, output) = decide(cell.state.as_ref())?;
        if events.is_empty() {
            return Ok((cell.state.clone(), output));
        }

        let stream = A::stream_name(id);
        let version = self.journal.append(&stream, cell.version, &events).await?;
        let first_sequence = cell.version + 1;
        cell.version = version;
        apply_all(&mut cell.state, &events);

        for (offset, event) in events.iter().enumerate() {
            self.sink.publish(&stream, first_sequence + offset as u64, event);
        }

        debug!(stream = %stream, version, "Command committed");
        Ok((cell.state.clone(), output))
    }

    /// Read-only snapshot of `id`. `None` if it was never created.
    pub async fn state(&self, id: &A::Id) -> Result<Option<A>> {
        let cell = self.cell(id);
        let mut cell = cell.lock().await;
        self.hydrate(id, &mut cell).await?;
        Ok(cell.state.clone())
    }

    /// Hand every journaled event to the sink again.
    ///
    /// Used on recovery: deliveries queued before a restart are lost, and all
    /// reactions are idempotent.
    pub async fn republish(&self) -> Result<usize> {
        let mut count = 0;
        for stream in self.journal.streams().await? {
            if !stream.starts_with(&format!("{}-", A::KIND)) {
                continue;
            }
            for envelope in self.journal.load(&stream).await? {
                self.sink
                    .publish(&envelope.stream, envelope.sequence, &envelope.event);
                count += 1;
            }
        }
        Ok(count)
    }

    fn cell(&self, id: &A::Id) -> Arc<Mutex<Cell<A>>> {
        self.cells.entry(id.clone()).or_default().value().clone()
    }

    async fn hydrate(&self, id: &A::Id, cell: &mut Cell<A>) -> Result<()> {
        if cell.hydrated {
            return Ok(());
        }
        let history = self.journal.load(&A::stream_name(id)).await?;
        cell.version = history.len() as u64;
        cell.state = A::replay(history.iter().map(|envelope| &envelope.event));
        cell.hydrated = true;
        debug!(entity = A::KIND, id = %id, version = cell.version, "Entity hydrated");
        Ok(())
    }
}
