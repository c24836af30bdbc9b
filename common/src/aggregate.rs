//! Event-sourced aggregate abstraction.
//!
//! Every entity in SagaLedger is a state machine whose state is the left fold
//! of its own event history. Command handlers never mutate state directly:
//! they decide which events to emit, and the same `apply` used at command time
//! is used to rebuild state from the journal.

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fmt;
use std::hash::Hash;

/// An independently persisted state machine rebuilt from its events.
pub trait Aggregate: Default + Clone + fmt::Debug + Send + Sync + 'static {
    /// Stable identifier of an instance.
    type Id: Clone + Eq + Hash + fmt::Display + fmt::Debug + Send + Sync + 'static;

    /// Events emitted by this aggregate.
    type Event: Clone + fmt::Debug + Serialize + DeserializeOwned + Send + Sync + 'static;

    /// Entity type name, used as the journal stream prefix.
    const KIND: &'static str;

    /// Apply a single event. Must be a pure function of `self` and `event`.
    fn apply(&mut self, event: &Self::Event);

    /// Journal stream name for an instance.
    fn stream_name(id: &Self::Id) -> String {
        format!("{}-{}", Self::KIND, id)
    }

    /// Fold a full history from empty state.
    ///
    /// Returns `None` for an empty history: the entity was never created.
    fn replay<'a, I>(events: I) -> Option<Self>
    where
        I: IntoIterator<Item = &'a Self::Event>,
        Self::Event: 'a,
    {
        let mut state: Option<Self> = None;
        for event in events {
            state.get_or_insert_with(Self::default).apply(event);
        }
        state
    }
}

/// Apply a batch of events emitted by one command.
pub fn apply_all<A: Aggregate>(state: &mut Option<A>, events: &[A::Event]) {
    for event in events {
        state.get_or_insert_with(A::default).apply(event);
    }
}
