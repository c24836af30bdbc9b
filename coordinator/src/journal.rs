//! Append-only event journal.
//!
//! Every entity instance owns one stream. A command's events are appended as a
//! unit with an optimistic version check, so two writers racing on the same
//! stream cannot interleave.

use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::debug;

use sagaledger_common::{Result, SagaError};

/// A journaled event with its position.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope<E> {
    /// Stream the event belongs to.
    pub stream: String,
    /// 1-based position within the stream.
    pub sequence: u64,
    /// Position across all streams of this journal.
    pub global_position: u64,
    /// Append time.
    pub recorded_at: DateTime<Utc>,
    /// The event.
    pub event: E,
}

/// Durable per-entity event log.
#[async_trait]
pub trait EventJournal<E>: Send + Sync
where
    E: Clone + Send + Sync + 'static,
{
    /// Append events if the stream is at `expected_version`; returns the new version.
    async fn append(&self, stream: &str, expected_version: u64, events: &[E]) -> Result<u64>;

    /// Full history of a stream, in append order.
    async fn load(&self, stream: &str) -> Result<Vec<Envelope<E>>>;

    /// Names of all non-empty streams.
    async fn streams(&self) -> Result<Vec<String>>;
}

/// Journal held in memory. Survives coordinator restarts while the process lives.
pub struct InMemoryJournal<E> {
    streams: DashMap<String, Vec<Envelope<E>>>,
    position: AtomicU64,
}

impl<E> InMemoryJournal<E> {
    /// Create an empty journal.
    pub fn new() -> Self {
        Self {
            streams: DashMap::new(),
            position: AtomicU64::new(0),
        }
    }

    /// Total number of events across all streams.
    pub fn len(&self) -> usize {
        self.streams.iter().map(|s| s.value().len()).sum()
    }

    /// Whether nothing was ever appended.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<E> Default for InMemoryJournal<E> {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl<E> EventJournal<E> for InMemoryJournal<E>
where
    E: Clone + Send + Sync + 'static,
{
    async fn append(&self, stream: &str, expected_version: u64, events: &[E]) -> Result<u64> {
        let mut entries = self.streams.entry(stream.to_string()).or_default();
        let actual = entries.len() as u64;
        if actual != expected_version {
            return Err(SagaError::ConcurrencyConflict {
                stream: stream.to_string(),
                expected: expected_version,
                actual,
            });
        }

        let recorded_at = Utc::now();
        for (offset, event) in events.iter().enumerate() {
            entries.push(Envelope {
                stream: stream.to_string(),
                sequence: actual + offset as u64 + 1,
                global_position: self.position.fetch_add(1, Ordering::Relaxed) + 1,
                recorded_at,
                event: event.clone(),
            });
        }

        let version = entries.len() as u64;
        debug!(stream, version, appended = events.len(), "Events appended");
        Ok(version)
    }

    async fn load(&self, stream: &str) -> Result<Vec<Envelope<E>>> {
        Ok(self
            .streams
            .get(stream)
            .map(|entries| entries.clone())
            .unwrap_or_default())
    }

    async fn streams(&self) -> Result<Vec<String>> {
        let mut names: Vec<String> = self
            .streams
            .iter()
            .filter(|entry| !entry.value().is_empty())
            .map(|entry| entry.key().clone())
            .collect();
        names.sort();
        Ok(names)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_append_and_load() {
        let journal = InMemoryJournal::<String>::new();

        let version = journal
            .append("ledger-a", 0, &["one".to_string(), "two".to_string()])
            .await
            .unwrap();
        assert_eq!(version, 2);

        let history = journal.load("ledger-a").await.unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].sequence, 1);
        assert_eq!(history[1].event, "two");
        assert!(journal.load("ledger-b").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_version_conflict() {
        let journal = InMemoryJournal::<u32>::new();
        journal.append("s", 0, &[1]).await.unwrap();

        let result = journal.append("s", 0, &[2]).await;
        assert!(matches!(
            result,
            Err(SagaError::ConcurrencyConflict {
                expected: 0,
                actual: 1,
                ..
            })
        ));
        assert_eq!(journal.len(), 1);
    }

    #[tokio::test]
    async fn test_streams_listing() {
        let journal = InMemoryJournal::<u32>::new();
        journal.append("b", 0, &[1]).await.unwrap();
        journal.append("a", 0, &[1]).await.unwrap();
        journal.append("c", 0, &[]).await.unwrap();

        assert_eq!(journal.streams().await.unwrap(), vec!["a", "b"]);
    }
}
