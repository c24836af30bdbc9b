//! Metrics collection for coordinator monitoring.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::Serialize;

/// Coordinator metrics.
#[derive(Default)]
pub struct Metrics {
    /// Transfers accepted by the sequencer.
    pub transfers_started: AtomicU64,
    /// Transfers that reached Completed.
    pub transfers_completed: AtomicU64,
    /// Transfers compensated to Cancelled.
    pub transfers_cancelled: AtomicU64,
    /// Transfers still being driven or awaiting completion.
    pub transfers_active: AtomicU64,
    /// Failed sequencer step attempts.
    pub step_retries: AtomicU64,
    /// Steps that exhausted their attempts.
    pub steps_exhausted: AtomicU64,
    /// Deliveries handed to handlers.
    pub deliveries: AtomicU64,
    /// Failed handler invocations that were retried.
    pub delivery_retries: AtomicU64,
    /// Injected duplicate deliveries.
    pub redeliveries: AtomicU64,
    /// Deliveries given up on.
    pub dead_letters: AtomicU64,
    /// Commands rejected with an error.
    pub commands_rejected: AtomicU64,
}

impl Metrics {
    /// Create new metrics instance.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record transfer started.
    pub fn transfer_started(&self) {
        self.transfers_started.fetch_add(1, Ordering::Relaxed);
        self.transfers_active.fetch_add(1, Ordering::Relaxed);
    }

    /// Record transfer completed.
    pub fn transfer_completed(&self) {
        self.transfers_completed.fetch_add(1, Ordering::Relaxed);
        self.transfers_active.fetch_sub(1, Ordering::Relaxed);
    }

    /// Record transfer cancelled.
    pub fn transfer_cancelled(&self) {
        self.transfers_cancelled.fetch_add(1, Ordering::Relaxed);
        self.transfers_active.fetch_sub(1, Ordering::Relaxed);
    }

    /// Record an unfinished transfer found on recovery.
    pub fn transfer_recovered(&self) {
        self.transfers_active.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a failed step attempt.
    pub fn step_retry(&self) {
        self.step_retries.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a step out of attempts.
    pub fn step_exhausted(&self) {
        self.steps_exhausted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn delivery(&self) {
        self.deliveries.fetch_add(1, Ordering::Relaxed);
    }

    pub fn delivery_retry(&self) {
        self.delivery_retries.fetch_add(1, Ordering::Relaxed);
    }

    pub fn redelivery(&self) {
        self.redeliveries.fetch_add(1, Ordering::Relaxed);
    }

    pub fn dead_letter(&self) {
        self.dead_letters.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a rejected command.
    pub fn command_rejected(&self) {
        self.commands_rejected.fetch_add(1, Ordering::Relaxed);
    }

    /// Get current metrics snapshot.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            transfers_started: self.transfers_started.load(Ordering::Relaxed),
            transfers_completed: self.transfers_completed.load(Ordering::Relaxed),
            transfers_cancelled: self.transfers_cancelled.load(Ordering::Relaxed),
            transfers_active: self.transfers_active.load(Ordering::Relaxed),
            step_retries: self.step_retries.load(Ordering::Relaxed),
            steps_exhausted: self.steps_exhausted.load(Ordering::Relaxed),
            deliveries: self.deliveries.load(Ordering::Relaxed),
            delivery_retries: self.delivery_retries.load(Ordering::Relaxed),
            redeliveries: self.redeliveries.load(Ordering::Relaxed),
            dead_letters: self.dead_letters.load(Ordering::Relaxed),
            commands_rejected: self.commands_rejected.load(Ordering::Relaxed),
        }
    }
}

/// Snapshot of metrics at a point in time.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub transfers_started: u64,
    pub transfers_completed: u64,
    pub transfers_cancelled: u64,
    pub transfers_active: u64,
    pub step_retries: u64,
    pub steps_exhausted: u64,
    pub deliveries: u64,
    pub delivery_retries: u64,
    pub redeliveries: u64,
    pub dead_letters: u64,
    pub commands_rejected: u64,
}

/// Shared metrics instance.
pub type SharedMetrics = Arc<Metrics>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_increment() {
        let metrics = Metrics::new();

        metrics.transfer_started();
        metrics.transfer_started();
        metrics.transfer_completed();

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.transfers_started, 2);
        assert_eq!(snapshot.transfers_completed, 1);
        assert_eq!(snapshot.transfers_active, 1);
    }

    #[test]
    fn test_snapshot_serializes() {
        let metrics = Metrics::new();
        metrics.redelivery();
        let json = serde_json::to_value(metrics.snapshot()).unwrap();
        assert_eq!(json["redeliveries"], 1);
    }
}
