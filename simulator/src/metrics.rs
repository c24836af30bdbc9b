//! Simulation metrics.

use std::collections::VecDeque;

use serde::Serialize;

/// Simulation metrics.
#[derive(Debug, Clone, Serialize)]
pub struct SimulationMetrics {
    /// Transfers the sequencer accepted.
    pub total_transfers: u64,
    /// Transfers that reached Completed.
    pub completed_transfers: u64,
    /// Transfers compensated to Cancelled.
    pub cancelled_transfers: u64,
    /// Transfers still open when the run ended.
    pub unfinished_transfers: u64,
    /// Start-to-terminal latency samples (ms).
    #[serde(skip)]
    latency_samples: VecDeque<u64>,
    /// Maximum samples to keep.
    #[serde(skip)]
    max_samples: usize,
}

impl SimulationMetrics {
    /// Create new metrics.
    pub fn new() -> Self {
        Self {
            total_transfers: 0,
            completed_transfers: 0,
            cancelled_transfers: 0,
            unfinished_transfers: 0,
            latency_samples: VecDeque::with_capacity(10000),
            max_samples: 10000,
        }
    }

    pub fn record_started(&mut self) {
        self.total_transfers += 1;
    }

    /// Record a completed transfer.
    pub fn record_completed(&mut self, latency_ms: u64) {
        self.completed_transfers += 1;
        self.record_latency(latency_ms);
    }

    /// Record a compensated transfer.
    pub fn record_cancelled(&mut self, latency_ms: u64) {
        self.cancelled_transfers += 1;
        self.record_latency(latency_ms);
    }

    pub fn record_unfinished(&mut self) {
        self.unfinished_transfers += 1;
    }

    fn record_latency(&mut self, latency_ms: u64) {
        if self.latency_samples.len() >= self.max_samples {
            self.latency_samples.pop_front();
        }
        self.latency_samples.push_back(latency_ms);
    }

    /// Get average latency in ms.
    pub fn average_latency_ms(&self) -> u64 {
        if self.latency_samples.is_empty() {
            return 0;
        }

        let sum: u64 = self.latency_samples.iter().sum();
        sum / self.latency_samples.len() as u64
    }

    /// Get p99 latency.
    pub fn p99_latency_ms(&self) -> u64 {
        self.percentile_latency(99)
    }

    fn percentile_latency(&self, percentile: usize) -> u64 {
        if self.latency_samples.is_empty() {
            return 0;
        }

        let mut sorted: Vec<_> = self.latency_samples.iter().copied().collect();
        sorted.sort_unstable();

        let idx = (sorted.len() * percentile / 100).min(sorted.len() - 1);
        sorted[idx]
    }

    /// Share of transfers that completed.
    pub fn completion_rate(&self) -> f64 {
        if self.total_transfers == 0 {
            return 0.0;
        }

        self.completed_transfers as f64 / self.total_transfers as f64
    }
}

impl Default for SimulationMetrics {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics() {
        let mut metrics = SimulationMetrics::new();

        for _ in 0..4 {
            metrics.record_started();
        }
        metrics.record_completed(100);
        metrics.record_completed(200);
        metrics.record_cancelled(150);
        metrics.record_unfinished();

        assert_eq!(metrics.total_transfers, 4);
        assert_eq!(metrics.completed_transfers, 2);
        assert_eq!(metrics.cancelled_transfers, 1);
        assert_eq!(metrics.average_latency_ms(), 150);
        assert_eq!(metrics.p99_latency_ms(), 200);
        assert_eq!(metrics.completion_rate(), 0.5);
    }
}
