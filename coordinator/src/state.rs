//! Coordinator state definitions.

use serde::Serialize;

/// Coordinator operational state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CoordinatorState {
    /// Coordinator is starting up.
    Starting,
    /// Re-driving work found in storage.
    Recovering,
    /// Coordinator is running and accepting requests.
    Running,
    /// Coordinator is shutting down, not accepting new requests.
    ShuttingDown,
    /// Coordinator is stopped.
    Stopped,
}

impl CoordinatorState {
    /// Check if the coordinator is accepting new requests.
    pub fn accepts_requests(&self) -> bool {
        matches!(self, CoordinatorState::Running)
    }

    /// Check if the coordinator is in a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, CoordinatorState::Stopped)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_running_accepts() {
        assert!(CoordinatorState::Running.accepts_requests());
        for state in [
            CoordinatorState::Starting,
            CoordinatorState::Recovering,
            CoordinatorState::ShuttingDown,
            CoordinatorState::Stopped,
        ] {
            assert!(!state.accepts_requests());
        }
        assert!(CoordinatorState::Stopped.is_terminal());
    }
}
