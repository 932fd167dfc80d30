//! Read-only views of supervisor and queue state.

use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueCounts {
    pub pending: usize,
    pub running: usize,
    pub completed: usize,
    pub failed: usize,
}

impl QueueCounts {
    pub fn total(&self) -> usize {
        self.pending + self.running + self.completed + self.failed
    }
}

/// Supervisor lifecycle phase.
///
/// - NoWorker -> WorkerStarting -> WorkerIdle
/// - WorkerIdle -> WorkerBusy -> WorkerIdle
/// - WorkerIdle | WorkerBusy -> WorkerStarting (worker died, replaced)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SupervisorPhase {
    NoWorker,
    WorkerStarting,
    WorkerIdle,
    WorkerBusy,
}

impl fmt::Display for SupervisorPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SupervisorPhase::NoWorker => "no_worker",
            SupervisorPhase::WorkerStarting => "worker_starting",
            SupervisorPhase::WorkerIdle => "worker_idle",
            SupervisorPhase::WorkerBusy => "worker_busy",
        };
        f.write_str(s)
    }
}

/// Point-in-time summary for status endpoints and logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SupervisorSnapshot {
    pub phase: SupervisorPhase,
    pub counts: QueueCounts,

    /// Worker contexts created so far, the first one included.
    pub workers_started: u64,

    /// Worker terminations handled (crashes, exits, timeouts).
    pub worker_failures: u64,

    /// Events dropped because they came from a replaced worker or named a
    /// task that was not in flight.
    pub stale_events: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn total_sums_every_status() {
        let mut counts = QueueCounts::default();
        assert_eq!(counts.total(), 0);

        counts.completed = 3;
        counts.failed = 1;
        counts.running = 1;
        assert_eq!(counts.total(), 5);
    }

    #[test]
    fn phase_serializes_snake_case() {
        let json = serde_json::to_string(&SupervisorPhase::WorkerBusy).unwrap();
        assert_eq!(json, "\"worker_busy\"");
        assert_eq!(SupervisorPhase::NoWorker.to_string(), "no_worker");
    }
}
