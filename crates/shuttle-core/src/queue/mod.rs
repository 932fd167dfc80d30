//! Queue module: task records, the status state machine, and the in-memory
//! FIFO queue the supervisor owns.

mod record;
mod retry;
mod state;

pub use record::TaskRecord;
pub use retry::CrashPolicy;
pub use state::TaskStatus;

use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use thiserror::Error;
use tokio::time::Instant;

use crate::domain::{IdGenerator, TaskId};
use crate::observability::QueueCounts;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QueueError {
    #[error("task not found: {0}")]
    NotFound(TaskId),

    #[error("task {id}: cannot move from {from} to {to}")]
    InvalidTransition {
        id: TaskId,
        from: TaskStatus,
        to: TaskStatus,
    },

    #[error("task {id} cannot start: {running} is already running")]
    AlreadyRunning { id: TaskId, running: TaskId },

    #[error("task {id} is still {status}")]
    NotFinished { id: TaskId, status: TaskStatus },
}

/// Ordered collection of submitted tasks.
///
/// Design:
/// - `records` is the single source of truth for task state.
/// - `pending` holds TaskIds only, oldest first. Dispatch takes the front.
/// - A crash-requeued task goes back to the *front*: it was the oldest
///   pending task when it was dispatched, so this keeps submission order.
/// - `running` caches the one task in `Running` (single-worker invariant).
/// - Finished tasks stay in `records` until `remove`/`purge_finished`.
///
/// Not synchronized. The supervisor holds it behind its own lock.
pub struct TaskQueue {
    records: HashMap<TaskId, TaskRecord>,
    pending: VecDeque<TaskId>,
    running: Option<TaskId>,
    ids: IdGenerator,
}

impl TaskQueue {
    pub fn new() -> Self {
        Self {
            records: HashMap::new(),
            pending: VecDeque::new(),
            running: None,
            ids: IdGenerator::new(),
        }
    }

    /// Append a new pending task. The payload is not inspected.
    pub fn enqueue(&mut self, payload: serde_json::Value) -> TaskId {
        let id: TaskId = self.ids.next();
        self.records.insert(id, TaskRecord::new(id, payload));
        self.pending.push_back(id);
        id
    }

    pub fn find(&self, id: TaskId) -> Option<&TaskRecord> {
        self.records.get(&id)
    }

    /// Oldest pending task, if any.
    pub fn next_pending(&self) -> Option<&TaskRecord> {
        self.pending
            .iter()
            .filter_map(|id| self.records.get(id))
            .find(|record| record.status == TaskStatus::Pending)
    }

    /// The task currently in `Running`, if any.
    pub fn running(&self) -> Option<&TaskRecord> {
        self.running.and_then(|id| self.records.get(&id))
    }

    pub fn mark_running(&mut self, id: TaskId) -> Result<(), QueueError> {
        if let Some(running) = self.running
            && running != id
        {
            return Err(QueueError::AlreadyRunning { id, running });
        }
        self.transition(id, TaskStatus::Running)?.start();
        self.pending.retain(|pending| *pending != id);
        self.running = Some(id);
        Ok(())
    }

    pub fn mark_completed(
        &mut self,
        id: TaskId,
        result: serde_json::Value,
    ) -> Result<(), QueueError> {
        self.transition(id, TaskStatus::Completed)?.complete(result);
        self.clear_running(id);
        Ok(())
    }

    pub fn mark_failed(&mut self, id: TaskId, error: String) -> Result<(), QueueError> {
        self.transition(id, TaskStatus::Failed)?.fail(error);
        self.clear_running(id);
        Ok(())
    }

    /// Running -> Pending after a worker crash. Returns the task's crash count.
    pub fn mark_pending(&mut self, id: TaskId) -> Result<u32, QueueError> {
        let record = self.transition(id, TaskStatus::Pending)?;
        record.requeue();
        let crashes = record.crashes;
        self.clear_running(id);
        self.pending.push_front(id);
        Ok(crashes)
    }

    /// The worker died while `id` was running. Requeue it, or fail it once
    /// `policy` says it has crashed too often. Returns the new status.
    pub fn mark_crashed(
        &mut self,
        id: TaskId,
        policy: CrashPolicy,
    ) -> Result<TaskStatus, QueueError> {
        let crashes = self.find(id).ok_or(QueueError::NotFound(id))?.crashes + 1;
        if policy.should_requeue(crashes) {
            self.mark_pending(id)?;
            return Ok(TaskStatus::Pending);
        }

        let record = self.transition(id, TaskStatus::Failed)?;
        record.crashes = crashes;
        record.fail(format!(
            "worker crashed {crashes} times while running this task"
        ));
        self.clear_running(id);
        Ok(TaskStatus::Failed)
    }

    /// Discard a finished task's record.
    pub fn remove(&mut self, id: TaskId) -> Result<TaskRecord, QueueError> {
        let record = self.records.get(&id).ok_or(QueueError::NotFound(id))?;
        if !record.status.is_terminal() {
            return Err(QueueError::NotFinished {
                id,
                status: record.status,
            });
        }
        self.records.remove(&id).ok_or(QueueError::NotFound(id))
    }

    /// Remove every finished task whose last transition is at least
    /// `retention` old. Returns the removed ids.
    pub fn purge_finished(&mut self, retention: Duration, now: Instant) -> Vec<TaskId> {
        let expired: Vec<TaskId> = self
            .records
            .values()
            .filter(|r| r.status.is_terminal() && now.duration_since(r.updated_at) >= retention)
            .map(|r| r.id)
            .collect();
        for id in &expired {
            self.records.remove(id);
        }
        expired
    }

    pub fn counts(&self) -> QueueCounts {
        let mut counts = QueueCounts::default();
        for record in self.records.values() {
            match record.status {
                TaskStatus::Pending => counts.pending += 1,
                TaskStatus::Running => counts.running += 1,
                TaskStatus::Completed => counts.completed += 1,
                TaskStatus::Failed => counts.failed += 1,
            }
        }
        counts
    }

    fn transition(&mut self, id: TaskId, to: TaskStatus) -> Result<&mut TaskRecord, QueueError> {
        let record = self.records.get_mut(&id).ok_or(QueueError::NotFound(id))?;
        if !record.status.can_transition_to(to) {
            return Err(QueueError::InvalidTransition {
                id,
                from: record.status,
                to,
            });
        }
        Ok(record)
    }

    fn clear_running(&mut self, id: TaskId) {
        if self.running == Some(id) {
            self.running = None;
        }
    }
}

impl Default for TaskQueue {
    fn default() -> Self {
        Self::new()
    }
}
