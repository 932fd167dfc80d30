//! Task record: payload + lifecycle state.

use chrono::{DateTime, Utc};
use tokio::time::Instant;

use super::TaskStatus;
use crate::domain::{TaskId, TaskView};

/// A submitted task as the queue stores it.
///
/// Design:
/// - This is the single source of truth for a task's state.
/// - `result` is only set while `Completed`, `error` only while `Failed`.
/// - All state changes go through the methods below; the queue checks the
///   transition before calling them.
#[derive(Debug, Clone)]
pub struct TaskRecord {
    pub id: TaskId,
    pub payload: serde_json::Value,
    pub status: TaskStatus,
    pub result: Option<serde_json::Value>,
    pub error: Option<String>,

    /// Number of times this task has been handed to a worker.
    pub dispatches: u32,

    /// Number of times a worker died while running this task.
    pub crashes: u32,

    pub submitted_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,

    /// Monotonic timestamp of the last transition (retention window anchor).
    pub updated_at: Instant,
}

impl TaskRecord {
    pub fn new(id: TaskId, payload: serde_json::Value) -> Self {
        Self {
            id,
            payload,
            status: TaskStatus::Pending,
            result: None,
            error: None,
            dispatches: 0,
            crashes: 0,
            submitted_at: Utc::now(),
            finished_at: None,
            updated_at: Instant::now(),
        }
    }

    pub fn start(&mut self) {
        self.status = TaskStatus::Running;
        self.dispatches += 1;
        self.updated_at = Instant::now();
    }

    pub fn complete(&mut self, result: serde_json::Value) {
        self.status = TaskStatus::Completed;
        self.result = Some(result);
        self.finish();
    }

    pub fn fail(&mut self, error: String) {
        self.status = TaskStatus::Failed;
        self.error = Some(error);
        self.finish();
    }

    /// Back to Pending after a worker crash.
    pub fn requeue(&mut self) {
        self.status = TaskStatus::Pending;
        self.crashes += 1;
        self.updated_at = Instant::now();
    }

    fn finish(&mut self) {
        self.finished_at = Some(Utc::now());
        self.updated_at = Instant::now();
    }

    pub fn view(&self) -> TaskView {
        TaskView {
            id: self.id,
            status: self.status,
            result: self.result.clone(),
            error: self.error.clone(),
            dispatches: self.dispatches,
            crashes: self.crashes,
            submitted_at: self.submitted_at,
            finished_at: self.finished_at,
        }
    }
}
