use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::TaskId;
use crate::queue::TaskStatus;

/// Serializable snapshot of a task, returned by status lookups.
///
/// `result` is present only for completed tasks and `error` only for failed
/// ones; both are omitted from JSON otherwise.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskView {
    pub id: TaskId,
    pub status: TaskStatus,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    pub dispatches: u32,
    pub crashes: u32,
    pub submitted_at: DateTime<Utc>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
}

impl TaskView {
    pub fn is_finished(&self) -> bool {
        self.status.is_terminal()
    }
}
