//! Supervisor <-> worker wire protocol.
//!
//! Both directions are asynchronous and correlated by `TaskId`. Lifecycle
//! signals (`Error`, `Exit`) carry no task id; they apply to whichever task the
//! supervisor currently has running.

use serde::{Deserialize, Serialize};

use super::{TaskId, WorkerId};

/// Supervisor -> worker. Exactly one is in flight at a time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Dispatch {
    pub task_id: TaskId,
    pub payload: serde_json::Value,
}

/// Worker -> supervisor, per task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum WorkerMessage {
    Completed {
        task_id: TaskId,
        result: serde_json::Value,
    },
    Failed {
        task_id: TaskId,
        error: String,
    },
}

impl WorkerMessage {
    pub fn task_id(&self) -> TaskId {
        match self {
            WorkerMessage::Completed { task_id, .. } | WorkerMessage::Failed { task_id, .. } => {
                *task_id
            }
        }
    }
}

/// Everything a worker execution context can tell its supervisor.
#[derive(Debug, Clone, PartialEq)]
pub enum WorkerEvent {
    /// The context is up and waiting for a dispatch.
    Ready,

    /// A task finished (either way).
    Message(WorkerMessage),

    /// The context died with an error (panic, runtime failure, spawn failure).
    Error { message: String },

    /// The context stopped. `code == 0` means its dispatch channel closed.
    Exit { code: i32 },
}

/// A `WorkerEvent` tagged with the generation that produced it, so events
/// from a replaced worker can be told apart and dropped.
#[derive(Debug, Clone, PartialEq)]
pub struct SupervisorEvent {
    pub worker: WorkerId,
    pub event: WorkerEvent,
}
