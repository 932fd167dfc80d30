use async_trait::async_trait;
use thiserror::Error;

use super::{ChunkSink, SinkError};
use crate::domain::TaskId;

#[derive(Debug, Error)]
pub enum PlanError {
    #[error("invalid payload: {0}")]
    InvalidPayload(String),

    #[error("cannot open output: {0}")]
    Sink(#[from] SinkError),
}

/// What one task turns into: how many units to generate and where they go.
pub struct JobPlan {
    pub total_units: u64,
    pub sink: Box<dyn ChunkSink>,
}

impl std::fmt::Debug for JobPlan {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobPlan")
            .field("total_units", &self.total_units)
            .finish_non_exhaustive()
    }
}

/// Interprets task payloads inside the worker.
///
/// The supervisor treats payloads as opaque; only the planner gives them
/// meaning. A planner error fails the task, it does not crash the worker.
#[async_trait]
pub trait JobPlanner: Send + Sync {
    async fn plan(&self, task_id: TaskId, payload: &serde_json::Value)
    -> Result<JobPlan, PlanError>;
}
