use thiserror::Error;

use crate::config::ConfigError;

/// Errors surfaced by the supervisor's public API.
#[derive(Debug, Error)]
pub enum ShuttleError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("no job planner configured")]
    MissingPlanner,

    #[error("supervisor is shutting down")]
    ShuttingDown,

    #[error("supervisor must be started inside a tokio runtime")]
    NoRuntime,
}
