//! Domain model: ids, the task status view, and the worker wire protocol.

pub mod ids;
pub mod message;
pub mod task;

pub use ids::{IdGenerator, ParseIdError, TaskId, WorkerId};
pub use message::{Dispatch, SupervisorEvent, WorkerEvent, WorkerMessage};
pub use task::TaskView;
