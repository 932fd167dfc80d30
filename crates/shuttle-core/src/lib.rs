//! shuttle-core
//!
//! A single-worker background task supervisor with chunked, memory-aware
//! output generation.
//!
//! # Modules
//! - **domain**: ids, task views, supervisor <-> worker messages
//! - **queue**: FIFO task queue and the task state machine
//! - **supervisor**: owns the worker, dispatches one task at a time, recovers
//!   from worker crashes
//! - **worker**: the isolated execution context (one OS thread)
//! - **chunk**: resumable chunk loop, output sinks, job planning
//! - **backpressure**: memory sampling and the pause gate
//! - **config**, **error**, **observability**

pub mod backpressure;
pub mod chunk;
pub mod config;
pub mod domain;
pub mod error;
pub mod observability;
pub mod queue;
pub mod signal;
pub mod supervisor;
pub mod worker;

pub use config::SupervisorConfig;
pub use domain::{TaskId, TaskView};
pub use error::ShuttleError;
pub use queue::TaskStatus;
pub use supervisor::{Supervisor, SupervisorBuilder};
