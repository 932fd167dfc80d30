//! Chunked generation: a resumable cursor over `N` units that feeds an output
//! sink `chunk_size` units at a time.
//!
//! - **ChunkSink**: where chunk output goes (append, then finalize or discard)
//! - **ChunkProcessor**: the cursor loop, pause- and abort-aware
//! - **JobPlanner**: turns a task payload into a unit count + sink
//! - **report**: the built-in table report sink and planner

mod plan;
mod processor;
pub mod report;
mod sink;

pub use plan::{JobPlan, JobPlanner, PlanError};
pub use processor::{ChunkOutput, ChunkProcessor, ProcessError};
pub use report::{ReportPlanner, TableReportSink};
pub use sink::{ChunkSink, SinkError, UnitRange};
