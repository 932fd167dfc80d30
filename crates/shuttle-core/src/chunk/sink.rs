use async_trait::async_trait;
use thiserror::Error;

/// Half-open range of work units `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct UnitRange {
    pub start: u64,
    pub end: u64,
}

impl UnitRange {
    pub fn len(&self) -> u64 {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start >= self.end
    }
}

#[derive(Debug, Error)]
pub enum SinkError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

/// Accumulating output for one run.
///
/// The processor calls `append` once per chunk in unit order, then exactly
/// one of `finalize` (all units consumed) or `discard` (the run failed).
#[async_trait]
pub trait ChunkSink: Send {
    async fn append(&mut self, chunk: UnitRange) -> Result<(), SinkError>;

    /// Flush/persist and return a handle to the finished output.
    async fn finalize(self: Box<Self>) -> Result<serde_json::Value, SinkError>;

    /// Drop whatever was written so far.
    async fn discard(self: Box<Self>);
}
