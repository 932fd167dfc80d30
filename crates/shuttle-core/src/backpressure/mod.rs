//! Memory-pressure backpressure for the chunk processor.
//!
//! - **PauseGate**: shared pause flag the processor checks between chunks
//! - **MemoryProbe**: where the memory signal comes from (process RSS by default)
//! - **BackpressureMonitor**: periodic sampler that pauses the gate and lifts
//!   the pause after a fixed cool-down

mod gate;
mod monitor;
mod probe;

pub use gate::PauseGate;
pub use monitor::{BackpressureMonitor, MonitorHandle, MonitorStats};
pub use probe::{MemoryProbe, ProcessMemoryProbe};

pub(crate) use monitor::sleep_until_opt;
