use std::sync::Mutex;

use sysinfo::{Pid, ProcessRefreshKind, ProcessesToUpdate, RefreshKind, System};

/// Source of the memory-pressure signal.
pub trait MemoryProbe: Send + Sync {
    /// Current memory usage in bytes, or `None` if it could not be read.
    fn sample(&self) -> Option<u64>;
}

/// Resident set size of the current process, read through `sysinfo`.
pub struct ProcessMemoryProbe {
    pid: Pid,
    system: Mutex<System>,
}

impl ProcessMemoryProbe {
    pub fn new() -> Self {
        let pid = Pid::from_u32(std::process::id());
        let system = System::new_with_specifics(
            RefreshKind::new().with_processes(ProcessRefreshKind::new().with_memory()),
        );
        Self {
            pid,
            system: Mutex::new(system),
        }
    }
}

impl Default for ProcessMemoryProbe {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryProbe for ProcessMemoryProbe {
    fn sample(&self) -> Option<u64> {
        let mut system = self.system.lock().ok()?;
        system.refresh_processes_specifics(
            ProcessesToUpdate::Some(&[self.pid]),
            true,
            ProcessRefreshKind::new().with_memory(),
        );
        system.process(self.pid).map(|process| process.memory())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_own_resident_memory() {
        let probe = ProcessMemoryProbe::new();
        let rss = probe.sample().expect("own process should be visible");
        assert!(rss > 0);
    }
}
