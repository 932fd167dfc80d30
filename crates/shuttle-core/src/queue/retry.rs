//! Crash requeue policy: decides whether a task that was running when its
//! worker died goes back to the queue.

/// How many worker crashes a single task may survive.
///
/// `max_requeues = None` requeues forever. A task that crashes its worker on
/// every attempt then cycles indefinitely, which is why deployments should
/// set a limit.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CrashPolicy {
    pub max_requeues: Option<u32>,
}

impl CrashPolicy {
    pub fn unlimited() -> Self {
        Self { max_requeues: None }
    }

    pub fn limited(max_requeues: u32) -> Self {
        Self {
            max_requeues: Some(max_requeues),
        }
    }

    /// `crashes` counts the crash being handled right now (1-indexed).
    pub fn should_requeue(&self, crashes: u32) -> bool {
        match self.max_requeues {
            None => true,
            Some(max) => crashes <= max,
        }
    }
}
