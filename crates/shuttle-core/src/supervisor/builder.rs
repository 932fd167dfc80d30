//! SupervisorBuilder: wiring and fail-fast validation.

use std::sync::Arc;

use tokio::sync::{Notify, mpsc};

use super::{Supervisor, SupervisorCore};
use crate::backpressure::{MemoryProbe, ProcessMemoryProbe};
use crate::chunk::JobPlanner;
use crate::config::SupervisorConfig;
use crate::error::ShuttleError;
use crate::worker::WorkerContext;

/// Builds and starts a [`Supervisor`].
///
/// # Example
/// ```no_run
/// use shuttle_core::chunk::ReportPlanner;
/// use shuttle_core::supervisor::SupervisorBuilder;
///
/// # async fn run() -> Result<(), shuttle_core::ShuttleError> {
/// let supervisor = SupervisorBuilder::new()
///     .planner(ReportPlanner::new("/tmp/reports"))
///     .build()?;
/// let id = supervisor.submit(serde_json::json!({ "rows": 1000 })).await?;
/// println!("{:?}", supervisor.status(id).await);
/// # Ok(())
/// # }
/// ```
///
/// `build` checks the configuration and that a planner was given before any
/// thread is started.
pub struct SupervisorBuilder {
    config: SupervisorConfig,
    planner: Option<Arc<dyn JobPlanner>>,
    probe: Option<Arc<dyn MemoryProbe>>,
}

impl SupervisorBuilder {
    pub fn new() -> Self {
        Self {
            config: SupervisorConfig::default(),
            planner: None,
            probe: None,
        }
    }

    pub fn config(mut self, config: SupervisorConfig) -> Self {
        self.config = config;
        self
    }

    pub fn planner(mut self, planner: impl JobPlanner + 'static) -> Self {
        self.planner = Some(Arc::new(planner));
        self
    }

    pub fn shared_planner(mut self, planner: Arc<dyn JobPlanner>) -> Self {
        self.planner = Some(planner);
        self
    }

    /// Memory signal for backpressure. Defaults to this process's resident
    /// set size.
    pub fn probe(mut self, probe: Arc<dyn MemoryProbe>) -> Self {
        self.probe = Some(probe);
        self
    }

    /// Validate, create the first worker, and start the event loop.
    ///
    /// Must be called inside a tokio runtime.
    pub fn build(self) -> Result<Supervisor, ShuttleError> {
        self.config.validate()?;
        let planner = self.planner.ok_or(ShuttleError::MissingPlanner)?;
        if tokio::runtime::Handle::try_current().is_err() {
            return Err(ShuttleError::NoRuntime);
        }

        let probe = self
            .probe
            .unwrap_or_else(|| Arc::new(ProcessMemoryProbe::new()));
        let context = WorkerContext {
            planner,
            probe,
            chunk_size: self.config.chunk_size,
            backpressure: self.config.backpressure.clone(),
        };

        let (events_tx, events_rx) = mpsc::channel(self.config.event_capacity);
        let deadline_changed = Arc::new(Notify::new());
        let core = SupervisorCore::new(
            &self.config,
            context,
            events_tx,
            Arc::clone(&deadline_changed),
        );
        Ok(Supervisor::start(core, events_rx, deadline_changed))
    }
}

impl Default for SupervisorBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk::ReportPlanner;
    use crate::config::ConfigError;

    #[test]
    fn build_without_planner_fails() {
        let err = SupervisorBuilder::new().build().err().unwrap();
        assert!(matches!(err, ShuttleError::MissingPlanner));
    }

    #[test]
    fn build_rejects_invalid_config() {
        let err = SupervisorBuilder::new()
            .planner(ReportPlanner::new("."))
            .config(SupervisorConfig::default().with_chunk_size(0))
            .build()
            .err()
            .unwrap();
        assert!(matches!(err, ShuttleError::Config(ConfigError::Invalid(_))));
    }

    #[test]
    fn build_outside_runtime_fails() {
        let err = SupervisorBuilder::new()
            .planner(ReportPlanner::new("."))
            .build()
            .err()
            .unwrap();
        assert!(matches!(err, ShuttleError::NoRuntime));
    }

    #[tokio::test]
    async fn build_starts_a_worker() {
        let dir = tempfile::tempdir().unwrap();
        let supervisor = SupervisorBuilder::new()
            .planner(ReportPlanner::new(dir.path()))
            .build()
            .unwrap();

        assert_eq!(supervisor.snapshot().await.workers_started, 1);
        supervisor.shutdown_and_join().await;
    }
}
