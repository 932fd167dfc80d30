//! Worker supervisor.
//!
//! - **SupervisorCore**: queue + worker state machine (sync, behind one mutex)
//! - **Supervisor**: async facade; owns the event loop task
//! - **SupervisorBuilder**: wiring and startup validation

mod builder;
mod state;

pub use self::builder::SupervisorBuilder;
pub use self::state::SupervisorCore;

use std::sync::Arc;

use tokio::sync::{Mutex, Notify, mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::backpressure::sleep_until_opt;
use crate::domain::{SupervisorEvent, TaskId, TaskView};
use crate::error::ShuttleError;
use crate::observability::{QueueCounts, SupervisorPhase, SupervisorSnapshot};

/// Handle to a running supervisor.
///
/// `submit` returns as soon as the task is queued; callers poll `status`.
/// Dropping the handle starts the same drain as `shutdown_and_join` but does
/// not wait for it.
pub struct Supervisor {
    core: Arc<Mutex<SupervisorCore>>,
    shutdown_tx: watch::Sender<bool>,
    event_loop: JoinHandle<()>,
}

impl Supervisor {
    pub fn builder() -> SupervisorBuilder {
        SupervisorBuilder::new()
    }

    pub(crate) fn start(
        mut core: SupervisorCore,
        events_rx: mpsc::Receiver<SupervisorEvent>,
        deadline_changed: Arc<Notify>,
    ) -> Self {
        core.spawn_worker();
        let core = Arc::new(Mutex::new(core));
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let event_loop = tokio::spawn(event_loop(
            Arc::clone(&core),
            events_rx,
            shutdown_rx,
            deadline_changed,
        ));
        Self {
            core,
            shutdown_tx,
            event_loop,
        }
    }

    /// Queue a task and try to dispatch it. The payload is opaque here.
    pub async fn submit(&self, payload: serde_json::Value) -> Result<TaskId, ShuttleError> {
        let mut core = self.core.lock().await;
        if core.is_shutting_down() {
            return Err(ShuttleError::ShuttingDown);
        }
        Ok(core.submit(payload))
    }

    /// Current view of a task; `None` if unknown or already removed.
    pub async fn status(&self, id: TaskId) -> Option<TaskView> {
        self.core.lock().await.status(id)
    }

    pub async fn counts(&self) -> QueueCounts {
        self.core.lock().await.counts()
    }

    pub async fn phase(&self) -> SupervisorPhase {
        self.core.lock().await.phase()
    }

    pub async fn snapshot(&self) -> SupervisorSnapshot {
        self.core.lock().await.snapshot()
    }

    /// Stop dispatching, let the in-flight task (if any) finish, then join
    /// the worker thread. Pending tasks are left undispatched.
    ///
    /// Waits for as long as the in-flight task runs unless a dispatch timeout
    /// is configured.
    pub async fn shutdown_and_join(self) {
        // ignore send error: the loop may already be gone
        let _ = self.shutdown_tx.send(true);
        if let Err(e) = self.event_loop.await {
            warn!(error = %e, "supervisor event loop ended abnormally");
        }

        let worker = self.core.lock().await.take_worker();
        if let Some(worker) = worker {
            let id = worker.id();
            if let Err(e) = tokio::task::spawn_blocking(move || worker.join()).await {
                warn!(worker = %id, error = %e, "joining worker thread failed");
            }
        }
        info!("supervisor stopped");
    }
}

async fn event_loop(
    core: Arc<Mutex<SupervisorCore>>,
    mut events_rx: mpsc::Receiver<SupervisorEvent>,
    mut shutdown_rx: watch::Receiver<bool>,
    deadline_changed: Arc<Notify>,
) {
    let mut draining = false;

    loop {
        let deadline = core.lock().await.dispatch_deadline();

        tokio::select! {
            // fires on `true` and when the handle is dropped
            _ = shutdown_rx.changed(), if !draining => {
                draining = true;
                core.lock().await.begin_shutdown();
            }

            event = events_rx.recv() => {
                let Some(event) = event else { break };
                core.lock().await.handle_event(event);
            }

            _ = sleep_until_opt(deadline) => {
                core.lock().await.on_dispatch_timeout(Instant::now());
            }

            // a dispatch set a new deadline; recompute it
            _ = deadline_changed.notified() => {}
        }

        if draining && core.lock().await.is_drained() {
            break;
        }
    }

    debug!("supervisor event loop exited");
}
