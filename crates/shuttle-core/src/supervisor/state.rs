//! Supervisor state machine.
//!
//! Owns the task queue and the single worker handle. Every mutation happens
//! through `&mut self`, and the supervisor keeps the core behind one mutex, so
//! submissions, worker events and timeouts are serialized.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Notify, mpsc};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::config::SupervisorConfig;
use crate::domain::{
    Dispatch, IdGenerator, SupervisorEvent, TaskId, TaskView, WorkerEvent, WorkerId,
    WorkerMessage,
};
use crate::observability::{QueueCounts, SupervisorPhase, SupervisorSnapshot};
use crate::queue::{CrashPolicy, TaskQueue, TaskStatus};
use crate::worker::{WorkerContext, WorkerHandle};

/// How long a failed worker start waits before it is reported, so a host that
/// refuses new threads is retried at a bounded rate.
pub const SPAWN_RETRY_DELAY: Duration = Duration::from_millis(250);

/// The task currently handed to the worker. Its presence is the
/// single-flight flag: no second dispatch while it is set.
#[derive(Debug, Clone, Copy)]
struct InFlight {
    task: TaskId,
    deadline: Option<Instant>,
}

pub struct SupervisorCore {
    queue: TaskQueue,
    worker: Option<WorkerHandle>,
    /// Id of a worker whose thread could not be started; its synthetic
    /// error event is still addressed to it.
    failed_spawn: Option<WorkerId>,
    ready: bool,
    in_flight: Option<InFlight>,

    context: WorkerContext,
    events_tx: mpsc::Sender<SupervisorEvent>,
    worker_ids: IdGenerator,
    deadline_changed: Arc<Notify>,

    crash_policy: CrashPolicy,
    retention: Duration,
    dispatch_timeout: Option<Duration>,
    shutting_down: bool,

    workers_started: u64,
    worker_failures: u64,
    stale_events: u64,
}

impl SupervisorCore {
    pub fn new(
        config: &SupervisorConfig,
        context: WorkerContext,
        events_tx: mpsc::Sender<SupervisorEvent>,
        deadline_changed: Arc<Notify>,
    ) -> Self {
        Self {
            queue: TaskQueue::new(),
            worker: None,
            failed_spawn: None,
            ready: false,
            in_flight: None,
            context,
            events_tx,
            worker_ids: IdGenerator::new(),
            deadline_changed,
            crash_policy: config.crash_policy(),
            retention: config.retention,
            dispatch_timeout: config.dispatch_timeout,
            shutting_down: false,
            workers_started: 0,
            worker_failures: 0,
            stale_events: 0,
        }
    }

    pub fn phase(&self) -> SupervisorPhase {
        match (&self.worker, self.ready, self.in_flight) {
            (None, _, _) => SupervisorPhase::NoWorker,
            (Some(_), false, _) => SupervisorPhase::WorkerStarting,
            (Some(_), true, None) => SupervisorPhase::WorkerIdle,
            (Some(_), true, Some(_)) => SupervisorPhase::WorkerBusy,
        }
    }

    pub fn counts(&self) -> QueueCounts {
        self.queue.counts()
    }

    pub fn snapshot(&self) -> SupervisorSnapshot {
        SupervisorSnapshot {
            phase: self.phase(),
            counts: self.queue.counts(),
            workers_started: self.workers_started,
            worker_failures: self.worker_failures,
            stale_events: self.stale_events,
        }
    }

    pub fn worker_id(&self) -> Option<WorkerId> {
        self.worker.as_ref().map(WorkerHandle::id)
    }

    /// When the in-flight task times out, if a timeout is configured.
    pub fn dispatch_deadline(&self) -> Option<Instant> {
        self.in_flight.and_then(|f| f.deadline)
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutting_down
    }

    /// Nothing is in flight: a draining supervisor may stop now.
    pub fn is_drained(&self) -> bool {
        self.in_flight.is_none()
    }

    /// Create the worker. Runs once at startup and again after every crash.
    pub fn spawn_worker(&mut self) {
        if self.shutting_down {
            return;
        }
        let id: WorkerId = self.worker_ids.next();
        self.ready = false;
        self.workers_started += 1;

        match WorkerHandle::spawn(id, self.context.clone(), self.events_tx.clone()) {
            Ok(handle) => {
                info!(worker = %id, "worker starting");
                self.worker = Some(handle);
                self.failed_spawn = None;
            }
            Err(e) => {
                error!(worker = %id, error = %e, "failed to start worker");
                self.worker = None;
                self.report_spawn_failure(id, e.to_string());
            }
        }
    }

    fn report_spawn_failure(&mut self, id: WorkerId, message: String) {
        self.failed_spawn = Some(id);
        let events_tx = self.events_tx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(SPAWN_RETRY_DELAY).await;
            let event = SupervisorEvent {
                worker: id,
                event: WorkerEvent::Error { message },
            };
            // ignore send error: the supervisor is gone
            let _ = events_tx.send(event).await;
        });
    }

    pub fn submit(&mut self, payload: serde_json::Value) -> TaskId {
        self.purge_expired();
        let id = self.queue.enqueue(payload);
        debug!(task_id = %id, "task submitted");
        self.dispatch();
        id
    }

    pub fn status(&mut self, id: TaskId) -> Option<TaskView> {
        self.purge_expired();
        self.queue.find(id).map(|record| record.view())
    }

    /// Hand the oldest pending task to the worker.
    ///
    /// No-op while shutting down, while the worker is missing or not yet
    /// ready, while a task is already in flight, or when nothing is pending.
    pub fn dispatch(&mut self) {
        if self.shutting_down || self.in_flight.is_some() || !self.ready {
            return;
        }
        let Some(worker) = &self.worker else {
            return;
        };
        let Some(next) = self.queue.next_pending() else {
            return;
        };

        let dispatch = Dispatch {
            task_id: next.id,
            payload: next.payload.clone(),
        };
        let task_id = dispatch.task_id;

        if let Err(e) = worker.send(dispatch) {
            // The worker is on its way out; its Exit/Error event will arrive
            // and replace it. Leave the task pending.
            warn!(worker = %worker.id(), %task_id, error = %e, "dispatch failed");
            self.ready = false;
            return;
        }
        if let Err(e) = self.queue.mark_running(task_id) {
            error!(%task_id, error = %e, "dispatched task could not be marked running");
            return;
        }

        let deadline = self.dispatch_timeout.map(|t| Instant::now() + t);
        self.in_flight = Some(InFlight {
            task: task_id,
            deadline,
        });
        if deadline.is_some() {
            self.deadline_changed.notify_one();
        }
        info!(worker = %worker.id(), %task_id, "task dispatched");
    }

    pub fn handle_event(&mut self, event: SupervisorEvent) {
        let current = self.worker_id().or(self.failed_spawn);
        if current != Some(event.worker) {
            self.stale_events += 1;
            debug!(
                worker = %event.worker,
                event = ?event.event,
                "dropping event from replaced worker"
            );
            return;
        }

        match event.event {
            WorkerEvent::Ready => {
                debug!(worker = %event.worker, "worker ready");
                self.ready = true;
                self.dispatch();
            }
            WorkerEvent::Message(message) => self.on_worker_message(message),
            WorkerEvent::Error { message } => self.on_worker_down(&message),
            WorkerEvent::Exit { code } => {
                self.on_worker_down(&format!("worker exited with code {code}"))
            }
        }
        self.purge_expired();
    }

    /// Apply a task result, free the slot, dispatch the next task.
    pub fn on_worker_message(&mut self, message: WorkerMessage) {
        let task_id = message.task_id();
        if self.in_flight.map(|f| f.task) != Some(task_id) {
            self.stale_events += 1;
            warn!(%task_id, "dropping message for a task that is not in flight");
            return;
        }

        let applied = match message {
            WorkerMessage::Completed { result, .. } => {
                info!(%task_id, "task completed");
                self.queue.mark_completed(task_id, result)
            }
            WorkerMessage::Failed { error, .. } => {
                warn!(%task_id, %error, "task failed");
                self.queue.mark_failed(task_id, error)
            }
        };
        if let Err(e) = applied {
            error!(%task_id, error = %e, "could not record task outcome");
        }

        self.in_flight = None;
        self.dispatch();
    }

    /// The worker is gone: requeue whatever it was running, replace it, and
    /// resume dispatching.
    pub fn on_worker_down(&mut self, reason: &str) {
        self.worker_failures += 1;
        warn!(worker = ?self.worker_id(), %reason, "worker terminated");

        if let Some(worker) = self.worker.take() {
            // make sure an abandoned run does not keep going
            worker.terminate();
        }
        self.failed_spawn = None;
        self.ready = false;
        self.in_flight = None;

        if let Some(task_id) = self.queue.running().map(|r| r.id) {
            match self.queue.mark_crashed(task_id, self.crash_policy) {
                Ok(TaskStatus::Pending) => info!(%task_id, "task requeued after worker crash"),
                Ok(status) => warn!(%task_id, %status, "task gave up after repeated worker crashes"),
                Err(e) => error!(%task_id, error = %e, "could not requeue task"),
            }
        }

        self.spawn_worker();
        self.dispatch();
    }

    /// Called when the in-flight deadline passes. Terminates the worker and
    /// handles it like a crash; its late events carry the old worker id.
    pub fn on_dispatch_timeout(&mut self, now: Instant) {
        let Some(flight) = self.in_flight else {
            return;
        };
        if flight.deadline.is_none_or(|d| d > now) {
            return;
        }

        warn!(task_id = %flight.task, "task exceeded dispatch timeout, replacing worker");
        self.on_worker_down("dispatch timeout");
    }

    /// Stop dispatching and stop replacing workers.
    pub fn begin_shutdown(&mut self) {
        info!(in_flight = self.in_flight.is_some(), "supervisor shutting down");
        self.shutting_down = true;
    }

    pub fn take_worker(&mut self) -> Option<WorkerHandle> {
        self.ready = false;
        self.worker.take()
    }

    fn purge_expired(&mut self) {
        let purged = self.queue.purge_finished(self.retention, Instant::now());
        if !purged.is_empty() {
            debug!(count = purged.len(), "purged finished tasks");
        }
    }
}
