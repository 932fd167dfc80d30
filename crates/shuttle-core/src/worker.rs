//! Worker execution context.
//!
//! A worker is a dedicated OS thread running its own single-threaded tokio
//! runtime, so a long generation run never competes with the supervisor's
//! executor. It takes one `Dispatch` at a time, reports one `WorkerMessage`
//! per dispatch, and announces its own lifecycle (`Ready`, then exactly one of
//! `Error` or `Exit`) on the shared event channel.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::thread;

use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::backpressure::{BackpressureMonitor, MemoryProbe, PauseGate};
use crate::chunk::{ChunkProcessor, JobPlanner, PlanError, ProcessError};
use crate::config::BackpressureConfig;
use crate::domain::{Dispatch, SupervisorEvent, WorkerEvent, WorkerId, WorkerMessage};
use crate::signal::{AbortHandle, AbortSignal, abort_pair};

/// Exit code when the dispatch channel closed.
pub const EXIT_CLEAN: i32 = 0;
/// Exit code when the worker was told to abort.
pub const EXIT_ABORTED: i32 = 1;

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("{0} already holds a dispatch")]
    Busy(WorkerId),

    #[error("{0} is gone")]
    Gone(WorkerId),

    #[error("failed to start worker thread: {0}")]
    Spawn(#[from] std::io::Error),
}

/// Everything a worker needs to run tasks. Shared by every generation.
#[derive(Clone)]
pub struct WorkerContext {
    pub planner: Arc<dyn JobPlanner>,
    pub probe: Arc<dyn MemoryProbe>,
    pub chunk_size: u64,
    pub backpressure: BackpressureConfig,
}

/// Supervisor-side handle to one worker generation.
///
/// Dropping the handle closes the dispatch channel; an idle worker then exits
/// with `EXIT_CLEAN`. The thread itself is detached unless `join` is called.
pub struct WorkerHandle {
    id: WorkerId,
    dispatch_tx: mpsc::Sender<Dispatch>,
    abort: AbortHandle,
    thread: Option<thread::JoinHandle<()>>,
}

impl std::fmt::Debug for WorkerHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerHandle").field("id", &self.id).finish()
    }
}

impl WorkerHandle {
    /// Start a new worker thread. It reports `Ready` once it can take work.
    pub fn spawn(
        id: WorkerId,
        context: WorkerContext,
        events: mpsc::Sender<SupervisorEvent>,
    ) -> Result<Self, WorkerError> {
        let (dispatch_tx, dispatch_rx) = mpsc::channel(1);
        let (abort, signal) = abort_pair();

        let thread = thread::Builder::new()
            .name(format!("shuttle-{id}"))
            .spawn(move || run_thread(id, context, dispatch_rx, signal, events))?;

        debug!(worker = %id, "worker thread started");
        Ok(Self {
            id,
            dispatch_tx,
            abort,
            thread: Some(thread),
        })
    }

    pub fn id(&self) -> WorkerId {
        self.id
    }

    /// Hand the worker its next task without waiting.
    pub fn send(&self, dispatch: Dispatch) -> Result<(), WorkerError> {
        self.dispatch_tx.try_send(dispatch).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => WorkerError::Busy(self.id),
            mpsc::error::TrySendError::Closed(_) => WorkerError::Gone(self.id),
        })
    }

    /// Ask the worker to stop, abandoning any in-flight run.
    pub fn terminate(&self) {
        self.abort.abort();
    }

    /// Close the dispatch channel and block until the thread exits.
    ///
    /// Blocks the caller; call it from `spawn_blocking` inside a runtime.
    pub fn join(mut self) {
        let Some(thread) = self.thread.take() else {
            return;
        };
        let id = self.id;
        drop(self);
        if thread.join().is_err() {
            warn!(worker = %id, "worker thread panicked outside its catch boundary");
        }
    }
}

fn run_thread(
    id: WorkerId,
    context: WorkerContext,
    dispatch_rx: mpsc::Receiver<Dispatch>,
    abort: AbortSignal,
    events: mpsc::Sender<SupervisorEvent>,
) {
    let outcome = std::panic::catch_unwind(AssertUnwindSafe(|| {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?;
        Ok::<i32, std::io::Error>(runtime.block_on(worker_loop(
            id,
            &context,
            dispatch_rx,
            &abort,
            &events,
        )))
    }));

    let event = match outcome {
        Ok(Ok(code)) => WorkerEvent::Exit { code },
        Ok(Err(e)) => WorkerEvent::Error {
            message: format!("worker runtime failed to start: {e}"),
        },
        Err(panic) => WorkerEvent::Error {
            message: panic_message(panic.as_ref()),
        },
    };
    if let WorkerEvent::Error { message } = &event {
        error!(worker = %id, %message, "worker died");
    }

    // ignore send error: the supervisor may already be gone
    let _ = events.blocking_send(SupervisorEvent { worker: id, event });
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        format!("worker panicked: {s}")
    } else if let Some(s) = panic.downcast_ref::<String>() {
        format!("worker panicked: {s}")
    } else {
        "worker panicked".to_string()
    }
}

async fn worker_loop(
    id: WorkerId,
    context: &WorkerContext,
    mut dispatch_rx: mpsc::Receiver<Dispatch>,
    abort: &AbortSignal,
    events: &mpsc::Sender<SupervisorEvent>,
) -> i32 {
    let ready = SupervisorEvent {
        worker: id,
        event: WorkerEvent::Ready,
    };
    if events.send(ready).await.is_err() {
        return EXIT_CLEAN;
    }

    loop {
        let dispatch = tokio::select! {
            dispatch = dispatch_rx.recv() => match dispatch {
                Some(dispatch) => dispatch,
                None => return EXIT_CLEAN,
            },
            _ = abort.raised() => return EXIT_ABORTED,
        };

        let task_id = dispatch.task_id;
        info!(worker = %id, %task_id, "task started");

        let message = match execute(context, dispatch, abort).await {
            Ok(result) => {
                info!(worker = %id, %task_id, "task completed");
                WorkerMessage::Completed { task_id, result }
            }
            Err(TaskError::Process(ProcessError::Aborted { cursor })) => {
                warn!(worker = %id, %task_id, cursor, "task aborted");
                return EXIT_ABORTED;
            }
            Err(e) => {
                warn!(worker = %id, %task_id, error = %e, "task failed");
                WorkerMessage::Failed {
                    task_id,
                    error: e.to_string(),
                }
            }
        };

        let event = SupervisorEvent {
            worker: id,
            event: WorkerEvent::Message(message),
        };
        if events.send(event).await.is_err() {
            return EXIT_CLEAN;
        }
    }
}

#[derive(Debug, Error)]
enum TaskError {
    #[error(transparent)]
    Plan(#[from] PlanError),

    #[error(transparent)]
    Process(#[from] ProcessError),
}

/// Plan, then run the chunk loop under a fresh backpressure monitor.
async fn execute(
    context: &WorkerContext,
    dispatch: Dispatch,
    abort: &AbortSignal,
) -> Result<serde_json::Value, TaskError> {
    let plan = context
        .planner
        .plan(dispatch.task_id, &dispatch.payload)
        .await?;

    let gate = PauseGate::new();
    let monitor = BackpressureMonitor::spawn(
        context.backpressure.clone(),
        context.probe.clone(),
        gate.clone(),
    );

    let mut processor = ChunkProcessor::new(plan.total_units, context.chunk_size);
    let result = processor.run(plan.sink, &gate, abort).await;

    let stats = monitor.stop().await;
    debug!(
        task_id = %dispatch.task_id,
        samples = stats.samples,
        pauses = stats.pauses,
        units = processor.cursor(),
        "backpressure monitor stopped"
    );

    Ok(result?.output)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::json;
    use std::time::Duration;
    use ulid::Ulid;

    use crate::chunk::{ChunkSink, JobPlan, SinkError, UnitRange};
    use crate::domain::TaskId;

    struct NullProbe;

    impl MemoryProbe for NullProbe {
        fn sample(&self) -> Option<u64> {
            Some(0)
        }
    }

    /// Sink whose behavior is picked by the payload's "mode".
    struct ModeSink {
        mode: String,
        appended: u64,
    }

    #[async_trait]
    impl ChunkSink for ModeSink {
        async fn append(&mut self, chunk: UnitRange) -> Result<(), SinkError> {
            match self.mode.as_str() {
                "panic" => panic!("sink exploded"),
                "fail" => return Err(SinkError::Other("no space left".into())),
                "hang" => std::future::pending::<()>().await,
                _ => {}
            }
            self.appended += chunk.len();
            Ok(())
        }

        async fn finalize(self: Box<Self>) -> Result<serde_json::Value, SinkError> {
            Ok(json!({ "units": self.appended }))
        }

        async fn discard(self: Box<Self>) {}
    }

    struct ModePlanner;

    #[async_trait]
    impl JobPlanner for ModePlanner {
        async fn plan(
            &self,
            _task_id: TaskId,
            payload: &serde_json::Value,
        ) -> Result<JobPlan, PlanError> {
            let mode = payload["mode"].as_str().unwrap_or("ok").to_string();
            if mode == "reject" {
                return Err(PlanError::InvalidPayload("rejected".into()));
            }
            Ok(JobPlan {
                total_units: 1_000,
                sink: Box::new(ModeSink { mode, appended: 0 }),
            })
        }
    }

    fn context() -> WorkerContext {
        WorkerContext {
            planner: Arc::new(ModePlanner),
            probe: Arc::new(NullProbe),
            chunk_size: 300,
            backpressure: BackpressureConfig::default(),
        }
    }

    fn dispatch(mode: &str) -> Dispatch {
        Dispatch {
            task_id: TaskId::from_ulid(Ulid::new()),
            payload: json!({ "mode": mode }),
        }
    }

    async fn next_event(rx: &mut mpsc::Receiver<SupervisorEvent>) -> SupervisorEvent {
        tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("timed out waiting for worker event")
            .expect("event channel closed")
    }

    fn spawn_worker() -> (WorkerHandle, mpsc::Receiver<SupervisorEvent>) {
        let (tx, rx) = mpsc::channel(16);
        let id = WorkerId::from_ulid(Ulid::new());
        let handle = WorkerHandle::spawn(id, context(), tx).unwrap();
        (handle, rx)
    }

    #[tokio::test]
    async fn reports_ready_then_one_message_per_dispatch() {
        let (worker, mut rx) = spawn_worker();

        let ready = next_event(&mut rx).await;
        assert_eq!(ready.worker, worker.id());
        assert_eq!(ready.event, WorkerEvent::Ready);

        for mode in ["ok", "fail", "reject", "ok"] {
            let d = dispatch(mode);
            worker.send(d.clone()).unwrap();
            let event = next_event(&mut rx).await;
            let WorkerEvent::Message(msg) = event.event else {
                panic!("expected a message, got {:?}", event.event);
            };
            assert_eq!(msg.task_id(), d.task_id);
            match (mode, msg) {
                ("ok", WorkerMessage::Completed { result, .. }) => {
                    assert_eq!(result, json!({ "units": 1_000 }));
                }
                ("fail", WorkerMessage::Failed { error, .. }) => {
                    assert!(error.contains("no space left"), "{error}");
                }
                ("reject", WorkerMessage::Failed { error, .. }) => {
                    assert!(error.contains("invalid payload"), "{error}");
                }
                (mode, other) => panic!("unexpected outcome for {mode}: {other:?}"),
            }
        }
    }

    #[tokio::test]
    async fn panic_becomes_an_error_event() {
        let (worker, mut rx) = spawn_worker();
        assert_eq!(next_event(&mut rx).await.event, WorkerEvent::Ready);

        worker.send(dispatch("panic")).unwrap();
        let event = next_event(&mut rx).await;
        assert_eq!(event.worker, worker.id());
        match event.event {
            WorkerEvent::Error { message } => assert!(message.contains("sink exploded")),
            other => panic!("expected Error, got {other:?}"),
        }
        assert!(matches!(
            worker.send(dispatch("ok")),
            Err(WorkerError::Gone(_))
        ));
    }

    #[tokio::test]
    async fn dropping_the_handle_exits_cleanly() {
        let (worker, mut rx) = spawn_worker();
        assert_eq!(next_event(&mut rx).await.event, WorkerEvent::Ready);

        drop(worker);
        assert_eq!(
            next_event(&mut rx).await.event,
            WorkerEvent::Exit { code: EXIT_CLEAN }
        );
    }

    #[tokio::test]
    async fn terminate_abandons_a_stuck_run() {
        let (worker, mut rx) = spawn_worker();
        assert_eq!(next_event(&mut rx).await.event, WorkerEvent::Ready);

        worker.send(dispatch("hang")).unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        worker.terminate();

        // no task message for the abandoned run, only the exit
        assert_eq!(
            next_event(&mut rx).await.event,
            WorkerEvent::Exit { code: EXIT_ABORTED }
        );
    }

    #[tokio::test]
    async fn terminate_while_idle_exits() {
        let (worker, mut rx) = spawn_worker();
        assert_eq!(next_event(&mut rx).await.event, WorkerEvent::Ready);

        worker.terminate();
        assert_eq!(
            next_event(&mut rx).await.event,
            WorkerEvent::Exit { code: EXIT_ABORTED }
        );
    }

    #[tokio::test]
    async fn join_waits_for_the_thread() {
        let (worker, mut rx) = spawn_worker();
        assert_eq!(next_event(&mut rx).await.event, WorkerEvent::Ready);

        tokio::task::spawn_blocking(move || worker.join())
            .await
            .unwrap();
        assert_eq!(
            next_event(&mut rx).await.event,
            WorkerEvent::Exit { code: EXIT_CLEAN }
        );
    }
}
