use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use serde::Serialize;
use shuttle_core::chunk::ReportPlanner;
use shuttle_core::config::SupervisorConfig;
use shuttle_core::observability::SupervisorSnapshot;
use shuttle_core::{SupervisorBuilder, TaskId, TaskView};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Runs table report jobs through a single background worker and prints their
/// final status as JSON.
#[derive(Parser, Debug)]
#[command(name = "shuttle")]
struct Args {
    /// JSON file with a supervisor config. Flags below override its values.
    #[arg(long, short, env = "SHUTTLE_CONFIG")]
    config: Option<PathBuf>,

    /// Directory the reports are written to.
    #[arg(long, short, default_value = ".", env = "SHUTTLE_OUTPUT_DIR")]
    output_dir: PathBuf,

    /// How many report jobs to submit.
    #[arg(long, short, default_value = "1", env = "SHUTTLE_JOBS")]
    jobs: u32,

    /// Rows per report.
    #[arg(long, short, default_value = "86400", env = "SHUTTLE_ROWS")]
    rows: u64,

    #[arg(long, env = "SHUTTLE_CHUNK_SIZE")]
    chunk_size: Option<u64>,

    /// Pause generation while resident memory is above this many bytes.
    #[arg(long, env = "SHUTTLE_MEMORY_CEILING_BYTES")]
    memory_ceiling_bytes: Option<u64>,

    #[arg(long, env = "SHUTTLE_SAMPLE_INTERVAL_MS")]
    sample_interval_ms: Option<u64>,

    #[arg(long, env = "SHUTTLE_PAUSE_COOLDOWN_MS")]
    pause_cooldown_ms: Option<u64>,

    /// How long finished tasks stay visible to status queries.
    #[arg(long, env = "SHUTTLE_RETENTION_MS")]
    retention_ms: Option<u64>,

    /// Fail a task after its worker crashed this many times. Unlimited if unset.
    #[arg(long, env = "SHUTTLE_MAX_CRASH_REQUEUES")]
    max_crash_requeues: Option<u32>,

    /// Replace the worker when one task runs longer than this.
    #[arg(long, env = "SHUTTLE_DISPATCH_TIMEOUT_MS")]
    dispatch_timeout_ms: Option<u64>,

    /// How often to poll task status.
    #[arg(long, default_value = "500", env = "SHUTTLE_POLL_INTERVAL_MS")]
    poll_interval_ms: u64,
}

impl Args {
    fn supervisor_config(&self) -> Result<SupervisorConfig> {
        let mut config = match &self.config {
            Some(path) => {
                let raw = std::fs::read_to_string(path)
                    .with_context(|| format!("reading config file {}", path.display()))?;
                serde_json::from_str(&raw)
                    .with_context(|| format!("parsing config file {}", path.display()))?
            }
            None => SupervisorConfig::default(),
        };

        if let Some(chunk_size) = self.chunk_size {
            config.chunk_size = chunk_size;
        }
        if let Some(bytes) = self.memory_ceiling_bytes {
            config.backpressure.memory_ceiling_bytes = bytes;
        }
        if let Some(ms) = self.sample_interval_ms {
            config.backpressure.sample_interval = Duration::from_millis(ms);
        }
        if let Some(ms) = self.pause_cooldown_ms {
            config.backpressure.pause_cooldown = Duration::from_millis(ms);
        }
        if let Some(ms) = self.retention_ms {
            config.retention = Duration::from_millis(ms);
        }
        if let Some(max) = self.max_crash_requeues {
            config.max_crash_requeues = Some(max);
        }
        if let Some(ms) = self.dispatch_timeout_ms {
            config.dispatch_timeout = Some(Duration::from_millis(ms));
        }

        config.validate()?;
        Ok(config)
    }
}

#[derive(Debug, Serialize)]
struct RunSummary {
    tasks: Vec<TaskReport>,
    supervisor: SupervisorSnapshot,
}

#[derive(Debug, Serialize)]
struct TaskReport {
    id: TaskId,
    /// `None` once the record has been purged.
    view: Option<TaskView>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "shuttle_core=info,shuttle_cli=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();
    let config = args.supervisor_config()?;
    tracing::info!(?config, "configuration loaded");

    std::fs::create_dir_all(&args.output_dir)
        .with_context(|| format!("creating output dir {}", args.output_dir.display()))?;

    let supervisor = SupervisorBuilder::new()
        .config(config)
        .planner(ReportPlanner::new(&args.output_dir))
        .build()?;

    let mut ids = Vec::with_capacity(args.jobs as usize);
    for n in 0..args.jobs {
        let payload = serde_json::json!({
            "rows": args.rows,
            "name": format!("report-{n}.csv"),
        });
        let id = supervisor.submit(payload).await?;
        tracing::info!(task_id = %id, "submitted");
        ids.push(id);
    }

    let poll = Duration::from_millis(args.poll_interval_ms.max(1));
    let mut reports: Vec<TaskReport> = Vec::with_capacity(ids.len());
    let interrupted = tokio::select! {
        res = tokio::signal::ctrl_c() => {
            res?;
            tracing::warn!("interrupted, shutting down");
            true
        }
        collected = wait_for_all(&supervisor, &ids, poll) => {
            reports = collected;
            false
        }
    };

    let snapshot = supervisor.snapshot().await;
    if interrupted {
        for &id in &ids {
            reports.push(TaskReport {
                id,
                view: supervisor.status(id).await,
            });
        }
    }
    supervisor.shutdown_and_join().await;

    let summary = RunSummary {
        tasks: reports,
        supervisor: snapshot,
    };
    println!("{}", serde_json::to_string_pretty(&summary)?);

    tracing::info!("shutdown complete");
    Ok(())
}

/// Poll until every task is finished (or purged), keeping the last view seen.
async fn wait_for_all(
    supervisor: &shuttle_core::Supervisor,
    ids: &[TaskId],
    poll: Duration,
) -> Vec<TaskReport> {
    let mut last: Vec<Option<TaskView>> = vec![None; ids.len()];
    let mut done = vec![false; ids.len()];

    while done.iter().any(|d| !d) {
        for (i, &id) in ids.iter().enumerate() {
            if done[i] {
                continue;
            }
            match supervisor.status(id).await {
                Some(view) => {
                    done[i] = view.is_finished();
                    if done[i] {
                        tracing::info!(task_id = %id, status = %view.status, "finished");
                    }
                    last[i] = Some(view);
                }
                None => done[i] = true,
            }
        }
        if done.iter().any(|d| !d) {
            tokio::time::sleep(poll).await;
        }
    }

    ids.iter()
        .zip(last)
        .map(|(&id, view)| TaskReport { id, view })
        .collect()
}
