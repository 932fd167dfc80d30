use std::sync::Arc;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use super::{MemoryProbe, PauseGate};
use crate::config::BackpressureConfig;

/// What the monitor did while it ran.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MonitorStats {
    pub samples: u64,
    pub pauses: u64,
}

/// Periodic memory sampler bound to one chunk processor run.
///
/// Each tick reads the probe. Above the ceiling it closes the gate and
/// schedules a resume `pause_cooldown` later. The resume is unconditional: the
/// probe is not consulted again before reopening, and ticks that land inside
/// a pause are only logged.
pub struct BackpressureMonitor;

impl BackpressureMonitor {
    /// Start sampling. The first sample is taken one `sample_interval` from now.
    pub fn spawn(
        config: BackpressureConfig,
        probe: Arc<dyn MemoryProbe>,
        gate: PauseGate,
    ) -> MonitorHandle {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let join = tokio::spawn(monitor_loop(config, probe, gate, shutdown_rx));
        MonitorHandle { shutdown_tx, join }
    }
}

/// Handle to a running monitor.
///
/// Dropping the handle also stops the monitor (its shutdown channel closes),
/// so the periodic timer cannot outlive the run that started it.
pub struct MonitorHandle {
    shutdown_tx: watch::Sender<bool>,
    join: JoinHandle<MonitorStats>,
}

impl MonitorHandle {
    /// Stop sampling and wait for the loop to exit. Reopens the gate.
    pub async fn stop(self) -> MonitorStats {
        // ignore send error: the loop may already be gone
        let _ = self.shutdown_tx.send(true);
        match self.join.await {
            Ok(stats) => stats,
            Err(e) => {
                warn!(error = %e, "memory monitor ended abnormally, stats lost");
                MonitorStats::default()
            }
        }
    }
}

async fn monitor_loop(
    config: BackpressureConfig,
    probe: Arc<dyn MemoryProbe>,
    gate: PauseGate,
    mut shutdown_rx: watch::Receiver<bool>,
) -> MonitorStats {
    let mut stats = MonitorStats::default();
    let mut ticker = tokio::time::interval_at(
        Instant::now() + config.sample_interval,
        config.sample_interval,
    );
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut resume_at: Option<Instant> = None;

    loop {
        tokio::select! {
            _ = shutdown_rx.changed() => break,

            _ = sleep_until_opt(resume_at) => {
                resume_at = None;
                gate.resume();
                info!("memory cool-down elapsed, resuming chunk production");
            }

            _ = ticker.tick() => {
                stats.samples += 1;
                let Some(used) = probe.sample() else {
                    debug!("memory probe returned no sample");
                    continue;
                };
                debug!(resident_bytes = used, "memory sample");

                if used <= config.memory_ceiling_bytes {
                    continue;
                }
                if resume_at.is_some() {
                    debug!(resident_bytes = used, "still above ceiling while paused");
                    continue;
                }

                gate.pause();
                stats.pauses += 1;
                resume_at = Some(Instant::now() + config.pause_cooldown);
                warn!(
                    resident_bytes = used,
                    ceiling_bytes = config.memory_ceiling_bytes,
                    cooldown_ms = config.pause_cooldown.as_millis() as u64,
                    "memory above ceiling, pausing chunk production"
                );
            }
        }
    }

    gate.resume();
    stats
}

/// Sleep until `deadline`, or forever when there is none.
pub(crate) async fn sleep_until_opt(deadline: Option<Instant>) {
    match deadline {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}
