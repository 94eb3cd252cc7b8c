// Periodic synchronization.
//
// After an initial delay the loop runs one synchronize cycle, then waits a
// fixed period before the next, so cycles never overlap. Every failure is
// logged and the loop carries on. Shutdown lets an in-flight cycle finish.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, trace, warn};

use crate::git::sync::{SyncError, SyncReport};

/// Something that can run one synchronize cycle. Blocking; the scheduler
/// calls it from the blocking pool.
pub trait SyncTarget: Send + Sync + 'static {
    fn synchronize(&self) -> Result<SyncReport, SyncError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchedulerConfig {
    pub initial_delay: Duration,
    pub period: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self { initial_delay: Duration::from_secs(10), period: Duration::from_secs(30) }
    }
}

/// Handle for the scheduler task. Dropping it detaches the task; call
/// [`SyncSchedulerHandle::shutdown`] to stop it.
pub struct SyncSchedulerHandle {
    task: JoinHandle<()>,
    shutdown_tx: watch::Sender<bool>,
}

impl SyncSchedulerHandle {
    /// Stop the loop and wait for a running cycle to complete.
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(true);
        if let Err(error) = self.task.await {
            warn!(%error, "sync scheduler task ended abnormally");
        }
    }
}

pub fn start_sync_scheduler<T: SyncTarget>(
    config: SchedulerConfig,
    target: Arc<T>,
) -> SyncSchedulerHandle {
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let task = tokio::spawn(scheduler_loop(config, target, shutdown_rx));
    info!(
        initial_delay_ms = config.initial_delay.as_millis() as u64,
        period_ms = config.period.as_millis() as u64,
        "sync scheduler started"
    );
    SyncSchedulerHandle { task, shutdown_tx }
}

async fn scheduler_loop<T: SyncTarget>(
    config: SchedulerConfig,
    target: Arc<T>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let mut delay = config.initial_delay;
    loop {
        tokio::select! {
            _ = tokio::time::sleep(delay) => {},
            _ = shutdown_rx.changed() => {
                debug!("sync scheduler shutting down");
                return;
            }
        }

        let cycle_target = target.clone();
        match tokio::task::spawn_blocking(move || cycle_target.synchronize()).await {
            Ok(Ok(report)) => log_report(&report),
            Ok(Err(error)) => warn!(%error, "synchronize cycle failed, retrying next period"),
            Err(error) => error!(%error, "synchronize cycle panicked"),
        }
        delay = config.period;
    }
}

fn log_report(report: &SyncReport) {
    match report {
        SyncReport::SkippedNoRemote => trace!("no remote configured, sync skipped"),
        SyncReport::SkippedNothingPending => trace!("nothing to push, sync skipped"),
        SyncReport::Pushed { rounds, .. } => debug!(rounds, "sync cycle complete"),
        SyncReport::Recovered { outcome } => {
            warn!(outcome = ?outcome, "working copy restored, local commits remain pending")
        }
        SyncReport::Escalated { outcome } => error!(
            outcome = ?outcome,
            "sync halted until the remote is repaired, local commits remain pending"
        ),
    }
}
