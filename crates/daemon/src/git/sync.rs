// One synchronize cycle: fetch, merge the remote branch, settle the merge
// outcome, push. Runs with the exclusive operation slot held.

use std::sync::atomic::{AtomicBool, Ordering};

use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::git::merge::{
    classify, log_outcome, resolve_conflicts, MergeDisposition, MergeOptions, MergeOutcome,
};
use crate::git::recovery::recover_working_copy;
use crate::git::retry::RetryPolicy;
use crate::git::working_copy::WorkingCopy;
use crate::git::worker::{CommandExecutor, GitWorkerError};
use crate::store::controller::SlotError;

/// Set whenever a local commit lands, cleared only by a confirmed push.
#[derive(Debug, Default)]
pub struct PendingCommits(AtomicBool);

impl PendingCommits {
    pub fn new(initial: bool) -> Self {
        Self(AtomicBool::new(initial))
    }

    pub fn mark(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_set(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    fn clear(&self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncReport {
    SkippedNoRemote,
    SkippedNothingPending,
    /// Local history reached the remote. `rounds` counts fetch/merge/push
    /// passes, more than one when a push was rejected.
    Pushed { rounds: u32, merge: Option<MergeOutcome> },
    /// The merge could not proceed; the working copy was restored and the
    /// commits stay pending for the next cycle.
    Recovered { outcome: MergeOutcome },
    /// Like `Recovered`, but an operator has to repair the remote first.
    Escalated { outcome: MergeOutcome },
}

#[derive(Debug, Error)]
pub enum SyncError {
    #[error(transparent)]
    Slot(#[from] SlotError),

    #[error("fetch failed: {0}")]
    Fetch(#[source] GitWorkerError),

    #[error("merge failed: {0}")]
    Merge(#[source] GitWorkerError),

    #[error("conflict resolution failed: {0}")]
    Resolve(#[source] GitWorkerError),

    #[error("working copy recovery failed: {0}")]
    Recovery(#[source] GitWorkerError),

    #[error("push failed: {0}")]
    Push(#[source] GitWorkerError),

    #[error("push rejected in all {rounds} rounds, remote keeps moving")]
    StillRejected { rounds: u32 },
}

enum MergeStep {
    Ready(Option<MergeOutcome>),
    Stop(SyncReport),
}

/// Run the cycle. The caller holds the exclusive slot and has checked that
/// a remote is configured and commits are pending.
pub fn run_cycle<E: CommandExecutor>(
    copy: &WorkingCopy<E>,
    pending: &PendingCommits,
    remote_write: &RetryPolicy,
) -> Result<SyncReport, SyncError> {
    let rounds = remote_write.attempts();
    for round in 1..=rounds {
        remote_write
            .run("fetch", || copy.fetch(), GitWorkerError::is_transient_remote)
            .map_err(SyncError::Fetch)?;

        let merge = match merge_remote(copy)? {
            MergeStep::Ready(merge) => merge,
            MergeStep::Stop(report) => return Ok(report),
        };

        match remote_write.run("push", || copy.push(), GitWorkerError::is_transient_remote) {
            Ok(()) => {
                pending.clear();
                info!(branch = %copy.branch(), round, "pushed local commits");
                return Ok(SyncReport::Pushed { rounds: round, merge });
            }
            Err(error) if error.is_push_rejected() => {
                warn!(round, max_rounds = rounds, "push rejected, fetching again");
            }
            Err(error) => return Err(SyncError::Push(error)),
        }
    }
    Err(SyncError::StillRejected { rounds })
}

fn merge_remote<E: CommandExecutor>(copy: &WorkingCopy<E>) -> Result<MergeStep, SyncError> {
    let worker = copy.worker();
    let upstream = match copy.remote_tracking_ref() {
        Some(upstream) => upstream,
        None => return Ok(MergeStep::Ready(None)),
    };
    if !copy.remote_branch_exists().map_err(SyncError::Merge)? {
        debug!(upstream = %upstream, "remote branch does not exist yet, push will create it");
        return Ok(MergeStep::Ready(None));
    }

    let options = MergeOptions::reconcile(format!("Automatic merge of {upstream}"));
    let outcome = worker.merge(&upstream, &options).map_err(SyncError::Merge)?;
    log_outcome(&outcome);

    match classify(&outcome) {
        MergeDisposition::Clean => Ok(MergeStep::Ready(Some(outcome))),
        MergeDisposition::ResolveConflicts(paths) => match resolve_conflicts(worker, &paths) {
            Ok(_) => Ok(MergeStep::Ready(Some(outcome))),
            Err(resolve_error) => {
                if let Err(recovery_error) = recover_working_copy(worker) {
                    error!(
                        error = %recovery_error,
                        "recovery after failed conflict resolution failed"
                    );
                }
                Err(SyncError::Resolve(resolve_error))
            }
        },
        MergeDisposition::Recover => {
            recover_working_copy(worker).map_err(SyncError::Recovery)?;
            if let MergeOutcome::CheckoutConflict { paths } = &outcome {
                let blocking: Vec<&String> =
                    paths.iter().filter(|path| !path.starts_with("instances/")).collect();
                if !blocking.is_empty() {
                    warn!(paths = ?blocking, "untracked files block the merge");
                }
            }
            Ok(MergeStep::Stop(SyncReport::Recovered { outcome }))
        }
        MergeDisposition::Escalate => {
            recover_working_copy(worker).map_err(SyncError::Recovery)?;
            Ok(MergeStep::Stop(SyncReport::Escalated { outcome }))
        }
    }
}
