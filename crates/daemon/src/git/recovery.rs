// Restore the working copy to its last commit after an unresolvable merge
// or an interrupted mutation.
//
// Tracked changes and half-applied merge state are dropped. Untracked files
// are removed only under `instances/`, the tree the broker writes; anything
// an operator left elsewhere (an uncommitted catalog, notes) survives.
// Committed history is never touched.

use gitbroker_common::path::layout::INSTANCES_DIR;
use tracing::info;

use crate::git::worker::{CommandExecutor, GitWorker, GitWorkerError};

pub fn recover_working_copy<E: CommandExecutor>(
    worker: &GitWorker<E>,
) -> Result<(), GitWorkerError> {
    if !worker.ref_exists("HEAD")? {
        // Nothing committed yet: the known-good state is an empty record tree.
        worker.uncache_paths(&[INSTANCES_DIR])?;
        worker.clean_paths(&[INSTANCES_DIR])?;
        info!(repo = %worker.repo_path().display(), "record tree emptied, no commits yet");
        return Ok(());
    }

    worker.reset_hard("HEAD")?;
    worker.clean_paths(&[INSTANCES_DIR])?;
    info!(repo = %worker.repo_path().display(), "working copy restored to HEAD");
    Ok(())
}

/// Put `paths` back to their HEAD state: staged and unstaged edits are
/// undone, files HEAD does not know are removed. Everything outside `paths`
/// is left alone.
pub fn restore_paths<E: CommandExecutor, S: AsRef<str>>(
    worker: &GitWorker<E>,
    paths: &[S],
) -> Result<(), GitWorkerError> {
    if paths.is_empty() {
        return Ok(());
    }
    if worker.ref_exists("HEAD")? {
        worker.reset_paths(paths)?;
    } else {
        worker.uncache_paths(paths)?;
    }
    worker.clean_paths(paths)?;
    let tracked = worker.tracked_files(paths)?;
    if !tracked.is_empty() {
        worker.checkout_index(&tracked)?;
    }
    info!(paths = paths.len(), "restored mutated paths to HEAD");
    Ok(())
}

/// Whether the working copy holds leftovers of an interrupted merge or
/// mutation. Untracked files outside the record tree do not count.
pub fn needs_recovery<E: CommandExecutor>(worker: &GitWorker<E>) -> Result<bool, GitWorkerError> {
    if worker.merge_in_progress() {
        return Ok(true);
    }
    let status = worker.status()?;
    Ok(status.stdout.lines().any(|line| match line.strip_prefix("?? ") {
        Some(path) => is_record_path(path),
        None => !line.trim().is_empty(),
    }))
}

fn is_record_path(path: &str) -> bool {
    let path = path.trim_matches('"');
    path == INSTANCES_DIR
        || path.strip_prefix(INSTANCES_DIR).is_some_and(|rest| rest.starts_with('/'))
}
