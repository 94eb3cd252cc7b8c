// The git-backed record store: one working copy, the operation slots that
// guard it, and the pending-commits flag shared with the sync scheduler.

use std::cell::RefCell;
use std::path::Path;

use serde::Serialize;
use tracing::{debug, error, warn};

use crate::git::recovery::restore_paths;
use crate::git::retry::RetryPolicy;
use crate::git::scheduler::SyncTarget;
use crate::git::sync::{run_cycle, PendingCommits, SyncError, SyncReport};
use crate::git::worker::{CommandExecutor, ProcessCommandExecutor};
use crate::git::working_copy::WorkingCopy;
use crate::store::controller::ConcurrencyController;
use crate::store::error::StoreError;
use crate::store::files::{git_path, write_yaml};

#[derive(Debug)]
pub struct GitRepository<E = ProcessCommandExecutor> {
    copy: WorkingCopy<E>,
    controller: ConcurrencyController,
    pending: PendingCommits,
    remote_write: RetryPolicy,
}

/// What a mutation closure may do while it holds the slot. Every path it
/// writes or stages is remembered, so a failed mutation restores exactly
/// those paths and nothing else.
pub struct MutationScope<'a, E> {
    copy: &'a WorkingCopy<E>,
    pending: &'a PendingCommits,
    touched: RefCell<Vec<String>>,
}

impl<E: CommandExecutor> MutationScope<'_, E> {
    pub fn root(&self) -> &Path {
        self.copy.root()
    }

    /// Encode `value` into the record file `relative`.
    pub fn write<T: Serialize>(&self, relative: &Path, value: &T) -> Result<(), StoreError> {
        self.touch(relative);
        write_yaml(self.copy.root(), relative, value)
    }

    /// Record a path changed by other means, so rollback covers it.
    pub fn touch(&self, relative: &Path) {
        let path = git_path(relative);
        let mut touched = self.touched.borrow_mut();
        if !touched.contains(&path) {
            touched.push(path);
        }
    }

    /// Stage `paths` and commit. Returns `false` when nothing changed.
    pub fn commit<P: AsRef<Path>>(&self, paths: &[P], message: &str) -> Result<bool, StoreError> {
        paths.iter().for_each(|path| self.touch(path.as_ref()));
        let paths: Vec<String> = paths.iter().map(|path| git_path(path.as_ref())).collect();
        let committed = self.copy.stage_and_commit(&paths, message)?;
        if committed {
            self.pending.mark();
        }
        Ok(committed)
    }
}

impl<E: CommandExecutor> GitRepository<E> {
    /// Wrap an opened working copy. With a remote configured the first
    /// cycle always runs, so commits left unpushed by a previous process
    /// are not stranded.
    pub fn new(copy: WorkingCopy<E>, remote_write: RetryPolicy) -> Self {
        let pending = PendingCommits::new(copy.has_remote());
        Self { copy, controller: ConcurrencyController::new(), pending, remote_write }
    }

    pub fn working_copy(&self) -> &WorkingCopy<E> {
        &self.copy
    }

    pub fn has_remote(&self) -> bool {
        self.copy.has_remote()
    }

    pub fn has_pending_commits(&self) -> bool {
        self.pending.is_set()
    }

    /// Run one domain mutation inside a slot. If `action` fails after
    /// touching files, those paths are restored to HEAD before the slot is
    /// released; a rejection that wrote nothing leaves git alone.
    pub fn mutate<T, F>(&self, action: F) -> Result<T, StoreError>
    where
        F: FnOnce(&MutationScope<'_, E>) -> Result<T, StoreError>,
    {
        let _slot = self.controller.acquire_context()?;
        let scope =
            MutationScope { copy: &self.copy, pending: &self.pending, touched: RefCell::default() };
        match action(&scope) {
            Ok(value) => Ok(value),
            Err(failure) => {
                self.roll_back(&scope.touched.into_inner(), &failure);
                Err(failure)
            }
        }
    }

    /// Read inside a slot after a best-effort fast-forward from the remote.
    pub fn read<T, F>(&self, action: F) -> Result<T, StoreError>
    where
        F: FnOnce(&Path) -> Result<T, StoreError>,
    {
        let _slot = self.controller.acquire_context()?;
        self.copy.pull_ff_only();
        action(self.copy.root())
    }

    pub fn synchronize(&self) -> Result<SyncReport, SyncError> {
        if !self.copy.has_remote() {
            return Ok(SyncReport::SkippedNoRemote);
        }
        if !self.pending.is_set() {
            return Ok(SyncReport::SkippedNothingPending);
        }
        let _slot = self.controller.acquire_exclusive()?;
        run_cycle(&self.copy, &self.pending, &self.remote_write)
    }

    fn roll_back(&self, touched: &[String], failure: &StoreError) {
        if touched.is_empty() {
            debug!(error = %failure, "mutation rejected before touching the working copy");
            return;
        }
        warn!(error = %failure, paths = ?touched, "mutation failed, restoring touched paths");
        if let Err(error) = restore_paths(self.copy.worker(), touched) {
            error!(%error, "failed to restore working copy after failed mutation");
        }
    }
}

impl<E: CommandExecutor + 'static> SyncTarget for GitRepository<E> {
    fn synchronize(&self) -> Result<SyncReport, SyncError> {
        GitRepository::synchronize(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::git::retry::tests::RecordingSleeper;
    use crate::git::worker::tests::{failed, ok, MockExecutor};
    use crate::git::worker::GitWorker;
    use std::sync::Arc;
    use std::time::Duration;

    fn repository(
        mock: &MockExecutor,
        remote: Option<&str>,
        policy: RetryPolicy,
    ) -> GitRepository<MockExecutor> {
        let copy =
            WorkingCopy::attach(GitWorker::with_executor("/tmp/repo", mock.clone()), "main", remote);
        GitRepository::new(copy, policy)
    }

    #[test]
    fn no_remote_never_touches_git() {
        let mock = MockExecutor::new(Vec::new());
        let repo = repository(&mock, None, RetryPolicy::no_retry());

        assert_eq!(repo.synchronize().unwrap(), SyncReport::SkippedNoRemote);
        assert!(mock.calls().is_empty());
    }

    #[test]
    fn nothing_pending_performs_no_remote_calls() {
        let mock = MockExecutor::new(vec![Ok(ok("")), Ok(failed(1, "", "")), Ok(ok(""))]);
        let repo = repository(&mock, Some("origin"), RetryPolicy::no_retry());

        assert!(matches!(repo.synchronize().unwrap(), SyncReport::Pushed { .. }));
        let calls_after_push = mock.calls().len();

        assert_eq!(repo.synchronize().unwrap(), SyncReport::SkippedNothingPending);
        assert_eq!(repo.synchronize().unwrap(), SyncReport::SkippedNothingPending);
        assert_eq!(mock.calls().len(), calls_after_push);
    }

    #[test]
    fn exhausted_push_keeps_commits_pending() {
        let unreachable = failed(128, "", "fatal: Could not read from remote repository.\n");
        let mock = MockExecutor::new(vec![
            Ok(ok("")),
            Ok(failed(1, "", "")),
            Ok(unreachable.clone()),
            Ok(unreachable.clone()),
            Ok(unreachable.clone()),
            Ok(unreachable),
        ]);
        let sleeper = Arc::new(RecordingSleeper::default());
        let policy = RetryPolicy::new(4, Duration::from_millis(500)).with_sleeper(sleeper.clone());
        let repo = repository(&mock, Some("origin"), policy);

        assert!(repo.synchronize().is_err());

        let pushes = mock.calls().iter().filter(|call| call.args[0] == "push").count();
        assert_eq!(pushes, 4);
        assert_eq!(sleeper.delays(), vec![Duration::from_millis(500); 3]);
        assert!(repo.has_pending_commits());
    }

    #[test]
    fn successful_commit_marks_pending() {
        let mock = MockExecutor::new(vec![Ok(ok("")), Ok(failed(1, "", "")), Ok(ok(""))]);
        let repo = repository(&mock, None, RetryPolicy::no_retry());
        assert!(!repo.has_pending_commits());

        let committed = repo
            .mutate(|scope| scope.commit(&[Path::new("instances/a")], "Created Service instance a"))
            .unwrap();

        assert!(committed);
        assert!(repo.has_pending_commits());
    }

    #[test]
    fn empty_change_leaves_flag_untouched() {
        let mock = MockExecutor::new(vec![Ok(ok("")), Ok(ok(""))]);
        let repo = repository(&mock, None, RetryPolicy::no_retry());

        let committed =
            repo.mutate(|scope| scope.commit(&[Path::new("instances/a")], "noop")).unwrap();

        assert!(!committed);
        assert!(!repo.has_pending_commits());
    }

    #[test]
    fn failed_mutation_restores_only_touched_paths() {
        let mock = MockExecutor::new(vec![
            Ok(ok("abc\n")),
            Ok(ok("")),
            Ok(ok("")),
            Ok(ok("instances/a/instance.yml\n")),
            Ok(ok("")),
        ]);
        let repo = repository(&mock, None, RetryPolicy::no_retry());

        let result: Result<(), StoreError> = repo.mutate(|scope| {
            scope.touch(Path::new("instances/a/instance.yml"));
            scope.touch(Path::new("instances/a/instance.yml"));
            Err(StoreError::CatalogMissing)
        });

        assert!(matches!(result, Err(StoreError::CatalogMissing)));
        let calls = mock.calls();
        assert_eq!(calls.len(), 5);
        assert_eq!(calls[1].args, vec!["reset", "-q", "HEAD", "--", "instances/a/instance.yml"]);
        assert_eq!(calls[2].args, vec!["clean", "-f", "-d", "--", "instances/a/instance.yml"]);
        assert_eq!(calls[4].args, vec!["checkout", "--", "instances/a/instance.yml"]);
    }

    #[test]
    fn rejection_before_any_write_leaves_git_alone() {
        let mock = MockExecutor::new(Vec::new());
        let repo = repository(&mock, None, RetryPolicy::no_retry());

        let result: Result<(), StoreError> =
            repo.mutate(|_| Err(StoreError::InstanceExists("a".to_string())));

        assert!(matches!(result, Err(StoreError::InstanceExists(_))));
        assert!(mock.calls().is_empty());
    }

    #[test]
    fn nested_mutation_is_rejected() {
        let mock = MockExecutor::new(Vec::new());
        let repo = repository(&mock, None, RetryPolicy::no_retry());

        let result = repo.mutate(|_| repo.mutate(|_| Ok(())));

        assert!(matches!(result, Err(StoreError::Slot(_))));
    }
}
