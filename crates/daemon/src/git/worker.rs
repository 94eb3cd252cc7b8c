use std::error::Error;
use std::fmt::{Display, Formatter};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use tracing::{debug, trace};

use crate::git::merge::{MergeOptions, MergeOutcome};
use crate::git::retry::RetryPolicy;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GitCommandOutput {
    pub stdout: String,
    pub stderr: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GitWorkerError {
    EmptyAddPaths,
    SpawnFailed { command: String, message: String },
    CommandFailed { command: String, code: Option<i32>, stderr: String },
    /// Another git process (or a crashed one) holds `index.lock` or a ref lock.
    LockContention { command: String, stderr: String },
    /// The remote refused a non-fast-forward update; a fresh fetch and merge is needed.
    PushRejected { command: String, stderr: String },
}

impl GitWorkerError {
    pub fn is_lock_contention(&self) -> bool {
        matches!(self, GitWorkerError::LockContention { .. })
    }

    pub fn is_push_rejected(&self) -> bool {
        matches!(self, GitWorkerError::PushRejected { .. })
    }

    /// Failures worth retrying against a remote: network trouble, remote busy.
    pub fn is_transient_remote(&self) -> bool {
        matches!(
            self,
            GitWorkerError::CommandFailed { .. } | GitWorkerError::LockContention { .. }
        )
    }
}

impl Display for GitWorkerError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            GitWorkerError::EmptyAddPaths => write!(f, "git add requires at least one path"),
            GitWorkerError::SpawnFailed { command, message } => {
                write!(f, "failed to run `{command}`: {message}")
            }
            GitWorkerError::CommandFailed { command, code, stderr } => {
                write!(f, "`{command}` failed with code {:?}: {}", code, stderr.trim())
            }
            GitWorkerError::LockContention { command, stderr } => {
                write!(f, "`{command}` hit a git lock: {}", stderr.trim())
            }
            GitWorkerError::PushRejected { command, stderr } => {
                write!(f, "`{command}` was rejected by the remote: {}", stderr.trim())
            }
        }
    }
}

impl Error for GitWorkerError {}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandResult {
    pub success: bool,
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandResult {
    /// stdout and stderr joined; git splits its progress and result
    /// messages across both depending on the command.
    pub fn combined_output(&self) -> String {
        format!("{}\n{}", self.stdout, self.stderr)
    }
}

pub trait CommandExecutor: Send + Sync {
    fn execute(
        &self,
        program: &str,
        args: &[String],
        cwd: &Path,
        env: &[(String, String)],
    ) -> Result<CommandResult, std::io::Error>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct ProcessCommandExecutor;

impl CommandExecutor for ProcessCommandExecutor {
    fn execute(
        &self,
        program: &str,
        args: &[String],
        cwd: &Path,
        env: &[(String, String)],
    ) -> Result<CommandResult, std::io::Error> {
        let output = Command::new(program)
            .args(args)
            .current_dir(cwd)
            .envs(env.iter().map(|(key, value)| (key.as_str(), value.as_str())))
            .stdin(Stdio::null())
            .output()?;
        Ok(CommandResult {
            success: output.status.success(),
            code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}

/// Policy-free git primitives against one working copy.
///
/// Every command is retried by the lock policy when git reports lock-file
/// contention. Remote commands additionally receive the credential
/// environment and never prompt.
#[derive(Debug, Clone)]
pub struct GitWorker<E = ProcessCommandExecutor> {
    repo_path: PathBuf,
    executor: E,
    lock_retry: RetryPolicy,
    remote_env: Vec<(String, String)>,
}

impl GitWorker<ProcessCommandExecutor> {
    pub fn new(repo_path: impl Into<PathBuf>) -> Self {
        Self::with_executor(repo_path, ProcessCommandExecutor)
    }
}

impl<E: CommandExecutor> GitWorker<E> {
    pub fn with_executor(repo_path: impl Into<PathBuf>, executor: E) -> Self {
        Self {
            repo_path: repo_path.into(),
            executor,
            lock_retry: RetryPolicy::no_retry(),
            remote_env: Vec::new(),
        }
    }

    pub fn with_lock_retry(mut self, policy: RetryPolicy) -> Self {
        self.lock_retry = policy;
        self
    }

    /// Environment added to fetch/push/ls-remote invocations only.
    pub fn with_remote_env(mut self, env: Vec<(String, String)>) -> Self {
        self.remote_env = env;
        self
    }

    pub fn repo_path(&self) -> &Path {
        &self.repo_path
    }

    pub fn executor(&self) -> &E {
        &self.executor
    }

    pub fn is_repository(&self) -> bool {
        self.repo_path.join(".git").exists()
    }

    pub fn merge_in_progress(&self) -> bool {
        self.repo_path.join(".git").join("MERGE_HEAD").exists()
    }

    pub fn init(&self) -> Result<GitCommandOutput, GitWorkerError> {
        self.run(vec!["init".to_string()])
    }

    /// Point HEAD at a (possibly unborn) branch.
    pub fn set_head_branch(&self, branch: &str) -> Result<GitCommandOutput, GitWorkerError> {
        self.run(vec![
            "symbolic-ref".to_string(),
            "HEAD".to_string(),
            format!("refs/heads/{branch}"),
        ])
    }

    pub fn config_set(&self, key: &str, value: &str) -> Result<GitCommandOutput, GitWorkerError> {
        self.run(vec!["config".to_string(), key.to_string(), value.to_string()])
    }

    /// Configured URL of `remote`, or `None` when the remote does not exist.
    pub fn remote_url(&self, remote: &str) -> Result<Option<String>, GitWorkerError> {
        let result = self.run_unchecked(
            vec!["remote".to_string(), "get-url".to_string(), remote.to_string()],
            &[],
        )?;
        Ok(result.success.then(|| result.stdout.trim().to_string()))
    }

    pub fn remote_add(&self, remote: &str, url: &str) -> Result<GitCommandOutput, GitWorkerError> {
        self.run(vec!["remote".to_string(), "add".to_string(), remote.to_string(), url.to_string()])
    }

    pub fn remote_set_url(
        &self,
        remote: &str,
        url: &str,
    ) -> Result<GitCommandOutput, GitWorkerError> {
        self.run(vec![
            "remote".to_string(),
            "set-url".to_string(),
            remote.to_string(),
            url.to_string(),
        ])
    }

    pub fn ref_exists(&self, reference: &str) -> Result<bool, GitWorkerError> {
        let result = self.run_unchecked(
            vec![
                "rev-parse".to_string(),
                "--verify".to_string(),
                "--quiet".to_string(),
                format!("{reference}^{{commit}}"),
            ],
            &[],
        )?;
        Ok(result.success)
    }

    pub fn rev_parse(&self, reference: &str) -> Result<String, GitWorkerError> {
        self.run(vec!["rev-parse".to_string(), reference.to_string()])
            .map(|output| output.stdout.trim().to_string())
    }

    pub fn checkout_branch(&self, branch: &str) -> Result<GitCommandOutput, GitWorkerError> {
        self.run(vec!["checkout".to_string(), branch.to_string()])
    }

    pub fn checkout_new_branch(&self, branch: &str) -> Result<GitCommandOutput, GitWorkerError> {
        self.run(vec!["checkout".to_string(), "-b".to_string(), branch.to_string()])
    }

    /// Create or reset `branch` at `upstream` and track it.
    pub fn checkout_tracking(
        &self,
        branch: &str,
        upstream: &str,
    ) -> Result<GitCommandOutput, GitWorkerError> {
        self.run(vec![
            "checkout".to_string(),
            "-B".to_string(),
            branch.to_string(),
            "--track".to_string(),
            upstream.to_string(),
        ])
    }

    /// Porcelain status including every untracked file, not just their
    /// directories.
    pub fn status(&self) -> Result<GitCommandOutput, GitWorkerError> {
        self.run(vec![
            "status".to_string(),
            "--porcelain".to_string(),
            "--untracked-files=all".to_string(),
        ])
    }

    pub fn add<S: AsRef<str>>(&self, paths: &[S]) -> Result<GitCommandOutput, GitWorkerError> {
        if paths.is_empty() {
            return Err(GitWorkerError::EmptyAddPaths);
        }

        let mut args = vec!["add".to_string(), "-A".to_string(), "--".to_string()];
        args.extend(paths.iter().map(|path| path.as_ref().to_string()));
        self.run(args)
    }

    pub fn add_all(&self) -> Result<GitCommandOutput, GitWorkerError> {
        self.run(vec!["add".to_string(), "-A".to_string()])
    }

    /// Whether the index differs from HEAD (always true before the first commit
    /// if anything is staged).
    pub fn has_staged_changes(&self) -> Result<bool, GitWorkerError> {
        let args = vec!["diff".to_string(), "--cached".to_string(), "--quiet".to_string()];
        let command = command_label(&args);
        let result = self.run_unchecked(args, &[])?;
        match result.code {
            Some(0) => Ok(false),
            Some(1) => Ok(true),
            code => Err(GitWorkerError::CommandFailed { command, code, stderr: result.stderr }),
        }
    }

    pub fn commit(&self, message: &str) -> Result<GitCommandOutput, GitWorkerError> {
        self.run(vec!["commit".to_string(), "-m".to_string(), message.to_string()])
    }

    /// Conclude a merge or squash using the message git prepared.
    pub fn commit_no_edit(&self) -> Result<GitCommandOutput, GitWorkerError> {
        self.run(vec!["commit".to_string(), "--no-edit".to_string()])
    }

    pub fn fetch(&self, remote: &str) -> Result<GitCommandOutput, GitWorkerError> {
        self.run_remote(vec!["fetch".to_string(), "--prune".to_string(), remote.to_string()])
    }

    /// Merge `reference` into the current branch and classify the result.
    ///
    /// A non-zero exit is not an error here: conflicts and refusals are
    /// reported through [`MergeOutcome`].
    pub fn merge(
        &self,
        reference: &str,
        options: &MergeOptions,
    ) -> Result<MergeOutcome, GitWorkerError> {
        let result = self.run_unchecked(options.args(reference), &[])?;
        let outcome = MergeOutcome::from_command(&result, options);
        debug!(reference, outcome = ?outcome, "merge finished");

        match outcome {
            MergeOutcome::Conflicting { .. } => {
                Ok(MergeOutcome::Conflicting { paths: self.unmerged_paths()? })
            }
            MergeOutcome::MergedNotCommitted if options.commit => {
                self.commit_no_edit()?;
                Ok(MergeOutcome::Merged)
            }
            MergeOutcome::MergedSquashedNotCommitted if options.commit => {
                self.commit_no_edit()?;
                Ok(MergeOutcome::MergedSquashed)
            }
            outcome => Ok(outcome),
        }
    }

    pub fn unmerged_paths(&self) -> Result<Vec<String>, GitWorkerError> {
        let output = self.run(vec![
            "diff".to_string(),
            "--name-only".to_string(),
            "--diff-filter=U".to_string(),
        ])?;
        Ok(output.stdout.lines().filter(|line| !line.is_empty()).map(str::to_string).collect())
    }

    /// Take the local side of an unmerged path.
    pub fn checkout_ours(&self, path: &str) -> Result<GitCommandOutput, GitWorkerError> {
        self.run(vec![
            "checkout".to_string(),
            "--ours".to_string(),
            "--".to_string(),
            path.to_string(),
        ])
    }

    /// Push `refspec` to `remote`. A non-fast-forward refusal is reported as
    /// [`GitWorkerError::PushRejected`], everything else as `CommandFailed`.
    pub fn push(&self, remote: &str, refspec: &str) -> Result<GitCommandOutput, GitWorkerError> {
        let args = vec![
            "push".to_string(),
            "--porcelain".to_string(),
            remote.to_string(),
            refspec.to_string(),
        ];
        let command = command_label(&args);
        let mut env = self.remote_env.clone();
        env.push(("GIT_TERMINAL_PROMPT".to_string(), "0".to_string()));
        let result = self.run_unchecked(args, &env)?;

        if result.success {
            return Ok(GitCommandOutput { stdout: result.stdout, stderr: result.stderr });
        }
        let combined = result.combined_output();
        if is_push_rejection(&combined) {
            return Err(GitWorkerError::PushRejected { command, stderr: combined });
        }
        Err(GitWorkerError::CommandFailed { command, code: result.code, stderr: combined })
    }

    pub fn reset_hard(&self, reference: &str) -> Result<GitCommandOutput, GitWorkerError> {
        self.run(vec!["reset".to_string(), "--hard".to_string(), reference.to_string()])
    }

    /// Reset the index entries of `paths` to HEAD, leaving the tree alone.
    pub fn reset_paths<S: AsRef<str>>(
        &self,
        paths: &[S],
    ) -> Result<GitCommandOutput, GitWorkerError> {
        self.run(with_paths(vec!["reset".to_string(), "-q".to_string(), "HEAD".to_string()], paths))
    }

    /// Drop `paths` from the index; used when HEAD is still unborn.
    pub fn uncache_paths<S: AsRef<str>>(
        &self,
        paths: &[S],
    ) -> Result<GitCommandOutput, GitWorkerError> {
        let args = vec![
            "rm".to_string(),
            "-r".to_string(),
            "-q".to_string(),
            "--cached".to_string(),
            "--ignore-unmatch".to_string(),
        ];
        self.run(with_paths(args, paths))
    }

    /// Remove untracked files and directories under `paths` (ignored files
    /// are kept).
    pub fn clean_paths<S: AsRef<str>>(
        &self,
        paths: &[S],
    ) -> Result<GitCommandOutput, GitWorkerError> {
        self.run(with_paths(vec!["clean".to_string(), "-f".to_string(), "-d".to_string()], paths))
    }

    /// Files under `paths` that the index knows about.
    pub fn tracked_files<S: AsRef<str>>(
        &self,
        paths: &[S],
    ) -> Result<Vec<String>, GitWorkerError> {
        let output = self.run(with_paths(vec!["ls-files".to_string()], paths))?;
        Ok(output.stdout.lines().filter(|line| !line.is_empty()).map(str::to_string).collect())
    }

    /// Overwrite the tree copies of `paths` from the index.
    pub fn checkout_index<S: AsRef<str>>(
        &self,
        paths: &[S],
    ) -> Result<GitCommandOutput, GitWorkerError> {
        self.run(with_paths(vec!["checkout".to_string()], paths))
    }

    fn run(&self, args: Vec<String>) -> Result<GitCommandOutput, GitWorkerError> {
        let command = command_label(&args);
        let result = self.run_unchecked(args, &[])?;
        into_output(command, result)
    }

    fn run_remote(&self, args: Vec<String>) -> Result<GitCommandOutput, GitWorkerError> {
        let command = command_label(&args);
        let mut env = self.remote_env.clone();
        env.push(("GIT_TERMINAL_PROMPT".to_string(), "0".to_string()));
        let result = self.run_unchecked(args, &env)?;
        into_output(command, result)
    }

    /// Execute without interpreting the exit code, except that lock-file
    /// contention is retried under the lock policy.
    fn run_unchecked(
        &self,
        args: Vec<String>,
        env: &[(String, String)],
    ) -> Result<CommandResult, GitWorkerError> {
        let command = command_label(&args);
        self.lock_retry.run(
            "git lock",
            || {
                trace!(command = %command, "running git");
                let result =
                    self.executor.execute("git", &args, &self.repo_path, env).map_err(|error| {
                        GitWorkerError::SpawnFailed {
                            command: command.clone(),
                            message: error.to_string(),
                        }
                    })?;
                if !result.success && is_lock_contention(&result.stderr) {
                    return Err(GitWorkerError::LockContention {
                        command: command.clone(),
                        stderr: result.stderr,
                    });
                }
                Ok(result)
            },
            GitWorkerError::is_lock_contention,
        )
    }
}

fn with_paths<S: AsRef<str>>(mut args: Vec<String>, paths: &[S]) -> Vec<String> {
    args.push("--".to_string());
    args.extend(paths.iter().map(|path| path.as_ref().to_string()));
    args
}

fn command_label(args: &[String]) -> String {
    format!("git {}", args.join(" "))
}

fn into_output(command: String, result: CommandResult) -> Result<GitCommandOutput, GitWorkerError> {
    if result.success {
        return Ok(GitCommandOutput { stdout: result.stdout, stderr: result.stderr });
    }

    let stderr = if result.stderr.trim().is_empty() { result.stdout } else { result.stderr };

    Err(GitWorkerError::CommandFailed { command, code: result.code, stderr })
}

fn is_lock_contention(stderr: &str) -> bool {
    stderr.contains("index.lock")
        || stderr.contains(".lock': File exists")
        || stderr.contains("Another git process seems to be running")
        || stderr.contains("cannot lock ref")
}

fn is_push_rejection(output: &str) -> bool {
    output.lines().any(|line| {
        (line.starts_with('!') && line.contains("[rejected]"))
            || line.contains("(non-fast-forward)")
            || line.contains("(fetch first)")
            || line.contains("(stale info)")
    })
}
