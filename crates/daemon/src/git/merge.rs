// Merge outcome classification and the conflict policy.
//
// The broker is the authoritative writer of instance and binding state, so on
// content conflicts the local side wins. A path deleted locally but modified
// remotely cannot be resolved by `checkout --ours` while the index is unmerged;
// the remote version survives in that case and is committed as-is.

use tracing::{error, info, warn};

use crate::git::worker::{CommandExecutor, CommandResult, GitWorker, GitWorkerError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FastForwardMode {
    /// Fast-forward if possible, otherwise create a merge commit.
    Allow,
    /// Refuse anything but a fast-forward.
    Only,
    /// Always create a merge commit.
    Never,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeStrategy {
    Recursive,
    Ort,
    Resolve,
}

impl MergeStrategy {
    fn as_arg(self) -> &'static str {
        match self {
            MergeStrategy::Recursive => "recursive",
            MergeStrategy::Ort => "ort",
            MergeStrategy::Resolve => "resolve",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeOptions {
    pub fast_forward: FastForwardMode,
    pub strategy: MergeStrategy,
    /// Create the merge commit (or commit the squash) on success.
    pub commit: bool,
    pub squash: bool,
    pub message: Option<String>,
    pub allow_unrelated_histories: bool,
}

impl MergeOptions {
    /// Options used by the synchronize cycle.
    pub fn reconcile(message: impl Into<String>) -> Self {
        Self {
            fast_forward: FastForwardMode::Allow,
            strategy: MergeStrategy::Recursive,
            commit: true,
            squash: false,
            message: Some(message.into()),
            allow_unrelated_histories: true,
        }
    }

    /// Options used by the best-effort pull before reads.
    pub fn fast_forward_only() -> Self {
        Self {
            fast_forward: FastForwardMode::Only,
            strategy: MergeStrategy::Recursive,
            commit: true,
            squash: false,
            message: None,
            allow_unrelated_histories: false,
        }
    }

    pub fn args(&self, reference: &str) -> Vec<String> {
        let mut args = vec!["merge".to_string(), "--no-edit".to_string()];
        if self.squash {
            // git refuses --squash together with --commit or --no-ff.
            args.push("--squash".to_string());
            if self.fast_forward == FastForwardMode::Only {
                args.push("--ff-only".to_string());
            }
        } else {
            args.push(
                match self.fast_forward {
                    FastForwardMode::Allow => "--ff",
                    FastForwardMode::Only => "--ff-only",
                    FastForwardMode::Never => "--no-ff",
                }
                .to_string(),
            );
            args.push(if self.commit { "--commit" } else { "--no-commit" }.to_string());
        }
        args.push("-s".to_string());
        args.push(self.strategy.as_arg().to_string());
        if self.allow_unrelated_histories {
            args.push("--allow-unrelated-histories".to_string());
        }
        if let Some(message) = &self.message {
            args.push("-m".to_string());
            args.push(message.clone());
        }
        args.push(reference.to_string());
        args
    }
}

/// Every result a merge can produce.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MergeOutcome {
    AlreadyUpToDate,
    FastForward,
    FastForwardSquashed,
    Merged,
    MergedNotCommitted,
    MergedSquashed,
    MergedSquashedNotCommitted,
    Conflicting { paths: Vec<String> },
    /// Local changes or untracked files would be overwritten.
    CheckoutConflict { paths: Vec<String> },
    Failed { reason: String },
    /// The repository is mid-operation (unmerged index, unfinished merge).
    Aborted { reason: String },
    NotSupported { reason: String },
}

impl MergeOutcome {
    /// Classify a finished `git merge` invocation.
    pub fn from_command(result: &CommandResult, options: &MergeOptions) -> Self {
        let output = result.combined_output();

        if result.success {
            if output.contains("Already up to date") || output.contains("Already up-to-date") {
                return MergeOutcome::AlreadyUpToDate;
            }
            if options.squash {
                return if output.contains("Fast-forward") {
                    MergeOutcome::FastForwardSquashed
                } else {
                    MergeOutcome::MergedSquashedNotCommitted
                };
            }
            if output.contains("Fast-forward") {
                return MergeOutcome::FastForward;
            }
            if output.contains("stopped before committing") {
                return MergeOutcome::MergedNotCommitted;
            }
            return MergeOutcome::Merged;
        }

        let reason = first_meaningful_line(&output);
        if output.contains("would be overwritten by merge") {
            return MergeOutcome::CheckoutConflict { paths: overwritten_paths(&output) };
        }
        if output.contains("CONFLICT") || output.contains("Automatic merge failed") {
            return MergeOutcome::Conflicting { paths: Vec::new() };
        }
        if output.contains("unmerged files")
            || output.contains("not concluded your merge")
            || output.contains("MERGE_HEAD exists")
        {
            return MergeOutcome::Aborted { reason };
        }
        if output.contains("Could not find merge strategy")
            || output.contains("refusing to merge unrelated histories")
            || output.contains("not something we can merge")
        {
            return MergeOutcome::NotSupported { reason };
        }
        MergeOutcome::Failed { reason }
    }
}

/// What the synchronize cycle must do after a merge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MergeDisposition {
    /// Nothing left to do before pushing.
    Clean,
    /// Take the local side of these paths and conclude the merge.
    ResolveConflicts(Vec<String>),
    /// Restore the working copy; retry on the next cycle.
    Recover,
    /// Restore the working copy; an operator has to fix the remote.
    Escalate,
}

pub fn classify(outcome: &MergeOutcome) -> MergeDisposition {
    match outcome {
        MergeOutcome::AlreadyUpToDate
        | MergeOutcome::FastForward
        | MergeOutcome::FastForwardSquashed
        | MergeOutcome::Merged
        | MergeOutcome::MergedSquashed => MergeDisposition::Clean,
        MergeOutcome::Conflicting { paths } => MergeDisposition::ResolveConflicts(paths.clone()),
        // An unconcluded merge leaves MERGE_HEAD or a staged squash behind.
        MergeOutcome::MergedNotCommitted
        | MergeOutcome::MergedSquashedNotCommitted
        | MergeOutcome::CheckoutConflict { .. }
        | MergeOutcome::Failed { .. } => MergeDisposition::Recover,
        MergeOutcome::Aborted { .. } | MergeOutcome::NotSupported { .. } => {
            MergeDisposition::Escalate
        }
    }
}

/// Result of [`resolve_conflicts`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConflictResolution {
    pub kept_local: Vec<String>,
    /// Paths `checkout --ours` could not materialize (local deletions).
    pub kept_remote: Vec<String>,
}

/// Resolve every conflicting path in favour of the local side and conclude
/// the merge commit with git's prepared message.
pub fn resolve_conflicts<E: CommandExecutor>(
    worker: &GitWorker<E>,
    paths: &[String],
) -> Result<ConflictResolution, GitWorkerError> {
    let mut resolution = ConflictResolution { kept_local: Vec::new(), kept_remote: Vec::new() };

    for path in paths {
        match worker.checkout_ours(path) {
            Ok(_) => resolution.kept_local.push(path.clone()),
            Err(error) => {
                warn!(path = %path, %error, "local side unavailable, keeping remote version");
                resolution.kept_remote.push(path.clone());
            }
        }
    }

    worker.add_all()?;
    worker.commit_no_edit()?;
    warn!(
        kept_local = resolution.kept_local.len(),
        kept_remote = resolution.kept_remote.len(),
        "resolved merge conflicts in favour of local changes"
    );
    Ok(resolution)
}

/// Log an outcome at the severity its disposition calls for.
pub fn log_outcome(outcome: &MergeOutcome) {
    match classify(outcome) {
        MergeDisposition::Clean => info!(outcome = ?outcome, "merged remote changes"),
        MergeDisposition::ResolveConflicts(paths) => {
            warn!(conflicts = paths.len(), "merge produced content conflicts")
        }
        MergeDisposition::Recover => {
            warn!(outcome = ?outcome, "merge cannot proceed, restoring working copy")
        }
        MergeDisposition::Escalate => error!(
            outcome = ?outcome,
            "merge aborted or unsupported, manual intervention on the remote is required"
        ),
    }
}

fn first_meaningful_line(output: &str) -> String {
    output
        .lines()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .unwrap_or("merge failed without output")
        .to_string()
}

/// Paths git lists (tab-indented) under "would be overwritten by merge".
fn overwritten_paths(output: &str) -> Vec<String> {
    let mut paths = Vec::new();
    let mut in_list = false;
    for line in output.lines() {
        if line.contains("would be overwritten by merge") {
            in_list = true;
            continue;
        }
        if in_list {
            match line.strip_prefix('\t') {
                Some(path) => paths.push(path.trim().to_string()),
                None => in_list = false,
            }
        }
    }
    paths
}
