//! Single-step merge execution

use std::collections::BTreeSet;
use std::path::Path;

use super::events::{MergeEvent, MergeEventSink};
use super::state::ExecutionState;
use super::types::{Conflict, ConflictKind, MergeStep, StepReport, StepStatus};
use crate::config::MergeConfig;
use crate::git::{commit_dirty_pointers, MergeAttempt, RepositoryHandle, RepositoryOpener};
use crate::store::WorkingCopyStore;
use crate::{Error, Result};

/// Successful result of one step
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepOutcome {
    Merged { commit: String },
    UpToDate { commit: String },
    AutoResolved { commit: String },
}

impl StepOutcome {
    pub fn commit(&self) -> &str {
        match self {
            StepOutcome::Merged { commit }
            | StepOutcome::UpToDate { commit }
            | StepOutcome::AutoResolved { commit } => commit,
        }
    }
}

impl From<StepOutcome> for StepStatus {
    fn from(outcome: StepOutcome) -> Self {
        match outcome {
            StepOutcome::Merged { commit } => StepStatus::Merged { commit },
            StepOutcome::UpToDate { commit } => StepStatus::UpToDate { commit },
            StepOutcome::AutoResolved { commit } => StepStatus::AutoResolved { commit },
        }
    }
}

/// Result of the merge action before conflicts are attributed to the step
enum Action {
    Done(StepOutcome),
    Conflicted(Vec<String>),
}

#[derive(Debug, PartialEq, Eq)]
struct Snapshot {
    head: Option<String>,
    branch: Option<String>,
    clean: bool,
}

impl Snapshot {
    fn capture(repo: &dyn RepositoryHandle) -> Result<Self> {
        Ok(Self {
            head: repo.head_commit()?,
            branch: repo.current_branch()?,
            clean: repo.status()?.is_clean(),
        })
    }
}

/// Reference namespace segment for fetches from `source`
pub(crate) fn fetch_namespace(base: &str, source: &Path) -> String {
    let segment: String = source
        .to_string_lossy()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' || c == '-' { c } else { '-' })
        .collect();
    let segment = segment.trim_matches('-');
    let segment = if segment.is_empty() { "root" } else { segment };
    format!("{}/{}", base.trim_end_matches('/'), segment)
}

/// Executes one [`MergeStep`] against an [`ExecutionState`]
pub struct MergeStepExecutor<'a> {
    opener: &'a dyn RepositoryOpener,
    store: &'a dyn WorkingCopyStore,
    sink: &'a dyn MergeEventSink,
    config: &'a MergeConfig,
}

impl<'a> MergeStepExecutor<'a> {
    pub fn new(
        opener: &'a dyn RepositoryOpener,
        store: &'a dyn WorkingCopyStore,
        sink: &'a dyn MergeEventSink,
        config: &'a MergeConfig,
    ) -> Self {
        Self {
            opener,
            store,
            sink,
            config,
        }
    }

    /// Run `step`, folding its result into `state`
    pub fn execute(&self, step: &MergeStep, state: &mut ExecutionState) {
        if state.is_blocked(&step.target_path) {
            if let Some(ancestor) = &step.containing_ancestor {
                state.block(ancestor.clone());
            }
            self.sink.publish(&MergeEvent::StepBlocked {
                path: step.target_path.clone(),
                submodule_path: step.submodule_path.clone(),
                propagated_to: step.containing_ancestor.clone(),
            });
            state.record(report(step, StepStatus::Blocked));
            return;
        }

        match self.run(step) {
            Ok(outcome) => {
                self.sink.publish(&MergeEvent::StepMerged {
                    source_id: step.source_id.clone(),
                    target_id: step.target_id.clone(),
                    path: step.target_path.clone(),
                    submodule_path: step.submodule_path.clone(),
                    commit: outcome.commit().to_string(),
                });
                state.record(report(step, outcome.into()));
            }
            Err(conflicts) => {
                if let Some(ancestor) = &step.containing_ancestor {
                    state.block(ancestor.clone());
                }
                self.sink.publish(&MergeEvent::StepConflicted {
                    source_id: step.source_id.clone(),
                    target_id: step.target_id.clone(),
                    path: step.target_path.clone(),
                    submodule_path: step.submodule_path.clone(),
                    conflicts: conflicts.clone(),
                });
                state.record_conflicts(conflicts);
                state.record(report(step, StepStatus::Conflicted));
            }
        }
    }

    /// Run `step` without touching any state
    ///
    /// Execution failures become a single merge-error conflict, so callers
    /// treat them exactly like unresolved content conflicts.
    pub fn run(&self, step: &MergeStep) -> std::result::Result<StepOutcome, Vec<Conflict>> {
        match self.perform(step) {
            Ok(Action::Done(outcome)) => Ok(outcome),
            Ok(Action::Conflicted(paths)) => Err(paths
                .into_iter()
                .map(|path| Conflict::new(path, ConflictKind::Content, step.submodule_path.clone()))
                .collect()),
            Err(e) => {
                tracing::error!(
                    target = %step.target_path.display(),
                    submodule = step.label(),
                    error = %e,
                    "Merge step failed"
                );
                Err(vec![Conflict::new(
                    step.target_path.display().to_string(),
                    ConflictKind::MergeError,
                    step.submodule_path.clone(),
                )
                .with_detail(e.to_string())])
            }
        }
    }

    fn perform(&self, step: &MergeStep) -> Result<Action> {
        let repo = self.opener.open(&step.target_path)?;
        let before = Snapshot::capture(repo.as_ref())?;
        tracing::debug!(
            target = %step.target_path.display(),
            head = ?before.head,
            branch = ?before.branch,
            clean = before.clean,
            "Before merge"
        );

        let source_branch = self.source_branch(step);
        let namespace = fetch_namespace(&self.config.fetch_namespace, &step.source_path);
        let fetched = repo.fetch_from(&step.source_path, &namespace)?;
        let reference = fetched
            .head
            .clone()
            .or_else(|| fetched.branches.get(&source_branch).cloned())
            .ok_or_else(|| {
                Error::NotFound(format!(
                    "HEAD or branch {} in {}",
                    source_branch,
                    step.source_path.display()
                ))
            })?;
        tracing::debug!(reference = %reference, "Merging fetched reference");

        let message = format!(
            "{} {} into {}",
            self.config.merge_message_prefix, source_branch, step.target_branch
        );

        let outcome = match repo.merge_no_ff(&reference, &message)? {
            MergeAttempt::UpToDate { head } => StepOutcome::UpToDate { commit: head },
            MergeAttempt::Merged { commit } => StepOutcome::Merged { commit },
            MergeAttempt::Conflicted { paths } => {
                let declared: BTreeSet<String> =
                    repo.submodules()?.into_iter().map(|d| d.path).collect();
                let (pointers, content): (Vec<String>, Vec<String>) =
                    paths.into_iter().partition(|p| declared.contains(p));

                if !pointers.is_empty() {
                    repo.stage_paths(&pointers)?;
                }
                if !content.is_empty() {
                    return Ok(Action::Conflicted(content));
                }

                let commit = repo.commit(&self.config.pointer_resolution_message)?;
                tracing::info!(
                    target = %step.target_path.display(),
                    pointers = ?pointers,
                    commit = %commit,
                    "Auto-resolved submodule pointer conflicts"
                );
                StepOutcome::AutoResolved { commit }
            }
        };

        commit_dirty_pointers(repo.as_ref(), &self.config.pointer_commit_message)?;
        if let Some(ancestor) = &step.containing_ancestor {
            let parent = self.opener.open(ancestor)?;
            commit_dirty_pointers(parent.as_ref(), &self.config.pointer_commit_message)?;
        }

        let after = Snapshot::capture(repo.as_ref())?;
        if before.branch != after.branch {
            tracing::warn!(
                target = %step.target_path.display(),
                before = ?before.branch,
                after = ?after.branch,
                "Branch changed during merge"
            );
        }
        tracing::debug!(
            target = %step.target_path.display(),
            head = ?after.head,
            clean = after.clean,
            "After merge"
        );

        Ok(Action::Done(outcome))
    }

    fn source_branch(&self, step: &MergeStep) -> String {
        match self.store.find_by_path(&step.source_path) {
            Ok(Some(wc)) => wc.derived_branch,
            Ok(None) => step.source_branch.clone(),
            Err(e) => {
                tracing::debug!(error = %e, "Falling back to planned source branch");
                step.source_branch.clone()
            }
        }
    }
}

fn report(step: &MergeStep, status: StepStatus) -> StepReport {
    StepReport {
        submodule_path: step.submodule_path.clone(),
        source_path: step.source_path.clone(),
        target_path: step.target_path.clone(),
        status,
    }
}
