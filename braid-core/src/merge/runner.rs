//! Whole-plan execution and finalization

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use super::events::{MergeEvent, MergeEventSink};
use super::executor::MergeStepExecutor;
use super::state::ExecutionState;
use super::types::{
    Conflict, ConflictKind, MergeDirection, MergeErrorKind, MergeOutcome, MergePlan, MergeStep,
};
use super::verify::AncestryVerifier;
use crate::config::MergeConfig;
use crate::git::{commit_dirty_pointers, RepositoryOpener};
use crate::store::WorkingCopyStore;
use crate::Result;

/// Drives a [`MergePlan`] through the step executor and produces the
/// [`MergeOutcome`]
pub struct MergePlanRunner<'a> {
    opener: &'a dyn RepositoryOpener,
    store: &'a dyn WorkingCopyStore,
    sink: &'a dyn MergeEventSink,
    config: &'a MergeConfig,
}

impl<'a> MergePlanRunner<'a> {
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

    /// Run every step in order, then finalize
    ///
    /// Never fails: errors surface as conflicts on the returned outcome.
    pub fn run(&self, direction: MergeDirection, plan: &MergePlan) -> MergeOutcome {
        let Some(root) = plan.root() else {
            return MergeOutcome::no_op(direction, "Nothing to merge");
        };

        tracing::info!(
            direction = %direction,
            source = %root.source_path.display(),
            target = %root.target_path.display(),
            steps = plan.steps.len(),
            "Running merge plan"
        );

        let executor = MergeStepExecutor::new(self.opener, self.store, self.sink, self.config);
        let mut state = ExecutionState::new();
        for step in &plan.steps {
            executor.execute(step, &mut state);
        }

        let outcome = if state.has_conflicts() {
            self.finalize_conflicted(direction, plan, root, state)
        } else {
            self.finalize_successful(direction, plan, root, state)
        };

        self.sink.publish(&MergeEvent::OutcomeReady {
            direction,
            source_id: outcome.source_id.clone(),
            target_id: outcome.target_id.clone(),
            successful: outcome.successful,
            commit: outcome.merge_commit.clone(),
            conflicts: outcome.conflicts.clone(),
        });

        outcome
    }

    fn finalize_conflicted(
        &self,
        direction: MergeDirection,
        plan: &MergePlan,
        root: &MergeStep,
        state: ExecutionState,
    ) -> MergeOutcome {
        self.restore_branches(plan);

        let (conflicts, reports) = state.into_parts();
        let kind = MergeErrorKind::classify(&conflicts);
        let message = format!(
            "{} conflict(s) merging {} into {}",
            conflicts.len(),
            root.source_branch,
            root.target_branch
        );

        MergeOutcome {
            direction,
            successful: false,
            merge_commit: None,
            conflicts,
            submodule_outcomes: reports,
            provisioning_failures: plan.provisioning_failures.clone(),
            error_kind: Some(kind),
            message,
            source_id: root.source_id.clone(),
            target_id: root.target_id.clone(),
        }
    }

    fn finalize_successful(
        &self,
        direction: MergeDirection,
        plan: &MergePlan,
        root: &MergeStep,
        state: ExecutionState,
    ) -> MergeOutcome {
        let (_, reports) = state.into_parts();
        let mut outcome = MergeOutcome {
            direction,
            successful: true,
            merge_commit: None,
            conflicts: Vec::new(),
            submodule_outcomes: reports,
            provisioning_failures: plan.provisioning_failures.clone(),
            error_kind: None,
            message: format!("Merged {} into {}", root.source_branch, root.target_branch),
            source_id: root.source_id.clone(),
            target_id: root.target_id.clone(),
        };

        match self.finalize(plan, root) {
            Ok(head) => outcome.merge_commit = head,
            Err(e) => {
                tracing::error!(error = %e, "Finalizing merge failed");
                outcome.successful = false;
                outcome.error_kind = Some(MergeErrorKind::MergeExecutionFailed);
                outcome.message = format!("Finalizing merge failed: {}", e);
                outcome.conflicts.push(
                    Conflict::new(
                        root.target_path.display().to_string(),
                        ConflictKind::MergeError,
                        None,
                    )
                    .with_detail(e.to_string()),
                );
                return outcome;
            }
        }

        if self.config.verify_ancestry {
            let verified = AncestryVerifier::new(self.opener)
                .verify(&root.source_path, &root.target_path);
            let missing = match verified {
                Ok(missing) => missing,
                Err(e) => vec![Conflict::new(
                    root.target_path.display().to_string(),
                    ConflictKind::MergeError,
                    None,
                )
                .with_detail(format!("ancestry verification failed: {}", e))],
            };
            if !missing.is_empty() {
                tracing::warn!(
                    missing = missing.len(),
                    "Merge reported success but ancestry verification failed"
                );
                outcome.successful = false;
                outcome.error_kind = Some(MergeErrorKind::classify(&missing));
                outcome.message = format!(
                    "Merge of {} into {} did not preserve {} commit(s)",
                    root.source_branch,
                    root.target_branch,
                    missing.len()
                );
                outcome.conflicts = missing;
                return outcome;
            }
        }

        self.record_heads(plan);
        outcome
    }

    /// Pointer commits around branch restoration, then the final root HEAD
    fn finalize(&self, plan: &MergePlan, root: &MergeStep) -> Result<Option<String>> {
        self.commit_target_pointers(plan)?;
        self.restore_branches(plan);
        // restoring a nested branch can move the commit its container records
        self.commit_target_pointers(plan)?;

        let head = self.opener.open(&root.target_path)?.head_commit()?;
        self.repair_source_containers(&root.source_path);
        Ok(head)
    }

    fn commit_target_pointers(&self, plan: &MergePlan) -> Result<()> {
        for step in &plan.steps {
            if !self.opener.is_repository(&step.target_path) {
                continue;
            }
            let repo = self.opener.open(&step.target_path)?;
            commit_dirty_pointers(repo.as_ref(), &self.config.pointer_commit_message)?;
        }
        Ok(())
    }

    /// Put every target and source of the plan back on its expected branch,
    /// leaves first. Failures are logged and skipped.
    fn restore_branches(&self, plan: &MergePlan) {
        let mut seen = BTreeSet::new();
        let targets = plan
            .steps
            .iter()
            .map(|s| (&s.target_path, &s.target_branch));
        let sources = plan
            .steps
            .iter()
            .map(|s| (&s.source_path, &s.source_branch));

        for (path, branch) in targets.chain(sources) {
            if !seen.insert(path.clone()) {
                continue;
            }
            if let Err(e) = self.restore_branch(path, branch) {
                tracing::warn!(
                    path = %path.display(),
                    branch = %branch,
                    error = %e,
                    "Failed to restore branch"
                );
            }
        }
    }

    fn restore_branch(&self, path: &Path, branch: &str) -> Result<()> {
        let repo = self.opener.open(path)?;
        let current = repo.current_branch()?;
        if current.as_deref() == Some(branch) {
            return Ok(());
        }

        // a detached HEAD carries the work; move the branch up to it
        let start = match current {
            None => repo.head_commit()?,
            Some(_) => None,
        };
        repo.checkout_branch(branch, start.as_deref())?;

        tracing::info!(
            path = %path.display(),
            branch = %branch,
            from = ?current,
            "Restored branch"
        );
        Ok(())
    }

    /// Commit drifted pointers in every repository physically containing a
    /// submodule source, up to its main working copy
    fn repair_source_containers(&self, source: &Path) {
        let record = match self.store.find_by_path(source) {
            Ok(Some(record)) if record.is_submodule() => record,
            _ => return,
        };
        let main_path: Option<PathBuf> = record
            .main_id
            .as_deref()
            .and_then(|id| self.store.find_by_id(id).ok().flatten())
            .map(|main| main.path);

        let mut current = source.parent();
        while let Some(dir) = current {
            if self.opener.is_repository(dir) {
                match self.commit_container_pointers(dir) {
                    Ok(true) => {}
                    Ok(false) => break,
                    Err(e) => {
                        tracing::warn!(
                            path = %dir.display(),
                            error = %e,
                            "Failed to commit pointers in source container"
                        );
                        break;
                    }
                }
            }
            if main_path.as_deref() == Some(dir) {
                break;
            }
            current = dir.parent();
        }
    }

    /// Returns false when `dir` declares no submodules
    fn commit_container_pointers(&self, dir: &Path) -> Result<bool> {
        let repo = self.opener.open(dir)?;
        if repo.submodules()?.is_empty() {
            return Ok(false);
        }
        commit_dirty_pointers(repo.as_ref(), &self.config.pointer_commit_message)?;
        Ok(true)
    }

    fn record_heads(&self, plan: &MergePlan) {
        let mut seen = BTreeSet::new();
        let copies = plan.steps.iter().flat_map(|s| {
            [
                (s.target_id.as_ref(), &s.target_path),
                (s.source_id.as_ref(), &s.source_path),
            ]
        });

        for (id, path) in copies {
            let Some(id) = id else { continue };
            if !seen.insert(id.clone()) {
                continue;
            }
            let head = self
                .opener
                .open(path)
                .and_then(|repo| repo.head_commit());
            let result = match head {
                Ok(Some(head)) => self.store.update_last_commit(id, &head),
                Ok(None) => Ok(()),
                Err(e) => Err(e),
            };
            if let Err(e) = result {
                tracing::warn!(id = %id, error = %e, "Failed to record working-copy head");
            }
        }
    }
}
