//! Leaves-first plan building over a submodule tree
//!
//! The builder walks the source working copy's submodule declarations,
//! pairs each with the same relative path in the target, and emits one
//! [`MergeStep`] per pair with nested submodules always ahead of the
//! repository that contains them. Branch names come from a
//! [`BranchResolver`], so worktree-to-worktree and worktree-to-origin
//! plans share the same traversal.

use std::path::{Path, PathBuf};

use super::types::{MergePlan, MergeStep, ProvisioningFailure};
use crate::git::RepositoryOpener;
use crate::store::WorkingCopyStore;
use crate::{Error, Result};

/// Side of a step a branch is resolved for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BranchRole {
    Source,
    Target,
}

/// Resolves the branch a working copy is expected to be on
pub trait BranchResolver {
    /// Effective branch for the repository at `path`, or `None` to inherit
    /// the containing repository's branch
    fn resolve(&self, path: &Path, role: BranchRole) -> Option<String>;
}

fn derived_branch(store: &dyn WorkingCopyStore, path: &Path) -> Option<String> {
    match store.find_by_path(path) {
        Ok(found) => found.map(|wc| wc.derived_branch),
        Err(e) => {
            tracing::debug!(path = %path.display(), error = %e, "Working-copy lookup failed");
            None
        }
    }
}

/// Reads both sides from the working-copy store
pub struct StoreBranchResolver<'a> {
    store: &'a dyn WorkingCopyStore,
}

impl<'a> StoreBranchResolver<'a> {
    pub fn new(store: &'a dyn WorkingCopyStore) -> Self {
        Self { store }
    }
}

impl BranchResolver for StoreBranchResolver<'_> {
    fn resolve(&self, path: &Path, _role: BranchRole) -> Option<String> {
        derived_branch(self.store, path)
    }
}

/// Targets inside the origin checkout resolve to its base branch; sources
/// are read from the store
pub struct OriginBranchResolver<'a> {
    store: &'a dyn WorkingCopyStore,
    origin_root: PathBuf,
    base_branch: String,
}

impl<'a> OriginBranchResolver<'a> {
    pub fn new(
        store: &'a dyn WorkingCopyStore,
        origin_root: impl Into<PathBuf>,
        base_branch: impl Into<String>,
    ) -> Self {
        Self {
            store,
            origin_root: origin_root.into(),
            base_branch: base_branch.into(),
        }
    }
}

impl BranchResolver for OriginBranchResolver<'_> {
    fn resolve(&self, path: &Path, role: BranchRole) -> Option<String> {
        match role {
            BranchRole::Target if path.starts_with(&self.origin_root) => {
                Some(self.base_branch.clone())
            }
            _ => derived_branch(self.store, path),
        }
    }
}

/// Builds [`MergePlan`]s
pub struct MergePlanBuilder<'a> {
    opener: &'a dyn RepositoryOpener,
    store: &'a dyn WorkingCopyStore,
    resolver: &'a dyn BranchResolver,
}

impl<'a> MergePlanBuilder<'a> {
    pub fn new(
        opener: &'a dyn RepositoryOpener,
        store: &'a dyn WorkingCopyStore,
        resolver: &'a dyn BranchResolver,
    ) -> Self {
        Self {
            opener,
            store,
            resolver,
        }
    }

    /// Plan the merge of `source` into `target`
    pub fn build(&self, source: &Path, target: &Path) -> Result<MergePlan> {
        for (side, path) in [("source", source), ("target", target)] {
            if !self.opener.is_repository(path) {
                return Err(Error::Provisioning {
                    path: path.to_path_buf(),
                    reason: format!("{} working copy is not a git repository", side),
                });
            }
        }

        let source_branch = self.root_branch(source, BranchRole::Source)?;
        let target_branch = self.root_branch(target, BranchRole::Target)?;

        let mut plan = MergePlan::default();
        self.visit(&mut plan, source, target, None, &source_branch, &target_branch)?;
        plan.steps.push(self.step(
            source,
            target,
            None,
            source_branch,
            target_branch,
            None,
        ));

        tracing::debug!(
            source = %source.display(),
            target = %target.display(),
            steps = plan.steps.len(),
            skipped = plan.provisioning_failures.len(),
            "Built merge plan"
        );

        Ok(plan)
    }

    fn root_branch(&self, path: &Path, role: BranchRole) -> Result<String> {
        if let Some(branch) = self.resolver.resolve(path, role) {
            return Ok(branch);
        }
        self.opener
            .open(path)?
            .current_branch()?
            .ok_or_else(|| Error::NotFound(format!("branch for {}", path.display())))
    }

    fn visit(
        &self,
        plan: &mut MergePlan,
        source: &Path,
        target: &Path,
        prefix: Option<&str>,
        source_branch: &str,
        target_branch: &str,
    ) -> Result<()> {
        let declared = self.opener.open(source)?.submodules()?;

        for decl in declared {
            let relative = match prefix {
                Some(prefix) => format!("{}/{}", prefix, decl.path),
                None => decl.path.clone(),
            };
            let sub_source = source.join(&decl.path);
            let sub_target = target.join(&decl.path);

            let missing = if !self.opener.is_repository(&sub_target) {
                Some(("target", &sub_target))
            } else if !self.opener.is_repository(&sub_source) {
                Some(("source", &sub_source))
            } else {
                None
            };
            if let Some((side, path)) = missing {
                tracing::warn!(
                    submodule = %relative,
                    path = %path.display(),
                    "Skipping submodule that is not initialized in the {} copy",
                    side
                );
                let reason = format!("{} submodule not initialized at {}", side, path.display());
                plan.provisioning_failures.push(ProvisioningFailure {
                    submodule_path: relative,
                    target_path: sub_target,
                    reason,
                });
                continue;
            }

            let sub_source_branch = self
                .resolver
                .resolve(&sub_source, BranchRole::Source)
                .unwrap_or_else(|| source_branch.to_string());
            let sub_target_branch = self
                .resolver
                .resolve(&sub_target, BranchRole::Target)
                .unwrap_or_else(|| target_branch.to_string());

            self.visit(
                plan,
                &sub_source,
                &sub_target,
                Some(&relative),
                &sub_source_branch,
                &sub_target_branch,
            )?;

            plan.steps.push(self.step(
                &sub_source,
                &sub_target,
                Some(relative),
                sub_source_branch,
                sub_target_branch,
                Some(target.to_path_buf()),
            ));
        }

        Ok(())
    }

    fn step(
        &self,
        source: &Path,
        target: &Path,
        submodule_path: Option<String>,
        source_branch: String,
        target_branch: String,
        containing_ancestor: Option<PathBuf>,
    ) -> MergeStep {
        MergeStep {
            source_path: source.to_path_buf(),
            target_path: target.to_path_buf(),
            submodule_path,
            source_branch,
            target_branch,
            containing_ancestor,
            source_id: self.id_for(source),
            target_id: self.id_for(target),
        }
    }

    fn id_for(&self, path: &Path) -> Option<String> {
        self.store.find_by_path(path).ok().flatten().map(|wc| wc.id)
    }
}
