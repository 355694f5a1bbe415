//! Post-merge ancestry verification

use std::path::Path;

use super::types::{Conflict, ConflictKind};
use crate::git::RepositoryOpener;
use crate::Result;

/// Checks that every source HEAD became reachable from its target HEAD
///
/// Works purely from commit ancestry, independently of whatever the merge
/// itself reported, and rediscovers the submodule tree instead of trusting
/// the plan.
pub struct AncestryVerifier<'a> {
    opener: &'a dyn RepositoryOpener,
}

impl<'a> AncestryVerifier<'a> {
    pub fn new(opener: &'a dyn RepositoryOpener) -> Self {
        Self { opener }
    }

    /// Missing-commit conflicts for `source` merged into `target`, root
    /// first then every initialized submodule pair
    pub fn verify(&self, source: &Path, target: &Path) -> Result<Vec<Conflict>> {
        let mut missing = Vec::new();
        self.verify_pair(source, target, None, &mut missing)?;
        Ok(missing)
    }

    fn verify_pair(
        &self,
        source: &Path,
        target: &Path,
        submodule: Option<&str>,
        missing: &mut Vec<Conflict>,
    ) -> Result<()> {
        let source_repo = self.opener.open(source)?;
        let target_repo = self.opener.open(target)?;

        if let Some(source_head) = source_repo.head_commit()? {
            let reachable = match target_repo.head_commit()? {
                Some(target_head) => target_repo.is_ancestor(&source_head, &target_head)?,
                None => false,
            };
            if !reachable {
                tracing::warn!(
                    source = %source.display(),
                    target = %target.display(),
                    commit = %source_head,
                    "Source commit is not reachable from target HEAD"
                );
                missing.push(
                    Conflict::new(
                        submodule.unwrap_or("."),
                        ConflictKind::MissingCommit,
                        submodule.map(str::to_string),
                    )
                    .with_detail(format!("{} not reachable from {}", source_head, target.display())),
                );
            }
        }

        for decl in source_repo.submodules()? {
            let sub_source = source.join(&decl.path);
            let sub_target = target.join(&decl.path);
            if !self.opener.is_repository(&sub_source) || !self.opener.is_repository(&sub_target) {
                continue;
            }
            let relative = match submodule {
                Some(prefix) => format!("{}/{}", prefix, decl.path),
                None => decl.path.clone(),
            };
            self.verify_pair(&sub_source, &sub_target, Some(&relative), missing)?;
        }

        Ok(())
    }
}
