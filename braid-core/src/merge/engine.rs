//! Direction-aware entry points over plan building and running

use std::path::Path;

use super::events::{MergeEvent, MergeEventSink};
use super::plan::{BranchResolver, MergePlanBuilder, OriginBranchResolver, StoreBranchResolver};
use super::runner::MergePlanRunner;
use super::types::{MergeDirection, MergeErrorKind, MergeOutcome, MergePlan};
use crate::config::MergeConfig;
use crate::git::RepositoryOpener;
use crate::store::{WorkingCopyRef, WorkingCopyStore};
use crate::Result;

/// The merge engine
///
/// Holds no mutable state of its own: every call builds a fresh plan and
/// execution state, so one engine may serve several independent trunks.
/// Calls against the same trunk must be serialized by the caller.
pub struct MergeEngine<'a> {
    opener: &'a dyn RepositoryOpener,
    store: &'a dyn WorkingCopyStore,
    sink: &'a dyn MergeEventSink,
    config: MergeConfig,
}

impl<'a> MergeEngine<'a> {
    pub fn new(
        opener: &'a dyn RepositoryOpener,
        store: &'a dyn WorkingCopyStore,
        sink: &'a dyn MergeEventSink,
        config: MergeConfig,
    ) -> Self {
        Self {
            opener,
            store,
            sink,
            config,
        }
    }

    pub fn config(&self) -> &MergeConfig {
        &self.config
    }

    pub fn store(&self) -> &dyn WorkingCopyStore {
        self.store
    }

    pub(crate) fn sink(&self) -> &dyn MergeEventSink {
        self.sink
    }

    /// Build the plan `run_plan` would execute
    pub fn plan(
        &self,
        direction: MergeDirection,
        source: &WorkingCopyRef,
        target: &WorkingCopyRef,
    ) -> Result<MergePlan> {
        match direction {
            MergeDirection::WorktreeToOrigin => {
                let resolver =
                    OriginBranchResolver::new(self.store, &target.path, &target.derived_branch);
                self.build(&resolver, &source.path, &target.path)
            }
            MergeDirection::TrunkToChild | MergeDirection::ChildToTrunk => {
                let resolver = StoreBranchResolver::new(self.store);
                self.build(&resolver, &source.path, &target.path)
            }
        }
    }

    fn build(&self, resolver: &dyn BranchResolver, source: &Path, target: &Path) -> Result<MergePlan> {
        MergePlanBuilder::new(self.opener, self.store, resolver).build(source, target)
    }

    /// Merge `source` into `target`
    ///
    /// Never fails: a plan that cannot be built yields a failing outcome.
    pub fn run_plan(
        &self,
        direction: MergeDirection,
        source: &WorkingCopyRef,
        target: &WorkingCopyRef,
    ) -> MergeOutcome {
        let mut outcome = match self.plan(direction, source, target) {
            Ok(plan) => MergePlanRunner::new(self.opener, self.store, self.sink, &self.config)
                .run(direction, &plan),
            Err(e) => {
                tracing::error!(
                    source = %source.id,
                    target = %target.id,
                    error = %e,
                    "Failed to build merge plan"
                );
                let outcome = MergeOutcome::failed(
                    direction,
                    MergeErrorKind::Provisioning,
                    format!("Failed to plan merge of {} into {}: {}", source.id, target.id, e),
                );
                self.sink.publish(&MergeEvent::OutcomeReady {
                    direction,
                    source_id: Some(source.id.clone()),
                    target_id: Some(target.id.clone()),
                    successful: false,
                    commit: None,
                    conflicts: Vec::new(),
                });
                outcome
            }
        };

        outcome.source_id.get_or_insert_with(|| source.id.clone());
        outcome.target_id.get_or_insert_with(|| target.id.clone());
        outcome
    }

    /// Integrate a child working copy into the trunk
    pub fn merge_child_to_trunk(&self, child: &WorkingCopyRef, trunk: &WorkingCopyRef) -> MergeOutcome {
        self.run_plan(MergeDirection::ChildToTrunk, child, trunk)
    }

    /// Bring trunk changes into a child working copy
    pub fn merge_trunk_to_child(&self, trunk: &WorkingCopyRef, child: &WorkingCopyRef) -> MergeOutcome {
        self.run_plan(MergeDirection::TrunkToChild, trunk, child)
    }

    /// Land `source` on `base_branch` of the origin checkout at `origin`
    pub fn final_merge_to_origin(
        &self,
        source: &WorkingCopyRef,
        origin: &Path,
        base_branch: &str,
    ) -> MergeOutcome {
        let origin = origin_ref(origin, base_branch);
        self.run_plan(MergeDirection::WorktreeToOrigin, source, &origin)
    }
}

/// The origin checkout as a merge target on `base_branch`
pub(crate) fn origin_ref(origin: &Path, base_branch: &str) -> WorkingCopyRef {
    WorkingCopyRef::main("origin", origin, base_branch)
}
