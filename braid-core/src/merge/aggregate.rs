//! Sequential child-to-trunk aggregation
//!
//! Children are merged into a shared trunk strictly in submission order.
//! The first child that fails stops the pass: the trunk's state relative to
//! that failure is undefined, so nothing after it is attempted.

use serde::Serialize;

use super::assisted::{AssistedMerge, AutoCommitter, ConflictResolver};
use super::engine::MergeEngine;
use super::events::MergeEvent;
use super::types::{MergeDirection, MergeOutcome};
use crate::store::WorkingCopyRef;

/// One child submitted for aggregation
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChildRef {
    /// Identifier of the child's result (usually the agent or working-copy id)
    pub id: String,
    /// The child's working copy; `None` when the child produced no changes
    pub working_copy: Option<WorkingCopyRef>,
}

impl ChildRef {
    pub fn new(id: impl Into<String>, working_copy: Option<WorkingCopyRef>) -> Self {
        Self {
            id: id.into(),
            working_copy,
        }
    }
}

/// A child together with its latest merge outcome
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChildOutcome {
    pub child_id: String,
    pub working_copy: Option<WorkingCopyRef>,
    /// `None` until the child has been attempted
    pub outcome: Option<MergeOutcome>,
}

impl ChildOutcome {
    fn pending(child: &ChildRef) -> Self {
        Self {
            child_id: child.id.clone(),
            working_copy: child.working_copy.clone(),
            outcome: None,
        }
    }

    fn attempted(child: &ChildRef, outcome: MergeOutcome) -> Self {
        Self {
            outcome: Some(outcome),
            ..Self::pending(child)
        }
    }

    fn as_child(&self) -> ChildRef {
        ChildRef::new(self.child_id.clone(), self.working_copy.clone())
    }

    pub fn is_successful(&self) -> bool {
        self.outcome.as_ref().is_some_and(|o| o.successful)
    }
}

/// Partition of one aggregation pass
///
/// `conflicted` is set exactly when the pass stopped early; `pending` then
/// holds every later child in submission order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct AggregationResult {
    pub merged: Vec<ChildOutcome>,
    pub pending: Vec<ChildOutcome>,
    pub conflicted: Option<ChildOutcome>,
}

impl AggregationResult {
    pub fn is_complete(&self) -> bool {
        self.conflicted.is_none() && self.pending.is_empty()
    }
}

/// Merges several children into one trunk, fail-fast
pub struct ChildToTrunkAggregator<'a> {
    merge: AssistedMerge<'a>,
}

impl<'a> ChildToTrunkAggregator<'a> {
    pub fn new(engine: &'a MergeEngine<'a>) -> Self {
        Self {
            merge: AssistedMerge::new(engine),
        }
    }

    /// Commit stray work in each child before merging it
    pub fn with_auto_committer(mut self, committer: &'a dyn AutoCommitter) -> Self {
        self.merge = self.merge.with_auto_committer(committer);
        self
    }

    /// Hand conflicting children to `resolver`, then merge them once more
    pub fn with_conflict_resolver(mut self, resolver: &'a dyn ConflictResolver) -> Self {
        self.merge = self.merge.with_conflict_resolver(resolver);
        self
    }

    /// Merge `children` into `trunk` in order, stopping at the first failure
    pub fn run(&self, children: &[ChildRef], trunk: &WorkingCopyRef) -> AggregationResult {
        let mut result = AggregationResult::default();

        for (index, child) in children.iter().enumerate() {
            let outcome = self.merge_child(child, trunk);
            if outcome.successful {
                tracing::info!(child = %child.id, trunk = %trunk.id, "Child merged into trunk");
                result.merged.push(ChildOutcome::attempted(child, outcome));
                continue;
            }

            self.merge.engine().sink().publish(&MergeEvent::ChildConflicted {
                child_id: child.id.clone(),
                trunk_id: trunk.id.clone(),
                error_kind: outcome.error_kind,
                message: outcome.message.clone(),
            });
            result.conflicted = Some(ChildOutcome::attempted(child, outcome));
            result.pending = children[index + 1..]
                .iter()
                .map(ChildOutcome::pending)
                .collect();
            break;
        }

        tracing::info!(
            trunk = %trunk.id,
            merged = result.merged.len(),
            pending = result.pending.len(),
            conflicted = ?result.conflicted.as_ref().map(|c| &c.child_id),
            "Aggregation pass finished"
        );
        result
    }

    /// Re-derive outcomes for every attempted child of `previous`
    ///
    /// Children already merged are no-ops unless the trunk moved out of band;
    /// `pending` is carried over untouched.
    pub fn rerun(&self, previous: &AggregationResult, trunk: &WorkingCopyRef) -> AggregationResult {
        let refresh = |entry: &ChildOutcome| {
            let child = entry.as_child();
            let outcome = self.merge_existing(&child, trunk);
            ChildOutcome::attempted(&child, outcome)
        };

        AggregationResult {
            merged: previous.merged.iter().map(refresh).collect(),
            pending: previous.pending.clone(),
            conflicted: previous.conflicted.as_ref().map(refresh),
        }
    }

    fn merge_child(&self, child: &ChildRef, trunk: &WorkingCopyRef) -> MergeOutcome {
        match &child.working_copy {
            Some(working_copy) => self.merge.merge_child_to_trunk(working_copy, trunk),
            None => self.merge_existing(child, trunk),
        }
    }

    fn merge_existing(&self, child: &ChildRef, trunk: &WorkingCopyRef) -> MergeOutcome {
        match &child.working_copy {
            Some(working_copy) => self.merge.engine().merge_child_to_trunk(working_copy, trunk),
            None => {
                tracing::debug!(child = %child.id, "Child has no working copy; nothing to merge");
                MergeOutcome::no_op(MergeDirection::ChildToTrunk, "No working copy to merge")
            }
        }
    }
}
