//! Nested-repository merge orchestration
//!
//! A merge between two working copies runs as a plan of steps, one per
//! repository in the shared submodule tree, ordered leaves first:
//!
//! 1. [`MergePlanBuilder`] pairs source and target submodules and orders them
//! 2. [`MergePlanRunner`] executes each step through [`MergeStepExecutor`],
//!    accumulating conflicts and blocked containers in an [`ExecutionState`]
//! 3. [`AncestryVerifier`] re-checks every nominal success through commit
//!    ancestry
//! 4. [`AssistedMerge`] brackets a merge with an auto-commit and a conflict
//!    resolver
//! 5. [`ChildToTrunkAggregator`] repeats this for many children against one
//!    trunk, stopping at the first failure
//!
//! [`MergeEngine`] is the entry point tying these together per
//! [`MergeDirection`].

mod aggregate;
mod assisted;
mod engine;
mod events;
mod executor;
mod plan;
mod runner;
mod state;
mod types;
mod verify;

pub use aggregate::{AggregationResult, ChildOutcome, ChildRef, ChildToTrunkAggregator};
pub use assisted::{
    AssistedMerge, AutoCommitOutcome, AutoCommitter, ConflictResolution, ConflictResolver,
};
pub use engine::MergeEngine;
pub use events::{MergeEvent, MergeEventSink, RecordingEventSink, TracingEventSink};
pub use executor::{MergeStepExecutor, StepOutcome};
pub use plan::{
    BranchResolver, BranchRole, MergePlanBuilder, OriginBranchResolver, StoreBranchResolver,
};
pub use runner::MergePlanRunner;
pub use state::ExecutionState;
pub use types::{
    Conflict, ConflictKind, MergeDirection, MergeErrorKind, MergeOutcome, MergePlan, MergeStep,
    ProvisioningFailure, StepReport, StepStatus,
};
pub use verify::AncestryVerifier;
