//! Braid Core - nested-repository merge orchestration
//!
//! This crate integrates changes between trees of git working copies (a main
//! repository plus arbitrarily nested submodules) owned by concurrently
//! working agents. Plans are built leaves-first, executed step by step with
//! partial-failure containment, and every nominally successful merge is
//! re-checked through commit ancestry.

pub mod config;
pub mod error;
pub mod git;
pub mod merge;
pub mod store;

pub use config::{Config, MergeConfig, StoreConfig};
pub use error::{Error, Result};
pub use git::{
    FetchedRefs, GitOpener, GitRepo, MergeAttempt, RepositoryHandle, RepositoryOpener,
    SubmoduleDecl, WorkingStatus,
};
pub use merge::{
    AggregationResult, AncestryVerifier, AssistedMerge, AutoCommitOutcome, AutoCommitter,
    BranchResolver, BranchRole, ChildOutcome, ChildRef, ChildToTrunkAggregator, Conflict,
    ConflictKind, ConflictResolution, ConflictResolver, ExecutionState, MergeDirection,
    MergeEngine, MergeErrorKind, MergeEvent, MergeEventSink, MergeOutcome, MergePlan,
    MergePlanBuilder, MergePlanRunner, MergeStep, MergeStepExecutor, OriginBranchResolver,
    ProvisioningFailure, RecordingEventSink, StepOutcome, StepReport, StepStatus,
    StoreBranchResolver, TracingEventSink,
};
pub use store::{
    FileWorkingCopyStore, InMemoryWorkingCopyStore, WorkingCopyKind, WorkingCopyRef,
    WorkingCopyStore,
};
