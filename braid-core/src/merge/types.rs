//! Plan, conflict and outcome types

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Which pair of working copies a plan integrates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum MergeDirection {
    /// Bring trunk changes into an agent's working copy
    TrunkToChild,
    /// Integrate an agent's working copy into the trunk
    #[default]
    ChildToTrunk,
    /// Land a finished working copy on the origin repository's base branch
    WorktreeToOrigin,
}

impl std::fmt::Display for MergeDirection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MergeDirection::TrunkToChild => write!(f, "trunk-to-child"),
            MergeDirection::ChildToTrunk => write!(f, "child-to-trunk"),
            MergeDirection::WorktreeToOrigin => write!(f, "worktree-to-origin"),
        }
    }
}

impl std::str::FromStr for MergeDirection {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "trunk-to-child" | "trunk_to_child" => Ok(MergeDirection::TrunkToChild),
            "child-to-trunk" | "child_to_trunk" => Ok(MergeDirection::ChildToTrunk),
            "worktree-to-origin" | "worktree_to_origin" | "origin" => {
                Ok(MergeDirection::WorktreeToOrigin)
            }
            _ => Err(format!("Unknown merge direction: {}", s)),
        }
    }
}

/// One unit of merge work between a source and a target repository
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MergeStep {
    /// Source repository root
    pub source_path: PathBuf,
    /// Target repository root
    pub target_path: PathBuf,
    /// Submodule path relative to the plan root; `None` for the root step
    pub submodule_path: Option<String>,
    /// Branch the source is expected to be on
    pub source_branch: String,
    /// Branch the target is expected to be on
    pub target_branch: String,
    /// Target-side repository declaring `target_path` as a submodule
    pub containing_ancestor: Option<PathBuf>,
    /// Registered working-copy id of the source, when known
    pub source_id: Option<String>,
    /// Registered working-copy id of the target, when known
    pub target_id: Option<String>,
}

impl MergeStep {
    /// Whether this is the root step of its plan
    pub fn is_root(&self) -> bool {
        self.submodule_path.is_none()
    }

    /// Human-readable label: the submodule path, or `<root>`
    pub fn label(&self) -> &str {
        self.submodule_path.as_deref().unwrap_or("<root>")
    }
}

/// A declared submodule with no initialized counterpart
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProvisioningFailure {
    /// Submodule path relative to the plan root
    pub submodule_path: String,
    /// Where the repository was expected
    pub target_path: PathBuf,
    /// Why it was skipped
    pub reason: String,
}

/// Ordered, leaves-first list of steps
#[derive(Debug, Clone, Default, Serialize)]
pub struct MergePlan {
    pub steps: Vec<MergeStep>,
    pub provisioning_failures: Vec<ProvisioningFailure>,
}

impl MergePlan {
    /// The last step, which always targets the plan root
    pub fn root(&self) -> Option<&MergeStep> {
        self.steps.last()
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }
}

/// Kind of a merge conflict
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictKind {
    /// File content conflict; needs external resolution
    Content,
    /// The merge reported success but the source commit is not reachable
    MissingCommit,
    /// The step failed to execute
    MergeError,
}

impl std::fmt::Display for ConflictKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConflictKind::Content => write!(f, "content"),
            ConflictKind::MissingCommit => write!(f, "missing-commit"),
            ConflictKind::MergeError => write!(f, "merge-error"),
        }
    }
}

/// A single conflicting path
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Conflict {
    /// Path relative to the repository it occurred in
    pub file_path: String,
    pub kind: ConflictKind,
    /// Owning submodule relative to the plan root; `None` for the root
    pub submodule_path: Option<String>,
    /// Error text or missing commit, when there is one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl Conflict {
    pub fn new(file_path: impl Into<String>, kind: ConflictKind, submodule_path: Option<String>) -> Self {
        Self {
            file_path: file_path.into(),
            kind,
            submodule_path,
            detail: None,
        }
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }
}

impl std::fmt::Display for Conflict {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.submodule_path {
            Some(sub) => write!(f, "[{}] {}/{}", self.kind, sub, self.file_path)?,
            None => write!(f, "[{}] {}", self.kind, self.file_path)?,
        }
        if let Some(detail) = &self.detail {
            write!(f, " ({})", detail)?;
        }
        Ok(())
    }
}

/// What happened to one step
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum StepStatus {
    /// A merge commit was created
    Merged { commit: String },
    /// The source was already reachable; nothing changed
    UpToDate { commit: String },
    /// Only submodule pointers conflicted and were resolved in place
    AutoResolved { commit: String },
    /// Conflicts were recorded
    Conflicted,
    /// A nested step failed, so this one was not attempted
    Blocked,
}

impl StepStatus {
    pub fn is_success(&self) -> bool {
        matches!(
            self,
            StepStatus::Merged { .. } | StepStatus::UpToDate { .. } | StepStatus::AutoResolved { .. }
        )
    }

    pub fn commit(&self) -> Option<&str> {
        match self {
            StepStatus::Merged { commit }
            | StepStatus::UpToDate { commit }
            | StepStatus::AutoResolved { commit } => Some(commit),
            StepStatus::Conflicted | StepStatus::Blocked => None,
        }
    }
}

/// Per-step entry of a [`MergeOutcome`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StepReport {
    pub submodule_path: Option<String>,
    pub source_path: PathBuf,
    pub target_path: PathBuf,
    #[serde(flatten)]
    pub status: StepStatus,
}

/// Why an outcome failed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MergeErrorKind {
    /// Unresolved content conflicts
    MergeConflict,
    /// Ancestry verification failed after a nominal success
    MissingCommit,
    /// A step or the plan itself failed to execute
    MergeExecutionFailed,
    /// Committing stray work before the merge failed
    AutoCommitFailed,
    /// The external conflict resolver gave up
    ConflictResolverFailed,
    /// The plan could not be built for the given working copies
    Provisioning,
}

impl MergeErrorKind {
    /// Classify a non-empty conflict list
    pub fn classify(conflicts: &[Conflict]) -> Self {
        if conflicts.iter().any(|c| c.kind == ConflictKind::Content) {
            MergeErrorKind::MergeConflict
        } else if conflicts.iter().any(|c| c.kind == ConflictKind::MergeError) {
            MergeErrorKind::MergeExecutionFailed
        } else {
            MergeErrorKind::MissingCommit
        }
    }
}

/// Externally visible result of one plan run
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MergeOutcome {
    pub direction: MergeDirection,
    pub successful: bool,
    /// Target root HEAD after the run
    pub merge_commit: Option<String>,
    pub conflicts: Vec<Conflict>,
    pub submodule_outcomes: Vec<StepReport>,
    pub provisioning_failures: Vec<ProvisioningFailure>,
    pub error_kind: Option<MergeErrorKind>,
    pub message: String,
    pub source_id: Option<String>,
    pub target_id: Option<String>,
}

impl MergeOutcome {
    /// Successful outcome with nothing to merge
    pub fn no_op(direction: MergeDirection, message: impl Into<String>) -> Self {
        Self {
            direction,
            successful: true,
            merge_commit: None,
            conflicts: Vec::new(),
            submodule_outcomes: Vec::new(),
            provisioning_failures: Vec::new(),
            error_kind: None,
            message: message.into(),
            source_id: None,
            target_id: None,
        }
    }

    /// Failing outcome that never reached a step
    pub fn failed(direction: MergeDirection, kind: MergeErrorKind, message: impl Into<String>) -> Self {
        Self {
            successful: false,
            error_kind: Some(kind),
            ..Self::no_op(direction, message)
        }
    }

    pub fn has_conflicts(&self) -> bool {
        !self.conflicts.is_empty()
    }
}
