//! Repository capability consumed by the merge engine

use std::collections::BTreeMap;
use std::path::Path;

use crate::Result;

/// A submodule declared in `.gitmodules`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmoduleDecl {
    /// Logical submodule name
    pub name: String,
    /// Path relative to the declaring repository root
    pub path: String,
}

impl SubmoduleDecl {
    /// Create a declaration
    pub fn new(name: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            path: path.into(),
        }
    }
}

/// Working-tree status, untracked files excluded
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WorkingStatus {
    /// Paths modified or deleted relative to HEAD
    pub modified: Vec<String>,
    /// Paths newly added to the index
    pub added: Vec<String>,
    /// Paths with unresolved merge conflicts
    pub conflicted: Vec<String>,
}

impl WorkingStatus {
    /// No modifications, additions or conflicts
    pub fn is_clean(&self) -> bool {
        self.modified.is_empty() && self.added.is_empty() && self.conflicted.is_empty()
    }
}

/// References created by fetching another working copy
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FetchedRefs {
    /// Reference holding the source's HEAD commit, if it resolved
    pub head: Option<String>,
    /// Source branch name -> local reference holding its tip
    pub branches: BTreeMap<String, String>,
}

/// Result of merging a reference into HEAD
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MergeAttempt {
    /// The reference is already reachable from HEAD; nothing was written
    UpToDate { head: String },
    /// A merge commit was created
    Merged { commit: String },
    /// The merge stopped with these paths conflicted
    Conflicted { paths: Vec<String> },
}

/// Capability over a single git working copy
///
/// One method per operation the engine needs; nothing here knows about plans
/// or steps. Implementations report failures as `Err`, which the engine
/// converts into merge-error conflicts at the step boundary.
pub trait RepositoryHandle {
    /// Root of the working copy
    fn path(&self) -> &Path;

    /// Commit id at HEAD, `None` for an unborn branch
    fn head_commit(&self) -> Result<Option<String>>;

    /// Checked-out branch name, `None` when HEAD is detached
    fn current_branch(&self) -> Result<Option<String>>;

    /// Submodules declared by this repository, in declaration order
    fn submodules(&self) -> Result<Vec<SubmoduleDecl>>;

    /// Working-tree status
    fn status(&self) -> Result<WorkingStatus>;

    /// Declared submodule paths whose checked-out commit differs from the
    /// pointer recorded in HEAD
    fn dirty_submodule_pointers(&self) -> Result<Vec<String>>;

    /// Fetch HEAD and every local branch of the working copy at `source`
    /// into `namespace`
    fn fetch_from(&self, source: &Path, namespace: &str) -> Result<FetchedRefs>;

    /// Merge `reference` into HEAD, always creating a merge commit unless
    /// the reference is already reachable.
    ///
    /// If a previous merge is still pending (`MERGE_HEAD` present) it is
    /// completed instead when no conflicts remain, or its conflicts are
    /// reported unchanged.
    fn merge_no_ff(&self, reference: &str, message: &str) -> Result<MergeAttempt>;

    /// Stage `paths` exactly as they are in the working tree, clearing any
    /// conflict entries for them
    fn stage_paths(&self, paths: &[String]) -> Result<()>;

    /// Commit the index; completes a pending merge when one is in progress
    fn commit(&self, message: &str) -> Result<String>;

    /// Check out `branch`, creating it at `start_point` (or HEAD) when it
    /// does not exist. An existing branch whose tip is an ancestor of
    /// `start_point` is fast-forwarded first.
    fn checkout_branch(&self, branch: &str, start_point: Option<&str>) -> Result<()>;

    /// Whether `ancestor` is reachable from `descendant` (a commit is its own
    /// ancestor). Unknown objects are simply not reachable.
    fn is_ancestor(&self, ancestor: &str, descendant: &str) -> Result<bool>;
}

/// Opens repository handles by path
pub trait RepositoryOpener {
    /// Open the working copy rooted exactly at `path`
    fn open(&self, path: &Path) -> Result<Box<dyn RepositoryHandle>>;

    /// Whether an initialized working copy is rooted at `path`
    fn is_repository(&self, path: &Path) -> bool;
}

/// Stage and commit every drifted submodule pointer in `repo`.
///
/// Skipped while the repository still has conflicted paths. Returns the new
/// commit, or `None` when nothing needed committing.
pub fn commit_dirty_pointers(repo: &dyn RepositoryHandle, message: &str) -> Result<Option<String>> {
    let status = repo.status()?;
    if !status.conflicted.is_empty() {
        tracing::debug!(
            path = %repo.path().display(),
            conflicted = ?status.conflicted,
            "Skipping pointer commit while conflicts are unresolved"
        );
        return Ok(None);
    }

    let dirty = repo.dirty_submodule_pointers()?;
    if dirty.is_empty() {
        return Ok(None);
    }

    repo.stage_paths(&dirty)?;
    let commit = repo.commit(&format!("{}: {}", message, dirty.join(", ")))?;

    tracing::info!(
        path = %repo.path().display(),
        pointers = ?dirty,
        commit = %commit,
        "Committed submodule pointers"
    );

    Ok(Some(commit))
}
