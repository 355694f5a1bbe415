//! libgit2-backed repository handle

use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

use git2::build::CheckoutBuilder;
use git2::{
    BranchType, Commit, ErrorCode, Index, MergeOptions, Oid, Repository, RepositoryState,
    Signature, StatusOptions,
};

use super::handle::{
    FetchedRefs, MergeAttempt, RepositoryHandle, RepositoryOpener, SubmoduleDecl, WorkingStatus,
};
use crate::config::MergeConfig;
use crate::{Error, Result};

/// Identity used for commits when the repository has none configured
#[derive(Debug, Clone)]
struct Committer {
    name: String,
    email: String,
}

/// A git working copy opened through libgit2
pub struct GitRepo {
    /// The underlying git2 repository
    repo: Repository,
    /// Path to the working copy root
    root: PathBuf,
    committer: Committer,
}

impl std::fmt::Debug for GitRepo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GitRepo")
            .field("root", &self.root)
            .finish_non_exhaustive()
    }
}

impl GitRepo {
    /// Open the working copy rooted exactly at `path`
    ///
    /// Unlike discovery this never climbs to a parent directory: an
    /// uninitialized submodule directory must not resolve to its container.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        let repo = Repository::open(path).map_err(|e| {
            if e.code() == ErrorCode::NotFound {
                Error::NotFound(format!("git repository at {}", path.display()))
            } else {
                Error::Git(e)
            }
        })?;

        let root = repo
            .workdir()
            .ok_or_else(|| Error::Config("Bare repositories are not supported".to_string()))?
            .to_path_buf();

        Ok(Self {
            repo,
            root,
            committer: Committer {
                name: "braid".to_string(),
                email: "braid@localhost".to_string(),
            },
        })
    }

    /// Override the fallback committer identity
    pub fn with_committer(mut self, name: impl Into<String>, email: impl Into<String>) -> Self {
        self.committer = Committer {
            name: name.into(),
            email: email.into(),
        };
        self
    }

    /// Check if a working copy is rooted at the given path
    pub fn is_git_repo(path: impl AsRef<Path>) -> bool {
        Repository::open(path.as_ref())
            .map(|repo| repo.workdir().is_some())
            .unwrap_or(false)
    }

    /// Get access to the underlying git2 repository
    pub fn inner(&self) -> &Repository {
        &self.repo
    }

    fn signature(&self) -> Result<Signature<'static>> {
        match self.repo.signature() {
            Ok(sig) => Ok(sig),
            Err(_) => Ok(Signature::now(&self.committer.name, &self.committer.email)?),
        }
    }

    fn head_commit_object(&self) -> Result<Option<Commit<'_>>> {
        match self.repo.head() {
            Ok(head) => Ok(Some(head.peel_to_commit()?)),
            Err(e) if e.code() == ErrorCode::UnbornBranch || e.code() == ErrorCode::NotFound => {
                Ok(None)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Parents recorded in `MERGE_HEAD` while a merge is in progress
    fn pending_merge_heads(&self) -> Result<Vec<Oid>> {
        if self.repo.state() != RepositoryState::Merge {
            return Ok(Vec::new());
        }

        let merge_head = self.repo.path().join("MERGE_HEAD");
        if !merge_head.exists() {
            return Ok(Vec::new());
        }

        fs::read_to_string(&merge_head)?
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(|line| Oid::from_str(line).map_err(Error::from))
            .collect()
    }

    fn run_fetch(&self, source: &Path, refspecs: &[String]) -> Result<()> {
        let output = Command::new("git")
            .arg("fetch")
            .arg("--no-tags")
            .arg("--quiet")
            .arg(source)
            .args(refspecs)
            .env("GIT_TERMINAL_PROMPT", "0")
            .current_dir(&self.root)
            .output()
            .map_err(|e| Error::Other(format!("Failed to run git fetch: {}", e)))?;

        if !output.status.success() {
            return Err(Error::GitCommand {
                command: format!("git fetch {}", source.display()),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        Ok(())
    }
}

fn conflicted_paths(index: &Index) -> Result<Vec<String>> {
    let mut paths = BTreeSet::new();
    for conflict in index.conflicts()? {
        let conflict = conflict?;
        let entry = conflict
            .our
            .as_ref()
            .or(conflict.their.as_ref())
            .or(conflict.ancestor.as_ref());
        if let Some(entry) = entry {
            paths.insert(String::from_utf8_lossy(&entry.path).to_string());
        }
    }
    Ok(paths.into_iter().collect())
}

impl RepositoryHandle for GitRepo {
    fn path(&self) -> &Path {
        &self.root
    }

    fn head_commit(&self) -> Result<Option<String>> {
        Ok(self.head_commit_object()?.map(|c| c.id().to_string()))
    }

    fn current_branch(&self) -> Result<Option<String>> {
        let head = match self.repo.head() {
            Ok(h) => h,
            Err(e) if e.code() == ErrorCode::UnbornBranch => return Ok(None),
            Err(e) => return Err(Error::Other(format!("Failed to get HEAD: {}", e))),
        };

        if head.is_branch() {
            Ok(head.shorthand().map(|s| s.to_string()))
        } else {
            // Detached HEAD
            Ok(None)
        }
    }

    fn submodules(&self) -> Result<Vec<SubmoduleDecl>> {
        if !self.root.join(".gitmodules").is_file() {
            return Ok(Vec::new());
        }

        let mut decls = Vec::new();
        for submodule in self.repo.submodules()? {
            let path = submodule.path().to_string_lossy().to_string();
            let name = submodule.name().map(str::to_string).unwrap_or_else(|| path.clone());
            decls.push(SubmoduleDecl::new(name, path));
        }
        Ok(decls)
    }

    fn status(&self) -> Result<WorkingStatus> {
        let mut opts = StatusOptions::new();
        opts.include_untracked(false)
            .include_ignored(false)
            .exclude_submodules(false);

        let mut status = WorkingStatus::default();
        for entry in self.repo.statuses(Some(&mut opts))?.iter() {
            let Some(path) = entry.path().map(str::to_string) else {
                continue;
            };
            let flags = entry.status();
            if flags.is_conflicted() {
                status.conflicted.push(path);
            } else if flags.is_index_new() {
                status.added.push(path);
            } else if !flags.is_empty() {
                status.modified.push(path);
            }
        }
        Ok(status)
    }

    fn dirty_submodule_pointers(&self) -> Result<Vec<String>> {
        let mut dirty = Vec::new();
        for decl in self.submodules()? {
            let submodule = match self.repo.find_submodule(&decl.path) {
                Ok(sm) => sm,
                Err(e) => {
                    tracing::debug!(submodule = %decl.path, error = %e, "Submodule lookup failed");
                    continue;
                }
            };
            let checked_out = submodule.workdir_id().or(submodule.index_id());
            if checked_out.is_some() && checked_out != submodule.head_id() {
                dirty.push(decl.path);
            }
        }
        Ok(dirty)
    }

    fn fetch_from(&self, source: &Path, namespace: &str) -> Result<FetchedRefs> {
        let namespace = namespace.trim_end_matches('/');
        let head_ref = format!("{}/HEAD", namespace);
        let heads_prefix = format!("{}/heads/", namespace);

        // a stale head from an earlier fetch must never stand in for this one
        if let Ok(mut stale) = self.repo.find_reference(&head_ref) {
            stale.delete()?;
        }

        let branch_spec = format!("+refs/heads/*:{}*", heads_prefix);
        let with_head = [format!("+HEAD:{}", head_ref), branch_spec.clone()];
        if let Err(e) = self.run_fetch(source, &with_head) {
            tracing::debug!(
                source = %source.display(),
                error = %e,
                "Fetching source HEAD failed, retrying with branches only"
            );
            self.run_fetch(source, &[branch_spec])?;
        }

        let mut fetched = FetchedRefs::default();
        if self.repo.find_reference(&head_ref).is_ok() {
            fetched.head = Some(head_ref);
        }

        for reference in self.repo.references_glob(&format!("{}*", heads_prefix))? {
            let reference = reference?;
            if let Some(name) = reference.name() {
                if let Some(branch) = name.strip_prefix(&heads_prefix) {
                    fetched.branches.insert(branch.to_string(), name.to_string());
                }
            }
        }

        Ok(fetched)
    }

    fn merge_no_ff(&self, reference: &str, message: &str) -> Result<MergeAttempt> {
        if self.repo.state() == RepositoryState::Merge {
            let index = self.repo.index()?;
            if index.has_conflicts() {
                return Ok(MergeAttempt::Conflicted {
                    paths: conflicted_paths(&index)?,
                });
            }
            tracing::info!(path = %self.root.display(), "Completing pending merge");
            let commit = self.commit(message)?;
            return Ok(MergeAttempt::Merged { commit });
        }

        let their_ref = self.repo.find_reference(reference)?;
        let theirs = self.repo.reference_to_annotated_commit(&their_ref)?;
        let (analysis, _) = self.repo.merge_analysis(&[&theirs])?;

        if analysis.is_up_to_date() {
            let head = self
                .head_commit()?
                .ok_or_else(|| Error::Other("HEAD vanished during merge".to_string()))?;
            return Ok(MergeAttempt::UpToDate { head });
        }
        if analysis.is_unborn() {
            return Err(Error::Other(format!(
                "Cannot merge into unborn HEAD at {}",
                self.root.display()
            )));
        }

        let mut merge_opts = MergeOptions::new();
        let mut checkout = CheckoutBuilder::new();
        checkout.safe().allow_conflicts(true).conflict_style_merge(true);
        self.repo
            .merge(&[&theirs], Some(&mut merge_opts), Some(&mut checkout))?;

        let index = self.repo.index()?;
        if index.has_conflicts() {
            return Ok(MergeAttempt::Conflicted {
                paths: conflicted_paths(&index)?,
            });
        }

        let commit = self.commit(message)?;
        Ok(MergeAttempt::Merged { commit })
    }

    fn stage_paths(&self, paths: &[String]) -> Result<()> {
        let mut index = self.repo.index()?;
        for path in paths {
            let path = Path::new(path);
            // adding a submodule directory leaves its conflict stages behind
            for stage in 1..=3 {
                match index.remove(path, stage) {
                    Ok(()) => {}
                    Err(e) if e.code() == ErrorCode::NotFound => {}
                    Err(e) => return Err(e.into()),
                }
            }
            index.add_path(path)?;
        }
        index.write()?;
        Ok(())
    }

    fn commit(&self, message: &str) -> Result<String> {
        let mut index = self.repo.index()?;
        if index.has_conflicts() {
            return Err(Error::Other(format!(
                "Cannot commit in {} with unresolved conflicts",
                self.root.display()
            )));
        }

        let tree = self.repo.find_tree(index.write_tree()?)?;
        let signature = self.signature()?;

        let mut parents = Vec::new();
        if let Some(head) = self.head_commit_object()? {
            parents.push(head);
        }
        for oid in self.pending_merge_heads()? {
            parents.push(self.repo.find_commit(oid)?);
        }
        let parent_refs: Vec<&Commit<'_>> = parents.iter().collect();

        let oid = self
            .repo
            .commit(Some("HEAD"), &signature, &signature, message, &tree, &parent_refs)?;
        self.repo.cleanup_state()?;

        Ok(oid.to_string())
    }

    fn checkout_branch(&self, branch: &str, start_point: Option<&str>) -> Result<()> {
        if self.current_branch()?.as_deref() == Some(branch) {
            return Ok(());
        }

        let refname = format!("refs/heads/{}", branch);
        let start = match start_point {
            Some(spec) => Some(self.repo.revparse_single(spec)?.peel_to_commit()?),
            None => None,
        };

        match self.repo.find_branch(branch, BranchType::Local) {
            Ok(existing) => {
                if let Some(ref start) = start {
                    let tip = existing.get().peel_to_commit()?.id();
                    if tip != start.id() && self.repo.graph_descendant_of(start.id(), tip)? {
                        self.repo.reference(
                            &refname,
                            start.id(),
                            true,
                            "braid: fast-forward before checkout",
                        )?;
                    } else if tip != start.id() {
                        tracing::warn!(
                            branch = %branch,
                            tip = %tip,
                            head = %start.id(),
                            "Branch has diverged from HEAD; checking out branch tip"
                        );
                    }
                }
            }
            Err(e) if e.code() == ErrorCode::NotFound => {
                let target = match start {
                    Some(commit) => commit,
                    None => self
                        .head_commit_object()?
                        .ok_or_else(|| Error::Other("Cannot branch from unborn HEAD".to_string()))?,
                };
                self.repo.branch(branch, &target, false)?;
            }
            Err(e) => return Err(e.into()),
        }

        let tip = self.repo.revparse_single(&refname)?.peel_to_commit()?;
        let head = self.head_commit_object()?.map(|c| c.id());

        // same commit: attach HEAD without touching the index, so a pending
        // merge keeps its conflicts for whoever resolves them
        if head != Some(tip.id()) {
            let mut checkout = CheckoutBuilder::new();
            checkout.safe();
            self.repo.checkout_tree(tip.as_object(), Some(&mut checkout))?;
        }
        self.repo.set_head(&refname)?;

        Ok(())
    }

    fn is_ancestor(&self, ancestor: &str, descendant: &str) -> Result<bool> {
        let ancestor = Oid::from_str(ancestor)?;
        let descendant = Oid::from_str(descendant)?;
        if ancestor == descendant {
            return Ok(true);
        }
        if self.repo.find_commit(ancestor).is_err() || self.repo.find_commit(descendant).is_err() {
            return Ok(false);
        }
        Ok(self.repo.graph_descendant_of(descendant, ancestor)?)
    }
}

/// Opens [`GitRepo`] handles with a configured fallback committer
#[derive(Debug, Clone)]
pub struct GitOpener {
    committer: Committer,
}

impl GitOpener {
    /// Create an opener using the committer identity from `config`
    pub fn new(config: &MergeConfig) -> Self {
        Self {
            committer: Committer {
                name: config.committer_name.clone(),
                email: config.committer_email.clone(),
            },
        }
    }
}

impl Default for GitOpener {
    fn default() -> Self {
        Self::new(&MergeConfig::default())
    }
}

impl RepositoryOpener for GitOpener {
    fn open(&self, path: &Path) -> Result<Box<dyn RepositoryHandle>> {
        let repo = GitRepo::open(path)?
            .with_committer(self.committer.name.clone(), self.committer.email.clone());
        Ok(Box::new(repo))
    }

    fn is_repository(&self, path: &Path) -> bool {
        GitRepo::is_git_repo(path)
    }
}
