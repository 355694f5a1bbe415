//! In-memory repository world for unit tests
//!
//! Every repository shares one commit graph. Trees map paths to contents;
//! a submodule path maps to the commit it points at. The working tree and
//! index are collapsed into a single map, except that a submodule's
//! checked-out commit is always the live HEAD of the nested repository.

use std::cell::RefCell;
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::path::{Path, PathBuf};
use std::rc::Rc;

use super::handle::{
    FetchedRefs, MergeAttempt, RepositoryHandle, RepositoryOpener, SubmoduleDecl, WorkingStatus,
};
use crate::{Error, Result};

type Tree = BTreeMap<String, String>;

#[derive(Debug, Clone)]
struct FakeCommit {
    parents: Vec<String>,
    tree: Tree,
}

#[derive(Debug, Clone)]
enum Head {
    Branch(String),
    Detached(String),
}

#[derive(Debug, Clone)]
struct FakeRepo {
    head: Head,
    branches: BTreeMap<String, String>,
    refs: BTreeMap<String, String>,
    submodules: Vec<SubmoduleDecl>,
    index: Tree,
    merge_head: Option<String>,
    conflicts: BTreeSet<String>,
}

#[derive(Debug, Default)]
struct WorldState {
    commits: BTreeMap<String, FakeCommit>,
    counter: u64,
    repos: BTreeMap<PathBuf, FakeRepo>,
    failing_fetches: BTreeSet<PathBuf>,
    lossy_merges: BTreeSet<PathBuf>,
}

impl WorldState {
    fn repo(&self, path: &Path) -> Result<&FakeRepo> {
        self.repos
            .get(path)
            .ok_or_else(|| Error::NotFound(format!("git repository at {}", path.display())))
    }

    fn repo_mut(&mut self, path: &Path) -> Result<&mut FakeRepo> {
        self.repos
            .get_mut(path)
            .ok_or_else(|| Error::NotFound(format!("git repository at {}", path.display())))
    }

    fn head_of(&self, path: &Path) -> Option<String> {
        let repo = self.repos.get(path)?;
        match &repo.head {
            Head::Branch(name) => repo.branches.get(name).cloned(),
            Head::Detached(commit) => Some(commit.clone()),
        }
    }

    fn head_tree(&self, path: &Path) -> Tree {
        self.head_of(path)
            .and_then(|c| self.commits.get(&c))
            .map(|c| c.tree.clone())
            .unwrap_or_default()
    }

    fn new_commit(&mut self, parents: Vec<String>, tree: Tree) -> String {
        self.counter += 1;
        let id = format!("c{:04}", self.counter);
        self.commits.insert(id.clone(), FakeCommit { parents, tree });
        id
    }

    fn ancestors(&self, start: &str) -> BTreeSet<String> {
        let mut seen = BTreeSet::new();
        let mut queue = VecDeque::from([start.to_string()]);
        while let Some(id) = queue.pop_front() {
            if !seen.insert(id.clone()) {
                continue;
            }
            if let Some(commit) = self.commits.get(&id) {
                queue.extend(commit.parents.iter().cloned());
            }
        }
        seen
    }

    fn merge_base(&self, ours: &str, theirs: &str) -> Option<String> {
        let ours = self.ancestors(ours);
        let mut seen = BTreeSet::new();
        let mut queue = VecDeque::from([theirs.to_string()]);
        while let Some(id) = queue.pop_front() {
            if ours.contains(&id) {
                return Some(id);
            }
            if !seen.insert(id.clone()) {
                continue;
            }
            if let Some(commit) = self.commits.get(&id) {
                queue.extend(commit.parents.iter().cloned());
            }
        }
        None
    }

    fn live_pointer(&self, path: &Path, sub: &str) -> Option<String> {
        self.head_of(&path.join(sub))
    }

    fn commit_in(&mut self, path: &Path) -> Result<String> {
        let parent = self.head_of(path);
        let repo = self.repo(path)?;
        if !repo.conflicts.is_empty() {
            return Err(Error::Other("unresolved conflicts".to_string()));
        }
        let mut parents: Vec<String> = parent.into_iter().collect();
        parents.extend(repo.merge_head.clone());
        let tree = repo.index.clone();

        let id = self.new_commit(parents, tree);
        let repo = self.repo_mut(path)?;
        match &repo.head {
            Head::Branch(name) => {
                let name = name.clone();
                repo.branches.insert(name, id.clone());
            }
            Head::Detached(_) => repo.head = Head::Detached(id.clone()),
        }
        repo.merge_head = None;
        Ok(id)
    }

    fn resolve(&self, path: &Path, spec: &str) -> Result<String> {
        let repo = self.repo(path)?;
        if let Some(id) = repo.refs.get(spec).or_else(|| repo.branches.get(spec)) {
            return Ok(id.clone());
        }
        if self.commits.contains_key(spec) {
            return Ok(spec.to_string());
        }
        Err(Error::NotFound(format!("reference {}", spec)))
    }
}

/// Shared in-memory world of fake repositories
#[derive(Debug, Clone, Default)]
pub(crate) struct FakeWorld {
    state: Rc<RefCell<WorldState>>,
}

impl FakeWorld {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn opener(&self) -> FakeOpener {
        FakeOpener {
            world: self.clone(),
        }
    }

    /// Create a repository with one empty commit on `branch`
    pub fn init_repo(&self, path: impl AsRef<Path>, branch: &str) {
        let mut state = self.state.borrow_mut();
        let root = state.new_commit(Vec::new(), Tree::new());
        state.repos.insert(
            path.as_ref().to_path_buf(),
            FakeRepo {
                head: Head::Branch(branch.to_string()),
                branches: BTreeMap::from([(branch.to_string(), root)]),
                refs: BTreeMap::new(),
                submodules: Vec::new(),
                index: Tree::new(),
                merge_head: None,
                conflicts: BTreeSet::new(),
            },
        );
    }

    /// Write `file` and commit it, returning the new commit
    pub fn commit_file(&self, path: impl AsRef<Path>, file: &str, content: &str) -> String {
        let path = path.as_ref();
        let mut state = self.state.borrow_mut();
        state
            .repo_mut(path)
            .unwrap()
            .index
            .insert(file.to_string(), content.to_string());
        state.commit_in(path).unwrap()
    }

    /// Commit whatever the nested repository at `sub` currently points at
    pub fn commit_pointer(&self, path: impl AsRef<Path>, sub: &str) -> String {
        let path = path.as_ref();
        let mut state = self.state.borrow_mut();
        let pointer = state.live_pointer(path, sub).unwrap();
        state
            .repo_mut(path)
            .unwrap()
            .index
            .insert(sub.to_string(), pointer);
        state.commit_in(path).unwrap()
    }

    /// Declare and commit a submodule at `rel`, initializing it if needed
    pub fn add_submodule(&self, parent: impl AsRef<Path>, rel: &str) -> PathBuf {
        let parent = parent.as_ref();
        let child = parent.join(rel);
        if !self.state.borrow().repos.contains_key(&child) {
            self.init_repo(&child, "main");
        }
        self.state
            .borrow_mut()
            .repo_mut(parent)
            .unwrap()
            .submodules
            .push(SubmoduleDecl::new(rel, rel));
        self.commit_pointer(parent, rel);
        child
    }

    /// Copy the repository tree at `src` to `dst`, putting every copied
    /// repository on a fresh `branch`
    pub fn clone_tree(&self, src: impl AsRef<Path>, dst: impl AsRef<Path>, branch: &str) {
        let (src, dst) = (src.as_ref(), dst.as_ref());
        let mut copy = self.state.borrow().repo(src).unwrap().clone();
        let head = self.state.borrow().head_of(src).unwrap();
        copy.branches.insert(branch.to_string(), head.clone());
        copy.head = Head::Branch(branch.to_string());
        copy.refs.clear();
        copy.index = self.state.borrow().commits[&head].tree.clone();
        let submodules = copy.submodules.clone();
        self.state.borrow_mut().repos.insert(dst.to_path_buf(), copy);

        for decl in submodules {
            if self.state.borrow().repos.contains_key(&src.join(&decl.path)) {
                self.clone_tree(src.join(&decl.path), dst.join(&decl.path), branch);
            }
        }
    }

    pub fn detach(&self, path: impl AsRef<Path>) {
        let path = path.as_ref();
        let head = self.head(path).unwrap();
        self.state.borrow_mut().repo_mut(path).unwrap().head = Head::Detached(head);
    }

    /// Settle a conflicted path in the working tree, leaving the merge
    /// uncommitted
    pub fn resolve_conflict(&self, path: impl AsRef<Path>, file: &str, content: &str) {
        let mut state = self.state.borrow_mut();
        let repo = state.repo_mut(path.as_ref()).unwrap();
        repo.index.insert(file.to_string(), content.to_string());
        repo.conflicts.remove(file);
    }

    /// Detach HEAD at an arbitrary `commit`, leaving branches untouched
    pub fn detach_at(&self, path: impl AsRef<Path>, commit: &str) {
        let mut state = self.state.borrow_mut();
        let tree = state.commits[commit].tree.clone();
        let repo = state.repo_mut(path.as_ref()).unwrap();
        repo.head = Head::Detached(commit.to_string());
        repo.index = tree;
    }

    /// Drop the nested repository while leaving its declaration in place
    pub fn deprovision(&self, path: impl AsRef<Path>) {
        self.state.borrow_mut().repos.remove(path.as_ref());
    }

    /// Make every fetch from `source` fail
    pub fn fail_fetch(&self, source: impl AsRef<Path>) {
        self.state
            .borrow_mut()
            .failing_fetches
            .insert(source.as_ref().to_path_buf());
    }

    /// Make merges into `target` report success without recording the source
    pub fn lossy_merges(&self, target: impl AsRef<Path>) {
        self.state
            .borrow_mut()
            .lossy_merges
            .insert(target.as_ref().to_path_buf());
    }

    pub fn head(&self, path: impl AsRef<Path>) -> Option<String> {
        self.state.borrow().head_of(path.as_ref())
    }

    pub fn branch(&self, path: impl AsRef<Path>) -> Option<String> {
        match &self.state.borrow().repos.get(path.as_ref())?.head {
            Head::Branch(name) => Some(name.clone()),
            Head::Detached(_) => None,
        }
    }

    /// Content of `file` at HEAD
    pub fn file(&self, path: impl AsRef<Path>, file: &str) -> Option<String> {
        self.state.borrow().head_tree(path.as_ref()).get(file).cloned()
    }

    pub fn parents(&self, commit: &str) -> Vec<String> {
        self.state
            .borrow()
            .commits
            .get(commit)
            .map(|c| c.parents.clone())
            .unwrap_or_default()
    }

    pub fn is_ancestor(&self, ancestor: &str, descendant: &str) -> bool {
        self.state.borrow().ancestors(descendant).contains(ancestor)
    }

    pub fn commit_count(&self) -> u64 {
        self.state.borrow().counter
    }
}

/// Opens handles into a [`FakeWorld`]
#[derive(Debug, Clone)]
pub(crate) struct FakeOpener {
    world: FakeWorld,
}

impl RepositoryOpener for FakeOpener {
    fn open(&self, path: &Path) -> Result<Box<dyn RepositoryHandle>> {
        self.world.state.borrow().repo(path)?;
        Ok(Box::new(FakeHandle {
            world: self.world.clone(),
            path: path.to_path_buf(),
        }))
    }

    fn is_repository(&self, path: &Path) -> bool {
        self.world.state.borrow().repos.contains_key(path)
    }
}

#[derive(Debug)]
struct FakeHandle {
    world: FakeWorld,
    path: PathBuf,
}

impl FakeHandle {
    fn declared(&self) -> Result<Vec<SubmoduleDecl>> {
        Ok(self.world.state.borrow().repo(&self.path)?.submodules.clone())
    }
}

impl RepositoryHandle for FakeHandle {
    fn path(&self) -> &Path {
        &self.path
    }

    fn head_commit(&self) -> Result<Option<String>> {
        let state = self.world.state.borrow();
        state.repo(&self.path)?;
        Ok(state.head_of(&self.path))
    }

    fn current_branch(&self) -> Result<Option<String>> {
        Ok(match &self.world.state.borrow().repo(&self.path)?.head {
            Head::Branch(name) => Some(name.clone()),
            Head::Detached(_) => None,
        })
    }

    fn submodules(&self) -> Result<Vec<SubmoduleDecl>> {
        self.declared()
    }

    fn status(&self) -> Result<WorkingStatus> {
        let dirty = self.dirty_submodule_pointers()?;
        let state = self.world.state.borrow();
        let repo = state.repo(&self.path)?;
        let head = state.head_tree(&self.path);
        let declared: BTreeSet<&str> = repo.submodules.iter().map(|d| d.path.as_str()).collect();

        let mut status = WorkingStatus {
            conflicted: repo.conflicts.iter().cloned().collect(),
            ..Default::default()
        };
        for (path, content) in &repo.index {
            if repo.conflicts.contains(path) || declared.contains(path.as_str()) {
                continue;
            }
            match head.get(path) {
                None => status.added.push(path.clone()),
                Some(committed) if committed != content => status.modified.push(path.clone()),
                Some(_) => {}
            }
        }
        status
            .modified
            .extend(dirty.into_iter().filter(|p| !repo.conflicts.contains(p)));
        Ok(status)
    }

    fn dirty_submodule_pointers(&self) -> Result<Vec<String>> {
        let state = self.world.state.borrow();
        let repo = state.repo(&self.path)?;
        let head = state.head_tree(&self.path);
        Ok(repo
            .submodules
            .iter()
            .filter(|decl| {
                let live = state.live_pointer(&self.path, &decl.path);
                live.is_some() && live.as_ref() != head.get(&decl.path)
            })
            .map(|decl| decl.path.clone())
            .collect())
    }

    fn fetch_from(&self, source: &Path, namespace: &str) -> Result<FetchedRefs> {
        let mut state = self.world.state.borrow_mut();
        if state.failing_fetches.contains(source) {
            return Err(Error::GitCommand {
                command: format!("git fetch {}", source.display()),
                stderr: "fatal: could not read from remote repository".to_string(),
            });
        }

        let head = state.head_of(source);
        let branches = state.repo(source)?.branches.clone();
        let repo = state.repo_mut(&self.path)?;

        let mut fetched = FetchedRefs::default();
        let head_ref = format!("{}/HEAD", namespace);
        repo.refs.remove(&head_ref);
        if let Some(head) = head {
            repo.refs.insert(head_ref.clone(), head);
            fetched.head = Some(head_ref);
        }
        for (name, tip) in branches {
            let local = format!("{}/heads/{}", namespace, name);
            repo.refs.insert(local.clone(), tip);
            fetched.branches.insert(name, local);
        }
        Ok(fetched)
    }

    fn merge_no_ff(&self, reference: &str, _message: &str) -> Result<MergeAttempt> {
        let mut state = self.world.state.borrow_mut();

        if state.repo(&self.path)?.merge_head.is_some() {
            let repo = state.repo(&self.path)?;
            if !repo.conflicts.is_empty() {
                return Ok(MergeAttempt::Conflicted {
                    paths: repo.conflicts.iter().cloned().collect(),
                });
            }
            let commit = state.commit_in(&self.path)?;
            return Ok(MergeAttempt::Merged { commit });
        }

        let theirs = state.resolve(&self.path, reference)?;
        let ours = state
            .head_of(&self.path)
            .ok_or_else(|| Error::Other("unborn HEAD".to_string()))?;

        if state.ancestors(&ours).contains(&theirs) {
            return Ok(MergeAttempt::UpToDate { head: ours });
        }

        if state.lossy_merges.contains(&self.path) {
            let commit = state.commit_in(&self.path)?;
            return Ok(MergeAttempt::Merged { commit });
        }

        let base_tree = state
            .merge_base(&ours, &theirs)
            .map(|b| state.commits[&b].tree.clone())
            .unwrap_or_default();
        let our_tree = state.commits[&ours].tree.clone();
        let their_tree = state.commits[&theirs].tree.clone();

        let paths: BTreeSet<&String> = base_tree
            .keys()
            .chain(our_tree.keys())
            .chain(their_tree.keys())
            .collect();

        let mut merged = Tree::new();
        let mut conflicts = BTreeSet::new();
        for path in paths {
            let (b, o, t) = (base_tree.get(path), our_tree.get(path), their_tree.get(path));
            let pick = if o == t || b == t {
                o
            } else if b == o {
                t
            } else {
                conflicts.insert(path.clone());
                o
            };
            if let Some(content) = pick {
                merged.insert(path.clone(), content.clone());
            }
        }

        let repo = state.repo_mut(&self.path)?;
        repo.index = merged;
        repo.merge_head = Some(theirs);
        if !conflicts.is_empty() {
            repo.conflicts = conflicts.clone();
            return Ok(MergeAttempt::Conflicted {
                paths: conflicts.into_iter().collect(),
            });
        }

        let commit = state.commit_in(&self.path)?;
        Ok(MergeAttempt::Merged { commit })
    }

    fn stage_paths(&self, paths: &[String]) -> Result<()> {
        let declared = self.declared()?;
        let mut state = self.world.state.borrow_mut();
        for path in paths {
            let is_submodule = declared.iter().any(|d| &d.path == path);
            let live = if is_submodule {
                state.live_pointer(&self.path, path)
            } else {
                None
            };
            let repo = state.repo_mut(&self.path)?;
            if let Some(pointer) = live {
                repo.index.insert(path.clone(), pointer);
            }
            repo.conflicts.remove(path);
        }
        Ok(())
    }

    fn commit(&self, _message: &str) -> Result<String> {
        self.world.state.borrow_mut().commit_in(&self.path)
    }

    fn checkout_branch(&self, branch: &str, start_point: Option<&str>) -> Result<()> {
        let mut state = self.world.state.borrow_mut();
        let start = match start_point {
            Some(spec) => Some(state.resolve(&self.path, spec)?),
            None => None,
        };
        let head = state.head_of(&self.path);

        let existing = state.repo(&self.path)?.branches.get(branch).cloned();
        let tip = match (existing, start) {
            (Some(tip), Some(start)) if state.ancestors(&start).contains(&tip) => start,
            (Some(tip), _) => tip,
            (None, Some(start)) => start,
            (None, None) => head.clone().ok_or_else(|| Error::Other("unborn HEAD".to_string()))?,
        };
        let tree = state.commits[&tip].tree.clone();

        let repo = state.repo_mut(&self.path)?;
        if matches!(&repo.head, Head::Branch(name) if name == branch) {
            return Ok(());
        }
        let moves = head.as_ref() != Some(&tip);
        if moves && !repo.conflicts.is_empty() {
            return Err(Error::Other(format!(
                "cannot check out {} over unresolved conflicts",
                branch
            )));
        }
        repo.branches.insert(branch.to_string(), tip);
        repo.head = Head::Branch(branch.to_string());
        if moves {
            repo.index = tree;
        }
        Ok(())
    }

    fn is_ancestor(&self, ancestor: &str, descendant: &str) -> Result<bool> {
        Ok(self
            .world
            .state
            .borrow()
            .ancestors(descendant)
            .contains(ancestor))
    }
}
