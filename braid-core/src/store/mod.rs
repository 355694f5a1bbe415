//! Working-copy registry
//!
//! The merge engine never creates or deletes working copies. It reads their
//! persisted metadata (most importantly the branch each copy is expected to
//! be on) and reports back updated commit hashes.

mod file;

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::SystemTime;

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

pub use file::FileWorkingCopyStore;

/// Whether a working copy is a top-level checkout or a nested submodule
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkingCopyKind {
    /// Top-level repository checkout
    #[default]
    Main,
    /// Submodule checkout nested inside another working copy
    Submodule,
}

/// Identifies one git working copy
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkingCopyRef {
    /// Stable identifier
    pub id: String,

    /// Filesystem path of the working copy root
    pub path: PathBuf,

    /// Branch the copy is expected to be on
    pub derived_branch: String,

    /// Main or submodule checkout
    #[serde(default)]
    pub kind: WorkingCopyKind,

    /// Containing working copy (submodules only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,

    /// Main working copy this one belongs to
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub main_id: Option<String>,

    /// Last commit the engine observed at HEAD
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_commit: Option<String>,

    /// When this record was last written
    #[serde(with = "humantime_serde")]
    pub updated_at: SystemTime,
}

impl WorkingCopyRef {
    /// Describe a top-level working copy
    pub fn main(id: impl Into<String>, path: impl Into<PathBuf>, branch: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            path: path.into(),
            derived_branch: branch.into(),
            kind: WorkingCopyKind::Main,
            parent_id: None,
            main_id: None,
            last_commit: None,
            updated_at: SystemTime::now(),
        }
    }

    /// Describe a submodule working copy nested under `parent_id`
    pub fn submodule(
        id: impl Into<String>,
        path: impl Into<PathBuf>,
        branch: impl Into<String>,
        parent_id: impl Into<String>,
        main_id: impl Into<String>,
    ) -> Self {
        Self {
            kind: WorkingCopyKind::Submodule,
            parent_id: Some(parent_id.into()),
            main_id: Some(main_id.into()),
            ..Self::main(id, path, branch)
        }
    }

    /// Whether this copy is a submodule checkout
    pub fn is_submodule(&self) -> bool {
        self.kind == WorkingCopyKind::Submodule || self.parent_id.is_some()
    }

    /// Copy of this record with an updated last-known commit
    pub fn with_last_commit(mut self, commit: impl Into<String>) -> Self {
        self.last_commit = Some(commit.into());
        self.updated_at = SystemTime::now();
        self
    }
}

/// Persistence for working-copy metadata
///
/// Implementations are shared by reference, so mutation goes through `&self`.
pub trait WorkingCopyStore {
    /// Look a working copy up by id
    fn find_by_id(&self, id: &str) -> Result<Option<WorkingCopyRef>>;

    /// Look a working copy up by its root path
    fn find_by_path(&self, path: &Path) -> Result<Option<WorkingCopyRef>>;

    /// All working copies whose `parent_id` is `id`
    fn children_of(&self, id: &str) -> Result<Vec<WorkingCopyRef>>;

    /// Every registered working copy
    fn list(&self) -> Result<Vec<WorkingCopyRef>>;

    /// Insert or replace a record
    fn save(&self, working_copy: WorkingCopyRef) -> Result<()>;

    /// Record the commit now at HEAD of working copy `id`
    fn update_last_commit(&self, id: &str, commit: &str) -> Result<()> {
        let existing = self
            .find_by_id(id)?
            .ok_or_else(|| Error::NotFound(format!("working copy {}", id)))?;
        self.save(existing.with_last_commit(commit))
    }
}

/// Store kept entirely in memory, for embedding and tests
#[derive(Debug, Default)]
pub struct InMemoryWorkingCopyStore {
    records: Mutex<BTreeMap<String, WorkingCopyRef>>,
}

impl InMemoryWorkingCopyStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store pre-populated with `records`
    pub fn with_records(records: impl IntoIterator<Item = WorkingCopyRef>) -> Self {
        let store = Self::new();
        if let Ok(mut map) = store.records.lock() {
            for record in records {
                map.insert(record.id.clone(), record);
            }
        }
        store
    }

    fn read<T>(&self, f: impl FnOnce(&BTreeMap<String, WorkingCopyRef>) -> T) -> Result<T> {
        let map = self
            .records
            .lock()
            .map_err(|_| Error::Other("working-copy store lock poisoned".to_string()))?;
        Ok(f(&map))
    }
}

impl WorkingCopyStore for InMemoryWorkingCopyStore {
    fn find_by_id(&self, id: &str) -> Result<Option<WorkingCopyRef>> {
        self.read(|map| map.get(id).cloned())
    }

    fn find_by_path(&self, path: &Path) -> Result<Option<WorkingCopyRef>> {
        self.read(|map| map.values().find(|wc| wc.path == path).cloned())
    }

    fn children_of(&self, id: &str) -> Result<Vec<WorkingCopyRef>> {
        self.read(|map| {
            map.values()
                .filter(|wc| wc.parent_id.as_deref() == Some(id))
                .cloned()
                .collect()
        })
    }

    fn list(&self) -> Result<Vec<WorkingCopyRef>> {
        self.read(|map| map.values().cloned().collect())
    }

    fn save(&self, working_copy: WorkingCopyRef) -> Result<()> {
        let mut map = self
            .records
            .lock()
            .map_err(|_| Error::Other("working-copy store lock poisoned".to_string()))?;
        map.insert(working_copy.id.clone(), working_copy);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_submodule_constructor() {
        let wc = WorkingCopyRef::submodule("sub-1", "/w/trunk/lib", "main", "trunk", "trunk");
        assert!(wc.is_submodule());
        assert_eq!(wc.parent_id.as_deref(), Some("trunk"));
        assert_eq!(wc.main_id.as_deref(), Some("trunk"));
        assert!(!WorkingCopyRef::main("trunk", "/w/trunk", "main").is_submodule());
    }

    #[test]
    fn test_in_memory_lookups() {
        let store = InMemoryWorkingCopyStore::with_records([
            WorkingCopyRef::main("trunk", "/w/trunk", "main"),
            WorkingCopyRef::submodule("trunk-lib", "/w/trunk/lib", "main", "trunk", "trunk"),
        ]);

        let by_path = store.find_by_path(Path::new("/w/trunk/lib")).unwrap().unwrap();
        assert_eq!(by_path.id, "trunk-lib");

        let children = store.children_of("trunk").unwrap();
        assert_eq!(children.len(), 1);
        assert!(store.find_by_id("missing").unwrap().is_none());
    }

    #[test]
    fn test_update_last_commit() {
        let store =
            InMemoryWorkingCopyStore::with_records([WorkingCopyRef::main("trunk", "/w/trunk", "main")]);

        store.update_last_commit("trunk", "abc123").unwrap();
        let updated = store.find_by_id("trunk").unwrap().unwrap();
        assert_eq!(updated.last_commit.as_deref(), Some("abc123"));

        assert!(store.update_last_commit("nope", "abc123").is_err());
    }
}
