//! TOML-file-backed working-copy registry

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use super::{WorkingCopyRef, WorkingCopyStore};
use crate::{Error, Result};

/// On-disk layout of the registry file
#[derive(Debug, Default, Serialize, Deserialize)]
struct Registry {
    #[serde(default)]
    working_copies: Vec<WorkingCopyRef>,
}

/// Registry persisted as a single TOML file
///
/// Every call re-reads the file, so several processes observing the same
/// registry see each other's writes. Writers are expected to be serialized
/// by the caller.
#[derive(Debug, Clone)]
pub struct FileWorkingCopyStore {
    path: PathBuf,
}

impl FileWorkingCopyStore {
    /// Open (or lazily create) the registry at `path`
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Path of the registry file
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn load(&self) -> Result<Registry> {
        if !self.path.exists() {
            return Ok(Registry::default());
        }

        let contents = fs::read_to_string(&self.path)
            .map_err(|e| Error::Config(format!("Failed to read working-copy registry: {}", e)))?;

        Ok(toml::from_str(&contents)?)
    }

    fn store(&self, registry: &Registry) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }

        let contents = toml::to_string_pretty(registry)?;

        // write-then-rename so a crash never leaves a truncated registry
        let tmp = self.path.with_extension("toml.tmp");
        fs::write(&tmp, contents)?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

impl WorkingCopyStore for FileWorkingCopyStore {
    fn find_by_id(&self, id: &str) -> Result<Option<WorkingCopyRef>> {
        Ok(self
            .load()?
            .working_copies
            .into_iter()
            .find(|wc| wc.id == id))
    }

    fn find_by_path(&self, path: &Path) -> Result<Option<WorkingCopyRef>> {
        Ok(self
            .load()?
            .working_copies
            .into_iter()
            .find(|wc| wc.path == path))
    }

    fn children_of(&self, id: &str) -> Result<Vec<WorkingCopyRef>> {
        Ok(self
            .load()?
            .working_copies
            .into_iter()
            .filter(|wc| wc.parent_id.as_deref() == Some(id))
            .collect())
    }

    fn list(&self) -> Result<Vec<WorkingCopyRef>> {
        Ok(self.load()?.working_copies)
    }

    fn save(&self, working_copy: WorkingCopyRef) -> Result<()> {
        let mut registry = self.load()?;
        match registry
            .working_copies
            .iter_mut()
            .find(|wc| wc.id == working_copy.id)
        {
            Some(existing) => *existing = working_copy,
            None => registry.working_copies.push(working_copy),
        }
        self.store(&registry)
    }
}
