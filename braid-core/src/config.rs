//! Configuration management for braid
//!
//! Configuration is loaded with the following priority (highest to lowest):
//! 1. CLI flags
//! 2. Environment variables (BRAID_*)
//! 3. Config file (~/.config/braid/config.toml)
//! 4. Default values

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Merge engine settings
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct MergeConfig {
    /// Reference namespace that fetched source heads and branches land in
    pub fetch_namespace: String,

    /// Message used when committing drifted submodule pointers
    pub pointer_commit_message: String,

    /// Message used when a pointer-only conflict is auto-resolved
    pub pointer_resolution_message: String,

    /// Prefix of generated merge commit messages
    pub merge_message_prefix: String,

    /// Re-check every successful merge through commit ancestry
    pub verify_ancestry: bool,

    /// Committer name used when the repository has no `user.name`
    pub committer_name: String,

    /// Committer email used when the repository has no `user.email`
    pub committer_email: String,
}

impl Default for MergeConfig {
    fn default() -> Self {
        Self {
            fetch_namespace: "refs/braid/fetch".to_string(),
            pointer_commit_message: "Update submodule pointers".to_string(),
            pointer_resolution_message: "Resolve submodule pointer conflicts".to_string(),
            merge_message_prefix: "Merge".to_string(),
            verify_ancestry: true,
            committer_name: "braid".to_string(),
            committer_email: "braid@localhost".to_string(),
        }
    }
}

/// Working-copy registry settings
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Path of the registry file (defaults to the user data directory)
    pub path: Option<PathBuf>,
}

impl StoreConfig {
    /// Resolve the registry path, falling back to
    /// `~/.local/share/braid/working-copies.toml`
    pub fn resolved_path(&self) -> Result<PathBuf> {
        if let Some(ref path) = self.path {
            return Ok(path.clone());
        }

        let data_dir = dirs::data_dir()
            .ok_or_else(|| Error::Config("Could not determine data directory".to_string()))?;

        Ok(data_dir.join("braid").join("working-copies.toml"))
    }
}

/// Root configuration structure
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    /// Merge engine configuration
    pub merge: MergeConfig,

    /// Working-copy registry configuration
    pub store: StoreConfig,
}

impl Config {
    /// Load configuration from the default config file location
    ///
    /// Returns default config if file doesn't exist
    pub fn load() -> Result<Self> {
        if let Some(path) = Self::default_config_path() {
            if path.exists() {
                return Self::load_from_file(&path);
            }
        }

        Ok(Self::default())
    }

    /// Load configuration from a specific file
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        toml::from_str(&contents)
            .map_err(|e| Error::Config(format!("Failed to parse config: {}", e)))
    }

    /// Get the default config file path
    ///
    /// Returns `~/.config/braid/config.toml` on Unix
    pub fn default_config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("braid").join("config.toml"))
    }

    /// Apply environment variable overrides
    ///
    /// Supported variables:
    /// - BRAID_STORE_PATH: Path of the working-copy registry
    /// - BRAID_VERIFY_ANCESTRY: `true`/`false`
    /// - BRAID_FETCH_NAMESPACE: Reference namespace for fetched heads
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(path) = std::env::var("BRAID_STORE_PATH") {
            self.store.path = Some(PathBuf::from(path));
        }

        if let Ok(verify) = std::env::var("BRAID_VERIFY_ANCESTRY") {
            match verify.parse::<bool>() {
                Ok(value) => self.merge.verify_ancestry = value,
                Err(_) => tracing::warn!(value = %verify, "Ignoring invalid BRAID_VERIFY_ANCESTRY"),
            }
        }

        if let Ok(namespace) = std::env::var("BRAID_FETCH_NAMESPACE") {
            self.merge.fetch_namespace = namespace;
        }

        self
    }

    /// Apply CLI flag overrides
    pub fn with_cli_overrides(mut self, store_path: Option<PathBuf>, no_verify: bool) -> Self {
        if let Some(path) = store_path {
            self.store.path = Some(path);
        }

        if no_verify {
            self.merge.verify_ancestry = false;
        }

        self
    }

    /// Load configuration with all overrides applied
    ///
    /// Priority: CLI > env > config file > defaults
    pub fn load_with_overrides(store_path: Option<PathBuf>, no_verify: bool) -> Result<Self> {
        Ok(Self::load()?
            .with_env_overrides()
            .with_cli_overrides(store_path, no_verify))
    }
}
