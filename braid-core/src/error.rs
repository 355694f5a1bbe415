//! Error types for braid

use std::path::PathBuf;

use thiserror::Error;

/// Result type alias for braid operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for braid operations
#[derive(Error, Debug)]
pub enum Error {
    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Error reported by libgit2
    #[error("Git error: {0}")]
    Git(#[from] git2::Error),

    /// A shelled-out git invocation failed
    #[error("`{command}` failed: {stderr}")]
    GitCommand { command: String, stderr: String },

    /// TOML deserialization error
    #[error("TOML parse error: {0}")]
    TomlDe(#[from] toml::de::Error),

    /// TOML serialization error
    #[error("TOML serialization error: {0}")]
    TomlSer(#[from] toml::ser::Error),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// A working copy or reference could not be found
    #[error("Not found: {0}")]
    NotFound(String),

    /// A declared submodule has no initialized counterpart
    #[error("Submodule at {} is not provisioned: {reason}", path.display())]
    Provisioning { path: PathBuf, reason: String },

    /// Generic error with message
    #[error("{0}")]
    Other(String),
}
