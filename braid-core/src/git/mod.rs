//! Git operations for braid
//!
//! This module defines the repository capability the merge engine consumes
//! and its libgit2-backed implementation.

mod handle;
mod repo;

#[cfg(test)]
pub(crate) mod fake;

pub use handle::{
    commit_dirty_pointers, FetchedRefs, MergeAttempt, RepositoryHandle, RepositoryOpener,
    SubmoduleDecl, WorkingStatus,
};
pub use repo::{GitOpener, GitRepo};
