//! Per-run execution accumulator

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use super::types::{Conflict, StepReport};

/// Conflicts and blocked ancestors gathered during one plan run
///
/// Owned by a single runner invocation and threaded through every step by
/// unique reference; never shared between runs.
#[derive(Debug, Default)]
pub struct ExecutionState {
    conflicts: Vec<Conflict>,
    blocked: BTreeSet<PathBuf>,
    reports: Vec<StepReport>,
}

impl ExecutionState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether merges into `path` must be skipped
    pub fn is_blocked(&self, path: &Path) -> bool {
        self.blocked.contains(path)
    }

    /// Forbid any later merge into `path`
    pub fn block(&mut self, path: impl Into<PathBuf>) {
        self.blocked.insert(path.into());
    }

    pub fn record(&mut self, report: StepReport) {
        self.reports.push(report);
    }

    pub fn record_conflicts(&mut self, conflicts: impl IntoIterator<Item = Conflict>) {
        self.conflicts.extend(conflicts);
    }

    pub fn has_conflicts(&self) -> bool {
        !self.conflicts.is_empty()
    }

    pub fn conflicts(&self) -> &[Conflict] {
        &self.conflicts
    }

    pub fn reports(&self) -> &[StepReport] {
        &self.reports
    }

    pub fn blocked(&self) -> impl Iterator<Item = &Path> {
        self.blocked.iter().map(PathBuf::as_path)
    }

    pub fn into_parts(self) -> (Vec<Conflict>, Vec<StepReport>) {
        (self.conflicts, self.reports)
    }
}
