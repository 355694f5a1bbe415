//! Step and outcome notifications

use std::path::PathBuf;
use std::sync::Mutex;

use serde::Serialize;

use super::types::{Conflict, MergeDirection, MergeErrorKind};

/// Notification emitted while merging
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MergeEvent {
    /// A step produced (or already had) the merged commit
    StepMerged {
        source_id: Option<String>,
        target_id: Option<String>,
        path: PathBuf,
        submodule_path: Option<String>,
        commit: String,
    },
    /// A step ended with conflicts
    StepConflicted {
        source_id: Option<String>,
        target_id: Option<String>,
        path: PathBuf,
        submodule_path: Option<String>,
        conflicts: Vec<Conflict>,
    },
    /// A step was skipped because a nested step failed
    StepBlocked {
        path: PathBuf,
        submodule_path: Option<String>,
        propagated_to: Option<PathBuf>,
    },
    /// A plan run finished
    OutcomeReady {
        direction: MergeDirection,
        source_id: Option<String>,
        target_id: Option<String>,
        successful: bool,
        commit: Option<String>,
        conflicts: Vec<Conflict>,
    },
    /// Aggregation stopped at this child
    ChildConflicted {
        child_id: String,
        trunk_id: String,
        error_kind: Option<MergeErrorKind>,
        message: String,
    },
}

/// Receives merge notifications
pub trait MergeEventSink {
    fn publish(&self, event: &MergeEvent);
}

/// Sink that writes every event as a structured tracing event
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingEventSink;

impl MergeEventSink for TracingEventSink {
    fn publish(&self, event: &MergeEvent) {
        match event {
            MergeEvent::StepMerged {
                path,
                submodule_path,
                commit,
                ..
            } => tracing::info!(
                path = %path.display(),
                submodule = ?submodule_path,
                commit = %commit,
                "Step merged"
            ),
            MergeEvent::StepConflicted {
                path,
                submodule_path,
                conflicts,
                ..
            } => tracing::warn!(
                path = %path.display(),
                submodule = ?submodule_path,
                conflicts = conflicts.len(),
                "Step conflicted"
            ),
            MergeEvent::StepBlocked {
                path,
                propagated_to,
                ..
            } => tracing::warn!(
                path = %path.display(),
                propagated_to = ?propagated_to,
                "Step blocked by nested failure"
            ),
            MergeEvent::OutcomeReady {
                direction,
                source_id,
                target_id,
                successful,
                commit,
                conflicts,
            } => tracing::info!(
                direction = %direction,
                source = ?source_id,
                target = ?target_id,
                successful = successful,
                commit = ?commit,
                conflicts = conflicts.len(),
                "Merge outcome ready"
            ),
            MergeEvent::ChildConflicted {
                child_id,
                trunk_id,
                error_kind,
                message,
            } => tracing::warn!(
                child = %child_id,
                trunk = %trunk_id,
                error_kind = ?error_kind,
                message = %message,
                "Aggregation stopped at child"
            ),
        }
    }
}

/// Sink that keeps every event in memory
#[derive(Debug, Default)]
pub struct RecordingEventSink {
    events: Mutex<Vec<MergeEvent>>,
}

impl RecordingEventSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of the events published so far
    pub fn events(&self) -> Vec<MergeEvent> {
        self.events
            .lock()
            .map(|events| events.clone())
            .unwrap_or_default()
    }
}

impl MergeEventSink for RecordingEventSink {
    fn publish(&self, event: &MergeEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event.clone());
        }
    }
}
