//! Merges bracketed by an auto-commit and a conflict resolver
//!
//! The working copy an agent owns (the child, or the source of a final
//! merge) may hold uncommitted work, so it is auto-committed first. If the
//! merge then fails with conflicts, the resolver gets one chance to settle
//! them and the outcome is re-derived by merging again.

use std::path::Path;

use super::engine::{origin_ref, MergeEngine};
use super::types::{MergeDirection, MergeErrorKind, MergeOutcome};
use crate::store::WorkingCopyRef;

/// Result of committing stray work in a working copy before it is merged
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct AutoCommitOutcome {
    pub successful: bool,
    pub message: Option<String>,
}

/// Commits uncommitted work in an agent's working copy
pub trait AutoCommitter {
    fn auto_commit(&self, child: &WorkingCopyRef) -> AutoCommitOutcome;
}

/// What an external conflict resolver reported
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ConflictResolution {
    pub successful: bool,
    pub message: Option<String>,
}

/// Black-box "resolve or fail" capability handed a conflicting outcome
pub trait ConflictResolver {
    fn resolve(
        &self,
        child: &WorkingCopyRef,
        trunk: &WorkingCopyRef,
        outcome: &MergeOutcome,
    ) -> ConflictResolution;
}

/// [`MergeEngine`] entry points with optional auto-commit and resolver
pub struct AssistedMerge<'a> {
    engine: &'a MergeEngine<'a>,
    auto_committer: Option<&'a dyn AutoCommitter>,
    resolver: Option<&'a dyn ConflictResolver>,
}

impl<'a> AssistedMerge<'a> {
    pub fn new(engine: &'a MergeEngine<'a>) -> Self {
        Self {
            engine,
            auto_committer: None,
            resolver: None,
        }
    }

    /// Commit stray work in the agent's working copy before merging
    pub fn with_auto_committer(mut self, committer: &'a dyn AutoCommitter) -> Self {
        self.auto_committer = Some(committer);
        self
    }

    /// Hand conflicting outcomes to `resolver`, then merge once more
    pub fn with_conflict_resolver(mut self, resolver: &'a dyn ConflictResolver) -> Self {
        self.resolver = Some(resolver);
        self
    }

    pub fn engine(&self) -> &'a MergeEngine<'a> {
        self.engine
    }

    /// Integrate `child` into `trunk`; a failed auto-commit aborts the merge
    pub fn merge_child_to_trunk(&self, child: &WorkingCopyRef, trunk: &WorkingCopyRef) -> MergeOutcome {
        self.run(MergeDirection::ChildToTrunk, child, trunk)
    }

    /// Bring trunk changes into `child`; a failed auto-commit aborts the merge
    pub fn merge_trunk_to_child(&self, trunk: &WorkingCopyRef, child: &WorkingCopyRef) -> MergeOutcome {
        self.run(MergeDirection::TrunkToChild, child, trunk)
    }

    /// Land `source` on the origin checkout
    ///
    /// A failed auto-commit is reported but does not stop the merge: whatever
    /// is already committed still lands.
    pub fn final_merge_to_origin(
        &self,
        source: &WorkingCopyRef,
        origin: &Path,
        base_branch: &str,
    ) -> MergeOutcome {
        let origin = origin_ref(origin, base_branch);
        self.run(MergeDirection::WorktreeToOrigin, source, &origin)
    }

    fn merge(&self, direction: MergeDirection, child: &WorkingCopyRef, trunk: &WorkingCopyRef) -> MergeOutcome {
        match direction {
            MergeDirection::TrunkToChild => self.engine.run_plan(direction, trunk, child),
            MergeDirection::ChildToTrunk | MergeDirection::WorktreeToOrigin => {
                self.engine.run_plan(direction, child, trunk)
            }
        }
    }

    fn run(&self, direction: MergeDirection, child: &WorkingCopyRef, trunk: &WorkingCopyRef) -> MergeOutcome {
        if let Some(committer) = self.auto_committer {
            let committed = committer.auto_commit(child);
            if !committed.successful {
                let reason = committed.message.unwrap_or_else(|| "unknown error".to_string());
                if direction == MergeDirection::WorktreeToOrigin {
                    tracing::warn!(
                        source = %child.id,
                        reason = %reason,
                        "Auto-commit failed before final merge; merging committed work only"
                    );
                } else {
                    return auto_commit_failed(direction, child, trunk, &reason);
                }
            }
        }

        let outcome = self.merge(direction, child, trunk);
        let Some(resolver) = self.resolver else {
            return outcome;
        };
        if outcome.successful || !outcome.has_conflicts() {
            return outcome;
        }

        tracing::info!(
            child = %child.id,
            trunk = %trunk.id,
            %direction,
            conflicts = outcome.conflicts.len(),
            "Escalating conflicts to resolver"
        );
        let resolution = resolver.resolve(child, trunk, &outcome);
        let refreshed = self.merge(direction, child, trunk);
        apply_resolution(refreshed, resolution)
    }
}

fn auto_commit_failed(
    direction: MergeDirection,
    child: &WorkingCopyRef,
    trunk: &WorkingCopyRef,
    reason: &str,
) -> MergeOutcome {
    let (label, source, target) = match direction {
        MergeDirection::TrunkToChild => ("trunk->child", trunk, child),
        MergeDirection::ChildToTrunk => ("child->trunk", child, trunk),
        MergeDirection::WorktreeToOrigin => ("final", child, trunk),
    };
    let mut outcome = MergeOutcome::failed(
        direction,
        MergeErrorKind::AutoCommitFailed,
        format!("Auto-commit failed before {} merge: {}", label, reason),
    );
    outcome.source_id = Some(source.id.clone());
    outcome.target_id = Some(target.id.clone());
    outcome
}

fn apply_resolution(mut outcome: MergeOutcome, resolution: ConflictResolution) -> MergeOutcome {
    if resolution.successful {
        return outcome;
    }

    let reason = resolution
        .message
        .filter(|m| !m.trim().is_empty())
        .unwrap_or_else(|| "conflict resolver reported failure".to_string());
    outcome.message = if outcome.successful || outcome.message.trim().is_empty() {
        reason
    } else {
        format!("{} | {}", outcome.message, reason)
    };
    outcome.successful = false;
    outcome.error_kind = Some(MergeErrorKind::ConflictResolverFailed);
    outcome
}

/// Collaborator doubles shared by the merge test modules
#[cfg(test)]
pub(crate) mod testing {
    use std::cell::RefCell;
    use std::path::PathBuf;

    use super::*;
    use crate::git::fake::FakeWorld;

    /// Records which working copies it was asked to commit
    pub struct Recorder {
        pub calls: RefCell<Vec<String>>,
        succeed: bool,
    }

    impl Recorder {
        pub fn new(succeed: bool) -> Self {
            Self {
                calls: RefCell::new(Vec::new()),
                succeed,
            }
        }
    }

    impl AutoCommitter for Recorder {
        fn auto_commit(&self, child: &WorkingCopyRef) -> AutoCommitOutcome {
            self.calls.borrow_mut().push(child.id.clone());
            AutoCommitOutcome {
                successful: self.succeed,
                message: (!self.succeed).then(|| "index.lock exists".to_string()),
            }
        }
    }

    /// Settles the pending merge at `path` without committing it
    pub struct SettleAt<'w> {
        pub world: &'w FakeWorld,
        pub path: PathBuf,
    }

    impl ConflictResolver for SettleAt<'_> {
        fn resolve(
            &self,
            _child: &WorkingCopyRef,
            _trunk: &WorkingCopyRef,
            outcome: &MergeOutcome,
        ) -> ConflictResolution {
            for conflict in &outcome.conflicts {
                self.world
                    .resolve_conflict(&self.path, &conflict.file_path, "resolved");
            }
            ConflictResolution {
                successful: true,
                message: None,
            }
        }
    }

    pub struct GiveUp;

    impl ConflictResolver for GiveUp {
        fn resolve(
            &self,
            _child: &WorkingCopyRef,
            _trunk: &WorkingCopyRef,
            _outcome: &MergeOutcome,
        ) -> ConflictResolution {
            ConflictResolution {
                successful: false,
                message: Some("agent timed out".to_string()),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::{GiveUp, Recorder, SettleAt};
    use super::*;
    use crate::config::MergeConfig;
    use crate::git::fake::FakeWorld;
    use crate::merge::events::RecordingEventSink;
    use crate::store::InMemoryWorkingCopyStore;

    /// Trunk and one agent clone, both changing `shared.txt` when `clash`
    fn trunk_and_agent(world: &FakeWorld, clash: bool) -> (WorkingCopyRef, WorkingCopyRef) {
        world.init_repo("/w/trunk", "main");
        world.commit_file("/w/trunk", "shared.txt", "base");
        world.clone_tree("/w/trunk", "/w/agent", "agent-1");
        world.commit_file("/w/trunk", "trunk.txt", "from trunk");
        if clash {
            world.commit_file("/w/trunk", "shared.txt", "trunk");
            world.commit_file("/w/agent", "shared.txt", "agent");
        }
        (
            WorkingCopyRef::main("trunk", "/w/trunk", "main"),
            WorkingCopyRef::main("agent", "/w/agent", "agent-1"),
        )
    }

    #[test]
    fn test_trunk_to_child_auto_commit_failure_aborts() {
        let world = FakeWorld::new();
        let (trunk, child) = trunk_and_agent(&world, false);
        let before = world.head("/w/agent");
        let store = InMemoryWorkingCopyStore::with_records([trunk.clone(), child.clone()]);
        let sink = RecordingEventSink::new();
        let opener = world.opener();
        let engine = MergeEngine::new(&opener, &store, &sink, MergeConfig::default());
        let committer = Recorder::new(false);

        let outcome = AssistedMerge::new(&engine)
            .with_auto_committer(&committer)
            .merge_trunk_to_child(&trunk, &child);

        assert!(!outcome.successful);
        assert_eq!(outcome.error_kind, Some(MergeErrorKind::AutoCommitFailed));
        assert_eq!(
            outcome.message,
            "Auto-commit failed before trunk->child merge: index.lock exists"
        );
        assert_eq!(outcome.source_id.as_deref(), Some("trunk"));
        assert_eq!(outcome.target_id.as_deref(), Some("agent"));
        assert_eq!(*committer.calls.borrow(), vec!["agent".to_string()]);
        assert_eq!(world.head("/w/agent"), before);
        assert!(sink.events().is_empty());
    }

    #[test]
    fn test_trunk_to_child_resolver_settles_child() {
        let world = FakeWorld::new();
        let (trunk, child) = trunk_and_agent(&world, true);
        let store = InMemoryWorkingCopyStore::with_records([trunk.clone(), child.clone()]);
        let sink = RecordingEventSink::new();
        let opener = world.opener();
        let engine = MergeEngine::new(&opener, &store, &sink, MergeConfig::default());
        let committer = Recorder::new(true);
        let resolver = SettleAt {
            world: &world,
            path: "/w/agent".into(),
        };

        let outcome = AssistedMerge::new(&engine)
            .with_auto_committer(&committer)
            .with_conflict_resolver(&resolver)
            .merge_trunk_to_child(&trunk, &child);

        assert!(outcome.successful, "{:?}", outcome.conflicts);
        assert_eq!(outcome.direction, MergeDirection::TrunkToChild);
        assert_eq!(world.file("/w/agent", "shared.txt").as_deref(), Some("resolved"));
        assert_eq!(world.file("/w/agent", "trunk.txt").as_deref(), Some("from trunk"));
        let trunk_head = world.head("/w/trunk").unwrap();
        assert!(world.is_ancestor(&trunk_head, &world.head("/w/agent").unwrap()));
        assert_eq!(world.branch("/w/agent").as_deref(), Some("agent-1"));
    }

    #[test]
    fn test_final_merge_continues_after_auto_commit_failure() {
        let world = FakeWorld::new();
        world.init_repo("/src/origin", "develop");
        world.clone_tree("/src/origin", "/w/final", "final-1");
        world.commit_file("/w/final", "done.txt", "shipped");
        let source = WorkingCopyRef::main("final", "/w/final", "final-1");
        let store = InMemoryWorkingCopyStore::with_records([source.clone()]);
        let sink = RecordingEventSink::new();
        let opener = world.opener();
        let engine = MergeEngine::new(&opener, &store, &sink, MergeConfig::default());
        let committer = Recorder::new(false);

        let outcome = AssistedMerge::new(&engine)
            .with_auto_committer(&committer)
            .final_merge_to_origin(&source, Path::new("/src/origin"), "develop");

        assert!(outcome.successful, "{}", outcome.message);
        assert_eq!(*committer.calls.borrow(), vec!["final".to_string()]);
        assert_eq!(world.file("/src/origin", "done.txt").as_deref(), Some("shipped"));
        assert_eq!(world.branch("/src/origin").as_deref(), Some("develop"));
    }

    #[test]
    fn test_final_merge_resolver_failure_combines_messages() {
        let world = FakeWorld::new();
        world.init_repo("/src/origin", "develop");
        world.commit_file("/src/origin", "shared.txt", "base");
        world.clone_tree("/src/origin", "/w/final", "final-1");
        world.commit_file("/src/origin", "shared.txt", "upstream");
        world.commit_file("/w/final", "shared.txt", "agent");
        let source = WorkingCopyRef::main("final", "/w/final", "final-1");
        let store = InMemoryWorkingCopyStore::with_records([source.clone()]);
        let sink = RecordingEventSink::new();
        let opener = world.opener();
        let engine = MergeEngine::new(&opener, &store, &sink, MergeConfig::default());

        let outcome = AssistedMerge::new(&engine)
            .with_conflict_resolver(&GiveUp)
            .final_merge_to_origin(&source, Path::new("/src/origin"), "develop");

        assert!(!outcome.successful);
        assert_eq!(outcome.direction, MergeDirection::WorktreeToOrigin);
        assert_eq!(outcome.error_kind, Some(MergeErrorKind::ConflictResolverFailed));
        assert!(outcome.message.ends_with(" | agent timed out"));
        assert!(outcome.conflicts.iter().any(|c| c.file_path == "shared.txt"));
    }

    #[test]
    fn test_successful_merge_skips_resolver() {
        let world = FakeWorld::new();
        let (trunk, child) = trunk_and_agent(&world, false);
        let store = InMemoryWorkingCopyStore::with_records([trunk.clone(), child.clone()]);
        let sink = RecordingEventSink::new();
        let opener = world.opener();
        let engine = MergeEngine::new(&opener, &store, &sink, MergeConfig::default());

        let outcome = AssistedMerge::new(&engine)
            .with_conflict_resolver(&GiveUp)
            .merge_trunk_to_child(&trunk, &child);

        assert!(outcome.successful);
        assert_eq!(outcome.error_kind, None);
    }
}
