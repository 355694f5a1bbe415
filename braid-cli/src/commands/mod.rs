//! CLI command implementations

pub mod aggregate;
pub mod merge;
pub mod plan;
pub mod working_copy;

pub use aggregate::AggregateArgs;
pub use merge::{FinalMergeArgs, MergeArgs};
pub use plan::PlanArgs;
pub use working_copy::WorkingCopyArgs;

use braid_core::{
    Config, FileWorkingCopyStore, MergeOutcome, StepStatus, WorkingCopyRef, WorkingCopyStore,
};

/// Open the registry named by the configuration
pub(crate) fn open_store(config: &Config) -> anyhow::Result<FileWorkingCopyStore> {
    Ok(FileWorkingCopyStore::new(config.store.resolved_path()?))
}

/// Look up a registered working copy, failing if it is unknown
pub(crate) fn lookup(store: &dyn WorkingCopyStore, id: &str) -> anyhow::Result<WorkingCopyRef> {
    store
        .find_by_id(id)?
        .ok_or_else(|| anyhow::anyhow!("Unknown working copy: {}", id))
}

/// Run git-heavy work off the async runtime
pub(crate) async fn run_blocking<T, F>(f: F) -> anyhow::Result<T>
where
    F: FnOnce() -> anyhow::Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f).await?
}

pub(crate) fn print_outcome(outcome: &MergeOutcome, json: bool) -> anyhow::Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(outcome)?);
        return Ok(());
    }

    let source = outcome.source_id.as_deref().unwrap_or("?");
    let target = outcome.target_id.as_deref().unwrap_or("?");
    println!("{} -> {} ({})", source, target, outcome.direction);

    for report in &outcome.submodule_outcomes {
        let label = report.submodule_path.as_deref().unwrap_or("<root>");
        let status = match &report.status {
            StepStatus::Merged { commit } => format!("merged {}", short(commit)),
            StepStatus::UpToDate { commit } => format!("up to date {}", short(commit)),
            StepStatus::AutoResolved { commit } => {
                format!("pointers auto-resolved {}", short(commit))
            }
            StepStatus::Conflicted => "conflicted".to_string(),
            StepStatus::Blocked => "blocked".to_string(),
        };
        println!("  {:<30} {}", label, status);
    }

    for failure in &outcome.provisioning_failures {
        println!("  {:<30} not provisioned: {}", failure.submodule_path, failure.reason);
    }

    if !outcome.conflicts.is_empty() {
        println!();
        println!("Conflicts:");
        for conflict in &outcome.conflicts {
            println!("  {}", conflict);
        }
    }

    println!();
    if outcome.successful {
        match outcome.merge_commit.as_deref() {
            Some(commit) => println!("Success: target at {}", short(commit)),
            None => println!("Success: {}", outcome.message),
        }
    } else {
        println!("Failed: {}", outcome.message);
    }

    Ok(())
}

pub(crate) fn short(commit: &str) -> &str {
    commit.get(..8).unwrap_or(commit)
}
