//! Merge plan preview

use braid_core::{Config, GitOpener, MergeDirection, MergeEngine, TracingEventSink};
use clap::Args;

use super::{lookup, open_store, run_blocking};

/// Show the steps a merge would run, leaves first
#[derive(Args, Debug)]
pub struct PlanArgs {
    /// Source working copy id
    pub source: String,

    /// Target working copy id
    pub target: String,

    /// Merge direction (child-to-trunk, trunk-to-child, worktree-to-origin)
    #[arg(short, long, default_value_t = MergeDirection::ChildToTrunk)]
    pub direction: MergeDirection,
}

impl PlanArgs {
    /// Execute the plan command
    pub async fn execute(&self, config: &Config, json: bool) -> anyhow::Result<()> {
        let config = config.clone();
        let source_id = self.source.clone();
        let target_id = self.target.clone();
        let direction = self.direction;

        let plan = run_blocking(move || {
            let store = open_store(&config)?;
            let source = lookup(&store, &source_id)?;
            let target = lookup(&store, &target_id)?;
            let opener = GitOpener::new(&config.merge);
            let sink = TracingEventSink;
            let engine = MergeEngine::new(&opener, &store, &sink, config.merge.clone());
            Ok(engine.plan(direction, &source, &target)?)
        })
        .await?;

        if json {
            println!("{}", serde_json::to_string_pretty(&plan)?);
            return Ok(());
        }

        println!("Plan: {} -> {} ({})", self.source, self.target, direction);
        for (i, step) in plan.steps.iter().enumerate() {
            println!(
                "  {:>2}. {:<30} {} -> {}",
                i + 1,
                step.label(),
                step.source_branch,
                step.target_branch
            );
        }

        if !plan.provisioning_failures.is_empty() {
            println!();
            println!("Skipped (not provisioned):");
            for failure in &plan.provisioning_failures {
                println!("  {}: {}", failure.submodule_path, failure.reason);
            }
        }

        Ok(())
    }
}
