//! Merge commands

use std::path::PathBuf;

use braid_core::{Config, GitOpener, MergeDirection, MergeEngine, TracingEventSink};
use clap::Args;

use super::{lookup, open_store, print_outcome, run_blocking};

/// Merge one registered working copy into another
#[derive(Args, Debug)]
pub struct MergeArgs {
    /// Source working copy id
    pub source: String,

    /// Target working copy id
    pub target: String,

    /// Merge direction (child-to-trunk, trunk-to-child, worktree-to-origin)
    #[arg(short, long, default_value_t = MergeDirection::ChildToTrunk)]
    pub direction: MergeDirection,
}

impl MergeArgs {
    /// Execute the merge command
    pub async fn execute(&self, config: &Config, json: bool) -> anyhow::Result<()> {
        let config = config.clone();
        let source_id = self.source.clone();
        let target_id = self.target.clone();
        let direction = self.direction;

        tracing::info!(source = %source_id, target = %target_id, %direction, "Starting merge");

        let outcome = run_blocking(move || {
            let store = open_store(&config)?;
            let source = lookup(&store, &source_id)?;
            let target = lookup(&store, &target_id)?;
            let opener = GitOpener::new(&config.merge);
            let sink = TracingEventSink;
            let engine = MergeEngine::new(&opener, &store, &sink, config.merge.clone());
            Ok(engine.run_plan(direction, &source, &target))
        })
        .await?;

        print_outcome(&outcome, json)?;

        if !outcome.successful {
            anyhow::bail!("Merge of {} into {} failed", self.source, self.target);
        }
        Ok(())
    }
}

/// Land a working copy on the base branch of the origin checkout
#[derive(Args, Debug)]
pub struct FinalMergeArgs {
    /// Source working copy id
    pub source: String,

    /// Path of the origin checkout
    #[arg(long)]
    pub origin: PathBuf,

    /// Base branch to land on
    #[arg(short, long, default_value = "main")]
    pub base: String,
}

impl FinalMergeArgs {
    /// Execute the final-merge command
    pub async fn execute(&self, config: &Config, json: bool) -> anyhow::Result<()> {
        let config = config.clone();
        let source_id = self.source.clone();
        let origin = self.origin.clone();
        let base = self.base.clone();

        tracing::info!(source = %source_id, origin = %origin.display(), base = %base, "Starting final merge");

        let outcome = run_blocking(move || {
            let store = open_store(&config)?;
            let source = lookup(&store, &source_id)?;
            let opener = GitOpener::new(&config.merge);
            let sink = TracingEventSink;
            let engine = MergeEngine::new(&opener, &store, &sink, config.merge.clone());
            Ok(engine.final_merge_to_origin(&source, &origin, &base))
        })
        .await?;

        print_outcome(&outcome, json)?;

        if !outcome.successful {
            anyhow::bail!("Final merge of {} into {} failed", self.source, self.base);
        }
        Ok(())
    }
}
