//! Child-to-trunk aggregation

use braid_core::{
    AggregationResult, ChildOutcome, ChildRef, ChildToTrunkAggregator, Config, GitOpener,
    MergeEngine, TracingEventSink, WorkingCopyStore,
};
use clap::Args;

use super::{lookup, open_store, print_outcome, run_blocking};

/// Merge several children into one trunk, stopping at the first failure
#[derive(Args, Debug)]
pub struct AggregateArgs {
    /// Trunk working copy id
    #[arg(short, long)]
    pub trunk: String,

    /// Child working copy ids, merged in the order given
    #[arg(required = true)]
    pub children: Vec<String>,
}

impl AggregateArgs {
    /// Execute the aggregate command
    pub async fn execute(&self, config: &Config, json: bool) -> anyhow::Result<()> {
        let config = config.clone();
        let trunk_id = self.trunk.clone();
        let child_ids = self.children.clone();

        tracing::info!(trunk = %trunk_id, children = child_ids.len(), "Starting aggregation");

        let result = run_blocking(move || {
            let store = open_store(&config)?;
            let trunk = lookup(&store, &trunk_id)?;
            let children = child_ids
                .iter()
                .map(|id| Ok(ChildRef::new(id.as_str(), store.find_by_id(id)?)))
                .collect::<anyhow::Result<Vec<_>>>()?;

            let opener = GitOpener::new(&config.merge);
            let sink = TracingEventSink;
            let engine = MergeEngine::new(&opener, &store, &sink, config.merge.clone());
            Ok(ChildToTrunkAggregator::new(&engine).run(&children, &trunk))
        })
        .await?;

        if json {
            println!("{}", serde_json::to_string_pretty(&result)?);
        } else {
            print_result(&result)?;
        }

        if let Some(conflicted) = &result.conflicted {
            anyhow::bail!(
                "Aggregation into {} stopped at {}",
                self.trunk,
                conflicted.child_id
            );
        }
        Ok(())
    }
}

fn print_result(result: &AggregationResult) -> anyhow::Result<()> {
    println!("Merged ({}):", result.merged.len());
    for child in &result.merged {
        println!("  {}{}", child.child_id, registration_note(child));
    }

    if let Some(conflicted) = &result.conflicted {
        println!();
        println!("Conflicted: {}", conflicted.child_id);
        if let Some(outcome) = &conflicted.outcome {
            print_outcome(outcome, false)?;
        }
    }

    if !result.pending.is_empty() {
        println!();
        println!("Pending ({}):", result.pending.len());
        for child in &result.pending {
            println!("  {}", child.child_id);
        }
    }

    Ok(())
}

fn registration_note(child: &ChildOutcome) -> &'static str {
    if child.working_copy.is_none() {
        " (no working copy)"
    } else {
        ""
    }
}
