//! Braid CLI - Command line interface for the nested-repository merge engine
//!
//! Registers working copies and merges them into one another, submodules
//! first.

mod commands;

use std::path::PathBuf;

use braid_core::Config;
use clap::{Parser, Subcommand};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use commands::{AggregateArgs, FinalMergeArgs, MergeArgs, PlanArgs, WorkingCopyArgs};

/// Braid: merge trees of nested git working copies
#[derive(Parser, Debug)]
#[command(name = "braid")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Path of the working-copy registry (overrides config and env)
    #[arg(long, global = true, env = "BRAID_STORE_PATH")]
    store: Option<PathBuf>,

    /// Skip ancestry verification after successful merges
    #[arg(long, global = true)]
    no_verify: bool,

    /// Print results as JSON
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Show version information
    Version,

    /// Manage registered working copies
    #[command(visible_alias = "wc")]
    WorkingCopy(WorkingCopyArgs),

    /// Show the steps a merge would run
    Plan(PlanArgs),

    /// Merge one working copy into another
    #[command(visible_alias = "m")]
    Merge(MergeArgs),

    /// Land a working copy on the origin checkout's base branch
    FinalMerge(FinalMergeArgs),

    /// Merge several children into a trunk, stopping at the first failure
    Aggregate(AggregateArgs),

    /// Show current configuration
    Config,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    if cli.verbose {
        tracing::info!("Verbose mode enabled");
    }

    let config = Config::load_with_overrides(cli.store.clone(), cli.no_verify)?;

    if cli.verbose {
        tracing::info!(
            store = ?config.store.path,
            verify_ancestry = config.merge.verify_ancestry,
            "Configuration loaded"
        );
    }

    match cli.command {
        Some(Commands::Version) => {
            println!("braid {}", env!("CARGO_PKG_VERSION"));
        }
        Some(Commands::WorkingCopy(args)) => {
            args.execute(&config, cli.json).await?;
        }
        Some(Commands::Plan(args)) => {
            args.execute(&config, cli.json).await?;
        }
        Some(Commands::Merge(args)) => {
            args.execute(&config, cli.json).await?;
        }
        Some(Commands::FinalMerge(args)) => {
            args.execute(&config, cli.json).await?;
        }
        Some(Commands::Aggregate(args)) => {
            args.execute(&config, cli.json).await?;
        }
        Some(Commands::Config) => {
            println!("Braid Configuration");
            println!("===================");
            println!();
            println!("Merge Settings:");
            println!("  fetch_namespace: {}", config.merge.fetch_namespace);
            println!("  verify_ancestry: {}", config.merge.verify_ancestry);
            println!("  merge_message_prefix: {}", config.merge.merge_message_prefix);
            println!("  pointer_commit_message: {}", config.merge.pointer_commit_message);
            println!(
                "  pointer_resolution_message: {}",
                config.merge.pointer_resolution_message
            );
            println!(
                "  committer: {} <{}>",
                config.merge.committer_name, config.merge.committer_email
            );
            println!();
            println!("Store Settings:");
            match config.store.resolved_path() {
                Ok(path) => println!("  path: {}", path.display()),
                Err(e) => println!("  path: (unavailable: {})", e),
            }
            println!();
            if let Some(path) = Config::default_config_path() {
                println!("Config file: {}", path.display());
                if path.exists() {
                    println!("  (exists)");
                } else {
                    println!("  (not found - using defaults)");
                }
            }
        }
        None => {
            println!("Braid - nested-repository merge orchestration");
            println!();
            println!("Use --help for usage information");
        }
    }

    Ok(())
}
