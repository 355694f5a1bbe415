//! Working-copy registry commands

use std::path::{Path, PathBuf};

use braid_core::{Config, GitRepo, RepositoryHandle, WorkingCopyRef, WorkingCopyStore};
use clap::{Args, Subcommand};

use super::{lookup, open_store, run_blocking, short};

/// Working-copy registry commands
#[derive(Args, Debug)]
pub struct WorkingCopyArgs {
    #[command(subcommand)]
    pub command: WorkingCopyCommand,
}

#[derive(Subcommand, Debug)]
pub enum WorkingCopyCommand {
    /// Register a working copy, or update an existing registration
    Add {
        /// Identifier for the working copy
        id: String,

        /// Path of the working copy root
        path: PathBuf,

        /// Branch the copy should be on (defaults to its current branch)
        #[arg(short, long)]
        branch: Option<String>,

        /// Containing working copy, for submodule checkouts
        #[arg(long)]
        parent: Option<String>,
    },

    /// List registered working copies
    List,

    /// Show one working copy and its registered children
    Show {
        /// Working copy identifier
        id: String,
    },
}

impl WorkingCopyArgs {
    /// Execute the working-copy command
    pub async fn execute(&self, config: &Config, json: bool) -> anyhow::Result<()> {
        match &self.command {
            WorkingCopyCommand::Add {
                id,
                path,
                branch,
                parent,
            } => add_working_copy(config, id, path, branch.as_deref(), parent.as_deref()).await,
            WorkingCopyCommand::List => list_working_copies(config, json).await,
            WorkingCopyCommand::Show { id } => show_working_copy(config, id, json).await,
        }
    }
}

async fn add_working_copy(
    config: &Config,
    id: &str,
    path: &Path,
    branch: Option<&str>,
    parent: Option<&str>,
) -> anyhow::Result<()> {
    let store = open_store(config)?;
    let path = std::fs::canonicalize(path)
        .map_err(|e| anyhow::anyhow!("Cannot resolve {}: {}", path.display(), e))?;

    let branch = match branch {
        Some(branch) => branch.to_string(),
        None => {
            let repo_path = path.clone();
            run_blocking(move || {
                let repo = GitRepo::open(&repo_path)?;
                repo.current_branch()?.ok_or_else(|| {
                    anyhow::anyhow!(
                        "{} has a detached HEAD; pass --branch",
                        repo_path.display()
                    )
                })
            })
            .await?
        }
    };

    let record = match parent {
        Some(parent_id) => {
            let parent = lookup(&store, parent_id)?;
            let main_id = parent.main_id.clone().unwrap_or_else(|| parent.id.clone());
            WorkingCopyRef::submodule(id, &path, &branch, parent_id, main_id)
        }
        None => WorkingCopyRef::main(id, &path, &branch),
    };

    store.save(record)?;
    tracing::info!(id = %id, path = %path.display(), branch = %branch, "Registered working copy");

    println!("Registered {} at {} (branch {})", id, path.display(), branch);
    Ok(())
}

async fn list_working_copies(config: &Config, json: bool) -> anyhow::Result<()> {
    let store = open_store(config)?;
    let records = store.list()?;

    if json {
        println!("{}", serde_json::to_string_pretty(&records)?);
        return Ok(());
    }

    if records.is_empty() {
        println!("No working copies registered");
        return Ok(());
    }

    println!("{:<20} {:<10} {:<24} {:<10} PATH", "ID", "KIND", "BRANCH", "COMMIT");
    for record in &records {
        let kind = if record.is_submodule() { "submodule" } else { "main" };
        let commit = record.last_commit.as_deref().map(short).unwrap_or("-");
        println!(
            "{:<20} {:<10} {:<24} {:<10} {}",
            record.id,
            kind,
            record.derived_branch,
            commit,
            record.path.display()
        );
    }

    Ok(())
}

async fn show_working_copy(config: &Config, id: &str, json: bool) -> anyhow::Result<()> {
    let store = open_store(config)?;
    let record = lookup(&store, id)?;
    let children = store.children_of(id)?;

    if json {
        let value = serde_json::json!({
            "working_copy": record,
            "children": children,
        });
        println!("{}", serde_json::to_string_pretty(&value)?);
        return Ok(());
    }

    println!("Working copy: {}", record.id);
    println!("  Path: {}", record.path.display());
    println!("  Branch: {}", record.derived_branch);
    if let Some(parent) = &record.parent_id {
        println!("  Parent: {}", parent);
    }
    if let Some(main) = &record.main_id {
        println!("  Main: {}", main);
    }
    if let Some(commit) = &record.last_commit {
        println!("  Last commit: {}", commit);
    }
    println!("  Updated: {}", humanize(record.updated_at));

    if !children.is_empty() {
        println!("  Children:");
        for child in &children {
            println!("    {} ({})", child.id, child.path.display());
        }
    }

    Ok(())
}

fn humanize(time: std::time::SystemTime) -> String {
    match time.elapsed() {
        Ok(elapsed) => format!("{}s ago", elapsed.as_secs()),
        Err(_) => "just now".to_string(),
    }
}
