use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

mod commands;
mod display;

use commands::{
    branch, commit, diff, init, log, merge, pull, push, reconstruct, show_branch, status, switch,
};

#[derive(Parser)]
#[command(name = "objgit")]
#[command(version, about = "Branch-aware version control for object snapshots", long_about = None)]
struct Cli {
    /// Workspace directory (defaults to current directory)
    #[arg(short = 'C', long, global = true)]
    dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start tracking a directory
    Init {
        /// Dataset id (defaults to the directory name)
        #[arg(long)]
        dataset: Option<String>,
    },

    /// Show uncommitted changes on the active branch
    Status,

    /// Commit changes with a message
    Commit {
        /// Commit message
        message: String,

        /// Author recorded on the commit
        #[arg(short, long, default_value = "cli-user")]
        author: String,
    },

    /// List branches, or create one
    Branch {
        /// Name of the branch to create
        name: Option<String>,
    },

    /// Switch to a branch, saving pending changes first
    Switch {
        /// Branch to switch to
        name: String,
    },

    /// Merge a branch into another
    Merge {
        /// Branch whose changes are merged
        source: String,

        /// Target branch (defaults to the active branch)
        #[arg(long)]
        into: Option<String>,

        /// Author recorded on the merge commit
        #[arg(short, long, default_value = "cli-user")]
        author: String,
    },

    /// Show commit history
    Log {
        /// Only show commits of this branch
        #[arg(short, long)]
        branch: Option<String>,

        /// Number of commits to show
        #[arg(short, long)]
        limit: Option<usize>,
    },

    /// Rebuild the workspace at a commit
    Reconstruct {
        /// Commit ID or unique prefix
        commit: String,
    },

    /// Show diff for a commit or uncommitted changes
    Diff {
        /// Commit ID (if not provided, shows uncommitted changes)
        commit: Option<String>,
    },

    /// Compare a branch against another
    ShowBranch {
        /// Branch to inspect
        name: String,

        /// Branch to compare against (defaults to the main branch)
        #[arg(long)]
        base: Option<String>,
    },

    /// Export a branch's commits to a JSON file
    Push {
        /// Branch to export
        branch: String,

        /// Output file
        #[arg(short, long)]
        out: Option<PathBuf>,
    },

    /// Ingest commits from a JSON file
    Pull {
        /// File produced by `objgit push`
        file: PathBuf,

        /// Overwrite the main branch instead of merging
        #[arg(long)]
        replace: bool,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let dir = cli.dir;

    match cli.command {
        Commands::Init { dataset } => init::run(dir, dataset)?,
        Commands::Status => status::run(dir)?,
        Commands::Commit { message, author } => commit::run(message, author, dir)?,
        Commands::Branch { name } => branch::run(name, dir)?,
        Commands::Switch { name } => switch::run(name, dir)?,
        Commands::Merge {
            source,
            into,
            author,
        } => merge::run(source, into, author, dir)?,
        Commands::Log { branch, limit } => log::run(branch, limit, dir)?,
        Commands::Reconstruct { commit } => reconstruct::run(commit, dir)?,
        Commands::Diff { commit } => diff::run(commit, dir)?,
        Commands::ShowBranch { name, base } => show_branch::run(name, base, dir)?,
        Commands::Push { branch, out } => push::run(branch, out, dir)?,
        Commands::Pull { file, replace } => pull::run(file, replace, dir)?,
    }

    Ok(())
}
