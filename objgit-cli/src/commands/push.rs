use anyhow::{Context, Result};
use colored::Colorize;
use objgit_core::sync::{export_file_name, write_batch};
use std::path::PathBuf;

pub fn run(branch: String, out: Option<PathBuf>, dir: Option<PathBuf>) -> Result<()> {
    let workspace = super::open(dir)?;
    let commits = workspace.repo.export_branch(&branch)?;

    if commits.is_empty() {
        anyhow::bail!("Branch '{}' has no commits to export", branch);
    }

    let path = out.unwrap_or_else(|| {
        workspace
            .root
            .join(export_file_name(&branch, &workspace.repo.config().repo.main_branch))
    });
    write_batch(&path, &commits).with_context(|| format!("Failed to write {}", path.display()))?;

    println!(
        "{} {} commit(s) of {}",
        "✓ Exported".green().bold(),
        commits.len(),
        branch.bold()
    );
    println!("  {}: {}", "File".bold(), path.display());

    Ok(())
}
