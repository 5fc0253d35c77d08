use anyhow::{Context, Result};
use colored::Colorize;
use objgit_core::sync::read_batch;
use objgit_core::IngestMode;
use std::path::PathBuf;

pub fn run(file: PathBuf, replace: bool, dir: Option<PathBuf>) -> Result<()> {
    let mut workspace = super::open(dir)?;
    let batch = read_batch(&file).with_context(|| format!("Failed to read {}", file.display()))?;

    let mode = if replace {
        IngestMode::Replace
    } else {
        IngestMode::Incremental
    };

    let super::Workspace { repo, host, .. } = &mut workspace;
    let report = repo.ingest(host, &batch, mode)?;
    workspace.save_head()?;

    println!(
        "{} {} commit(s) from {}",
        "✓ Pulled".green().bold(),
        batch.len(),
        file.display()
    );

    if replace {
        println!("  {}: {}", "Replaced".bold(), report.inserted);
        println!("  {}: {}", "Dropped local".bold(), report.removed);
    } else {
        println!("  {}: {}", "New".bold(), report.inserted);
        println!("  {}: {}", "Updated".bold(), report.updated);
        println!("  {}: {}", "Unchanged".bold(), report.unchanged);
    }

    for repair in &report.repairs {
        let new_parent = repair
            .new_parent
            .as_deref()
            .map(crate::display::short_id)
            .unwrap_or("none");
        println!(
            "  {} parent of {} re-pointed from {} to {}",
            "!".yellow(),
            crate::display::short_id(&repair.commit_id),
            crate::display::short_id(&repair.missing_parent),
            new_parent
        );
    }

    if let Some(commit) = &report.reconstructed {
        println!(
            "  {}: {}",
            "Workspace reconstructed at".bold(),
            crate::display::short_id(commit)
        );
    }

    Ok(())
}
