use anyhow::Result;
use colored::Colorize;
use std::path::PathBuf;

pub fn run(dir: Option<PathBuf>) -> Result<()> {
    let workspace = super::open(dir)?;
    let branch = workspace.active_branch()?;
    let pending = workspace.repo.status(&workspace.host)?;
    let last = workspace.repo.store().last_commit_id(&branch)?;

    println!("{}", "Workspace Status".bold().cyan());
    println!("  {}: {}", "Root".bold(), workspace.root.display());
    println!("  {}: {}", "Dataset".bold(), workspace.repo.dataset());
    println!("  {}: {}", "Branch".bold(), branch.green());
    println!(
        "  {}: {}",
        "Last commit".bold(),
        last.as_deref()
            .map(crate::display::short_id)
            .unwrap_or("none")
    );
    println!();

    if !pending.skipped.is_empty() {
        println!(
            "{} {}",
            "Unreadable objects (ignored):".yellow(),
            pending.skipped.join(", ")
        );
        println!();
    }

    if pending.is_empty() {
        println!("{}", "No uncommitted changes".green());
        return Ok(());
    }

    println!(
        "{} {}",
        "Uncommitted changes:".bold(),
        format!("({})", pending.len()).yellow()
    );
    println!();
    crate::display::print_changes(&pending.changes, 20);
    println!();
    println!(
        "Run {} to commit these changes",
        "objgit commit \"message\"".cyan()
    );

    Ok(())
}
