use anyhow::Result;
use colored::Colorize;
use std::path::PathBuf;

pub fn run(message: String, author: String, dir: Option<PathBuf>) -> Result<()> {
    let mut workspace = super::open(dir)?;

    let Some(commit) = workspace
        .repo
        .commit(&workspace.host, &message, &author)?
    else {
        println!("{}", "No changes to commit".yellow());
        return Ok(());
    };

    println!("{}", "✓ Commit created successfully!".green().bold());
    crate::display::print_commit_summary(&commit);
    println!();
    crate::display::print_changes(&commit.changes, 10);

    Ok(())
}
