use anyhow::Result;
use colored::Colorize;
use std::path::PathBuf;

pub fn run(name: String, dir: Option<PathBuf>) -> Result<()> {
    let mut workspace = super::open(dir)?;
    let super::Workspace { repo, host, .. } = &mut workspace;

    let outcome = repo.checkout(host, &name)?;
    workspace.save_head()?;

    if outcome.is_noop() {
        println!("Already on branch {}", name.green());
        return Ok(());
    }

    if let Some(auto_save) = &outcome.auto_save {
        println!(
            "{} {} ({} object(s)) on {}",
            "Auto-saved".yellow(),
            crate::display::short_id(&auto_save.commit_id),
            auto_save.changes.len(),
            auto_save.branch_name
        );
    }
    if let Some(first) = &outcome.first_commit {
        println!(
            "{} {} with {} object(s)",
            "Created initial commit".cyan(),
            crate::display::short_id(&first.commit_id),
            first.changes.len()
        );
    }

    println!("{} {}", "✓ Switched to branch".green().bold(), name.bold());
    if let Some(commit) = &outcome.reconstructed {
        println!(
            "  {}: {} {}",
            "At".bold(),
            crate::display::short_id(&commit.commit_id),
            commit.message
        );
    }

    Ok(())
}
