use anyhow::Result;
use colored::Colorize;
use std::path::PathBuf;

pub fn run(branch: Option<String>, limit: Option<usize>, dir: Option<PathBuf>) -> Result<()> {
    let workspace = super::open(dir)?;
    let commits = workspace.repo.log(branch.as_deref(), None)?;

    if commits.is_empty() {
        println!("{}", "No commits yet".yellow());
        return Ok(());
    }

    match &branch {
        Some(name) => println!("{} {}", "Commit History of".bold().cyan(), name.bold().cyan()),
        None => println!("{}", "Commit History".bold().cyan()),
    }
    println!();

    let to_show = limit.unwrap_or(commits.len()).min(commits.len());

    for info in commits.iter().take(to_show) {
        let commit = &info.commit;

        println!(
            "{} {} {}",
            "commit".yellow().bold(),
            commit.commit_id.yellow(),
            format!("({})", commit.branch_name).green()
        );
        println!("{}: {}", "Author".bold(), commit.author);
        println!(
            "{}: {}",
            "Date".bold(),
            commit.timestamp.format("%Y-%m-%d %H:%M:%S")
        );
        match commit.parent() {
            Some(parent) => println!("{}: {}", "Parent".bold(), crate::display::short_id(parent)),
            None => println!("{}: {}", "Parent".bold(), "none (root)".dimmed()),
        }
        println!();
        println!("    {}", commit.message);
        println!();
        println!(
            "    {} added, {} modified, {} deleted",
            info.added.to_string().green(),
            info.modified.to_string().yellow(),
            info.deleted.to_string().red()
        );

        for change in commit.changes.iter().take(5) {
            println!(
                "      {} {}",
                crate::display::change_icon(change.change_type),
                change.id.dimmed()
            );
        }
        if commit.changes.len() > 5 {
            println!(
                "      {} and {} more...",
                "...".dimmed(),
                (commit.changes.len() - 5).to_string().dimmed()
            );
        }

        println!();
    }

    if commits.len() > to_show {
        println!(
            "{}",
            format!("... and {} more commits", commits.len() - to_show).dimmed()
        );
        println!("Use {} to see more", "--limit N".cyan());
    }

    Ok(())
}
