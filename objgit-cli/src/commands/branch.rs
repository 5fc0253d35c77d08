use anyhow::Result;
use colored::Colorize;
use std::path::PathBuf;

/// Create `name`, or list branches when no name is given.
pub fn run(name: Option<String>, dir: Option<PathBuf>) -> Result<()> {
    let workspace = super::open(dir)?;

    let Some(name) = name else {
        let active = workspace.repo.active_branch().unwrap_or_default().to_string();
        let branches = workspace.repo.branches()?;

        if branches.is_empty() {
            println!("{}", "No branches yet".yellow());
            return Ok(());
        }

        for branch in branches {
            let count = format!("({} commits)", branch.commits.len()).dimmed();
            if branch.name == active {
                println!("{} {} {}", "*".green(), branch.name.green().bold(), count);
            } else {
                println!("  {} {}", branch.name, count);
            }
        }
        return Ok(());
    };

    workspace.repo.create_branch(&name)?;

    println!("{} {}", "✓ Created branch".green().bold(), name.bold());
    println!("Run {} to start working on it", format!("objgit switch {}", name).cyan());

    Ok(())
}
