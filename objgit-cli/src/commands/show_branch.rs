use anyhow::Result;
use colored::Colorize;
use std::path::PathBuf;

/// Compare a branch's tip with the tip of `base` (the main branch by default).
pub fn run(name: String, base: Option<String>, dir: Option<PathBuf>) -> Result<()> {
    let workspace = super::open(dir)?;
    let base = base.unwrap_or_else(|| workspace.repo.config().repo.main_branch.clone());

    let comparison = workspace.repo.compare_branches(&base, &name)?;

    println!(
        "{} {} {} {}",
        "Comparing".bold().cyan(),
        name.bold(),
        "against".cyan(),
        base.bold()
    );
    println!();

    if comparison.is_identical() {
        println!(
            "{} ({} object(s))",
            "Branches are identical".green(),
            comparison.unchanged.len()
        );
        return Ok(());
    }

    let sections = [
        ("Added", &comparison.added, "+".green()),
        ("Modified", &comparison.modified, "~".yellow()),
        ("Deleted", &comparison.deleted, "-".red()),
    ];
    for (title, ids, icon) in sections {
        if ids.is_empty() {
            continue;
        }
        println!("{} {}", format!("{}:", title).bold(), format!("({})", ids.len()).dimmed());
        for id in ids {
            println!("  {} {}", icon, id);
        }
        println!();
    }
    println!(
        "{} {}",
        "Unchanged:".bold(),
        comparison.unchanged.len().to_string().dimmed()
    );

    Ok(())
}
