use anyhow::Result;
use colored::Colorize;
use std::path::PathBuf;

pub fn run(source: String, into: Option<String>, author: String, dir: Option<PathBuf>) -> Result<()> {
    let mut workspace = super::open(dir)?;
    let target = match into {
        Some(target) => target,
        None => workspace.active_branch()?,
    };

    let super::Workspace { repo, host, .. } = &mut workspace;
    let outcome = repo.merge(host, &source, &target, &author)?;
    workspace.save_head()?;

    println!(
        "{} {} into {}",
        "✓ Merged".green().bold(),
        source.bold(),
        target.bold()
    );
    println!(
        "  {}: {}",
        "Branch point".bold(),
        crate::display::short_id(&outcome.branch_point)
    );
    println!(
        "  {}: {} from {}, {} from {}",
        "Changes".bold(),
        outcome.source_changes,
        source,
        outcome.target_changes,
        target
    );
    if outcome.duplicates_removed > 0 {
        println!(
            "  {}: {}",
            "Duplicates removed".bold(),
            outcome.duplicates_removed.to_string().yellow()
        );
    }
    println!();
    crate::display::print_commit_summary(&outcome.commit);

    Ok(())
}
