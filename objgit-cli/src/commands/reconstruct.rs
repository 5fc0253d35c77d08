use anyhow::Result;
use colored::Colorize;
use objgit_core::Host;
use std::path::PathBuf;

pub fn run(commit_id: String, dir: Option<PathBuf>) -> Result<()> {
    let mut workspace = super::open(dir)?;
    let commit = super::resolve_commit(&workspace.repo, &commit_id)?;

    let pending = workspace.repo.status(&workspace.host)?;
    if !pending.is_empty() {
        println!(
            "{} {} uncommitted change(s) will be discarded",
            "Warning:".yellow().bold(),
            pending.len()
        );
    }

    let super::Workspace { repo, host, .. } = &mut workspace;
    repo.reconstruct_workspace(host, &commit.commit_id)?;

    println!("{}", "✓ Workspace reconstructed".green().bold());
    crate::display::print_commit_summary(&commit);
    println!(
        "  {}: {}",
        "Objects".bold(),
        workspace.host.object_ids()?.len()
    );

    Ok(())
}
