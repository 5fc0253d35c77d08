use anyhow::Result;
use colored::Colorize;
use objgit_core::diff::PayloadDiff;
use std::path::PathBuf;

/// Diff of a commit against its parent, or of uncommitted changes.
pub fn run(commit_id: Option<String>, dir: Option<PathBuf>) -> Result<()> {
    let workspace = super::open(dir)?;

    let diffs = if let Some(prefix) = commit_id {
        let commit = super::resolve_commit(&workspace.repo, &prefix)?;

        println!("{}", format!("Diff for commit {}", commit.commit_id).bold().cyan());
        println!("{}: {}", "Message".bold(), commit.message);
        println!();

        workspace.repo.commit_diffs(&commit.commit_id)?
    } else {
        let pending = workspace.repo.status(&workspace.host)?;

        if pending.is_empty() {
            println!("{}", "No uncommitted changes".green());
            return Ok(());
        }

        println!("{}", "Uncommitted changes".bold().cyan());
        println!();

        let branch = workspace.active_branch()?;
        let baseline = workspace.repo.baseline(&branch);
        pending
            .changes
            .iter()
            .map(|change| {
                let previous = baseline
                    .and_then(|b| b.get(&change.id))
                    .map(String::as_str);
                PayloadDiff::from_change(change, previous)
            })
            .collect()
    };

    for diff in &diffs {
        crate::display::print_payload_diff(diff);
    }

    Ok(())
}
