use anyhow::{bail, Context, Result};
use colored::Colorize;
use objgit_core::config::{ReconstructStrategy, CONFIG_FILE};
use objgit_core::{Config, DirectoryHost, Host};
use std::path::PathBuf;

pub fn run(dir: Option<PathBuf>, dataset: Option<String>) -> Result<()> {
    let root = super::workspace_root(dir)?;
    let state = super::state_dir(&root);

    if state.exists() {
        bail!("Already an objgit workspace: {}", state.display());
    }

    std::fs::create_dir_all(&state)
        .with_context(|| format!("Failed to create {}", state.display()))?;

    // Reconstruction replays the full ancestry; baselines are rebuilt per run.
    let mut config = Config::default();
    config.repo.dataset = Some(dataset.unwrap_or_else(|| super::dataset_name(&root, &config)));
    config.repo.reconstruct = ReconstructStrategy::HistoryReplay;
    config.save(&state.join(CONFIG_FILE))?;
    super::write_head(&state, &config.repo.main_branch)?;

    let host = DirectoryHost::new(&root).with_ignore_patterns(config.workspace.ignore_patterns.clone());
    let objects = host.object_ids()?;

    println!("{}", "✓ Initialized objgit workspace".green().bold());
    println!("  {}: {}", "Root".bold(), root.display());
    println!(
        "  {}: {}",
        "Dataset".bold(),
        config.repo.dataset.as_deref().unwrap_or_default()
    );
    println!("  {}: {}", "Branch".bold(), config.repo.main_branch);

    if !objects.is_empty() {
        println!();
        println!(
            "{} untracked object(s). Run {} to record them.",
            objects.len().to_string().yellow(),
            "objgit commit \"message\"".cyan()
        );
    }

    Ok(())
}
