pub mod branch;
pub mod commit;
pub mod diff;
pub mod init;
pub mod log;
pub mod merge;
pub mod pull;
pub mod push;
pub mod reconstruct;
pub mod show_branch;
pub mod status;
pub mod switch;

use anyhow::{bail, Context, Result};
use objgit_core::config::CONFIG_FILE;
use objgit_core::{Commit, Config, DirectoryHost, Repository};
use std::path::{Path, PathBuf};

pub const STATE_DIR: &str = ".objgit";
pub const HEAD_FILE: &str = "HEAD";

/// An opened repository together with the directory it tracks.
pub struct Workspace {
    pub root: PathBuf,
    pub repo: Repository,
    pub host: DirectoryHost,
}

impl Workspace {
    pub fn state_dir(&self) -> PathBuf {
        state_dir(&self.root)
    }

    /// Persist the active branch so the next invocation resumes on it.
    pub fn save_head(&self) -> Result<()> {
        if let Some(branch) = self.repo.active_branch() {
            write_head(&self.state_dir(), branch)?;
        }
        Ok(())
    }

    pub fn active_branch(&self) -> Result<String> {
        self.repo
            .active_branch()
            .map(str::to_string)
            .context("No active branch")
    }
}

pub fn workspace_root(dir: Option<PathBuf>) -> Result<PathBuf> {
    match dir {
        Some(dir) => Ok(dir),
        None => std::env::current_dir().context("Failed to determine current directory"),
    }
}

pub fn state_dir(root: &Path) -> PathBuf {
    root.join(STATE_DIR)
}

pub fn open(dir: Option<PathBuf>) -> Result<Workspace> {
    let root = workspace_root(dir)?;
    let state = state_dir(&root);

    if !state.exists() {
        bail!("Not an objgit workspace. Run 'objgit init' first.");
    }

    let config = Config::load(&state.join(CONFIG_FILE)).context("Failed to load config")?;
    let dataset = dataset_name(&root, &config);
    let branch = read_head(&state)?.unwrap_or_else(|| config.repo.main_branch.clone());
    let host = DirectoryHost::new(&root).with_ignore_patterns(config.workspace.ignore_patterns.clone());

    let mut repo = Repository::open(&state, &dataset, config)
        .with_context(|| format!("Failed to open dataset '{}'", dataset))?;
    repo.attach(&branch)?;
    tracing::debug!("Opened dataset '{}' on branch '{}'", dataset, branch);

    Ok(Workspace { root, repo, host })
}

/// The configured dataset id, else the workspace directory name.
pub fn dataset_name(root: &Path, config: &Config) -> String {
    config
        .repo
        .dataset
        .clone()
        .or_else(|| {
            root.file_name()
                .map(|name| name.to_string_lossy().to_string())
        })
        .unwrap_or_else(|| "default".to_string())
}

pub fn read_head(state: &Path) -> Result<Option<String>> {
    let path = state.join(HEAD_FILE);
    if !path.exists() {
        return Ok(None);
    }
    let text = std::fs::read_to_string(&path).context("Failed to read HEAD")?;
    let branch = text.trim();
    Ok((!branch.is_empty()).then(|| branch.to_string()))
}

pub fn write_head(state: &Path, branch: &str) -> Result<()> {
    std::fs::write(state.join(HEAD_FILE), format!("{}\n", branch)).context("Failed to write HEAD")
}

/// Resolve a full commit id or a unique prefix of one.
pub fn resolve_commit(repo: &Repository, prefix: &str) -> Result<Commit> {
    let history = repo.store().history()?;
    let matches: Vec<&Commit> = history
        .iter()
        .filter(|c| c.commit_id.starts_with(prefix))
        .collect();

    match matches.as_slice() {
        [] => bail!("Commit not found: {}", prefix),
        [commit] => Ok((*commit).clone()),
        _ => bail!(
            "Commit prefix '{}' is ambiguous ({} matches)",
            prefix,
            matches.len()
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use objgit_core::{CommitStore, ObjectChange, SqliteStore};
    use tempfile::TempDir;

    #[test]
    fn test_dataset_name_prefers_config() {
        let mut config = Config::default();
        assert_eq!(dataset_name(Path::new("/work/tower"), &config), "tower");

        config.repo.dataset = Some("bridge".to_string());
        assert_eq!(dataset_name(Path::new("/work/tower"), &config), "bridge");
    }

    #[test]
    fn test_head_round_trip() {
        let dir = TempDir::new().unwrap();
        assert_eq!(read_head(dir.path()).unwrap(), None);

        write_head(dir.path(), "feature").unwrap();
        assert_eq!(read_head(dir.path()).unwrap().as_deref(), Some("feature"));

        std::fs::write(dir.path().join(HEAD_FILE), "  \n").unwrap();
        assert_eq!(read_head(dir.path()).unwrap(), None);
    }

    #[test]
    fn test_open_requires_init() {
        let dir = TempDir::new().unwrap();
        assert!(open(Some(dir.path().to_path_buf())).is_err());
    }

    #[test]
    fn test_resolve_commit_by_prefix() {
        let store = CommitStore::new(Box::new(SqliteStore::in_memory().unwrap()), "model");
        for id in ["abc123", "abd456"] {
            let commit = Commit::new("main", id, "tester", vec![ObjectChange::added(id, id)]).with_id(id);
            store.append_commit(&commit).unwrap();
        }
        let repo = Repository::new(store, Config::default());

        assert_eq!(resolve_commit(&repo, "abc").unwrap().commit_id, "abc123");
        assert!(resolve_commit(&repo, "ab").is_err());
        assert!(resolve_commit(&repo, "zzz").is_err());
    }
}
