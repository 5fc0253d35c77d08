//! Repository configuration (`.objgit/config.toml`).
//!
//! A missing file yields the defaults; unknown keys are rejected.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

pub const CONFIG_FILE: &str = "config.toml";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(default)]
    pub repo: RepoConfig,

    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub merge: MergeConfig,

    #[serde(default)]
    pub sync: SyncConfig,

    #[serde(default)]
    pub workspace: WorkspaceConfig,
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let text = std::fs::read_to_string(path)?;
        Self::parse(&text)
    }

    pub fn parse(text: &str) -> Result<Self> {
        Ok(toml::from_str(text)?)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let text = toml::to_string_pretty(self).map_err(|e| Error::Config(e.to_string()))?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, text)?;
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RepoConfig {
    /// Stable dataset id. When unset, callers derive one from the workspace
    /// directory name.
    #[serde(default)]
    pub dataset: Option<String>,

    /// The integration branch that replace-mode ingest overwrites.
    #[serde(default = "default_main_branch")]
    pub main_branch: String,

    #[serde(default)]
    pub reconstruct: ReconstructStrategy,
}

impl Default for RepoConfig {
    fn default() -> Self {
        Self {
            dataset: None,
            main_branch: default_main_branch(),
            reconstruct: ReconstructStrategy::default(),
        }
    }
}

fn default_main_branch() -> String {
    "main".to_string()
}

/// How a workspace is rebuilt for a target commit.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ReconstructStrategy {
    /// Apply only the target commit's own non-deleted changes.
    #[default]
    CommitDelta,
    /// Replay the parent chain from the root up to the target commit.
    HistoryReplay,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StorageConfig {
    #[serde(default)]
    pub backend: StorageBackend,

    #[serde(default)]
    pub on_corrupt: CorruptPolicy,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StorageBackend {
    #[default]
    Sqlite,
    Json,
}

/// What to do when a persisted document cannot be parsed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CorruptPolicy {
    /// Surface `Error::CorruptDocument` and write nothing.
    #[default]
    Abort,
    /// Log and continue as if the document were empty. Discards prior data on
    /// the next write.
    TreatAsEmpty,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MergeConfig {
    #[serde(default)]
    pub conflicts: ConflictPolicy,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ConflictPolicy {
    /// Never report conflicts; the combine rules decide.
    #[default]
    LastWriterWins,
    /// Report objects edited differently on both sides since the branch point.
    OverlappingEdits,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SyncConfig {
    #[serde(default)]
    pub parent_policy: ParentPolicy,

    #[serde(default = "default_true")]
    pub reconstruct_after_replace: bool,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            parent_policy: ParentPolicy::default(),
            reconstruct_after_replace: true,
        }
    }
}

fn default_true() -> bool {
    true
}

/// Parent linkage after an incremental ingest.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ParentPolicy {
    /// Keep every resolvable parent; repair only dangling ones.
    #[default]
    Preserve,
    /// Rewrite every parent to the previous commit in timestamp order.
    Linearize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WorkspaceConfig {
    /// Substrings of workspace-relative paths that are never tracked.
    #[serde(default = "default_ignore_patterns")]
    pub ignore_patterns: Vec<String>,
}

impl Default for WorkspaceConfig {
    fn default() -> Self {
        Self {
            ignore_patterns: default_ignore_patterns(),
        }
    }
}

fn default_ignore_patterns() -> Vec<String> {
    vec![".objgit".to_string(), ".git".to_string()]
}
