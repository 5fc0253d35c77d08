//! The commit log and branch catalog of one dataset.
//!
//! Both documents are rewritten in full on every change. Each mutation is a
//! read-modify-write against the versioned store and is re-run on a stale
//! read, so a concurrent writer's update is never silently dropped.

use crate::config::CorruptPolicy;
use crate::error::{Error, Result};
use crate::models::{Branch, Commit};
use crate::storage::{DocumentKey, DocumentStore, VersionToken};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, error, info, warn};

pub const MAX_WRITE_ATTEMPTS: usize = 3;

#[derive(Debug, Clone)]
pub struct Versioned<T> {
    pub value: T,
    pub version: VersionToken,
}

pub struct CommitStore {
    backend: Box<dyn DocumentStore>,
    dataset: String,
    on_corrupt: CorruptPolicy,
}

impl CommitStore {
    pub fn new(backend: Box<dyn DocumentStore>, dataset: impl Into<String>) -> Self {
        Self {
            backend,
            dataset: dataset.into(),
            on_corrupt: CorruptPolicy::default(),
        }
    }

    pub fn with_corrupt_policy(mut self, policy: CorruptPolicy) -> Self {
        self.on_corrupt = policy;
        self
    }

    pub fn dataset(&self) -> &str {
        &self.dataset
    }

    fn history_key(&self) -> DocumentKey {
        DocumentKey::history(self.dataset.as_str())
    }

    fn branches_key(&self) -> DocumentKey {
        DocumentKey::branches(self.dataset.as_str())
    }

    fn load<T>(&self, key: &DocumentKey) -> Result<Versioned<T>>
    where
        T: DeserializeOwned + Default,
    {
        let doc = match self.backend.read(key) {
            Err(Error::CorruptDocument { reason, .. })
                if self.on_corrupt == CorruptPolicy::TreatAsEmpty =>
            {
                error!("Failed to read {}: {}; treating it as empty", key, reason);
                return Ok(Versioned {
                    value: T::default(),
                    version: self.backend.version(key)?,
                });
            }
            other => other?,
        };
        let Some(doc) = doc else {
            return Ok(Versioned {
                value: T::default(),
                version: VersionToken::absent(),
            });
        };

        if doc.body.trim().is_empty() {
            return Ok(Versioned {
                value: T::default(),
                version: doc.version,
            });
        }

        match serde_json::from_str::<T>(&doc.body) {
            Ok(value) => Ok(Versioned {
                value,
                version: doc.version,
            }),
            Err(e) => match self.on_corrupt {
                CorruptPolicy::Abort => {
                    error!("Failed to parse {}: {}", key, e);
                    Err(Error::CorruptDocument {
                        document: key.to_string(),
                        reason: e.to_string(),
                    })
                }
                CorruptPolicy::TreatAsEmpty => {
                    error!("Failed to parse {}: {}; treating it as empty", key, e);
                    Ok(Versioned {
                        value: T::default(),
                        version: doc.version,
                    })
                }
            },
        }
    }

    fn save<T: Serialize + ?Sized>(
        &self,
        key: &DocumentKey,
        value: &T,
        expected: &VersionToken,
    ) -> Result<VersionToken> {
        let body = serde_json::to_string_pretty(value)?;
        self.backend.write(key, &body, expected)
    }

    fn update<T, R, F>(&self, key: &DocumentKey, mut mutate: F) -> Result<R>
    where
        T: DeserializeOwned + Serialize + Default,
        F: FnMut(&mut T) -> Result<R>,
    {
        let mut attempt = 0;
        loop {
            attempt += 1;
            let Versioned { mut value, version } = self.load::<T>(key)?;
            let outcome = mutate(&mut value)?;

            match self.save(key, &value, &version) {
                Ok(_) => return Ok(outcome),
                Err(Error::StaleVersion { .. }) if attempt < MAX_WRITE_ATTEMPTS => {
                    warn!(
                        "Stale read of {}, retrying ({}/{})",
                        key, attempt, MAX_WRITE_ATTEMPTS
                    );
                }
                Err(e) => return Err(e),
            }
        }
    }

    pub fn load_history(&self) -> Result<Versioned<Vec<Commit>>> {
        self.load(&self.history_key())
    }

    pub fn load_branches(&self) -> Result<Versioned<Vec<Branch>>> {
        self.load(&self.branches_key())
    }

    /// The full log in stored order; empty when nothing was written yet.
    pub fn history(&self) -> Result<Vec<Commit>> {
        Ok(self.load_history()?.value)
    }

    pub fn branches(&self) -> Result<Vec<Branch>> {
        Ok(self.load_branches()?.value)
    }

    pub fn branch(&self, name: &str) -> Result<Option<Branch>> {
        Ok(self.branches()?.into_iter().find(|b| b.name == name))
    }

    pub fn save_history(&self, history: &[Commit], expected: &VersionToken) -> Result<VersionToken> {
        self.save(&self.history_key(), history, expected)
    }

    pub fn save_branches(&self, branches: &[Branch], expected: &VersionToken) -> Result<VersionToken> {
        self.save(&self.branches_key(), branches, expected)
    }

    /// Read-modify-write of the history log, retried on stale reads.
    pub fn update_history<R, F>(&self, mutate: F) -> Result<R>
    where
        F: FnMut(&mut Vec<Commit>) -> Result<R>,
    {
        self.update(&self.history_key(), mutate)
    }

    /// Read-modify-write of the branch catalog, retried on stale reads.
    pub fn update_branches<R, F>(&self, mutate: F) -> Result<R>
    where
        F: FnMut(&mut Vec<Branch>) -> Result<R>,
    {
        self.update(&self.branches_key(), mutate)
    }

    /// Append to the log, then record the id on the commit's branch, creating
    /// the branch entry when missing.
    pub fn append_commit(&self, commit: &Commit) -> Result<()> {
        self.update_history(|history| {
            if find_commit(history, &commit.commit_id).is_some() {
                return Err(Error::DuplicateCommit(commit.commit_id.clone()));
            }
            history.push(commit.clone());
            Ok(())
        })?;

        self.update_branches(|branches| {
            match branches.iter().position(|b| b.name == commit.branch_name) {
                Some(index) => branches[index].push(commit.commit_id.as_str()),
                None => {
                    let mut branch = Branch::new(commit.branch_name.as_str());
                    branch.push(commit.commit_id.as_str());
                    branches.push(branch);
                }
            }
            Ok(())
        })?;

        debug!(
            "Appended commit {} to branch '{}' of dataset '{}'",
            commit.commit_id, commit.branch_name, self.dataset
        );
        Ok(())
    }

    /// Persist a new, empty branch entry.
    pub fn create_branch(&self, name: &str) -> Result<()> {
        self.update_branches(|branches| {
            if branches.iter().any(|b| b.name == name) {
                return Err(Error::BranchAlreadyExists(name.to_string()));
            }
            branches.push(Branch::new(name));
            Ok(())
        })?;

        info!("Created branch '{}' for dataset '{}'", name, self.dataset);
        Ok(())
    }

    pub fn last_commit_id(&self, branch: &str) -> Result<Option<String>> {
        Ok(self.latest_commit(branch)?.map(|c| c.commit_id))
    }

    pub fn latest_commit(&self, branch: &str) -> Result<Option<Commit>> {
        let history = self.history()?;
        Ok(latest_on_branch(&history, branch).cloned())
    }

    pub fn commit_by_id(&self, commit_id: &str) -> Result<Option<Commit>> {
        let history = self.history()?;
        Ok(find_commit(&history, commit_id).cloned())
    }

    /// Commits tagged with `branch`, oldest first.
    pub fn branch_commits(&self, branch: &str) -> Result<Vec<Commit>> {
        let history = self.history()?;
        Ok(commits_on_branch(&history, branch)
            .into_iter()
            .cloned()
            .collect())
    }
}

pub fn find_commit<'a>(history: &'a [Commit], commit_id: &str) -> Option<&'a Commit> {
    history.iter().find(|c| c.commit_id == commit_id)
}

/// The tagged commit with the greatest timestamp; ties go to the later entry.
pub fn latest_on_branch<'a>(history: &'a [Commit], branch: &str) -> Option<&'a Commit> {
    history
        .iter()
        .filter(|c| c.branch_name == branch)
        .max_by_key(|c| c.timestamp)
}

pub fn commits_on_branch<'a>(history: &'a [Commit], branch: &str) -> Vec<&'a Commit> {
    let mut commits: Vec<&Commit> = history.iter().filter(|c| c.branch_name == branch).collect();
    commits.sort_by_key(|c| c.timestamp);
    commits
}

/// Walk `parentCommit` links from `commit_id` back to a root. The result is
/// oldest first and ends with `commit_id`. A missing parent or a cycle ends
/// the walk early.
pub fn ancestry<'a>(history: &'a [Commit], commit_id: &str) -> Result<Vec<&'a Commit>> {
    let mut chain = Vec::new();
    let mut current = find_commit(history, commit_id)
        .ok_or_else(|| Error::CommitNotFound(commit_id.to_string()))?;

    loop {
        if chain.iter().any(|c: &&Commit| c.commit_id == current.commit_id) {
            warn!("Parent cycle detected at commit {}", current.commit_id);
            break;
        }
        chain.push(current);

        let Some(parent_id) = current.parent() else {
            break;
        };
        match find_commit(history, parent_id) {
            Some(parent) => current = parent,
            None => {
                warn!(
                    "Parent {} of commit {} is missing; replay starts there",
                    parent_id, current.commit_id
                );
                break;
            }
        }
    }

    chain.reverse();
    Ok(chain)
}
