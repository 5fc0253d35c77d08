//! Reconciling externally supplied commit batches with the local log.
//!
//! Incremental ingest adds what is missing and repairs dangling parents.
//! Replace ingest overwrites the main branch with the remote copy.

use crate::config::ParentPolicy;
use crate::error::{Error, Result};
use crate::history::find_commit;
use crate::host::Host;
use crate::models::{Branch, Commit};
use crate::repository::Repository;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestMode {
    /// Add missing commits and merge branch lists.
    Incremental,
    /// Overwrite the main branch with the remote batch.
    Replace,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParentRepair {
    pub commit_id: String,
    pub missing_parent: String,
    /// `None` when no earlier commit existed and the commit became a root.
    pub new_parent: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IngestReport {
    pub inserted: usize,
    pub updated: usize,
    pub unchanged: usize,
    /// Local commits dropped by a replace.
    pub removed: usize,
    pub repairs: Vec<ParentRepair>,
    pub reconstructed: Option<String>,
}

/// Keep the first commit of every id in the batch.
pub fn dedupe_batch(remote: &[Commit]) -> Vec<Commit> {
    let mut seen: HashSet<&str> = HashSet::new();
    let mut batch = Vec::with_capacity(remote.len());
    for commit in remote {
        if seen.insert(commit.commit_id.as_str()) {
            batch.push(commit.clone());
        } else {
            warn!("Ignoring repeated commit {} in remote batch", commit.commit_id);
        }
    }
    batch
}

/// Insert missing commits, update differing ones, repair dangling parents and
/// sort by timestamp.
pub fn reconcile_history(
    history: &mut Vec<Commit>,
    remote: &[Commit],
    policy: ParentPolicy,
) -> IngestReport {
    let mut report = IngestReport::default();
    let batch_ids: HashSet<&str> = remote.iter().map(|c| c.commit_id.as_str()).collect();

    for incoming in remote {
        let mut incoming = incoming.clone();

        if let Some(parent) = incoming.parent() {
            let resolvable = batch_ids.contains(parent) || find_commit(history, parent).is_some();
            if !resolvable {
                let missing_parent = parent.to_string();
                let new_parent = history
                    .iter()
                    .filter(|c| c.timestamp < incoming.timestamp && c.commit_id != incoming.commit_id)
                    .max_by_key(|c| c.timestamp)
                    .map(|c| c.commit_id.clone());

                match &new_parent {
                    Some(new_parent) => info!(
                        "Adjusted parent of commit {} from {} to {}",
                        incoming.commit_id, missing_parent, new_parent
                    ),
                    None => warn!(
                        "Parent {} of commit {} is unknown and no earlier commit exists",
                        missing_parent, incoming.commit_id
                    ),
                }

                incoming.parent_commit = new_parent.clone().unwrap_or_default();
                report.repairs.push(ParentRepair {
                    commit_id: incoming.commit_id.clone(),
                    missing_parent,
                    new_parent,
                });
            }
        }

        match history.iter().position(|c| c.commit_id == incoming.commit_id) {
            Some(i) if history[i] == incoming => report.unchanged += 1,
            Some(i) => {
                debug!("Updating commit {}", incoming.commit_id);
                history[i] = incoming;
                report.updated += 1;
            }
            None => {
                history.push(incoming);
                report.inserted += 1;
            }
        }
    }

    history.sort_by_key(|c| c.timestamp);
    if policy == ParentPolicy::Linearize {
        linearize(history);
    }

    report
}

/// Point every commit at its predecessor in timestamp order.
pub fn linearize(history: &mut [Commit]) {
    let mut previous = String::new();
    for commit in history.iter_mut() {
        commit.parent_commit = std::mem::replace(&mut previous, commit.commit_id.clone());
    }
}

/// Union each remote branch's ids into the local entry. Ids the remote does
/// not list keep their relative order ahead of the remote ones.
pub fn merge_branch_lists(branches: &mut Vec<Branch>, remote: &[Commit]) {
    let mut names: Vec<&str> = Vec::new();
    for commit in remote {
        if !commit.branch_name.is_empty() && !names.contains(&commit.branch_name.as_str()) {
            names.push(&commit.branch_name);
        }
    }

    for name in names {
        let remote_ids: Vec<&str> = remote
            .iter()
            .filter(|c| c.branch_name == name)
            .map(|c| c.commit_id.as_str())
            .collect();

        let index = match branches.iter().position(|b| b.name == name) {
            Some(index) => index,
            None => {
                branches.push(Branch::new(name));
                branches.len() - 1
            }
        };

        let branch = &mut branches[index];
        for id in &remote_ids {
            branch.push(*id);
        }
        branch.commits.sort_by_key(|id| {
            remote_ids
                .iter()
                .position(|r| *r == id.as_str())
                .map_or(-1, |p| p as i64)
        });
    }
}

/// Drop the branch's local commits and any local commit sharing an id with
/// the batch, then append the batch and sort. Returns how many were dropped.
pub fn replace_branch_history(history: &mut Vec<Commit>, remote: &[Commit], branch: &str) -> usize {
    let remote_ids: HashSet<&str> = remote.iter().map(|c| c.commit_id.as_str()).collect();
    let before = history.len();
    history.retain(|c| c.branch_name != branch && !remote_ids.contains(c.commit_id.as_str()));
    let removed = before - history.len();

    history.extend(remote.iter().cloned());
    history.sort_by_key(|c| c.timestamp);
    removed
}

/// File name a branch is exported under.
pub fn export_file_name(branch: &str, main_branch: &str) -> String {
    if branch == main_branch {
        format!("{}_history.json", branch)
    } else {
        format!("{}.json", branch)
    }
}

pub fn read_batch(path: &Path) -> Result<Vec<Commit>> {
    let text = std::fs::read_to_string(path)?;
    if text.trim().is_empty() {
        return Err(Error::EmptyHistory(format!("{} is empty", path.display())));
    }
    Ok(serde_json::from_str(&text)?)
}

/// Pretty JSON, written to a temporary file and renamed into place.
pub fn write_batch(path: &Path, commits: &[Commit]) -> Result<()> {
    let body = serde_json::to_string_pretty(commits)?;
    let mut tmp = PathBuf::from(path);
    tmp.set_extension("json.tmp");
    std::fs::write(&tmp, body)?;
    std::fs::rename(&tmp, path)?;
    Ok(())
}

impl Repository {
    pub fn ingest(
        &mut self,
        host: &mut dyn Host,
        remote: &[Commit],
        mode: IngestMode,
    ) -> Result<IngestReport> {
        if remote.is_empty() {
            return Err(Error::EmptyHistory(
                "remote batch contains no commits".to_string(),
            ));
        }
        let batch = dedupe_batch(remote);

        match mode {
            IngestMode::Incremental => self.ingest_incremental(&batch),
            IngestMode::Replace => self.ingest_replace(host, &batch),
        }
    }

    fn ingest_incremental(&mut self, batch: &[Commit]) -> Result<IngestReport> {
        let policy = self.config().sync.parent_policy;
        let report = self
            .store()
            .update_history(|history| Ok(reconcile_history(history, batch, policy)))?;
        self.store().update_branches(|branches| {
            merge_branch_lists(branches, batch);
            Ok(())
        })?;

        info!(
            "Ingested {} commit(s): {} new, {} updated, {} unchanged, {} parent repair(s)",
            batch.len(),
            report.inserted,
            report.updated,
            report.unchanged,
            report.repairs.len()
        );
        Ok(report)
    }

    fn ingest_replace(&mut self, host: &mut dyn Host, batch: &[Commit]) -> Result<IngestReport> {
        let main = self.config().repo.main_branch.clone();

        let removed = self
            .store()
            .update_history(|history| Ok(replace_branch_history(history, batch, &main)))?;
        self.store().update_branches(|branches| {
            let ids: Vec<String> = batch.iter().map(|c| c.commit_id.clone()).collect();
            match branches.iter().position(|b| b.name == main) {
                Some(index) => branches[index].commits = ids,
                None => branches.push(Branch {
                    name: main.clone(),
                    commits: ids,
                }),
            }
            Ok(())
        })?;

        let mut report = IngestReport {
            inserted: batch.len(),
            removed,
            ..IngestReport::default()
        };
        info!(
            "Replaced branch '{}' with {} remote commit(s), dropped {} local commit(s)",
            main,
            batch.len(),
            removed
        );

        if self.config().sync.reconstruct_after_replace {
            if let Some(last) = batch.iter().max_by_key(|c| c.timestamp) {
                self.set_active_branch(&main);
                let commit = self.reconstruct_workspace(host, &last.commit_id)?;
                report.reconstructed = Some(commit.commit_id);
            }
        } else if self.active_branch() == Some(main.as_str()) {
            self.rebuild_baseline(&main)?;
        }

        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::history::CommitStore;
    use crate::host::MemoryHost;
    use crate::models::ObjectChange;
    use crate::storage::SqliteStore;
    use chrono::{DateTime, Duration, TimeZone, Utc};
    use tempfile::TempDir;

    fn at(minutes: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap() + Duration::minutes(minutes)
    }

    fn commit(id: &str, branch: &str, minutes: i64, parent: &str) -> Commit {
        Commit::new(branch, format!("commit {}", id), "remote", vec![ObjectChange::added(id, format!("payload {}", id))])
            .with_id(id)
            .with_timestamp(at(minutes))
            .with_parent(Some(parent.to_string()))
    }

    fn repo_with(config: Config, local: &[Commit]) -> Repository {
        let store = CommitStore::new(Box::new(SqliteStore::in_memory().unwrap()), "model");
        for c in local {
            store.append_commit(c).unwrap();
        }
        Repository::new(store, config)
    }

    fn repo(local: &[Commit]) -> Repository {
        repo_with(Config::default(), local)
    }

    fn ids(history: &[Commit]) -> Vec<&str> {
        history.iter().map(|c| c.commit_id.as_str()).collect()
    }

    #[test]
    fn test_dangling_parent_is_repaired() {
        let mut repo = repo(&[commit("c1", "main", 0, ""), commit("c2", "main", 20, "c1")]);
        let remote = vec![
            commit("r1", "feature", 10, "lost"),
            commit("r2", "feature", 30, "gone"),
        ];

        let report = repo
            .ingest(&mut MemoryHost::new(), &remote, IngestMode::Incremental)
            .unwrap();

        assert_eq!(report.inserted, 2);
        assert_eq!(
            report.repairs,
            vec![
                ParentRepair {
                    commit_id: "r1".to_string(),
                    missing_parent: "lost".to_string(),
                    new_parent: Some("c1".to_string()),
                },
                ParentRepair {
                    commit_id: "r2".to_string(),
                    missing_parent: "gone".to_string(),
                    new_parent: Some("c2".to_string()),
                },
            ]
        );

        let history = repo.store().history().unwrap();
        assert_eq!(ids(&history), vec!["c1", "r1", "c2", "r2"]);
        assert_eq!(find_commit(&history, "r1").unwrap().parent(), Some("c1"));
    }

    #[test]
    fn test_parent_without_earlier_commit_becomes_root() {
        let mut history = vec![commit("c1", "main", 10, "")];
        let report = reconcile_history(
            &mut history,
            &[commit("early", "main", 0, "missing")],
            ParentPolicy::Preserve,
        );

        assert_eq!(report.repairs[0].new_parent, None);
        assert!(find_commit(&history, "early").unwrap().is_root());
    }

    #[test]
    fn test_resolvable_parents_are_preserved() {
        let mut history = vec![commit("c1", "main", 0, ""), commit("c2", "main", 5, "c1")];
        let remote = vec![
            commit("root", "feature", 1, ""),
            commit("f1", "feature", 2, "c1"),
            commit("f2", "feature", 9, "f1"),
        ];

        let report = reconcile_history(&mut history, &remote, ParentPolicy::Preserve);

        assert!(report.repairs.is_empty());
        assert!(find_commit(&history, "root").unwrap().is_root());
        assert_eq!(find_commit(&history, "f1").unwrap().parent(), Some("c1"));
        assert_eq!(find_commit(&history, "f2").unwrap().parent(), Some("f1"));
        assert_eq!(ids(&history), vec!["c1", "root", "f1", "c2", "f2"]);
    }

    #[test]
    fn test_linearize_policy() {
        let mut history = vec![commit("c1", "main", 0, ""), commit("c2", "main", 5, "c1")];
        reconcile_history(
            &mut history,
            &[commit("f1", "feature", 2, "c1")],
            ParentPolicy::Linearize,
        );

        let parents: Vec<_> = history.iter().map(|c| c.parent_commit.as_str()).collect();
        assert_eq!(parents, vec!["", "c1", "f1"]);
    }

    #[test]
    fn test_existing_commit_is_updated_when_different() {
        let mut repo = repo(&[commit("c1", "main", 0, "")]);
        let mut edited = commit("c1", "main", 0, "");
        edited.message = "reworded upstream".to_string();

        let report = repo
            .ingest(&mut MemoryHost::new(), &[edited.clone()], IngestMode::Incremental)
            .unwrap();

        assert_eq!((report.inserted, report.updated, report.unchanged), (0, 1, 0));
        assert_eq!(repo.store().history().unwrap(), vec![edited]);
    }

    #[test]
    fn test_repeated_ingest_keeps_ids_unique() {
        let mut repo = repo(&[commit("c1", "main", 0, "")]);
        let remote = vec![
            commit("r1", "main", 1, "c1"),
            commit("r2", "main", 2, "r1"),
            commit("r1", "main", 1, "c1"),
        ];

        let mut host = MemoryHost::new();
        let first = repo.ingest(&mut host, &remote, IngestMode::Incremental).unwrap();
        let second = repo.ingest(&mut host, &remote, IngestMode::Incremental).unwrap();

        assert_eq!(first.inserted, 2);
        assert_eq!((second.inserted, second.updated, second.unchanged), (0, 0, 2));

        let history = repo.store().history().unwrap();
        let mut seen = ids(&history);
        seen.sort();
        seen.dedup();
        assert_eq!(seen.len(), history.len());
        assert_eq!(repo.store().branch("main").unwrap().unwrap().commits, vec!["c1", "r1", "r2"]);
    }

    #[test]
    fn test_branch_lists_follow_remote_order() {
        let mut branches = vec![Branch {
            name: "main".to_string(),
            commits: vec!["local".to_string(), "r1".to_string()],
        }];
        let remote = vec![
            commit("r0", "main", 0, ""),
            commit("r1", "main", 1, "r0"),
            commit("r2", "main", 2, "r1"),
            commit("f1", "feature", 3, "r2"),
        ];

        merge_branch_lists(&mut branches, &remote);

        assert_eq!(branches[0].commits, vec!["local", "r0", "r1", "r2"]);
        assert_eq!(branches[1].name, "feature");
        assert_eq!(branches[1].commits, vec!["f1"]);
    }

    #[test]
    fn test_empty_batch_is_rejected() {
        let mut repo = repo(&[]);
        let err = repo
            .ingest(&mut MemoryHost::new(), &[], IngestMode::Incremental)
            .unwrap_err();
        assert!(matches!(err, Error::EmptyHistory(_)));
    }

    #[test]
    fn test_replace_discards_local_main() {
        let mut repo = repo(&[
            commit("l1", "main", 0, ""),
            commit("l2", "main", 1, "l1"),
            commit("f1", "feature", 2, "l2"),
        ]);
        let remote = vec![
            commit("m1", "main", 5, ""),
            commit("m2", "main", 6, "m1"),
        ];
        let mut host = MemoryHost::new();
        host.insert("stale", "object");

        let report = repo.ingest(&mut host, &remote, IngestMode::Replace).unwrap();

        assert_eq!(report.removed, 2);
        assert_eq!(report.reconstructed.as_deref(), Some("m2"));
        let history = repo.store().history().unwrap();
        assert_eq!(ids(&history), vec!["f1", "m1", "m2"]);
        assert_eq!(find_commit(&history, "f1").unwrap().parent(), Some("l2"));
        assert_eq!(repo.store().branch("main").unwrap().unwrap().commits, vec!["m1", "m2"]);

        assert_eq!(host.object_ids().unwrap(), vec!["m2"]);
        assert_eq!(repo.active_branch(), Some("main"));
        assert!(repo.status(&host).unwrap().is_empty());
    }

    #[test]
    fn test_replace_drops_colliding_ids() {
        let mut config = Config::default();
        config.sync.reconstruct_after_replace = false;
        let mut repo = repo_with(config, &[commit("shared", "feature", 0, "")]);
        let mut host = MemoryHost::new();
        host.insert("untouched", "x");

        let report = repo
            .ingest(&mut host, &[commit("shared", "main", 3, "")], IngestMode::Replace)
            .unwrap();

        assert_eq!(report.removed, 1);
        assert!(report.reconstructed.is_none());
        let history = repo.store().history().unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].branch_name, "main");
        assert_eq!(host.get("untouched"), Some("x"));
    }

    #[test]
    fn test_batch_file_round_trip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(export_file_name("feature", "main"));
        let commits = vec![commit("a", "feature", 0, ""), commit("b", "feature", 1, "a")];

        write_batch(&path, &commits).unwrap();
        assert!(!dir.path().join("feature.json.tmp").exists());
        assert_eq!(read_batch(&path).unwrap(), commits);

        assert_eq!(export_file_name("main", "main"), "main_history.json");
        std::fs::write(&path, "  ").unwrap();
        assert!(matches!(read_batch(&path).unwrap_err(), Error::EmptyHistory(_)));
    }
}
