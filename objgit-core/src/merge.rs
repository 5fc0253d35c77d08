//! Merging one branch's work into another.
//!
//! The branch point is the parent of the source branch's earliest commit.
//! Changes made on either side after it are combined with source-wins
//! tie-breaking, deletions on the source side dominate, and the result is
//! de-duplicated by content hash before it is committed to the target.

use crate::config::ConflictPolicy;
use crate::error::{Error, Result};
use crate::history::{commits_on_branch, find_commit, latest_on_branch};
use crate::host::Host;
use crate::models::{ChangeType, Commit, ObjectChange};
use crate::repository::{apply_to_state, materialize, payloads, ObjectState, Repository};
use std::collections::{BTreeSet, HashMap, HashSet};
use tracing::{debug, info, warn};

/// An object edited differently on both sides since the branch point.
#[derive(Debug, Clone, PartialEq)]
pub struct Conflict {
    pub id: String,
    pub description: String,
    pub source: ObjectChange,
    pub target: ObjectChange,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ConflictStatus {
    Clean,
    Conflicted(Vec<Conflict>),
}

impl ConflictStatus {
    pub fn is_clean(&self) -> bool {
        matches!(self, ConflictStatus::Clean)
    }
}

/// Decides whether a merge may proceed. Both slices hold at most one change
/// per object id.
pub trait ConflictDetector {
    fn detect(&self, source: &[ObjectChange], target: &[ObjectChange]) -> ConflictStatus;
}

/// Never reports conflicts.
#[derive(Debug, Clone, Copy, Default)]
pub struct LastWriterWins;

impl ConflictDetector for LastWriterWins {
    fn detect(&self, _source: &[ObjectChange], _target: &[ObjectChange]) -> ConflictStatus {
        ConflictStatus::Clean
    }
}

/// Reports every object both sides touched with different outcomes. Identical
/// edits on both sides resolve on their own.
#[derive(Debug, Clone, Copy, Default)]
pub struct OverlappingEdits;

impl ConflictDetector for OverlappingEdits {
    fn detect(&self, source: &[ObjectChange], target: &[ObjectChange]) -> ConflictStatus {
        let target_by_id: HashMap<&str, &ObjectChange> =
            target.iter().map(|c| (c.id.as_str(), c)).collect();

        let mut conflicts = Vec::new();
        for change in source {
            let Some(theirs) = target_by_id.get(change.id.as_str()) else {
                continue;
            };

            let description = match (change.change_type.is_present(), theirs.change_type.is_present()) {
                (false, false) => continue,
                (false, true) => "deleted on source, edited on target",
                (true, false) => "edited on source, deleted on target",
                (true, true) if change.serialized_payload == theirs.serialized_payload => continue,
                (true, true) => "edited differently on both branches",
            };

            conflicts.push(Conflict {
                id: change.id.clone(),
                description: description.to_string(),
                source: change.clone(),
                target: (*theirs).clone(),
            });
        }

        if conflicts.is_empty() {
            ConflictStatus::Clean
        } else {
            ConflictStatus::Conflicted(conflicts)
        }
    }
}

pub fn detector_for(policy: ConflictPolicy) -> Box<dyn ConflictDetector> {
    match policy {
        ConflictPolicy::LastWriterWins => Box::new(LastWriterWins),
        ConflictPolicy::OverlappingEdits => Box::new(OverlappingEdits),
    }
}

#[derive(Debug, Clone)]
pub struct MergeOutcome {
    pub commit: Commit,
    pub branch_point: String,
    /// Source changes after the branch point that were real edits.
    pub source_changes: usize,
    /// Source changes that only restated the branch-point state.
    pub skipped_changes: usize,
    pub target_changes: usize,
    pub duplicates_removed: usize,
}

/// Latest change per object id; the first occurrence fixes the position.
pub fn collapse_by_id<'a, I>(changes: I) -> Vec<ObjectChange>
where
    I: IntoIterator<Item = &'a ObjectChange>,
{
    let mut collapsed: Vec<ObjectChange> = Vec::new();
    let mut index: HashMap<String, usize> = HashMap::new();

    for change in changes {
        match index.get(&change.id) {
            Some(&i) => collapsed[i] = change.clone(),
            None => {
                index.insert(change.id.clone(), collapsed.len());
                collapsed.push(change.clone());
            }
        }
    }

    collapsed
}

/// Source changes replace same-id target changes; a source deletion drops
/// the target change, and any id the source deleted is dropped at the end.
pub fn combine_changes(
    target: &[ObjectChange],
    source: &[ObjectChange],
    source_deleted: &BTreeSet<String>,
) -> Vec<ObjectChange> {
    let mut combined: Vec<ObjectChange> = target.to_vec();

    for change in source {
        match combined.iter().position(|c| c.id == change.id) {
            Some(i) if change.change_type == ChangeType::Deleted => {
                combined.remove(i);
            }
            Some(i) => combined[i] = change.clone(),
            None => combined.push(change.clone()),
        }
    }

    combined.retain(|c| !source_deleted.contains(&c.id));
    combined
}

/// Keep the first object of each payload hash. Deletions pass through.
pub fn remove_duplicate_objects(changes: Vec<ObjectChange>) -> (Vec<ObjectChange>, usize) {
    let mut seen: HashSet<String> = HashSet::new();
    let mut kept = Vec::with_capacity(changes.len());
    let mut removed = 0;

    for change in changes {
        if change.change_type.is_present() && !seen.insert(change.content_hash()) {
            debug!("Dropping duplicate object {}", change.id);
            removed += 1;
            continue;
        }
        kept.push(change);
    }

    (kept, removed)
}

/// True when `change` leaves the branch-point state as it was: a present
/// object with the same payload, or a tombstone for an object already absent.
fn restates(change: &ObjectChange, base: &ObjectState) -> bool {
    match base.get(&change.id) {
        Some(b) => {
            change.change_type.is_present() && b.serialized_payload == change.serialized_payload
        }
        None => change.change_type == ChangeType::Deleted,
    }
}

impl Repository {
    /// Merge `source` into `target` using the configured conflict policy.
    pub fn merge(
        &mut self,
        host: &mut dyn Host,
        source: &str,
        target: &str,
        author: &str,
    ) -> Result<MergeOutcome> {
        let detector = detector_for(self.config().merge.conflicts);
        self.merge_with(host, source, target, author, detector.as_ref())
    }

    pub fn merge_with(
        &mut self,
        host: &mut dyn Host,
        source: &str,
        target: &str,
        author: &str,
        detector: &dyn ConflictDetector,
    ) -> Result<MergeOutcome> {
        for name in [source, target] {
            if !self.branch_exists(name)? {
                return Err(Error::BranchNotFound(name.to_string()));
            }
        }
        if source == target {
            return Err(Error::InvalidOperation(format!(
                "cannot merge branch '{}' into itself",
                source
            )));
        }

        // The workspace is about to show the target; keep pending work.
        if self.active_branch() != Some(target) {
            if let Some(saved) = self.auto_save(host, target)? {
                debug!("Saved pending work as {} before merging", saved.commit_id);
            }
        }

        let history = self.store().history()?;

        let source_commits = commits_on_branch(&history, source);
        let earliest = source_commits
            .first()
            .ok_or_else(|| Error::NoCommits(source.to_string()))?;
        let branch_point = earliest
            .parent()
            .and_then(|parent| find_commit(&history, parent))
            .ok_or_else(|| Error::BranchPointNotFound(source.to_string()))?;
        debug!(
            "Branch point of '{}' is {} ({})",
            source, branch_point.commit_id, branch_point.timestamp
        );

        let after = |c: &&Commit| c.timestamp > branch_point.timestamp;
        let source_raw: Vec<&ObjectChange> = source_commits
            .iter()
            .copied()
            .filter(after)
            .flat_map(|c| c.changes.iter())
            .collect();
        let target_changes = collapse_by_id(
            commits_on_branch(&history, target)
                .into_iter()
                .filter(after)
                .flat_map(|c| c.changes.iter()),
        );

        let base = materialize(&history, &branch_point.commit_id)?;
        let source_collapsed = collapse_by_id(source_raw.iter().copied());
        let skipped_changes = source_collapsed.iter().filter(|c| restates(c, &base)).count();
        let source_changes: Vec<ObjectChange> = source_collapsed
            .into_iter()
            .filter(|c| !restates(c, &base))
            .collect();
        let source_deleted: BTreeSet<String> = source_changes
            .iter()
            .filter(|c| c.change_type == ChangeType::Deleted)
            .map(|c| c.id.clone())
            .collect();

        if let ConflictStatus::Conflicted(conflicts) = detector.detect(&source_changes, &target_changes) {
            for conflict in &conflicts {
                warn!("Conflict on {}: {}", conflict.id, conflict.description);
            }
            return Err(Error::MergeConflict {
                source_branch: source.to_string(),
                target_branch: target.to_string(),
                count: conflicts.len(),
            });
        }

        let combined = combine_changes(&target_changes, &source_changes, &source_deleted);

        let mut order: Vec<String> = base.keys().cloned().collect();
        let mut state = base.clone();
        for change in &combined {
            if change.change_type.is_present() && !state.contains_key(&change.id) {
                order.push(change.id.clone());
            }
            apply_to_state(&mut state, std::slice::from_ref(change));
        }
        for id in &source_deleted {
            state.remove(id);
        }
        let merged: Vec<ObjectChange> = order.iter().filter_map(|id| state.get(id).cloned()).collect();
        let (merged, duplicates_removed) = remove_duplicate_objects(merged);
        if duplicates_removed > 0 {
            info!("Removed {} duplicate object(s) from merge", duplicates_removed);
        }

        // Record against the target tip so replay reaches the same state.
        let target_tip = latest_on_branch(&history, target).cloned();
        let tip_state = match &target_tip {
            Some(tip) => materialize(&history, &tip.commit_id)?,
            None => ObjectState::new(),
        };
        let merged_ids: HashSet<&str> = merged.iter().map(|c| c.id.as_str()).collect();
        let mut commit_changes: Vec<ObjectChange> = merged
            .iter()
            .map(|change| {
                let kind = if tip_state.contains_key(&change.id) {
                    ChangeType::Modified
                } else {
                    ChangeType::Added
                };
                ObjectChange {
                    change_type: kind,
                    ..change.clone()
                }
            })
            .collect();
        commit_changes.extend(
            tip_state
                .values()
                .filter(|c| !merged_ids.contains(c.id.as_str()))
                .map(|c| ObjectChange::deleted(c.id.as_str(), c.serialized_payload.as_str())),
        );

        host.clear_workspace()?;
        for change in &merged {
            host.apply_change(change)?;
        }

        let mut merged_state = ObjectState::new();
        apply_to_state(&mut merged_state, &merged);
        self.set_baseline(target, payloads(&merged_state));
        if self.active_branch() != Some(target) {
            debug!("Workspace now shows branch '{}'", target);
            self.set_active_branch(target);
        }

        let message = format!("Merge branch '{}' into '{}'", source, target);
        let commit = self.record(target, &message, author, commit_changes, target_tip.as_ref())?;

        info!(
            "Merged '{}' into '{}' as {} ({} object(s))",
            source,
            target,
            commit.commit_id,
            merged.len()
        );

        Ok(MergeOutcome {
            commit,
            branch_point: branch_point.commit_id.clone(),
            source_changes: source_changes.len(),
            skipped_changes,
            target_changes: target_changes.len(),
            duplicates_removed,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::history::CommitStore;
    use crate::host::MemoryHost;
    use crate::storage::SqliteStore;

    fn repo_with(config: Config) -> Repository {
        let store = CommitStore::new(Box::new(SqliteStore::in_memory().unwrap()), "model");
        let mut repo = Repository::new(store, config);
        repo.attach("main").unwrap();
        repo
    }

    fn repo() -> Repository {
        repo_with(Config::default())
    }

    fn ids(changes: &[ObjectChange]) -> Vec<&str> {
        changes.iter().map(|c| c.id.as_str()).collect()
    }

    /// main: C1 adds X. feature forks after C1 and adds Y. main: C2 modifies X.
    fn scenario_a(repo: &mut Repository, host: &mut MemoryHost) {
        host.insert("X", "x-v1");
        repo.commit(host, "C1", "alice").unwrap();

        repo.create_branch("feature").unwrap();
        repo.checkout(host, "feature").unwrap();
        host.insert("Y", "y-v1");
        repo.commit(host, "add Y", "bob").unwrap();

        repo.switch_branch(host, "main").unwrap();
        host.insert("X", "x-v2");
        repo.commit(host, "C2", "alice").unwrap();
    }

    #[test]
    fn test_merge_scenario_a() {
        let mut repo = repo();
        let mut host = MemoryHost::new();
        scenario_a(&mut repo, &mut host);

        let outcome = repo.merge(&mut host, "feature", "main", "carol").unwrap();

        assert_eq!(host.get("X"), Some("x-v2"));
        assert_eq!(host.get("Y"), Some("y-v1"));
        assert_eq!(host.len(), 2);
        assert_eq!(outcome.commit.message, "Merge branch 'feature' into 'main'");
        assert_eq!(outcome.commit.branch_name, "main");
        assert_eq!(outcome.commit.author, "carol");
        assert_eq!(outcome.source_changes, 1);
        assert_eq!(outcome.skipped_changes, 1);
        assert_eq!(outcome.target_changes, 1);

        let c1 = repo.log(Some("main"), None).unwrap().last().unwrap().commit.clone();
        assert_eq!(outcome.branch_point, c1.commit_id);
        assert_eq!(repo.active_branch(), Some("main"));
        assert!(repo.status(&host).unwrap().is_empty());
    }

    #[test]
    fn test_merge_commit_parent_is_target_tip() {
        let mut repo = repo();
        let mut host = MemoryHost::new();
        scenario_a(&mut repo, &mut host);
        let tip = repo.store().latest_commit("main").unwrap().unwrap();

        let outcome = repo.merge(&mut host, "feature", "main", "carol").unwrap();
        assert_eq!(outcome.commit.parent(), Some(tip.commit_id.as_str()));
        assert!(outcome.commit.timestamp > tip.timestamp);
    }

    #[test]
    fn test_merge_scenario_b_deletion_dominates() {
        let mut repo = repo();
        let mut host = MemoryHost::new();
        host.insert("X", "x");
        host.insert("Z", "z-v1");
        repo.commit(&host, "C1", "alice").unwrap();

        repo.create_branch("feature").unwrap();
        repo.checkout(&mut host, "feature").unwrap();
        host.remove("Z");
        repo.commit(&host, "drop Z", "bob").unwrap();

        repo.switch_branch(&mut host, "main").unwrap();
        host.insert("Z", "z-v2");
        repo.commit(&host, "edit Z", "alice").unwrap();

        let outcome = repo.merge(&mut host, "feature", "main", "carol").unwrap();

        assert!(host.get("Z").is_none());
        assert_eq!(host.get("X"), Some("x"));
        let tombstone = outcome
            .commit
            .changes
            .iter()
            .find(|c| c.id == "Z")
            .unwrap();
        assert_eq!(tombstone.change_type, ChangeType::Deleted);
    }

    #[test]
    fn test_inherited_tombstone_does_not_delete_readded_object() {
        let mut config = Config::default();
        config.repo.reconstruct = crate::config::ReconstructStrategy::HistoryReplay;
        let mut repo = repo_with(config);
        let mut host = MemoryHost::new();
        host.insert("X", "x");
        host.insert("Z", "z-old");
        repo.commit(&host, "C1", "alice").unwrap();
        host.remove("Z");
        repo.commit(&host, "C2: drop Z", "alice").unwrap();

        repo.create_branch("feature").unwrap();
        repo.checkout(&mut host, "feature").unwrap();
        let first = repo.store().latest_commit("feature").unwrap().unwrap();
        assert_eq!(first.changes[0].change_type, ChangeType::Deleted);
        host.insert("W", "w");
        repo.commit(&host, "add W", "bob").unwrap();

        repo.switch_branch(&mut host, "main").unwrap();
        host.insert("Z", "z-new");
        repo.commit(&host, "C3: bring Z back", "alice").unwrap();

        let outcome = repo.merge(&mut host, "feature", "main", "carol").unwrap();

        assert_eq!(host.get("Z"), Some("z-new"));
        assert_eq!(host.object_ids().unwrap(), vec!["W", "X", "Z"]);
        assert_eq!(outcome.source_changes, 1);
        assert!(outcome
            .commit
            .changes
            .iter()
            .all(|c| c.change_type != ChangeType::Deleted));
    }

    #[test]
    fn test_merge_into_other_branch_saves_pending_work() {
        let mut repo = repo();
        let mut host = MemoryHost::new();
        scenario_a(&mut repo, &mut host);
        repo.switch_branch(&mut host, "feature").unwrap();
        host.insert("DIRTY", "unsaved");

        repo.merge(&mut host, "feature", "main", "carol").unwrap();

        let saved = repo
            .log(Some("feature"), None)
            .unwrap()
            .into_iter()
            .map(|info| info.commit)
            .find(|c| c.author == crate::repository::SYSTEM_AUTHOR)
            .unwrap();
        assert_eq!(saved.message, "Auto-save before switching to branch 'main'");
        assert!(saved.changes.iter().any(|c| c.id == "DIRTY" && c.serialized_payload == "unsaved"));
        assert_eq!(host.get("DIRTY"), Some("unsaved"));
        assert_eq!(repo.active_branch(), Some("main"));
    }

    #[test]
    fn test_merge_replays_to_same_state() {
        let mut config = Config::default();
        config.repo.reconstruct = crate::config::ReconstructStrategy::HistoryReplay;
        let mut repo = repo_with(config);
        let mut host = MemoryHost::new();
        host.insert("X", "x");
        host.insert("Z", "z");
        repo.commit(&host, "C1", "alice").unwrap();
        repo.create_branch("feature").unwrap();
        repo.checkout(&mut host, "feature").unwrap();
        host.remove("Z");
        host.insert("W", "w");
        repo.commit(&host, "feature work", "bob").unwrap();
        repo.switch_branch(&mut host, "main").unwrap();

        let outcome = repo.merge(&mut host, "feature", "main", "carol").unwrap();
        let merged = host.objects().clone();

        host.clear_workspace().unwrap();
        repo.reconstruct_workspace(&mut host, &outcome.commit.commit_id)
            .unwrap();
        assert_eq!(host.objects(), &merged);
        assert_eq!(host.object_ids().unwrap(), vec!["W", "X"]);
    }

    #[test]
    fn test_merge_is_deterministic() {
        let run = || {
            let mut repo = repo();
            let mut host = MemoryHost::new();
            scenario_a(&mut repo, &mut host);
            let outcome = repo.merge(&mut host, "feature", "main", "carol").unwrap();
            (outcome.commit.changes, host.objects().clone())
        };

        assert_eq!(run(), run());
    }

    #[test]
    fn test_merge_removes_duplicate_content() {
        let mut repo = repo();
        let mut host = MemoryHost::new();
        host.insert("A", "shared geometry");
        repo.commit(&host, "C1", "alice").unwrap();

        repo.create_branch("feature").unwrap();
        repo.checkout(&mut host, "feature").unwrap();
        host.insert("B", "shared geometry");
        host.insert("C", "unique");
        repo.commit(&host, "copy A", "bob").unwrap();

        let outcome = repo.merge(&mut host, "feature", "main", "carol").unwrap();
        assert_eq!(outcome.duplicates_removed, 1);
        assert_eq!(host.object_ids().unwrap(), vec!["A", "C"]);
    }

    #[test]
    fn test_merge_unknown_branch() {
        let mut repo = repo();
        let mut host = MemoryHost::new();
        host.insert("A", "a");
        repo.commit(&host, "C1", "alice").unwrap();

        let err = repo.merge(&mut host, "ghost", "main", "carol").unwrap_err();
        assert!(matches!(err, Error::BranchNotFound(name) if name == "ghost"));
        let err = repo.merge(&mut host, "main", "main", "carol").unwrap_err();
        assert!(matches!(err, Error::InvalidOperation(_)));
    }

    #[test]
    fn test_merge_without_branch_point_fails() {
        let store = CommitStore::new(Box::new(SqliteStore::in_memory().unwrap()), "model");
        let mut repo = Repository::new(store, Config::default());
        let mut host = MemoryHost::new();
        host.insert("A", "a");
        repo.create_branch("orphan").unwrap();
        repo.checkout(&mut host, "orphan").unwrap();
        repo.create_branch("main").unwrap();

        let err = repo.merge(&mut host, "orphan", "main", "carol").unwrap_err();
        assert!(matches!(err, Error::BranchPointNotFound(name) if name == "orphan"));
        assert_eq!(host.get("A"), Some("a"));
    }

    #[test]
    fn test_overlapping_edits_abort_merge() {
        let mut config = Config::default();
        config.merge.conflicts = ConflictPolicy::OverlappingEdits;
        let mut repo = repo_with(config);
        let mut host = MemoryHost::new();
        host.insert("X", "x-v1");
        repo.commit(&host, "C1", "alice").unwrap();

        repo.create_branch("feature").unwrap();
        repo.checkout(&mut host, "feature").unwrap();
        host.insert("X", "x-feature");
        repo.commit(&host, "feature edit", "bob").unwrap();

        repo.switch_branch(&mut host, "main").unwrap();
        host.insert("X", "x-main");
        repo.commit(&host, "main edit", "alice").unwrap();
        let before = repo.store().history().unwrap().len();

        let err = repo.merge(&mut host, "feature", "main", "carol").unwrap_err();
        assert!(matches!(err, Error::MergeConflict { count: 1, .. }));
        assert_eq!(repo.store().history().unwrap().len(), before);
        assert_eq!(host.get("X"), Some("x-main"));
    }

    #[test]
    fn test_overlapping_edits_detector() {
        let source = vec![
            ObjectChange::modified("same", "v"),
            ObjectChange::modified("differs", "a"),
            ObjectChange::deleted("gone", "old"),
            ObjectChange::added("only-source", "s"),
        ];
        let target = vec![
            ObjectChange::modified("same", "v"),
            ObjectChange::modified("differs", "b"),
            ObjectChange::modified("gone", "new"),
        ];

        let ConflictStatus::Conflicted(conflicts) = OverlappingEdits.detect(&source, &target) else {
            panic!("expected conflicts");
        };
        let conflicted: Vec<_> = conflicts.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(conflicted, vec!["differs", "gone"]);
        assert!(LastWriterWins.detect(&source, &target).is_clean());
    }

    #[test]
    fn test_combine_changes_rules() {
        let target = vec![
            ObjectChange::modified("a", "target"),
            ObjectChange::modified("b", "target"),
            ObjectChange::added("c", "target"),
        ];
        let source = vec![
            ObjectChange::modified("a", "source"),
            ObjectChange::deleted("b", "tombstone"),
            ObjectChange::added("d", "source"),
        ];
        let deleted: BTreeSet<String> = ["b".to_string()].into_iter().collect();

        let combined = combine_changes(&target, &source, &deleted);
        assert_eq!(ids(&combined), vec!["a", "c", "d"]);
        assert_eq!(combined[0].serialized_payload, "source");
    }

    #[test]
    fn test_collapse_keeps_latest_per_id() {
        let changes = vec![
            ObjectChange::added("a", "1"),
            ObjectChange::added("b", "1"),
            ObjectChange::modified("a", "2"),
        ];
        let collapsed = collapse_by_id(&changes);
        assert_eq!(ids(&collapsed), vec!["a", "b"]);
        assert_eq!(collapsed[0].serialized_payload, "2");
    }

    #[test]
    fn test_remove_duplicate_objects_keeps_first() {
        let (kept, removed) = remove_duplicate_objects(vec![
            ObjectChange::added("first", "same"),
            ObjectChange::added("second", "same"),
            ObjectChange::deleted("tomb", "same"),
            ObjectChange::added("other", "different"),
        ]);
        assert_eq!(removed, 1);
        assert_eq!(ids(&kept), vec!["first", "tomb", "other"]);
    }
}
