//! Branch management over one dataset.
//!
//! A [`Repository`] owns the commit store together with the in-memory state
//! that used to live in process-wide globals: the active branch and one
//! baseline per branch. The live objects stay with the caller's [`Host`] and
//! are passed into every operation that reads or rebuilds the workspace.

use crate::config::{Config, ReconstructStrategy};
use crate::diff::PayloadDiff;
use crate::error::{Error, Result};
use crate::history::{ancestry, find_commit, latest_on_branch, CommitStore};
use crate::host::Host;
use crate::models::{Branch, Commit, CommitInfo, ObjectChange};
use crate::snapshot::{self, Baseline, ChangeSet, StateComparison};
use crate::storage;
use chrono::{DateTime, Duration, Utc};
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use tracing::{debug, info};

/// Author recorded on commits the engine creates on its own.
pub const SYSTEM_AUTHOR: &str = "System";

/// Live objects at some commit, keyed by id. Each entry is the last present
/// change for that object, so transforms survive replay.
pub type ObjectState = BTreeMap<String, ObjectChange>;

/// Replay the parent chain ending at `commit_id`.
pub fn materialize(history: &[Commit], commit_id: &str) -> Result<ObjectState> {
    let mut state = ObjectState::new();
    for commit in ancestry(history, commit_id)? {
        apply_to_state(&mut state, &commit.changes);
    }
    Ok(state)
}

pub fn apply_to_state(state: &mut ObjectState, changes: &[ObjectChange]) {
    for change in changes {
        if change.change_type.is_present() {
            state.insert(change.id.clone(), change.clone());
        } else {
            state.remove(&change.id);
        }
    }
}

pub fn payloads(state: &ObjectState) -> Baseline {
    state
        .iter()
        .map(|(id, change)| (id.clone(), change.serialized_payload.clone()))
        .collect()
}

/// Commits created while switching branches.
#[derive(Debug, Clone, Default)]
pub struct SwitchOutcome {
    pub auto_save: Option<Commit>,
    pub first_commit: Option<Commit>,
    pub reconstructed: Option<Commit>,
}

impl SwitchOutcome {
    pub fn is_noop(&self) -> bool {
        self.auto_save.is_none() && self.first_commit.is_none() && self.reconstructed.is_none()
    }
}

pub struct Repository {
    store: CommitStore,
    config: Config,
    active_branch: Option<String>,
    baselines: HashMap<String, Baseline>,
    last_timestamp: Option<DateTime<Utc>>,
}

impl Repository {
    pub fn new(store: CommitStore, config: Config) -> Self {
        Self {
            store,
            config,
            active_branch: None,
            baselines: HashMap::new(),
            last_timestamp: None,
        }
    }

    /// Open the dataset's documents under `dir` with the configured backend.
    pub fn open(dir: &Path, dataset: &str, config: Config) -> Result<Self> {
        let backend = storage::open(config.storage.backend, dir)?;
        let store =
            CommitStore::new(backend, dataset).with_corrupt_policy(config.storage.on_corrupt);
        debug!("Opened dataset '{}' in {:?}", dataset, dir);
        Ok(Self::new(store, config))
    }

    pub fn store(&self) -> &CommitStore {
        &self.store
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn dataset(&self) -> &str {
        self.store.dataset()
    }

    pub fn active_branch(&self) -> Option<&str> {
        self.active_branch.as_deref()
    }

    pub fn baseline(&self, branch: &str) -> Option<&Baseline> {
        self.baselines.get(branch)
    }

    pub(crate) fn set_baseline(&mut self, branch: &str, baseline: Baseline) {
        self.baselines.insert(branch.to_string(), baseline);
    }

    pub(crate) fn set_active_branch(&mut self, branch: &str) {
        self.active_branch = Some(branch.to_string());
    }

    pub(crate) fn require_active(&self) -> Result<String> {
        self.active_branch.clone().ok_or(Error::NoActiveBranch)
    }

    /// Make `branch` active without touching the workspace, rebuilding its
    /// baseline from history.
    pub fn attach(&mut self, branch: &str) -> Result<()> {
        self.active_branch = Some(branch.to_string());
        self.rebuild_baseline(branch)
    }

    pub fn branches(&self) -> Result<Vec<Branch>> {
        self.store.branches()
    }

    /// Known if catalogued or if any commit is tagged with it.
    pub fn branch_exists(&self, name: &str) -> Result<bool> {
        if self.store.branch(name)?.is_some() {
            return Ok(true);
        }
        Ok(self.store.latest_commit(name)?.is_some())
    }

    /// Strictly later than every timestamp this handle issued and than `after`.
    pub(crate) fn next_timestamp(&mut self, after: Option<DateTime<Utc>>) -> DateTime<Utc> {
        let mut timestamp = Utc::now();
        for floor in [self.last_timestamp, after].into_iter().flatten() {
            if timestamp <= floor {
                timestamp = floor + Duration::microseconds(1);
            }
        }
        self.last_timestamp = Some(timestamp);
        timestamp
    }

    /// Create and append a commit whose parent is `parent`.
    pub(crate) fn record(
        &mut self,
        branch: &str,
        message: &str,
        author: &str,
        changes: Vec<ObjectChange>,
        parent: Option<&Commit>,
    ) -> Result<Commit> {
        let timestamp = self.next_timestamp(parent.map(|p| p.timestamp));
        let commit = Commit::new(branch, message, author, changes)
            .with_parent(parent.map(|p| p.commit_id.clone()))
            .with_timestamp(timestamp);
        self.store.append_commit(&commit)?;
        Ok(commit)
    }

    /// Pending changes of the active branch. The baseline is left untouched.
    pub fn status(&self, host: &dyn Host) -> Result<ChangeSet> {
        let branch = self.require_active()?;
        let empty = Baseline::new();
        let baseline = self.baselines.get(&branch).unwrap_or(&empty);
        snapshot::diff_workspace(host, baseline)
    }

    /// Commit pending changes on the active branch. Returns `None` when the
    /// workspace matches the baseline.
    pub fn commit(&mut self, host: &dyn Host, message: &str, author: &str) -> Result<Option<Commit>> {
        let branch = self.require_active()?;
        let set = self.status(host)?;
        if set.is_empty() {
            debug!("No changes detected on branch '{}'", branch);
            return Ok(None);
        }

        let parent = self.store.latest_commit(&branch)?;
        let commit = self.record(&branch, message, author, set.changes.clone(), parent.as_ref())?;
        snapshot::advance(self.baselines.entry(branch.clone()).or_default(), &set);

        info!(
            "Committed {} change(s) to '{}' as {}",
            set.len(),
            branch,
            commit.commit_id
        );
        Ok(Some(commit))
    }

    pub fn create_branch(&self, name: &str) -> Result<()> {
        if name.trim().is_empty() {
            return Err(Error::InvalidOperation(
                "branch name cannot be empty".to_string(),
            ));
        }
        self.store.create_branch(name)
    }

    /// Commit the full present state of the active branch if it has pending
    /// changes. Deleted objects are recorded as tombstones.
    pub(crate) fn auto_save(&mut self, host: &dyn Host, target: &str) -> Result<Option<Commit>> {
        let Some(branch) = self.active_branch.clone() else {
            return Ok(None);
        };
        let baseline = self.baselines.get(&branch).cloned().unwrap_or_default();
        let pending = snapshot::diff_workspace(host, &baseline)?;
        if pending.is_empty() {
            return Ok(None);
        }

        let (mut state, skipped) = snapshot::capture(host)?;
        for id in skipped {
            if let Some(payload) = baseline.get(&id) {
                state.insert(id, payload.clone());
            }
        }

        let mut changes: Vec<ObjectChange> = state
            .iter()
            .map(|(id, payload)| {
                let mut change = ObjectChange::added(id.as_str(), payload.as_str());
                change.transform = host.transform(id);
                change
            })
            .collect();
        changes.extend(pending.deleted().cloned());

        let parent = self.store.latest_commit(&branch)?;
        let message = format!("Auto-save before switching to branch '{}'", target);
        let commit = self.record(&branch, &message, SYSTEM_AUTHOR, changes, parent.as_ref())?;
        info!(
            "Auto-saved {} pending change(s) on '{}' as {}",
            pending.len(),
            branch,
            commit.commit_id
        );

        self.baselines.insert(branch, state);
        Ok(Some(commit))
    }

    /// Switch to a branch that already has commits and rebuild the workspace
    /// at its latest one. Pending work on the current branch is auto-saved
    /// first.
    pub fn switch_branch(&mut self, host: &mut dyn Host, name: &str) -> Result<SwitchOutcome> {
        if self.active_branch.as_deref() == Some(name) {
            debug!("Already on branch '{}'", name);
            return Ok(SwitchOutcome::default());
        }
        if !self.branch_exists(name)? {
            return Err(Error::BranchNotFound(name.to_string()));
        }

        let auto_save = self.auto_save(&*host, name)?;
        self.active_branch = Some(name.to_string());

        let latest = self
            .store
            .latest_commit(name)?
            .ok_or_else(|| Error::NoCommits(name.to_string()))?;
        let reconstructed = self.reconstruct_workspace(host, &latest.commit_id)?;

        info!("Switched to branch '{}'", name);
        Ok(SwitchOutcome {
            auto_save,
            first_commit: None,
            reconstructed: Some(reconstructed),
        })
    }

    /// Like [`Repository::switch_branch`], but a branch without commits first
    /// receives its initial commit.
    pub fn checkout(&mut self, host: &mut dyn Host, name: &str) -> Result<SwitchOutcome> {
        if self.active_branch.as_deref() == Some(name) {
            return Ok(SwitchOutcome::default());
        }
        if !self.branch_exists(name)? {
            return Err(Error::BranchNotFound(name.to_string()));
        }
        if self.store.latest_commit(name)?.is_some() {
            return self.switch_branch(host, name);
        }

        let auto_save = self.auto_save(&*host, name)?;
        let first_commit = self.create_first_commit_for_branch(&*host, name)?;
        let mut outcome = self.switch_branch(host, name)?;
        outcome.auto_save = auto_save.or(outcome.auto_save);
        outcome.first_commit = first_commit;
        Ok(outcome)
    }

    /// Give an empty branch its initial commit. The change list is copied from
    /// the active branch's latest commit; without one, every live object is
    /// recorded as added.
    pub fn create_first_commit_for_branch(
        &mut self,
        host: &dyn Host,
        name: &str,
    ) -> Result<Option<Commit>> {
        if !self.branch_exists(name)? {
            return Err(Error::BranchNotFound(name.to_string()));
        }
        if self.store.latest_commit(name)?.is_some() {
            return Ok(None);
        }

        let parent = match self.active_branch.as_deref() {
            Some(active) if active != name => self.store.latest_commit(active)?,
            _ => None,
        };

        let changes = match &parent {
            Some(parent) => parent.changes.clone(),
            None => {
                let (state, _) = snapshot::capture(host)?;
                state
                    .into_iter()
                    .map(|(id, payload)| {
                        let mut change = ObjectChange::added(id.as_str(), payload);
                        change.transform = host.transform(&id);
                        change
                    })
                    .collect()
            }
        };

        let message = format!("Initial commit for branch '{}'", name);
        let commit = self.record(name, &message, SYSTEM_AUTHOR, changes, parent.as_ref())?;
        info!(
            "Created initial commit {} for branch '{}' ({} object(s))",
            commit.commit_id,
            name,
            commit.changes.len()
        );
        Ok(Some(commit))
    }

    /// Clear the workspace and rebuild it at `commit_id` using the configured
    /// strategy. The active branch's baseline becomes exactly what was applied.
    pub fn reconstruct_workspace(&mut self, host: &mut dyn Host, commit_id: &str) -> Result<Commit> {
        let history = self.store.history()?;
        let commit = find_commit(&history, commit_id)
            .cloned()
            .ok_or_else(|| Error::CommitNotFound(commit_id.to_string()))?;

        let state = match self.config.repo.reconstruct {
            ReconstructStrategy::CommitDelta => {
                let mut state = ObjectState::new();
                for change in commit.changes.iter().filter(|c| c.change_type.is_present()) {
                    state.insert(change.id.clone(), change.clone());
                }
                state
            }
            ReconstructStrategy::HistoryReplay => materialize(&history, commit_id)?,
        };

        apply_state(host, &state)?;

        let branch = self
            .active_branch
            .clone()
            .unwrap_or_else(|| commit.branch_name.clone());
        self.baselines.insert(branch, payloads(&state));

        info!(
            "Reconstructed workspace at commit {} ({} object(s))",
            commit.commit_id,
            state.len()
        );
        Ok(commit)
    }

    /// Baseline of `branch` from a replay of its latest commit; empty when the
    /// branch has none.
    pub fn rebuild_baseline(&mut self, branch: &str) -> Result<()> {
        let baseline = self.tip_state(branch)?;
        debug!(
            "Rebuilt baseline of '{}' with {} object(s)",
            branch,
            baseline.len()
        );
        self.baselines.insert(branch.to_string(), baseline);
        Ok(())
    }

    /// Take the current workspace as the active branch's baseline.
    pub fn initialize_baseline(&mut self, host: &dyn Host) -> Result<usize> {
        let branch = self.require_active()?;
        let (state, _) = snapshot::capture(host)?;
        let count = state.len();
        self.baselines.insert(branch, state);
        Ok(count)
    }

    fn tip_state(&self, branch: &str) -> Result<Baseline> {
        let history = self.store.history()?;
        match latest_on_branch(&history, branch) {
            Some(tip) => Ok(payloads(&materialize(&history, &tip.commit_id)?)),
            None => Ok(Baseline::new()),
        }
    }

    /// Commits tagged with `name`, in log order.
    pub fn export_branch(&self, name: &str) -> Result<Vec<Commit>> {
        if !self.branch_exists(name)? {
            return Err(Error::BranchNotFound(name.to_string()));
        }
        Ok(self
            .store
            .history()?
            .into_iter()
            .filter(|c| c.branch_name == name)
            .collect())
    }

    /// Classify the objects at `other`'s tip against `base`'s tip.
    pub fn compare_branches(&self, base: &str, other: &str) -> Result<StateComparison> {
        for name in [base, other] {
            if !self.branch_exists(name)? {
                return Err(Error::BranchNotFound(name.to_string()));
            }
        }
        Ok(snapshot::compare_states(
            &self.tip_state(base)?,
            &self.tip_state(other)?,
        ))
    }

    /// Line diffs of every change in a commit against the state at its parent.
    pub fn commit_diffs(&self, commit_id: &str) -> Result<Vec<PayloadDiff>> {
        let history = self.store.history()?;
        let commit = find_commit(&history, commit_id)
            .ok_or_else(|| Error::CommitNotFound(commit_id.to_string()))?;

        let previous = match commit.parent() {
            Some(parent) if find_commit(&history, parent).is_some() => {
                payloads(&materialize(&history, parent)?)
            }
            _ => Baseline::new(),
        };

        Ok(commit
            .changes
            .iter()
            .map(|change| PayloadDiff::from_change(change, previous.get(&change.id).map(String::as_str)))
            .collect())
    }

    /// Newest first, optionally restricted to one branch.
    pub fn log(&self, branch: Option<&str>, limit: Option<usize>) -> Result<Vec<CommitInfo>> {
        let mut history = self.store.history()?;
        history.retain(|c| branch.map_or(true, |b| c.branch_name == b));
        history.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));

        Ok(history
            .iter()
            .take(limit.unwrap_or(usize::MAX))
            .map(CommitInfo::from_commit)
            .collect())
    }
}

/// Clear the workspace and apply every object of `state`.
pub(crate) fn apply_state(host: &mut dyn Host, state: &ObjectState) -> Result<()> {
    host.clear_workspace()?;
    for change in state.values() {
        host.apply_change(change)?;
    }
    Ok(())
}
