//! Change detection between a live workspace and a branch baseline.

use crate::error::Result;
use crate::host::Host;
use crate::models::{ChangeType, ObjectChange};
use std::collections::{BTreeMap, BTreeSet};
use tracing::warn;

/// Last committed payload of every live object on a branch, keyed by id.
pub type Baseline = BTreeMap<String, String>;

/// Changes in detection order: added and modified objects in the host's
/// enumeration order, then deletions.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChangeSet {
    pub changes: Vec<ObjectChange>,
    /// Objects whose serialization failed; treated as unchanged.
    pub skipped: Vec<String>,
}

impl ChangeSet {
    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    pub fn len(&self) -> usize {
        self.changes.len()
    }

    pub fn of_type(&self, kind: ChangeType) -> impl Iterator<Item = &ObjectChange> {
        self.changes.iter().filter(move |c| c.change_type == kind)
    }

    pub fn added(&self) -> impl Iterator<Item = &ObjectChange> {
        self.of_type(ChangeType::Added)
    }

    pub fn modified(&self) -> impl Iterator<Item = &ObjectChange> {
        self.of_type(ChangeType::Modified)
    }

    pub fn deleted(&self) -> impl Iterator<Item = &ObjectChange> {
        self.of_type(ChangeType::Deleted)
    }
}

/// Serialize every live object. Objects that fail to serialize are logged and
/// reported separately.
pub fn capture(host: &dyn Host) -> Result<(Baseline, Vec<String>)> {
    let mut state = Baseline::new();
    let mut skipped = Vec::new();

    for id in host.object_ids()? {
        match host.serialize(&id) {
            Ok(payload) => {
                state.insert(id, payload);
            }
            Err(e) => {
                warn!("Skipping object {}: {}", id, e);
                skipped.push(id);
            }
        }
    }

    Ok((state, skipped))
}

/// Compare the workspace with `baseline` without touching it.
pub fn diff_workspace(host: &dyn Host, baseline: &Baseline) -> Result<ChangeSet> {
    let ids = host.object_ids()?;
    let present: BTreeSet<&str> = ids.iter().map(String::as_str).collect();
    let mut set = ChangeSet::default();

    for id in &ids {
        let payload = match host.serialize(id) {
            Ok(payload) => payload,
            Err(e) => {
                warn!("Skipping object {}: {}", id, e);
                set.skipped.push(id.clone());
                continue;
            }
        };

        let change_type = match baseline.get(id) {
            None => ChangeType::Added,
            Some(previous) if *previous != payload => ChangeType::Modified,
            Some(_) => continue,
        };

        let mut change = ObjectChange::new(id.as_str(), change_type, payload);
        change.transform = host.transform(id);
        set.changes.push(change);
    }

    for (id, payload) in baseline {
        if !present.contains(id.as_str()) {
            set.changes
                .push(ObjectChange::deleted(id.as_str(), payload.as_str()));
        }
    }

    Ok(set)
}

/// Bring `baseline` in line with an already computed change set.
pub fn advance(baseline: &mut Baseline, set: &ChangeSet) {
    for change in &set.changes {
        if change.change_type.is_present() {
            baseline.insert(change.id.clone(), change.serialized_payload.clone());
        } else {
            baseline.remove(&change.id);
        }
    }
}

/// Diff, then advance the baseline. The baseline is only touched once the
/// whole change set is known.
pub fn diff_and_advance(host: &dyn Host, baseline: &mut Baseline) -> Result<ChangeSet> {
    let set = diff_workspace(host, baseline)?;
    advance(baseline, &set);
    Ok(set)
}

/// Object-level comparison of two states.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StateComparison {
    pub added: Vec<String>,
    pub modified: Vec<String>,
    pub deleted: Vec<String>,
    pub unchanged: Vec<String>,
}

impl StateComparison {
    pub fn is_identical(&self) -> bool {
        self.added.is_empty() && self.modified.is_empty() && self.deleted.is_empty()
    }
}

/// Classify every object of `base` and `other` from `base`'s point of view.
pub fn compare_states(base: &Baseline, other: &Baseline) -> StateComparison {
    let mut comparison = StateComparison::default();

    for (id, payload) in other {
        match base.get(id) {
            None => comparison.added.push(id.clone()),
            Some(previous) if previous != payload => comparison.modified.push(id.clone()),
            Some(_) => comparison.unchanged.push(id.clone()),
        }
    }
    for id in base.keys() {
        if !other.contains_key(id) {
            comparison.deleted.push(id.clone());
        }
    }

    comparison
}
