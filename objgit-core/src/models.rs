use crate::error::Error;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum ChangeType {
    Added,
    Modified,
    Deleted,
}

impl ChangeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeType::Added => "Added",
            ChangeType::Modified => "Modified",
            ChangeType::Deleted => "Deleted",
        }
    }

    /// Case-insensitive; surrounding whitespace is ignored.
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "added" => Some(ChangeType::Added),
            "modified" => Some(ChangeType::Modified),
            "deleted" => Some(ChangeType::Deleted),
            _ => None,
        }
    }

    /// True for changes that leave the object present in the workspace.
    pub fn is_present(&self) -> bool {
        !matches!(self, ChangeType::Deleted)
    }
}

impl TryFrom<String> for ChangeType {
    type Error = Error;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        ChangeType::parse(&value).ok_or(Error::InvalidChangeType(value))
    }
}

impl From<ChangeType> for String {
    fn from(value: ChangeType) -> Self {
        value.as_str().to_string()
    }
}

impl fmt::Display for ChangeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Row-major 4x4 affine matrix attached to a change.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Transform(pub [[f64; 4]; 4]);

impl Transform {
    pub const IDENTITY: Transform = Transform([
        [1.0, 0.0, 0.0, 0.0],
        [0.0, 1.0, 0.0, 0.0],
        [0.0, 0.0, 1.0, 0.0],
        [0.0, 0.0, 0.0, 1.0],
    ]);

    pub fn translation(x: f64, y: f64, z: f64) -> Self {
        let mut m = Self::IDENTITY.0;
        m[0][3] = x;
        m[1][3] = y;
        m[2][3] = z;
        Transform(m)
    }

    pub fn offset(&self) -> [f64; 3] {
        [self.0[0][3], self.0[1][3], self.0[2][3]]
    }
}

impl Default for Transform {
    fn default() -> Self {
        Self::IDENTITY
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectChange {
    pub id: String,
    pub change_type: ChangeType,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub serialized_payload: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transform: Option<Transform>,
}

impl ObjectChange {
    pub fn new(id: impl Into<String>, change_type: ChangeType, payload: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            change_type,
            serialized_payload: payload.into(),
            transform: None,
        }
    }

    pub fn added(id: impl Into<String>, payload: impl Into<String>) -> Self {
        Self::new(id, ChangeType::Added, payload)
    }

    pub fn modified(id: impl Into<String>, payload: impl Into<String>) -> Self {
        Self::new(id, ChangeType::Modified, payload)
    }

    /// `payload` is the tombstone: the object's state before deletion.
    pub fn deleted(id: impl Into<String>, payload: impl Into<String>) -> Self {
        Self::new(id, ChangeType::Deleted, payload)
    }

    pub fn with_transform(mut self, transform: Transform) -> Self {
        self.transform = Some(transform);
        self
    }

    pub fn content_hash(&self) -> String {
        hash_content(self.serialized_payload.as_bytes())
    }
}

/// Hex-encoded SHA-256 digest.
pub fn hash_content(content: &[u8]) -> String {
    use sha2::{Digest, Sha256};
    let mut hasher = Sha256::new();
    hasher.update(content);
    hex::encode(hasher.finalize())
}

pub fn new_commit_id() -> String {
    Uuid::new_v4().simple().to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Commit {
    pub commit_id: String,
    #[serde(default)]
    pub changes: Vec<ObjectChange>,
    pub timestamp: DateTime<Utc>,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub message: String,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub branch_name: String,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub parent_commit: String,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub author: String,
}

impl Commit {
    pub fn new(
        branch_name: impl Into<String>,
        message: impl Into<String>,
        author: impl Into<String>,
        changes: Vec<ObjectChange>,
    ) -> Self {
        Self {
            commit_id: new_commit_id(),
            changes,
            timestamp: Utc::now(),
            message: message.into(),
            branch_name: branch_name.into(),
            parent_commit: String::new(),
            author: author.into(),
        }
    }

    pub fn with_parent(mut self, parent: Option<String>) -> Self {
        self.parent_commit = parent.unwrap_or_default();
        self
    }

    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    pub fn with_id(mut self, commit_id: impl Into<String>) -> Self {
        self.commit_id = commit_id.into();
        self
    }

    /// `None` for a root commit.
    pub fn parent(&self) -> Option<&str> {
        if self.parent_commit.is_empty() {
            None
        } else {
            Some(&self.parent_commit)
        }
    }

    pub fn is_root(&self) -> bool {
        self.parent_commit.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Branch {
    pub name: String,
    #[serde(default)]
    pub commits: Vec<String>,
}

impl Branch {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            commits: Vec::new(),
        }
    }

    pub fn contains(&self, commit_id: &str) -> bool {
        self.commits.iter().any(|c| c == commit_id)
    }

    /// Appends unless the id is already listed.
    pub fn push(&mut self, commit_id: impl Into<String>) {
        let commit_id = commit_id.into();
        if !self.contains(&commit_id) {
            self.commits.push(commit_id);
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommitInfo {
    pub commit: Commit,
    pub added: usize,
    pub modified: usize,
    pub deleted: usize,
}

impl CommitInfo {
    pub fn from_commit(commit: &Commit) -> Self {
        let count = |kind: ChangeType| {
            commit
                .changes
                .iter()
                .filter(|c| c.change_type == kind)
                .count()
        };

        Self {
            added: count(ChangeType::Added),
            modified: count(ChangeType::Modified),
            deleted: count(ChangeType::Deleted),
            commit: commit.clone(),
        }
    }

    pub fn change_count(&self) -> usize {
        self.commit.changes.len()
    }
}

fn null_as_empty<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<String>::deserialize(deserializer)?.unwrap_or_default())
}
