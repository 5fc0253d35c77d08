//! The boundary between the engine and the application that owns the live
//! objects.
//!
//! The engine never interprets payloads. A host enumerates its objects,
//! serializes them on request, and applies changes coming back from history.

use crate::error::{Error, Result};
use crate::models::{ObjectChange, Transform};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::warn;

pub trait Host {
    /// Ids of every object that exists right now. A listing failure is an
    /// error, never an empty workspace.
    fn object_ids(&self) -> Result<Vec<String>>;

    /// Current serialized payload of one object.
    fn serialize(&self, id: &str) -> Result<String>;

    fn transform(&self, _id: &str) -> Option<Transform> {
        None
    }

    /// Add, replace or delete the live object named by `change.id`.
    fn apply_change(&mut self, change: &ObjectChange) -> Result<()>;

    /// Remove every live object ahead of a full reconstruction.
    fn clear_workspace(&mut self) -> Result<()>;
}

#[derive(Debug, Clone, Default)]
pub struct MemoryHost {
    objects: BTreeMap<String, String>,
    transforms: BTreeMap<String, Transform>,
}

impl MemoryHost {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, id: impl Into<String>, payload: impl Into<String>) {
        self.objects.insert(id.into(), payload.into());
    }

    pub fn remove(&mut self, id: &str) -> Option<String> {
        self.transforms.remove(id);
        self.objects.remove(id)
    }

    pub fn get(&self, id: &str) -> Option<&str> {
        self.objects.get(id).map(String::as_str)
    }

    pub fn set_transform(&mut self, id: impl Into<String>, transform: Transform) {
        self.transforms.insert(id.into(), transform);
    }

    pub fn objects(&self) -> &BTreeMap<String, String> {
        &self.objects
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }
}

impl Host for MemoryHost {
    fn object_ids(&self) -> Result<Vec<String>> {
        Ok(self.objects.keys().cloned().collect())
    }

    fn serialize(&self, id: &str) -> Result<String> {
        self.objects
            .get(id)
            .cloned()
            .ok_or_else(|| Error::ObjectSerialization {
                id: id.to_string(),
                reason: "object does not exist".to_string(),
            })
    }

    fn transform(&self, id: &str) -> Option<Transform> {
        self.transforms.get(id).copied()
    }

    fn apply_change(&mut self, change: &ObjectChange) -> Result<()> {
        if change.change_type.is_present() {
            self.objects
                .insert(change.id.clone(), change.serialized_payload.clone());
            match change.transform {
                Some(transform) => {
                    self.transforms.insert(change.id.clone(), transform);
                }
                None => {
                    self.transforms.remove(&change.id);
                }
            }
        } else {
            self.remove(&change.id);
        }
        Ok(())
    }

    fn clear_workspace(&mut self) -> Result<()> {
        self.objects.clear();
        self.transforms.clear();
        Ok(())
    }
}

/// Every regular, non-hidden file directly under `root` is one object. The id
/// is the file name and the payload is the UTF-8 contents.
#[derive(Debug, Clone)]
pub struct DirectoryHost {
    root: PathBuf,
    ignore_patterns: Vec<String>,
}

impl DirectoryHost {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            ignore_patterns: Vec::new(),
        }
    }

    pub fn with_ignore_patterns(mut self, patterns: Vec<String>) -> Self {
        self.ignore_patterns = patterns;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn object_path(&self, id: &str) -> Result<PathBuf> {
        let valid = !id.is_empty()
            && !id.starts_with('.')
            && !id.contains('/')
            && !id.contains('\\');
        if !valid {
            return Err(Error::InvalidOperation(format!(
                "object id '{}' is not a plain file name",
                id
            )));
        }
        Ok(self.root.join(id))
    }

    fn should_ignore(&self, name: &str) -> bool {
        name.starts_with('.')
            || self
                .ignore_patterns
                .iter()
                .any(|pattern| name.contains(pattern.as_str()))
    }

    fn tracked_files(&self) -> Result<Vec<(String, PathBuf)>> {
        if !self.root.exists() {
            return Ok(Vec::new());
        }

        let mut files = Vec::new();
        for entry in std::fs::read_dir(&self.root)? {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().to_string();
            if self.should_ignore(&name) {
                continue;
            }
            files.push((name, entry.path()));
        }
        files.sort();
        Ok(files)
    }
}

impl Host for DirectoryHost {
    fn object_ids(&self) -> Result<Vec<String>> {
        match self.tracked_files() {
            Ok(files) => Ok(files.into_iter().map(|(name, _)| name).collect()),
            Err(e) => {
                warn!("Failed to list {:?}: {}", self.root, e);
                Err(e)
            }
        }
    }

    fn serialize(&self, id: &str) -> Result<String> {
        let path = self.object_path(id)?;
        let bytes = std::fs::read(&path)?;
        String::from_utf8(bytes).map_err(|_| Error::ObjectSerialization {
            id: id.to_string(),
            reason: "contents are not valid UTF-8".to_string(),
        })
    }

    fn apply_change(&mut self, change: &ObjectChange) -> Result<()> {
        let path = self.object_path(&change.id)?;
        if change.change_type.is_present() {
            std::fs::create_dir_all(&self.root)?;
            std::fs::write(&path, &change.serialized_payload)?;
        } else if path.exists() {
            std::fs::remove_file(&path)?;
        }
        Ok(())
    }

    fn clear_workspace(&mut self) -> Result<()> {
        for (_, path) in self.tracked_files()? {
            std::fs::remove_file(path)?;
        }
        Ok(())
    }
}
