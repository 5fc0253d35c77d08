//! Versioned whole-document persistence.
//!
//! Every dataset owns two documents, the history log and the branch catalog.
//! A read hands back the document together with a [`VersionToken`]; a write
//! must present the token it read and fails with [`Error::StaleVersion`] when
//! another writer got there first.

use crate::config::StorageBackend;
use crate::error::{Error, Result};
use crate::models::hash_content;
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use std::fmt;
use std::path::{Path, PathBuf};

const SCHEMA_VERSION: i32 = 1;

pub const DATABASE_FILE: &str = "objgit.db";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DocumentKind {
    History,
    Branches,
}

impl DocumentKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentKind::History => "history",
            DocumentKind::Branches => "branches",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DocumentKey {
    pub dataset: String,
    pub kind: DocumentKind,
}

impl DocumentKey {
    pub fn history(dataset: impl Into<String>) -> Self {
        Self {
            dataset: dataset.into(),
            kind: DocumentKind::History,
        }
    }

    pub fn branches(dataset: impl Into<String>) -> Self {
        Self {
            dataset: dataset.into(),
            kind: DocumentKind::Branches,
        }
    }
}

impl fmt::Display for DocumentKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} of dataset '{}'", self.kind.as_str(), self.dataset)
    }
}

/// Opaque version of a stored document. The empty token means "absent".
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct VersionToken(String);

impl VersionToken {
    pub fn absent() -> Self {
        Self(String::new())
    }

    pub fn is_absent(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for VersionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_absent() {
            f.write_str("<absent>")
        } else {
            f.write_str(&self.0)
        }
    }
}

#[derive(Debug, Clone)]
pub struct Document {
    pub body: String,
    pub version: VersionToken,
}

pub trait DocumentStore {
    /// `None` when the document has never been written.
    fn read(&self, key: &DocumentKey) -> Result<Option<Document>>;

    /// Replace the whole document. `expected` must be the version returned by
    /// the read this write is based on.
    fn write(&self, key: &DocumentKey, body: &str, expected: &VersionToken) -> Result<VersionToken>;

    /// Version of the stored document, readable even when its body is not.
    fn version(&self, key: &DocumentKey) -> Result<VersionToken> {
        Ok(self
            .read(key)?
            .map(|doc| doc.version)
            .unwrap_or_else(VersionToken::absent))
    }
}

fn stale(key: &DocumentKey, expected: &VersionToken, found: &VersionToken) -> Error {
    Error::StaleVersion {
        document: key.to_string(),
        expected: expected.to_string(),
        found: found.to_string(),
    }
}

/// Open the backend selected in the config, rooted at `dir`.
pub fn open(backend: StorageBackend, dir: &Path) -> Result<Box<dyn DocumentStore>> {
    std::fs::create_dir_all(dir)?;
    match backend {
        StorageBackend::Sqlite => Ok(Box::new(SqliteStore::new(dir.join(DATABASE_FILE))?)),
        StorageBackend::Json => Ok(Box::new(JsonFileStore::new(dir))),
    }
}

pub struct SqliteStore {
    conn: Connection,
}

impl SqliteStore {
    pub fn new<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        let conn = Connection::open(db_path)?;
        let mut store = Self { conn };
        store.initialize()?;
        Ok(store)
    }

    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let mut store = Self { conn };
        store.initialize()?;
        Ok(store)
    }

    fn initialize(&mut self) -> Result<()> {
        self.conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS schema_version (
                version INTEGER PRIMARY KEY
            );

            CREATE TABLE IF NOT EXISTS documents (
                dataset TEXT NOT NULL,
                kind TEXT NOT NULL,
                version INTEGER NOT NULL,
                body TEXT NOT NULL,
                updated TEXT NOT NULL,
                PRIMARY KEY (dataset, kind)
            );

            CREATE INDEX IF NOT EXISTS idx_documents_dataset ON documents(dataset);
            "#,
        )?;

        let version: Option<i32> = self
            .conn
            .query_row("SELECT version FROM schema_version", [], |row| row.get(0))
            .optional()?;

        if version.is_none() {
            self.conn.execute(
                "INSERT INTO schema_version (version) VALUES (?1)",
                params![SCHEMA_VERSION],
            )?;
        }

        Ok(())
    }

    fn current_version(&self, key: &DocumentKey) -> Result<VersionToken> {
        let version: Option<i64> = self
            .conn
            .query_row(
                "SELECT version FROM documents WHERE dataset = ?1 AND kind = ?2",
                params![key.dataset, key.kind.as_str()],
                |row| row.get(0),
            )
            .optional()?;

        Ok(version.map_or_else(VersionToken::absent, |v| VersionToken(v.to_string())))
    }

    /// Every dataset with at least one stored document.
    pub fn datasets(&self) -> Result<Vec<String>> {
        let mut stmt = self
            .conn
            .prepare("SELECT DISTINCT dataset FROM documents ORDER BY dataset")?;

        let datasets = stmt
            .query_map([], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<String>>>()?;

        Ok(datasets)
    }
}

impl DocumentStore for SqliteStore {
    fn read(&self, key: &DocumentKey) -> Result<Option<Document>> {
        let row: Option<(String, i64)> = self
            .conn
            .query_row(
                "SELECT body, version FROM documents WHERE dataset = ?1 AND kind = ?2",
                params![key.dataset, key.kind.as_str()],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;

        Ok(row.map(|(body, version)| Document {
            body,
            version: VersionToken(version.to_string()),
        }))
    }

    fn write(&self, key: &DocumentKey, body: &str, expected: &VersionToken) -> Result<VersionToken> {
        let updated = Utc::now().to_rfc3339();

        let (rows, next) = if expected.is_absent() {
            let rows = self.conn.execute(
                "INSERT INTO documents (dataset, kind, version, body, updated)
                 VALUES (?1, ?2, 1, ?3, ?4)
                 ON CONFLICT(dataset, kind) DO NOTHING",
                params![key.dataset, key.kind.as_str(), body, updated],
            )?;
            (rows, 1)
        } else {
            let current: i64 = match expected.as_str().parse() {
                Ok(v) => v,
                Err(_) => return Err(stale(key, expected, &self.current_version(key)?)),
            };
            let rows = self.conn.execute(
                "UPDATE documents SET body = ?1, version = version + 1, updated = ?2
                 WHERE dataset = ?3 AND kind = ?4 AND version = ?5",
                params![body, updated, key.dataset, key.kind.as_str(), current],
            )?;
            (rows, current + 1)
        };

        if rows != 1 {
            return Err(stale(key, expected, &self.current_version(key)?));
        }

        Ok(VersionToken(next.to_string()))
    }
}

/// Pretty JSON files, one per document, named after the dataset. The version
/// token is the SHA-256 of the file bytes.
pub struct JsonFileStore {
    dir: PathBuf,
}

impl JsonFileStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn path_for(&self, key: &DocumentKey) -> PathBuf {
        let dataset: String = key
            .dataset
            .chars()
            .map(|c| if matches!(c, '/' | '\\' | ':') { '_' } else { c })
            .collect();

        let file_name = match key.kind {
            DocumentKind::History => format!("model_history_{}.json", dataset),
            DocumentKind::Branches => format!("branches_{}.json", dataset),
        };
        self.dir.join(file_name)
    }

    fn current_version(&self, path: &Path) -> Result<VersionToken> {
        if !path.exists() {
            return Ok(VersionToken::absent());
        }
        let bytes = std::fs::read(path)?;
        Ok(VersionToken(hash_content(&bytes)))
    }
}

impl DocumentStore for JsonFileStore {
    fn read(&self, key: &DocumentKey) -> Result<Option<Document>> {
        let path = self.path_for(key);
        if !path.exists() {
            return Ok(None);
        }

        let bytes = std::fs::read(&path)?;
        let version = VersionToken(hash_content(&bytes));
        let body = String::from_utf8(bytes).map_err(|e| Error::CorruptDocument {
            document: key.to_string(),
            reason: format!("{} is not valid UTF-8: {}", path.display(), e),
        })?;
        Ok(Some(Document { version, body }))
    }

    fn version(&self, key: &DocumentKey) -> Result<VersionToken> {
        self.current_version(&self.path_for(key))
    }

    fn write(&self, key: &DocumentKey, body: &str, expected: &VersionToken) -> Result<VersionToken> {
        let path = self.path_for(key);
        let current = self.current_version(&path)?;
        if &current != expected {
            return Err(stale(key, expected, &current));
        }

        std::fs::create_dir_all(&self.dir)?;
        let tmp_path = path.with_extension("json.tmp");
        std::fs::write(&tmp_path, body)?;
        std::fs::rename(&tmp_path, &path)?;

        Ok(VersionToken(hash_content(body.as_bytes())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn exercise_versioning(store: &dyn DocumentStore) {
        let key = DocumentKey::history("bridge");
        assert!(store.read(&key).unwrap().is_none());

        let v1 = store.write(&key, "[]", &VersionToken::absent()).unwrap();
        assert!(!v1.is_absent());

        let doc = store.read(&key).unwrap().unwrap();
        assert_eq!(doc.body, "[]");
        assert_eq!(doc.version, v1);

        let v2 = store.write(&key, "[1]", &v1).unwrap();
        assert_ne!(v1, v2);

        // a writer still holding v1 lost the race
        let err = store.write(&key, "[2]", &v1).unwrap_err();
        assert!(matches!(err, Error::StaleVersion { .. }));

        // creating over an existing document is also stale
        let err = store.write(&key, "[3]", &VersionToken::absent()).unwrap_err();
        assert!(matches!(err, Error::StaleVersion { .. }));

        assert_eq!(store.read(&key).unwrap().unwrap().body, "[1]");
    }

    #[test]
    fn test_sqlite_store_versioning() {
        let store = SqliteStore::in_memory().unwrap();
        exercise_versioning(&store);
    }

    #[test]
    fn test_json_store_versioning() {
        let dir = TempDir::new().unwrap();
        let store = JsonFileStore::new(dir.path());
        exercise_versioning(&store);
    }

    #[test]
    fn test_json_store_rejects_invalid_utf8() {
        let dir = TempDir::new().unwrap();
        let store = JsonFileStore::new(dir.path());
        let key = DocumentKey::history("tower");
        std::fs::write(store.path_for(&key), [b'[', 0xff, 0xfe, b']']).unwrap();

        let err = store.read(&key).unwrap_err();
        assert!(matches!(err, Error::CorruptDocument { .. }));
        assert!(!store.version(&key).unwrap().is_absent());
    }

    #[test]
    fn test_sqlite_store_initialization() {
        let store = SqliteStore::in_memory().unwrap();
        assert!(store.conn.is_autocommit());
        assert!(store.datasets().unwrap().is_empty());
    }

    #[test]
    fn test_documents_are_per_dataset_and_kind() {
        let store = SqliteStore::in_memory().unwrap();
        store
            .write(&DocumentKey::history("a"), "history-a", &VersionToken::absent())
            .unwrap();
        store
            .write(&DocumentKey::branches("a"), "branches-a", &VersionToken::absent())
            .unwrap();
        store
            .write(&DocumentKey::history("b"), "history-b", &VersionToken::absent())
            .unwrap();

        assert_eq!(store.read(&DocumentKey::branches("a")).unwrap().unwrap().body, "branches-a");
        assert!(store.read(&DocumentKey::branches("b")).unwrap().is_none());
        assert_eq!(store.datasets().unwrap(), vec!["a", "b"]);
    }

    #[test]
    fn test_json_store_file_names() {
        let dir = TempDir::new().unwrap();
        let store = JsonFileStore::new(dir.path());

        store
            .write(&DocumentKey::history("tower"), "[]", &VersionToken::absent())
            .unwrap();
        store
            .write(&DocumentKey::branches("tower"), "[]", &VersionToken::absent())
            .unwrap();

        assert!(dir.path().join("model_history_tower.json").exists());
        assert!(dir.path().join("branches_tower.json").exists());
        assert_eq!(
            store.path_for(&DocumentKey::history("a/b")),
            dir.path().join("model_history_a_b.json")
        );
    }

    #[test]
    fn test_sqlite_store_persists_across_connections() {
        let dir = TempDir::new().unwrap();
        let db_path = dir.path().join(DATABASE_FILE);

        {
            let store = SqliteStore::new(&db_path).unwrap();
            store
                .write(&DocumentKey::history("d"), "[]", &VersionToken::absent())
                .unwrap();
        }

        let store = SqliteStore::new(&db_path).unwrap();
        let doc = store.read(&DocumentKey::history("d")).unwrap().unwrap();
        assert_eq!(doc.body, "[]");
        assert_eq!(doc.version.as_str(), "1");
    }

    #[test]
    fn test_open_selects_backend() {
        let dir = TempDir::new().unwrap();
        let store = open(StorageBackend::Json, dir.path()).unwrap();
        store
            .write(&DocumentKey::history("x"), "[]", &VersionToken::absent())
            .unwrap();
        assert!(dir.path().join("model_history_x.json").exists());

        let store = open(StorageBackend::Sqlite, dir.path()).unwrap();
        assert!(store.read(&DocumentKey::history("x")).unwrap().is_none());
        assert!(dir.path().join(DATABASE_FILE).exists());
    }
}
