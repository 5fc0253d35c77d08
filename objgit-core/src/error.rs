use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Config error: {0}")]
    Config(String),

    #[error("Failed to serialize object {id}: {reason}")]
    ObjectSerialization { id: String, reason: String },

    #[error("Invalid change type: {0}")]
    InvalidChangeType(String),

    #[error("Branch not found: {0}")]
    BranchNotFound(String),

    #[error("Branch already exists: {0}")]
    BranchAlreadyExists(String),

    #[error("Commit not found: {0}")]
    CommitNotFound(String),

    #[error("Commit already exists: {0}")]
    DuplicateCommit(String),

    #[error("No active branch")]
    NoActiveBranch,

    #[error("No commits found for branch: {0}")]
    NoCommits(String),

    #[error("Branch point not found for branch: {0}")]
    BranchPointNotFound(String),

    #[error("Merge of '{source_branch}' into '{target_branch}' has {count} conflict(s)")]
    MergeConflict {
        source_branch: String,
        target_branch: String,
        count: usize,
    },

    #[error("Stale read of {document}: expected version {expected}, found {found}")]
    StaleVersion {
        document: String,
        expected: String,
        found: String,
    },

    #[error("Corrupt document {document}: {reason}")]
    CorruptDocument { document: String, reason: String },

    #[error("No valid history found: {0}")]
    EmptyHistory(String),

    #[error("Invalid operation: {0}")]
    InvalidOperation(String),
}

impl From<toml::de::Error> for Error {
    fn from(err: toml::de::Error) -> Self {
        Error::Config(err.to_string())
    }
}
