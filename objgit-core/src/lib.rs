//! # objgit-core
//!
//! Core library for objgit - branch-aware version control for collections of
//! identifiable objects.
//!
//! This crate provides change detection against per-branch baselines, the
//! persisted commit log and branch catalog, branch switching and workspace
//! reconstruction, merging of divergent branches, and reconciliation of
//! externally supplied histories. Object payloads are opaque; the application
//! that owns the live objects plugs in through the [`Host`] trait.

pub mod config;
pub mod diff;
pub mod error;
pub mod history;
pub mod host;
pub mod merge;
pub mod models;
pub mod repository;
pub mod snapshot;
pub mod storage;
pub mod sync;

pub use config::Config;
pub use error::{Error, Result};
pub use history::CommitStore;
pub use host::{DirectoryHost, Host, MemoryHost};
pub use merge::{ConflictDetector, ConflictStatus, MergeOutcome};
pub use models::{Branch, ChangeType, Commit, CommitInfo, ObjectChange, Transform};
pub use repository::{Repository, SwitchOutcome};
pub use snapshot::{Baseline, ChangeSet};
pub use storage::{DocumentStore, JsonFileStore, SqliteStore};
pub use sync::{IngestMode, IngestReport};
