//! Repositories: identity plus history
//!
//! A [`Repository`] pairs the mutable identity record (description,
//! visibility, star count) with the append-only [`CommitStore`] holding its
//! history. The record and the history are locked independently, so editing
//! a description never waits for a commit.

use crate::commit::Revision;
use crate::error::{CodehubError, Result};
use crate::history::CommitStore;
use crate::snapshot::Snapshot;
use crate::types::{RepositoryId, UserId};
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

/// Longest accepted repository name
pub const MAX_NAME_LEN: usize = 100;

/// Persisted identity of a repository
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepositoryRecord {
    /// Repository identifier
    pub id: RepositoryId,
    /// Owner of the repository
    pub owner_id: UserId,
    /// Name, unique per owner
    pub name: String,
    /// Free-form description
    pub description: String,
    /// Only the owner can see private repositories
    pub is_private: bool,
    /// Star counter maintained by the caller
    pub stars_count: u64,
    /// Creation timestamp
    pub created_at: DateTime<Utc>,
}

impl RepositoryRecord {
    /// Public record with an empty description and no stars
    pub fn new(id: RepositoryId, owner_id: UserId, name: impl Into<String>) -> Self {
        Self {
            id,
            owner_id,
            name: name.into(),
            description: String::new(),
            is_private: false,
            stars_count: 0,
            created_at: Utc::now(),
        }
    }
}

/// Read-only view of a repository for listings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepositoryInfo {
    /// Identity record
    #[serde(flatten)]
    pub record: RepositoryRecord,
    /// Timestamp of the latest commit
    pub updated_at: DateTime<Utc>,
    /// Latest revision
    pub head_revision: Revision,
    /// Number of commits
    pub commit_count: usize,
}

/// A repository and its history
#[derive(Debug)]
pub struct Repository {
    record: RwLock<RepositoryRecord>,
    history: CommitStore,
}

impl Repository {
    /// Combine a record with its history
    pub fn new(record: RepositoryRecord, history: CommitStore) -> Self {
        Self {
            record: RwLock::new(record),
            history,
        }
    }

    /// Repository identifier
    pub fn id(&self) -> RepositoryId {
        self.record.read().id
    }

    /// Owner of the repository
    pub fn owner_id(&self) -> UserId {
        self.record.read().owner_id
    }

    /// Repository name
    pub fn name(&self) -> String {
        self.record.read().name.clone()
    }

    /// Copy of the identity record
    pub fn record(&self) -> RepositoryRecord {
        self.record.read().clone()
    }

    /// Commit history
    pub fn history(&self) -> &CommitStore {
        &self.history
    }

    /// Timestamp of the latest commit, or the creation time before the first
    ///
    /// Derived from the history, so it advances exactly when a commit lands.
    pub fn updated_at(&self) -> DateTime<Utc> {
        self.history
            .last_updated()
            .unwrap_or_else(|| self.record.read().created_at)
    }

    /// Listing view
    pub fn info(&self) -> RepositoryInfo {
        RepositoryInfo {
            record: self.record(),
            updated_at: self.updated_at(),
            head_revision: self.history.head_revision(),
            commit_count: self.history.len(),
        }
    }

    /// Whether `viewer` may see this repository (None is an anonymous visitor)
    pub fn is_visible_to(&self, viewer: Option<UserId>) -> bool {
        let record = self.record.read();
        !record.is_private || viewer == Some(record.owner_id)
    }

    /// Apply a change to the record, returning the updated copy
    ///
    /// `persist` runs under the record lock; if it fails the change is dropped.
    pub(crate) fn update_record<F, P>(&self, change: F, persist: P) -> Result<RepositoryRecord>
    where
        F: FnOnce(&mut RepositoryRecord),
        P: FnOnce(&RepositoryRecord) -> Result<()>,
    {
        let mut record = self.record.write();
        let mut updated = record.clone();
        change(&mut updated);
        persist(&updated)?;
        *record = updated.clone();
        Ok(updated)
    }
}

/// Check a repository name
///
/// Names use ASCII letters, digits, `.`, `_` and `-`, are 1 to 100 characters
/// long and are not `.` or `..`.
pub fn validate_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(CodehubError::invalid_name(name, "name is empty"));
    }
    if name.len() > MAX_NAME_LEN {
        return Err(CodehubError::invalid_name(
            name,
            format!("longer than {} characters", MAX_NAME_LEN),
        ));
    }
    if name == "." || name == ".." {
        return Err(CodehubError::invalid_name(name, "reserved name"));
    }
    if let Some(c) = name
        .chars()
        .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-')))
    {
        return Err(CodehubError::invalid_name(
            name,
            format!("character {:?} is not allowed", c),
        ));
    }
    Ok(())
}

/// Snapshot used when a repository is created without initial files
pub fn default_snapshot(name: &str, description: &str) -> Result<Snapshot> {
    Snapshot::new([("README.md", format!("# {}\n\n{}\n", name, description))])
}
