//! Commit definitions
//!
//! A commit pairs a full [`Snapshot`] with authorship and timestamp metadata
//! and is identified by its [`Revision`], the 1-based position in the linear
//! history of its repository.
//!
//! ## Commit Integrity
//!
//! Every commit carries two digests:
//!
//! 1. **Snapshot digest**: SHA-256 over all paths and contents of the snapshot
//! 2. **Commit hash**: SHA-256 over the commit metadata and the snapshot digest
//!
//! Both are recomputed by [`Commit::verify_integrity`] after a commit is loaded
//! back from storage.
//!
//! ## Examples
//!
//! ```rust
//! use chrono::Utc;
//! use codehub::commit::{Commit, Revision};
//! use codehub::snapshot::Snapshot;
//! use codehub::types::{RepositoryId, UserId};
//!
//! let snapshot = Snapshot::new([("README.md", "# Hello\n")]).unwrap();
//! let commit = Commit::new(
//!     RepositoryId(1),
//!     Revision::FIRST,
//!     Revision::EMPTY,
//!     UserId(7),
//!     "Initial commit",
//!     Utc::now(),
//!     &Snapshot::empty(),
//!     snapshot,
//! );
//!
//! assert_eq!(commit.stats.files_added, 1);
//! assert!(commit.verify_integrity().is_ok());
//! ```

use crate::error::{CodehubError, Result};
use crate::snapshot::Snapshot;
use crate::types::{RepositoryId, UserId};
use crate::utils::short_hash;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

/// 1-based position of a commit in its repository's history
///
/// Revision 0 never names a commit. It stands for the empty snapshot in
/// [`CommitStore::diff_between`](crate::history::CommitStore::diff_between)
/// and is the base revision of an initial commit.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Revision(pub u64);

impl Revision {
    /// The empty snapshot before the first commit
    pub const EMPTY: Revision = Revision(0);
    /// The initial commit of every repository
    pub const FIRST: Revision = Revision(1);

    /// Revision following this one
    pub fn next(self) -> Revision {
        Revision(self.0 + 1)
    }

    /// Whether this is the empty-snapshot revision
    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Zero-based index into a history vector, None for revision 0
    pub(crate) fn index(self) -> Option<usize> {
        self.0.checked_sub(1).and_then(|i| usize::try_from(i).ok())
    }
}

impl fmt::Display for Revision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for Revision {
    fn from(value: u64) -> Self {
        Revision(value)
    }
}

/// Path-level counts for a commit relative to the previous revision
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitStats {
    /// Files in the committed snapshot
    pub file_count: usize,
    /// Total content size of the committed snapshot
    pub total_size: u64,
    /// Paths present only in the new snapshot
    pub files_added: usize,
    /// Paths whose content changed
    pub files_modified: usize,
    /// Paths present only in the base snapshot
    pub files_removed: usize,
}

impl CommitStats {
    /// Compare two snapshots path by path (no line diff)
    pub fn between(base: &Snapshot, target: &Snapshot) -> Self {
        let mut stats = CommitStats {
            file_count: target.len(),
            total_size: target.total_size(),
            ..Default::default()
        };
        for (path, content) in target.iter() {
            match base.get(path) {
                Ok(old) if old == content => {}
                Ok(_) => stats.files_modified += 1,
                Err(_) => stats.files_added += 1,
            }
        }
        stats.files_removed = base.paths().filter(|p| !target.contains(p)).count();
        stats
    }

    /// Total number of touched paths
    pub fn files_changed(&self) -> usize {
        self.files_added + self.files_modified + self.files_removed
    }
}

/// An immutable commit in a repository's history
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Commit {
    /// Position in the history, starting at 1
    pub revision: Revision,
    /// Owning repository
    pub repository_id: RepositoryId,
    /// Revision whose snapshot the edits were applied to (0 for the initial commit)
    pub base_revision: Revision,
    /// Author of the commit
    pub author_id: UserId,
    /// Commit message
    pub message: String,
    /// Creation timestamp, fixed when the commit is created
    pub created_at: DateTime<Utc>,
    /// Path-level statistics relative to the previous revision
    pub stats: CommitStats,
    /// Digest of the full snapshot
    pub snapshot_digest: String,
    /// SHA-256 over the metadata above and the snapshot digest
    pub commit_hash: String,
    /// Full file tree at this revision
    pub snapshot: Snapshot,
}

impl Commit {
    /// Create a commit and compute its digests
    ///
    /// `parent` is the snapshot of the previous revision (empty for the
    /// first) and is only used for the statistics.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        repository_id: RepositoryId,
        revision: Revision,
        base_revision: Revision,
        author_id: UserId,
        message: impl Into<String>,
        created_at: DateTime<Utc>,
        parent: &Snapshot,
        snapshot: Snapshot,
    ) -> Self {
        let mut commit = Self {
            revision,
            repository_id,
            base_revision,
            author_id,
            message: message.into(),
            created_at,
            stats: CommitStats::between(parent, &snapshot),
            snapshot_digest: snapshot.digest(),
            commit_hash: String::new(),
            snapshot,
        };
        commit.commit_hash = commit.compute_commit_hash();
        commit
    }

    /// Hash the commit metadata together with the snapshot digest
    pub fn compute_commit_hash(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.repository_id.0.to_le_bytes());
        hasher.update(self.revision.0.to_le_bytes());
        hasher.update(self.base_revision.0.to_le_bytes());
        hasher.update(self.author_id.0.to_le_bytes());
        hasher.update((self.message.len() as u64).to_le_bytes());
        hasher.update(self.message.as_bytes());
        hasher.update(self.created_at.to_rfc3339());
        hasher.update(&self.snapshot_digest);
        hex::encode(hasher.finalize())
    }

    /// Verify both digests
    ///
    /// # Errors
    ///
    /// [`CodehubError::HashMismatch`] when the snapshot or the metadata no
    /// longer match the digests recorded at creation.
    pub fn verify_integrity(&self) -> Result<()> {
        let actual = self.snapshot.digest();
        if actual != self.snapshot_digest {
            return Err(CodehubError::HashMismatch {
                expected: self.snapshot_digest.clone(),
                actual,
            });
        }

        let actual = self.compute_commit_hash();
        if actual != self.commit_hash {
            return Err(CodehubError::HashMismatch {
                expected: self.commit_hash.clone(),
                actual,
            });
        }
        Ok(())
    }

    /// First 8 characters of the commit hash
    pub fn short_hash(&self) -> &str {
        short_hash(&self.commit_hash)
    }

    /// Metadata without the snapshot body
    pub fn summary(&self) -> CommitSummary {
        CommitSummary::from(self)
    }
}

/// Commit metadata for list views
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommitSummary {
    /// Position in the history
    pub revision: Revision,
    /// Owning repository
    pub repository_id: RepositoryId,
    /// Base revision of the edits
    pub base_revision: Revision,
    /// Author of the commit
    pub author_id: UserId,
    /// Commit message
    pub message: String,
    /// Creation timestamp
    pub created_at: DateTime<Utc>,
    /// Path-level statistics
    pub stats: CommitStats,
    /// Commit hash
    pub commit_hash: String,
}

impl CommitSummary {
    /// First line of the message
    pub fn title(&self) -> &str {
        self.message.lines().next().unwrap_or("")
    }

    /// Format for one-line display
    pub fn display_format(&self) -> String {
        format!(
            "r{} [{}] {} - {} files changed (+{} ~{} -{})",
            self.revision,
            short_hash(&self.commit_hash),
            self.title(),
            self.stats.files_changed(),
            self.stats.files_added,
            self.stats.files_modified,
            self.stats.files_removed,
        )
    }
}

impl From<&Commit> for CommitSummary {
    fn from(commit: &Commit) -> Self {
        Self {
            revision: commit.revision,
            repository_id: commit.repository_id,
            base_revision: commit.base_revision,
            author_id: commit.author_id,
            message: commit.message.clone(),
            created_at: commit.created_at,
            stats: commit.stats,
            commit_hash: commit.commit_hash.clone(),
        }
    }
}
