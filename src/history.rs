//! Linear commit history of a repository
//!
//! A [`CommitStore`] owns the append-only sequence of commits of one
//! repository, indexed 1..=N. It is the single place where history is mutated.
//!
//! ## Concurrency
//!
//! Published history is an immutable `Arc<Vec<Arc<Commit>>>`. Readers clone that
//! `Arc` under a short read lock and then work on immutable values, so `head`,
//! `at`, `diff_between` and `history` never wait for a writer and never observe
//! a partially built commit.
//!
//! Writers take a per-store mutex for the whole resolve, merge, persist and
//! publish sequence. A new commit becomes visible only after the persistence
//! layer accepted it; if persistence fails the published history is untouched.
//!
//! A commit made against a base older than the head is rebased onto the head
//! when none of its edited paths changed in between, and rejected with
//! [`CodehubError::CommitConflict`] otherwise.
//!
//! ## Examples
//!
//! ```rust
//! use std::sync::Arc;
//! use codehub::commit::Revision;
//! use codehub::history::CommitStore;
//! use codehub::snapshot::{EditSet, Snapshot};
//! use codehub::repository::RepositoryRecord;
//! use codehub::storage::{MemoryPersistence, Persistence};
//! use codehub::types::{RepositoryId, UserId};
//!
//! # fn main() -> codehub::Result<()> {
//! let persistence = Arc::new(MemoryPersistence::new());
//! persistence.save_repository(&RepositoryRecord::new(RepositoryId(1), UserId(1), "hello"))?;
//! let store = CommitStore::new(RepositoryId(1), persistence);
//! store.initialize(Snapshot::new([("README.md", "# Hello\n")])?, UserId(1), "Initial commit")?;
//!
//! let edits = EditSet::new().write("README.md", "# Hello\nWorld\n");
//! let commit = store.commit(Revision(1), &edits, UserId(1), "Say hello")?;
//! assert_eq!(commit.revision, Revision(2));
//!
//! let diff = store.diff_between(Revision(1), Revision(2))?;
//! assert_eq!(diff.changed().count(), 1);
//! # Ok(())
//! # }
//! ```

use crate::changes::{diff_snapshots, DiffResult};
use crate::commit::{Commit, CommitSummary, Revision};
use crate::error::{CodehubError, Result};
use crate::snapshot::{EditSet, Snapshot};
use crate::storage::Persistence;
use crate::types::{Page, RepositoryId, UserId};
use crate::verification::HistoryVerifier;
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

type Published = Arc<Vec<Arc<Commit>>>;

/// Append-only commit history of one repository
pub struct CommitStore {
    repository_id: RepositoryId,
    published: RwLock<Published>,
    /// Held across every write; `true` once the store is closed
    writer: Mutex<bool>,
    persistence: Arc<dyn Persistence>,
}

impl fmt::Debug for CommitStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommitStore")
            .field("repository_id", &self.repository_id)
            .field("len", &self.len())
            .finish()
    }
}

impl CommitStore {
    /// Create an empty store
    pub fn new(repository_id: RepositoryId, persistence: Arc<dyn Persistence>) -> Self {
        Self {
            repository_id,
            published: RwLock::new(Arc::new(Vec::new())),
            writer: Mutex::new(false),
            persistence,
        }
    }

    /// Rebuild a store from commits loaded out of persistence
    ///
    /// # Errors
    ///
    /// [`CodehubError::CorruptionDetected`] when the commits do not form a
    /// valid history of this repository.
    pub fn from_commits(
        repository_id: RepositoryId,
        commits: Vec<Commit>,
        persistence: Arc<dyn Persistence>,
    ) -> Result<Self> {
        let commits: Vec<Arc<Commit>> = commits.into_iter().map(Arc::new).collect();
        let report = HistoryVerifier::new(repository_id).verify(&commits);
        if !report.is_valid() {
            warn!("Refusing to load repository {}: {}", repository_id, report.summary());
            return Err(CodehubError::CorruptionDetected(format!(
                "repository {}: {}",
                repository_id,
                report.errors.join("; ")
            )));
        }

        debug!("Loaded {} commits for repository {}", commits.len(), repository_id);
        Ok(Self {
            repository_id,
            published: RwLock::new(Arc::new(commits)),
            writer: Mutex::new(false),
            persistence,
        })
    }

    /// Repository this history belongs to
    pub fn repository_id(&self) -> RepositoryId {
        self.repository_id
    }

    fn published(&self) -> Published {
        Arc::clone(&self.published.read())
    }

    /// Number of commits
    pub fn len(&self) -> usize {
        self.published.read().len()
    }

    /// Whether no commit exists yet
    pub fn is_empty(&self) -> bool {
        self.published.read().is_empty()
    }

    /// Revision of the latest commit (0 when empty)
    pub fn head_revision(&self) -> Revision {
        head_revision(&self.published())
    }

    /// Latest commit
    ///
    /// # Errors
    ///
    /// [`CodehubError::EmptyHistory`] if no commit exists.
    pub fn head(&self) -> Result<Arc<Commit>> {
        self.published()
            .last()
            .cloned()
            .ok_or(CodehubError::EmptyHistory)
    }

    /// Commit at `revision`
    ///
    /// # Errors
    ///
    /// [`CodehubError::RevisionNotFound`] if `revision` is outside `1..=N`.
    pub fn at(&self, revision: Revision) -> Result<Arc<Commit>> {
        resolve(&self.published(), revision)
    }

    /// Snapshot at `revision`, where revision 0 is the empty snapshot
    pub fn snapshot_at(&self, revision: Revision) -> Result<Snapshot> {
        snapshot_at(&self.published(), revision)
    }

    /// Timestamp of the latest commit
    pub fn last_updated(&self) -> Option<DateTime<Utc>> {
        self.published().last().map(|c| c.created_at)
    }

    /// Create the initial commit wrapping `snapshot`
    ///
    /// # Errors
    ///
    /// - [`CodehubError::ConcurrentModification`] if the history is not empty
    /// - [`CodehubError::EmptyCommit`] if `snapshot` has no files
    #[instrument(skip(self, snapshot, message), fields(repository = %self.repository_id))]
    pub fn initialize(
        &self,
        snapshot: Snapshot,
        author: UserId,
        message: impl Into<String>,
    ) -> Result<Arc<Commit>> {
        let closed = self.writer.lock();
        if *closed {
            return Err(CodehubError::RepositoryNotFound(self.repository_id));
        }
        let published = self.published();
        if !published.is_empty() {
            return Err(CodehubError::ConcurrentModification(format!(
                "repository {} already has {} commits",
                self.repository_id,
                published.len()
            )));
        }
        if snapshot.is_empty() {
            return Err(CodehubError::EmptyCommit {
                base: Revision::EMPTY,
            });
        }

        let commit = Commit::new(
            self.repository_id,
            Revision::FIRST,
            Revision::EMPTY,
            author,
            message,
            Utc::now(),
            &Snapshot::empty(),
            snapshot,
        );
        self.publish(&published, commit)
    }

    /// Append a commit applying `edits` to the snapshot at `base`
    ///
    /// When `base` is the head, the new snapshot is `at(base).snapshot.merge(edits)`.
    /// When `base` is older, the edits are applied over the head snapshot as
    /// long as none of the edited paths changed after `base`.
    ///
    /// # Errors
    ///
    /// - [`CodehubError::RevisionNotFound`] if `base` is outside `1..=N`
    /// - [`CodehubError::InvalidPath`] if an edit path is invalid
    /// - [`CodehubError::EmptyCommit`] if the edits change nothing
    /// - [`CodehubError::CommitConflict`] if an edited path changed after `base`
    /// - any persistence error, in which case the history is unchanged
    #[instrument(skip(self, edits, message), fields(repository = %self.repository_id))]
    pub fn commit(
        &self,
        base: Revision,
        edits: &EditSet,
        author: UserId,
        message: impl Into<String>,
    ) -> Result<Arc<Commit>> {
        let closed = self.writer.lock();
        if *closed {
            return Err(CodehubError::RepositoryNotFound(self.repository_id));
        }
        let published = self.published();

        let base_commit = resolve(&published, base)?;
        let head = published.last().cloned().ok_or(CodehubError::EmptyHistory)?;

        let parent = if head.revision == base {
            base_commit
        } else {
            let conflicts = conflicting_paths(&base_commit.snapshot, &head.snapshot, edits)?;
            if !conflicts.is_empty() {
                debug!("Rejecting stale commit, {} conflicting paths", conflicts.len());
                return Err(CodehubError::CommitConflict {
                    base,
                    head: head.revision,
                    paths: conflicts,
                });
            }
            debug!("Rebasing edits from revision {} onto {}", base, head.revision);
            Arc::clone(&head)
        };

        let snapshot = parent.snapshot.merge(edits)?;
        if snapshot == parent.snapshot {
            return Err(CodehubError::EmptyCommit { base });
        }

        // Timestamps never go backwards, even if the clock does
        let created_at = Utc::now().max(head.created_at);
        let commit = Commit::new(
            self.repository_id,
            head.revision.next(),
            base,
            author,
            message,
            created_at,
            &parent.snapshot,
            snapshot,
        );
        self.publish(&published, commit)
    }

    /// Persist and then publish; caller holds the writer lock
    fn publish(&self, published: &Published, commit: Commit) -> Result<Arc<Commit>> {
        self.persistence.save_commit(self.repository_id, &commit)?;

        let commit = Arc::new(commit);
        let mut next = Vec::with_capacity(published.len() + 1);
        next.extend(published.iter().cloned());
        next.push(Arc::clone(&commit));
        *self.published.write() = Arc::new(next);

        info!(
            "Committed revision {} [{}] to repository {} ({} files changed)",
            commit.revision,
            commit.short_hash(),
            self.repository_id,
            commit.stats.files_changed()
        );
        Ok(commit)
    }

    /// Run `delete` under the writer lock, then refuse every later write
    ///
    /// Commits waiting on the lock fail with [`CodehubError::RepositoryNotFound`]
    /// once this returns. If `delete` fails the store stays open.
    pub fn close(&self, delete: impl FnOnce() -> Result<()>) -> Result<()> {
        let mut closed = self.writer.lock();
        if *closed {
            return Err(CodehubError::RepositoryNotFound(self.repository_id));
        }
        delete()?;
        *closed = true;
        debug!("Closed commit store of repository {}", self.repository_id);
        Ok(())
    }

    /// Diff the snapshots of two revisions; revision 0 is the empty snapshot
    ///
    /// # Errors
    ///
    /// [`CodehubError::RevisionNotFound`] if either revision is above the head.
    #[instrument(skip(self), fields(repository = %self.repository_id))]
    pub fn diff_between(&self, from: Revision, to: Revision) -> Result<DiffResult> {
        let published = self.published();
        let base = snapshot_at(&published, from)?;
        let target = snapshot_at(&published, to)?;
        Ok(diff_snapshots(&base, &target).with_revisions(from, to))
    }

    /// Point-in-time view of the history
    pub fn history(&self) -> History {
        History {
            commits: self.published(),
        }
    }
}

fn head_revision(published: &[Arc<Commit>]) -> Revision {
    published.last().map_or(Revision::EMPTY, |c| c.revision)
}

fn resolve(published: &Published, revision: Revision) -> Result<Arc<Commit>> {
    revision
        .index()
        .and_then(|i| published.get(i))
        .cloned()
        .ok_or(CodehubError::RevisionNotFound {
            revision,
            head: head_revision(published),
        })
}

fn snapshot_at(published: &Published, revision: Revision) -> Result<Snapshot> {
    if revision.is_empty() {
        Ok(Snapshot::empty())
    } else {
        resolve(published, revision).map(|c| c.snapshot.clone())
    }
}

/// Edited paths whose content differs between `base` and `head`
fn conflicting_paths(base: &Snapshot, head: &Snapshot, edits: &EditSet) -> Result<Vec<String>> {
    Ok(edits
        .normalized()?
        .into_keys()
        .filter(|path| base.get(path).ok() != head.get(path).ok())
        .collect())
}

/// Immutable view of a history at one point in time
///
/// Iteration is lazy and yields commit metadata only; snapshots stay shared
/// with the store.
#[derive(Debug, Clone)]
pub struct History {
    commits: Published,
}

impl History {
    /// Number of commits
    pub fn len(&self) -> usize {
        self.commits.len()
    }

    /// Whether the history is empty
    pub fn is_empty(&self) -> bool {
        self.commits.is_empty()
    }

    /// Commit metadata, oldest first
    pub fn iter(&self) -> impl DoubleEndedIterator<Item = CommitSummary> + '_ {
        self.commits.iter().map(|c| c.summary())
    }

    /// Shared commit handles, oldest first
    pub fn commits(&self) -> impl DoubleEndedIterator<Item = &Arc<Commit>> + '_ {
        self.commits.iter()
    }

    /// One page of commit metadata, newest first
    pub fn page(&self, page: Page) -> HistoryPage {
        let total = self.commits.len();
        let entries: Vec<CommitSummary> = self
            .commits
            .iter()
            .rev()
            .skip(page.offset())
            .take(page.size)
            .map(|c| c.summary())
            .collect();
        let has_more = page.offset().saturating_add(entries.len()) < total;
        HistoryPage {
            entries,
            page,
            total,
            has_more,
        }
    }
}

/// A page of the commits view
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryPage {
    /// Commit metadata, newest first
    pub entries: Vec<CommitSummary>,
    /// The page that was requested
    pub page: Page,
    /// Total number of commits
    pub total: usize,
    /// Whether older commits follow on later pages
    pub has_more: bool,
}

impl HistoryPage {
    /// Number of pages at this page size
    pub fn total_pages(&self) -> usize {
        self.total.div_ceil(self.page.size)
    }
}
