//! History verification and integrity checking
//!
//! This module checks that a repository's commits form a valid history.
//!
//! ## Overview
//!
//! Verification operates at two levels:
//!
//! 1. **Commit Level**: snapshot digest, commit hash and owning repository
//! 2. **History Level**: contiguous revisions starting at 1, non-decreasing
//!    timestamps, no duplicate commit hashes, no no-op commits and statistics
//!    matching the parent snapshot
//!
//! Verification failures are reported in the [`VerificationReport`], never as
//! errors. [`CommitStore::from_commits`](crate::history::CommitStore::from_commits)
//! refuses to load a history whose report is not valid.
//!
//! ## Usage
//!
//! ```rust
//! use std::sync::Arc;
//! use codehub::history::CommitStore;
//! use codehub::snapshot::Snapshot;
//! use codehub::repository::RepositoryRecord;
//! use codehub::storage::{MemoryPersistence, Persistence};
//! use codehub::types::{RepositoryId, UserId};
//! use codehub::verification::HistoryVerifier;
//!
//! let persistence = Arc::new(MemoryPersistence::new());
//! persistence.save_repository(&RepositoryRecord::new(RepositoryId(1), UserId(1), "a")).unwrap();
//! let store = CommitStore::new(RepositoryId(1), persistence);
//! store.initialize(Snapshot::new([("a.txt", "a")]).unwrap(), UserId(1), "init").unwrap();
//!
//! let commits: Vec<_> = store.history().commits().cloned().collect();
//! let report = HistoryVerifier::new(RepositoryId(1)).verify(&commits);
//! assert!(report.is_valid(), "{}", report.summary());
//! ```

use crate::collections::{HashSet, HashSetExt};
use crate::commit::{Commit, CommitStats, Revision};
use crate::snapshot::Snapshot;
use crate::types::RepositoryId;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, warn};

/// Verifier for the history of one repository
#[derive(Debug, Clone, Copy)]
pub struct HistoryVerifier {
    repository_id: RepositoryId,
}

impl HistoryVerifier {
    /// Create a verifier expecting commits of `repository_id`
    pub fn new(repository_id: RepositoryId) -> Self {
        Self { repository_id }
    }

    /// Verify commits given oldest first
    pub fn verify(&self, commits: &[Arc<Commit>]) -> VerificationReport {
        let start = Instant::now();
        let mut report = VerificationReport::new(self.repository_id);
        report.total_commits = commits.len();

        // Digests are the expensive part, hash snapshots in parallel
        report.commit_checks = commits
            .par_iter()
            .map(|commit| self.verify_commit(commit))
            .collect();
        report.commits_valid = report.commit_checks.iter().filter(|c| c.is_valid()).count();
        for check in report.commit_checks.iter().filter(|c| !c.is_valid()) {
            if let Some(error) = &check.error {
                report.errors.push(format!("r{}: {}", check.revision, error));
            }
        }

        let mut seen_hashes = HashSet::with_capacity(commits.len());
        let empty = Snapshot::empty();
        for (index, commit) in commits.iter().enumerate() {
            let expected = Revision(index as u64 + 1);
            if commit.revision != expected {
                report.revisions_contiguous = false;
                report.errors.push(format!(
                    "expected revision {}, found {}",
                    expected, commit.revision
                ));
            }
            if commit.base_revision >= commit.revision {
                report.revisions_contiguous = false;
                report.errors.push(format!(
                    "r{}: base revision {} is not older",
                    commit.revision, commit.base_revision
                ));
            }

            let previous = index.checked_sub(1).map(|i| &commits[i]);
            if let Some(previous) = previous {
                if commit.created_at < previous.created_at {
                    report.timestamps_ordered = false;
                    report.errors.push(format!(
                        "r{}: created before r{}",
                        commit.revision, previous.revision
                    ));
                }
            }

            let previous_snapshot = previous.map_or(&empty, |p| &p.snapshot);
            if commit.snapshot == *previous_snapshot {
                report.no_empty_commits = false;
                report
                    .errors
                    .push(format!("r{}: snapshot identical to its parent", commit.revision));
            }
            if commit.stats != CommitStats::between(previous_snapshot, &commit.snapshot) {
                report.stats_consistent = false;
                report
                    .errors
                    .push(format!("r{}: statistics do not match its parent", commit.revision));
            }

            if !seen_hashes.insert(commit.commit_hash.clone()) {
                report.no_hash_conflicts = false;
                report
                    .errors
                    .push(format!("r{}: duplicate commit hash", commit.revision));
            }
        }

        report.verification_time_ms = start.elapsed().as_millis() as u64;
        if report.is_valid() {
            debug!("{}", report.summary());
        } else {
            warn!("{}", report.summary());
        }
        report
    }

    fn verify_commit(&self, commit: &Commit) -> CommitVerification {
        let mut check = CommitVerification {
            revision: commit.revision,
            snapshot_digest_valid: commit.snapshot.digest() == commit.snapshot_digest,
            commit_hash_valid: commit.compute_commit_hash() == commit.commit_hash,
            repository_matches: commit.repository_id == self.repository_id,
            error: None,
        };

        let problems: Vec<&str> = [
            (!check.snapshot_digest_valid).then_some("snapshot digest mismatch"),
            (!check.commit_hash_valid).then_some("commit hash mismatch"),
            (!check.repository_matches).then_some("belongs to another repository"),
        ]
        .into_iter()
        .flatten()
        .collect();
        if !problems.is_empty() {
            check.error = Some(problems.join(", "));
        }
        check
    }
}

/// Verification result for a whole history
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerificationReport {
    /// Repository being verified
    pub repository_id: RepositoryId,
    /// Number of commits examined
    pub total_commits: usize,
    /// Number of commits passing every per-commit check
    pub commits_valid: usize,
    /// Revisions run 1..=N without gaps
    pub revisions_contiguous: bool,
    /// Timestamps never decrease
    pub timestamps_ordered: bool,
    /// No commit repeats its parent snapshot
    pub no_empty_commits: bool,
    /// No two commits share a hash
    pub no_hash_conflicts: bool,
    /// Recorded statistics match the snapshots
    pub stats_consistent: bool,
    /// Per-commit results, oldest first
    pub commit_checks: Vec<CommitVerification>,
    /// Time taken in milliseconds
    pub verification_time_ms: u64,
    /// Every problem found
    pub errors: Vec<String>,
}

impl VerificationReport {
    /// Create an empty report
    pub fn new(repository_id: RepositoryId) -> Self {
        Self {
            repository_id,
            total_commits: 0,
            commits_valid: 0,
            revisions_contiguous: true,
            timestamps_ordered: true,
            no_empty_commits: true,
            no_hash_conflicts: true,
            stats_consistent: true,
            commit_checks: Vec::new(),
            verification_time_ms: 0,
            errors: Vec::new(),
        }
    }

    /// Check if the history is fully valid
    pub fn is_valid(&self) -> bool {
        self.commits_valid == self.total_commits
            && self.revisions_contiguous
            && self.timestamps_ordered
            && self.no_empty_commits
            && self.no_hash_conflicts
            && self.stats_consistent
            && self.errors.is_empty()
    }

    /// Get a summary of the verification
    pub fn summary(&self) -> String {
        if self.is_valid() {
            format!(
                "Repository {} is valid ({} commits verified in {}ms)",
                self.repository_id, self.total_commits, self.verification_time_ms
            )
        } else {
            let issues = [
                (self.commits_valid < self.total_commits).then_some("commit integrity failures"),
                (!self.revisions_contiguous).then_some("revision gaps"),
                (!self.timestamps_ordered).then_some("timestamps out of order"),
                (!self.no_empty_commits).then_some("no-op commits"),
                (!self.no_hash_conflicts).then_some("duplicate commit hashes"),
                (!self.stats_consistent).then_some("inconsistent statistics"),
            ]
            .into_iter()
            .flatten()
            .collect::<Vec<_>>()
            .join(", ");

            format!(
                "Repository {} is invalid: {} ({}/{} commits valid)",
                self.repository_id, issues, self.commits_valid, self.total_commits
            )
        }
    }
}

/// Verification result for a single commit
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommitVerification {
    /// Revision of the commit
    pub revision: Revision,
    /// Whether the snapshot matches its digest
    pub snapshot_digest_valid: bool,
    /// Whether the metadata matches the commit hash
    pub commit_hash_valid: bool,
    /// Whether the commit belongs to the verified repository
    pub repository_matches: bool,
    /// Error message if verification failed
    pub error: Option<String>,
}

impl CommitVerification {
    /// Check if the commit passed
    pub fn is_valid(&self) -> bool {
        self.snapshot_digest_valid
            && self.commit_hash_valid
            && self.repository_matches
            && self.error.is_none()
    }
}
