//! # CodeHub - Snapshot history for hosted repositories
//!
//! The version-history core of a small code hosting service: repositories whose
//! history is a linear sequence of immutable, whole-tree snapshots.
//!
//! ## Overview
//!
//! CodeHub stores every revision of a repository as a complete mapping from
//! path to content, which lets you:
//! - Create repositories seeded with an initial commit
//! - Commit sets of edits (writes and deletions) against a base revision
//! - Read the full tree at any revision
//! - Compare any two revisions with per-file line diffs
//! - Page through commit history, newest first
//! - Verify that a stored history is intact
//!
//! Users, sessions and HTTP live in the surrounding application. Every
//! operation takes the acting user's id explicitly.
//!
//! ## Architecture
//!
//! - **Snapshots**: immutable `path -> bytes` maps with shared file contents, so
//!   unchanged files cost nothing between revisions
//! - **Commit Stores**: one per repository; commits serialize on a writer lock
//!   while readers see a consistent published history without blocking
//! - **Line Diffs**: LCS-based edit scripts with unified-diff rendering; binary
//!   content is reported as replaced, never diffed
//! - **Persistence**: pluggable; in memory or on disk with LZ4-compressed
//!   commit files written atomically
//!
//! ## Quick Start
//!
//! ```rust
//! use codehub::{EditSet, Hub, Revision, UserId};
//!
//! # fn main() -> codehub::Result<()> {
//! let hub = Hub::in_memory()?;
//! let alice = UserId(1);
//!
//! // Creating a repository seeds revision 1 with a README
//! let repo = hub.create_repository(alice, "hello-world", "My first repo", false)?;
//!
//! // Commit against the current head
//! let edits = EditSet::new()
//!     .write("src/main.rs", "fn main() {}\n")
//!     .write("README.md", "# hello-world\n\nNow with code\n");
//! hub.commit_to_repository(repo.id(), Revision(1), &edits, alice, "Add main")?;
//!
//! // Read any revision back
//! let snapshot = hub.get_snapshot(repo.id(), Revision(2))?;
//! assert_eq!(snapshot.len(), 2);
//!
//! // Compare revisions
//! let diff = hub.get_diff(repo.id(), Revision(1), Revision(2))?;
//! println!("{}", diff.to_unified(3));
//! # Ok(())
//! # }
//! ```
//!
//! ## Persistent Storage
//!
//! ```rust,no_run
//! use codehub::{CompressionStrategy, HubBuilder, UserId};
//! use std::path::PathBuf;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let hub = HubBuilder::new()
//!     .storage_path(PathBuf::from("./codehub-data"))
//!     .compression_strategy(CompressionStrategy::Fast)
//!     .max_file_size(10 * 1024 * 1024)
//!     .build()?;
//!
//! let repo = hub.create_repository(UserId(1), "notes", "", true)?;
//! let report = hub.verify_repository(repo.id())?;
//! assert!(report.is_valid());
//! # Ok(())
//! # }
//! ```
//!
//! ## Key Concepts
//!
//! ### Revisions
//!
//! Revisions are numbered `1..=N` per repository. Revision 0 names the empty
//! snapshot and can be used as the base side of a diff.
//!
//! ### Commits Against a Base
//!
//! A commit names the revision its edits were made against. If other commits
//! landed in the meantime, the edits are applied over the head as long as none
//! of the edited paths changed; otherwise the commit fails with
//! [`CodehubError::CommitConflict`] and the history is left untouched.
//!
//! ### Safe Rendering
//!
//! Commit messages and READMEs pass through a [`MarkupRenderer`] before they
//! are shown. The default [`EscapingRenderer`] escapes HTML.
//!
//! ## Error Handling
//!
//! All operations return `Result<T, CodehubError>`. Errors distinguish caller
//! mistakes (missing revisions, invalid paths, conflicts) from storage failures
//! and corruption, see [`CodehubError::is_user_correctable`].
//!
//! ## Module Organization
//!
//! - [`hub`]: the service entry point and its builder
//! - [`repository`]: repository records and listings
//! - [`history`]: per-repository commit stores and history paging
//! - [`commit`]: revisions and immutable commits
//! - [`snapshot`]: snapshots, file contents and edit sets
//! - [`diff`]: line diffs and unified rendering
//! - [`changes`]: snapshot comparison
//! - [`storage`]: persistence backends
//! - [`verification`]: history integrity checks
//! - [`render`]: the safe markup seam
//! - [`compression`]: compression strategies
//! - [`types`]: identifiers and configuration
//! - [`utils`]: hashing, atomic writes and formatting helpers
//! - [`error`]: error types

// Public API modules
pub mod changes;
pub mod commit;
pub mod compression;
pub mod diff;
pub mod error;
pub mod history;
pub mod hub;
pub mod render;
pub mod repository;
pub mod snapshot;
pub mod storage;
pub mod types;
pub mod utils;
pub mod verification;

// Internal modules (not part of public API)
mod collections;

// Re-export main types for convenience
pub use changes::{diff_snapshots, ChangeKind, DiffResult, DiffStats, PathChange};
pub use commit::{Commit, CommitStats, CommitSummary, Revision};
pub use compression::{CompressionEngine, CompressionStrategy};
pub use diff::{diff_lines, unified_diff, EditOp, EditScript, Hunk};
pub use error::{CodehubError, Result};
pub use history::{CommitStore, History, HistoryPage};
pub use hub::{CreateRepository, Hub, HubBuilder, RepositoryUpdate};
pub use render::{EscapingRenderer, MarkupRenderer, SafeMarkup};
pub use repository::{Repository, RepositoryInfo, RepositoryRecord};
pub use snapshot::{Edit, EditSet, FileContent, Snapshot};
pub use storage::{FileStorage, MemoryPersistence, Persistence, StoredRepository};
pub use types::*;
pub use verification::{HistoryVerifier, VerificationReport};
