//! Error types for the CodeHub history core
//!
//! This module defines all error types that can occur while building snapshots,
//! appending commits, computing diffs and persisting repositories. Errors are
//! designed to be informative and actionable: the core never retries anything on
//! its own, so every variant carries enough context for the caller to decide
//! whether to re-fetch a base revision and resubmit.

use std::path::PathBuf;
use thiserror::Error;

use crate::commit::Revision;
use crate::types::{RepositoryId, UserId};

/// Type alias for Results in the CodeHub library
pub type Result<T> = std::result::Result<T, CodehubError>;

/// Main error type for all CodeHub operations
#[derive(Debug, Error)]
pub enum CodehubError {
    /// Malformed or unsafe path in a snapshot or edit set
    #[error("Invalid path {path:?}: {reason}")]
    InvalidPath {
        /// The path as supplied by the caller
        path: String,
        /// Why the path was rejected
        reason: String,
    },

    /// Path is not part of the snapshot
    #[error("Path not found: {0}")]
    PathNotFound(String),

    /// Revision outside the valid range of a repository's history
    #[error("Revision {revision} not found (head is {head})")]
    RevisionNotFound {
        /// Requested revision
        revision: Revision,
        /// Current head revision (0 when the history is empty)
        head: Revision,
    },

    /// Edits produce no change relative to the base snapshot
    #[error("Empty commit: edits do not change revision {base}")]
    EmptyCommit {
        /// Base revision the edits were applied to
        base: Revision,
    },

    /// Edits against a stale base touch paths changed since that base
    #[error("Commit conflict: {paths:?} changed between revision {base} and head {head}")]
    CommitConflict {
        /// Base revision the edits were made against
        base: Revision,
        /// Head revision at the time of the commit
        head: Revision,
        /// Edited paths that changed after the base
        paths: Vec<String>,
    },

    /// A repository without any commit was asked for its head
    #[error("Repository history is empty")]
    EmptyHistory,

    /// Repository does not exist
    #[error("Repository not found: {0}")]
    RepositoryNotFound(RepositoryId),

    /// `(owner, name)` is already taken
    #[error("Repository {name:?} already exists for owner {owner}")]
    RepositoryExists {
        /// Owner of the existing repository
        owner: UserId,
        /// Conflicting name
        name: String,
    },

    /// Repository name fails validation
    #[error("Invalid repository name {name:?}: {reason}")]
    InvalidName {
        /// Rejected name
        name: String,
        /// Why the name was rejected
        reason: String,
    },

    /// File content exceeds the configured limit
    #[error("File too large: {path} ({size} bytes exceeds limit of {limit} bytes)")]
    FileTooLarge {
        /// Path of the offending edit
        path: String,
        /// Actual content size
        size: u64,
        /// Configured size limit
        limit: u64,
    },

    /// I/O errors during storage operations
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Errors during JSON serialization/deserialization
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Errors during bincode serialization/deserialization
    #[error("Bincode error: {0}")]
    Bincode(String),

    /// Decompression errors
    #[error("Decompression error: {0}")]
    Decompression(String),

    /// Storage-related errors
    #[error("Storage error: {0}")]
    Storage(String),

    /// Storage is not initialized
    #[error("Storage not initialized at path: {0:?}")]
    StorageNotInitialized(PathBuf),

    /// Storage already exists
    #[error("Storage already exists at path: {0:?}")]
    StorageAlreadyExists(PathBuf),

    /// Corruption detected while loading or verifying history
    #[error("Corruption detected: {0}")]
    CorruptionDetected(String),

    /// Hash mismatch during verification
    #[error("Hash mismatch - expected: {expected}, actual: {actual}")]
    HashMismatch {
        /// Expected hash value
        expected: String,
        /// Actual computed hash value
        actual: String,
    },

    /// Another writer already persisted the same revision
    #[error("Concurrent modification detected: {0}")]
    ConcurrentModification(String),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),
}

impl From<bincode::error::DecodeError> for CodehubError {
    fn from(err: bincode::error::DecodeError) -> Self {
        CodehubError::Bincode(err.to_string())
    }
}

impl From<bincode::error::EncodeError> for CodehubError {
    fn from(err: bincode::error::EncodeError) -> Self {
        CodehubError::Bincode(err.to_string())
    }
}

impl CodehubError {
    /// Create an invalid path error
    pub fn invalid_path(path: impl Into<String>, reason: impl Into<String>) -> Self {
        CodehubError::InvalidPath {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Create an invalid name error
    pub fn invalid_name(name: impl Into<String>, reason: impl Into<String>) -> Self {
        CodehubError::InvalidName {
            name: name.into(),
            reason: reason.into(),
        }
    }

    /// Create a storage error with a custom message
    pub fn storage(msg: impl Into<String>) -> Self {
        CodehubError::Storage(msg.into())
    }

    /// Create a decompression error with a custom message
    pub fn decompression(msg: impl Into<String>) -> Self {
        CodehubError::Decompression(msg.into())
    }

    /// Check if the caller can fix this error by changing its request
    ///
    /// These are the conditions a UI would surface to the user, for example
    /// "re-fetch the base revision and resubmit your edits".
    pub fn is_user_correctable(&self) -> bool {
        matches!(
            self,
            CodehubError::InvalidPath { .. }
                | CodehubError::PathNotFound(_)
                | CodehubError::RevisionNotFound { .. }
                | CodehubError::EmptyCommit { .. }
                | CodehubError::CommitConflict { .. }
                | CodehubError::RepositoryExists { .. }
                | CodehubError::InvalidName { .. }
                | CodehubError::FileTooLarge { .. }
        )
    }

    /// Check if this error indicates corruption or a broken invariant
    pub fn is_corruption(&self) -> bool {
        matches!(
            self,
            CodehubError::CorruptionDetected(_)
                | CodehubError::HashMismatch { .. }
                | CodehubError::EmptyHistory
        )
    }

    /// Get a user-friendly error message with suggestions
    pub fn user_message(&self) -> String {
        match self {
            CodehubError::RevisionNotFound { revision, head } => {
                format!(
                    "Revision {} does not exist. Valid revisions are 1 through {}.",
                    revision, head
                )
            }
            CodehubError::EmptyCommit { base } => {
                format!(
                    "Nothing to commit: your edits leave revision {} unchanged.",
                    base
                )
            }
            CodehubError::CommitConflict { base, head, paths } => {
                format!(
                    "{} changed after revision {} (head is now {}). Re-fetch revision {} and resubmit your edits.",
                    paths.join(", "),
                    base,
                    head,
                    head
                )
            }
            CodehubError::RepositoryExists { name, .. } => {
                format!("You already have a repository named '{}'. Pick another name.", name)
            }
            CodehubError::FileTooLarge { path, size, limit } => {
                format!(
                    "File {} is too large ({} bytes). Maximum allowed size is {} bytes.",
                    path, size, limit
                )
            }
            CodehubError::StorageNotInitialized(path) => {
                format!("Storage not initialized at {:?}. Run 'codehub init' first.", path)
            }
            _ => self.to_string(),
        }
    }
}
