//! Core data types used throughout the CodeHub library
//!
//! This module contains identifiers and configuration shared across the
//! snapshot, history, storage and service layers.
//!
//! ## Overview
//!
//! - **Identity**: `RepositoryId`, `UserId` - opaque numeric identifiers handed in by
//!   the surrounding application (users and sessions live outside this crate)
//! - **Paging**: `Page` - 1-based page selection for history and listing views
//! - **Configuration**: `HubConfig` - service settings, loadable from a JSON file
//! - **Storage**: `StorageMetadata` - header written at the root of a storage directory
//!
//! ## Examples
//!
//! ```rust
//! use codehub::types::{HubConfig, Page};
//!
//! let config = HubConfig {
//!     history_page_size: 50,
//!     ..Default::default()
//! };
//! let page = Page::first(config.history_page_size);
//! assert_eq!(page.offset(), 0);
//! ```

use crate::compression::CompressionStrategy;
use crate::error::{CodehubError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

/// Identifier of a repository, unique within one hub
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RepositoryId(pub u64);

impl fmt::Display for RepositoryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of a user, owned by the external account system
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(pub u64);

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A 1-based page request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Page {
    /// Page number, starting at 1
    pub number: usize,
    /// Maximum number of entries on the page
    pub size: usize,
}

impl Page {
    /// Create a page request; zero values are clamped to 1
    pub fn new(number: usize, size: usize) -> Self {
        Self {
            number: number.max(1),
            size: size.max(1),
        }
    }

    /// First page with the given size
    pub fn first(size: usize) -> Self {
        Self::new(1, size)
    }

    /// Number of entries skipped before this page
    pub fn offset(&self) -> usize {
        (self.number - 1).saturating_mul(self.size)
    }

    /// The page after this one
    pub fn next(&self) -> Self {
        Self::new(self.number + 1, self.size)
    }
}

/// Configuration for a [`Hub`](crate::Hub) instance
///
/// Serialized as JSON so it can live next to the storage it configures.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HubConfig {
    /// Storage location (None keeps everything in memory)
    pub storage_path: Option<PathBuf>,
    /// Number of commits per history page
    pub history_page_size: usize,
    /// Number of repositories returned by the explore listing
    pub explore_limit: usize,
    /// Maximum size of a single file in an edit (0 = unlimited)
    pub max_file_size: u64,
    /// Compression applied to stored commit blobs
    pub compression: CompressionStrategy,
    /// Context lines used when rendering unified diffs
    pub diff_context_lines: usize,
    /// CodeHub version that wrote this config
    pub version: String,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            storage_path: None,
            history_page_size: 20,
            explore_limit: 12,
            max_file_size: 0,
            compression: CompressionStrategy::default(),
            diff_context_lines: 3,
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

impl HubConfig {
    /// Load configuration from a JSON file
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        let config: HubConfig = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration as pretty JSON
    pub fn save(&self, path: &Path) -> Result<()> {
        self.validate()?;
        let json = serde_json::to_string_pretty(self)?;
        crate::utils::atomic_write(path, json.as_bytes())
    }

    /// Check that all settings are usable
    pub fn validate(&self) -> Result<()> {
        if self.history_page_size == 0 {
            return Err(CodehubError::InvalidConfiguration(
                "history_page_size must be at least 1".to_string(),
            ));
        }
        if self.explore_limit == 0 {
            return Err(CodehubError::InvalidConfiguration(
                "explore_limit must be at least 1".to_string(),
            ));
        }
        if let CompressionStrategy::Adaptive { min_size } = self.compression {
            if min_size == 0 {
                return Err(CodehubError::InvalidConfiguration(
                    "adaptive compression needs a non-zero min_size".to_string(),
                ));
            }
        }
        Ok(())
    }
}

/// Metadata stored at the root of a storage directory
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageMetadata {
    /// Version of storage format
    pub format_version: u32,
    /// CodeHub version that created the storage
    pub codehub_version: String,
    /// Creation timestamp
    pub created_at: DateTime<Utc>,
    /// Compression used for new commit blobs
    pub compression: CompressionStrategy,
}
