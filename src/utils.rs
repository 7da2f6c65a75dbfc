//! Utility functions for CodeHub
//!
//! Hashing helpers, atomic file writes for the on-disk storage backend, and
//! small formatting helpers shared by the library and the CLI.

use crate::error::{CodehubError, Result};
use sha2::{Digest, Sha256};
use std::fs;
use std::io::Write;
use std::path::Path;
use tracing::trace;

/// Hash arbitrary data using SHA-256
///
/// Returns the hash as a 64-character hexadecimal string.
pub fn hash_data(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

/// First 8 characters of a hex digest, for log lines and listings
pub fn short_hash(hash: &str) -> &str {
    &hash[..8.min(hash.len())]
}

/// Write a file atomically
///
/// Content goes to a temporary file in the destination directory which is then
/// renamed over `path`. Either the complete new content is visible or the old
/// file (if any) is left untouched.
pub fn atomic_write(path: &Path, content: &[u8]) -> Result<()> {
    let parent = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(parent)?;

    let mut temp = tempfile::NamedTempFile::new_in(parent)?;
    temp.write_all(content)?;
    temp.as_file().sync_all()?;
    temp.persist(path).map_err(|e| CodehubError::Io(e.error))?;

    trace!("Atomically wrote {} bytes to {:?}", content.len(), path);
    Ok(())
}

/// Write a file atomically, failing if it already exists
///
/// Used for append-only records where two writers racing for the same slot
/// must not silently overwrite each other.
pub fn atomic_create(path: &Path, content: &[u8]) -> Result<()> {
    let parent = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(parent)?;

    let mut temp = tempfile::NamedTempFile::new_in(parent)?;
    temp.write_all(content)?;
    temp.as_file().sync_all()?;
    temp.persist_noclobber(path).map_err(|e| {
        if e.error.kind() == std::io::ErrorKind::AlreadyExists {
            CodehubError::ConcurrentModification(format!("{:?} already exists", path))
        } else {
            CodehubError::Io(e.error)
        }
    })?;
    Ok(())
}

/// Format bytes in human-readable form
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];

    if bytes < 1024 {
        return format!("{} B", bytes);
    }

    let mut size = bytes as f64;
    let mut unit = 0;
    while size >= 1024.0 && unit < UNITS.len() - 1 {
        size /= 1024.0;
        unit += 1;
    }
    format!("{:.2} {}", size, UNITS[unit])
}
