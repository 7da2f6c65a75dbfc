//! Immutable file-tree snapshots
//!
//! A [`Snapshot`] is the complete state of a repository's files at one commit:
//! a mapping from normalized, repository-relative path to file content. Snapshots
//! are never mutated. [`Snapshot::merge`] is the only way to derive a new snapshot
//! from an old one, and it leaves the receiver untouched.
//!
//! ## Path rules
//!
//! Every path is normalized on the way in:
//!
//! - segments are separated by `/`; backslashes and NUL characters are rejected
//! - empty and `.` segments are dropped, so `/src//./main.rs` becomes `src/main.rs`
//! - any `..` segment is rejected
//! - the normalized path must be non-empty and at most [`MAX_PATH_LEN`] bytes
//!
//! Two inputs that normalize to the same path are rejected, as is a path that is
//! both a file and the directory of another file (`docs` and `docs/index.md`).
//!
//! ## Examples
//!
//! ```rust
//! use codehub::snapshot::{EditSet, Snapshot};
//!
//! let base = Snapshot::new([("README.md", "# Hello\n")])?;
//! let next = base.merge(
//!     &EditSet::new()
//!         .write("README.md", "# Hello\nWorld\n")
//!         .write("LICENSE", "MIT"),
//! )?;
//!
//! assert_eq!(base.len(), 1);
//! assert_eq!(next.len(), 2);
//! assert_eq!(next.get("LICENSE")?.as_text(), Some("MIT"));
//! # Ok::<(), codehub::CodehubError>(())
//! ```

use crate::error::{CodehubError, Result};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use tracing::trace;

/// Longest accepted normalized path, in bytes
pub const MAX_PATH_LEN: usize = 4096;

/// Content of a single file
///
/// Cheap to clone: the bytes are shared between every snapshot that still
/// contains the file unchanged.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "Vec<u8>", into = "Vec<u8>")]
pub struct FileContent(Arc<[u8]>);

impl FileContent {
    /// Raw bytes
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Content as text, if it is text
    ///
    /// Returns `None` for binary content (see [`is_binary`]).
    pub fn as_text(&self) -> Option<&str> {
        if self.0.contains(&0) {
            return None;
        }
        std::str::from_utf8(&self.0).ok()
    }

    /// Whether the content is binary
    pub fn is_binary(&self) -> bool {
        is_binary(&self.0)
    }

    /// Size in bytes
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the file is empty
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for FileContent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.as_text() {
            Some(text) if text.len() <= 64 => write!(f, "{:?}", text),
            Some(_) => write!(f, "<text, {} bytes>", self.len()),
            None => write!(f, "<binary, {} bytes>", self.len()),
        }
    }
}

impl From<Vec<u8>> for FileContent {
    fn from(bytes: Vec<u8>) -> Self {
        FileContent(bytes.into())
    }
}

impl From<&[u8]> for FileContent {
    fn from(bytes: &[u8]) -> Self {
        FileContent(bytes.into())
    }
}

impl<const N: usize> From<&[u8; N]> for FileContent {
    fn from(bytes: &[u8; N]) -> Self {
        FileContent(bytes.as_slice().into())
    }
}

impl From<String> for FileContent {
    fn from(text: String) -> Self {
        FileContent::from(text.into_bytes())
    }
}

impl From<&str> for FileContent {
    fn from(text: &str) -> Self {
        FileContent(text.as_bytes().into())
    }
}

impl From<FileContent> for Vec<u8> {
    fn from(content: FileContent) -> Self {
        content.0.to_vec()
    }
}

/// Check whether bytes should be treated as binary
///
/// Content is binary if it contains a NUL byte or is not valid UTF-8.
pub fn is_binary(content: &[u8]) -> bool {
    content.contains(&0) || std::str::from_utf8(content).is_err()
}

/// Normalize a repository-relative path
///
/// # Errors
///
/// Returns [`CodehubError::InvalidPath`] for empty paths, `..` segments,
/// backslashes, NUL characters, or paths longer than [`MAX_PATH_LEN`].
pub fn normalize_path(raw: &str) -> Result<String> {
    if raw.contains('\0') {
        return Err(CodehubError::invalid_path(raw, "contains a NUL character"));
    }
    if raw.contains('\\') {
        return Err(CodehubError::invalid_path(raw, "backslash separators are not allowed"));
    }

    let mut segments = Vec::new();
    for segment in raw.split('/') {
        match segment {
            "" | "." => continue,
            ".." => return Err(CodehubError::invalid_path(raw, "path traversal segment")),
            s => segments.push(s),
        }
    }

    let normalized = segments.join("/");
    if normalized.is_empty() {
        return Err(CodehubError::invalid_path(raw, "empty path"));
    }
    if normalized.len() > MAX_PATH_LEN {
        return Err(CodehubError::invalid_path(raw, "path too long"));
    }
    Ok(normalized)
}

/// A single edit in an [`EditSet`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Edit {
    /// Create or replace the file with this content
    Write(FileContent),
    /// Tombstone: remove the file
    Delete,
}

/// A set of path edits to apply on top of a base snapshot
///
/// Paths are validated when the set is applied, before anything is changed.
///
/// ```rust
/// use codehub::snapshot::EditSet;
///
/// let edits = EditSet::new()
///     .write("src/lib.rs", "pub fn hello() {}\n")
///     .delete("old/notes.txt");
/// assert_eq!(edits.len(), 2);
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EditSet {
    edits: Vec<(String, Edit)>,
}

impl EditSet {
    /// Create an empty edit set
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a write edit
    pub fn write(mut self, path: impl Into<String>, content: impl Into<FileContent>) -> Self {
        self.edits.push((path.into(), Edit::Write(content.into())));
        self
    }

    /// Add a tombstone edit
    pub fn delete(mut self, path: impl Into<String>) -> Self {
        self.edits.push((path.into(), Edit::Delete));
        self
    }

    /// Add an edit in place
    pub fn insert(&mut self, path: impl Into<String>, edit: Edit) {
        self.edits.push((path.into(), edit));
    }

    /// Number of edits
    pub fn len(&self) -> usize {
        self.edits.len()
    }

    /// Whether there are no edits
    pub fn is_empty(&self) -> bool {
        self.edits.is_empty()
    }

    /// Iterate over edits as supplied
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Edit)> {
        self.edits.iter().map(|(path, edit)| (path.as_str(), edit))
    }

    /// Size of the largest written file
    pub fn largest_write(&self) -> Option<(&str, usize)> {
        self.edits
            .iter()
            .filter_map(|(path, edit)| match edit {
                Edit::Write(content) => Some((path.as_str(), content.len())),
                Edit::Delete => None,
            })
            .max_by_key(|(_, len)| *len)
    }

    /// Validate and normalize every path
    ///
    /// # Errors
    ///
    /// Fails with [`CodehubError::InvalidPath`] on the first invalid path or
    /// when two edits normalize to the same path.
    pub fn normalized(&self) -> Result<BTreeMap<String, &Edit>> {
        let mut normalized = BTreeMap::new();
        for (raw, edit) in &self.edits {
            let path = normalize_path(raw)?;
            if normalized.insert(path, edit).is_some() {
                return Err(CodehubError::invalid_path(
                    raw.as_str(),
                    "duplicate path after normalization",
                ));
            }
        }
        Ok(normalized)
    }
}

impl<P: Into<String>> FromIterator<(P, Edit)> for EditSet {
    fn from_iter<T: IntoIterator<Item = (P, Edit)>>(iter: T) -> Self {
        Self {
            edits: iter.into_iter().map(|(p, e)| (p.into(), e)).collect(),
        }
    }
}

/// Immutable full file-tree state at one point in history
#[derive(Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(
    try_from = "BTreeMap<String, FileContent>",
    into = "BTreeMap<String, FileContent>"
)]
pub struct Snapshot {
    files: Arc<BTreeMap<String, FileContent>>,
}

impl Snapshot {
    /// Build a snapshot from path/content pairs
    ///
    /// # Errors
    ///
    /// Fails with [`CodehubError::InvalidPath`] if any path is invalid, two
    /// paths normalize to the same path, or a path is both a file and a
    /// directory.
    pub fn new<I, P, C>(entries: I) -> Result<Self>
    where
        I: IntoIterator<Item = (P, C)>,
        P: AsRef<str>,
        C: Into<FileContent>,
    {
        let mut files = BTreeMap::new();
        for (raw, content) in entries {
            let raw = raw.as_ref();
            let path = normalize_path(raw)?;
            if files.insert(path, content.into()).is_some() {
                return Err(CodehubError::invalid_path(
                    raw,
                    "duplicate path after normalization",
                ));
            }
        }
        check_tree_conflicts(&files)?;
        Ok(Self {
            files: Arc::new(files),
        })
    }

    /// The empty snapshot
    pub fn empty() -> Self {
        Self::default()
    }

    /// Number of files
    pub fn len(&self) -> usize {
        self.files.len()
    }

    /// Whether the snapshot has no files
    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// Look up a file
    ///
    /// # Errors
    ///
    /// [`CodehubError::PathNotFound`] when the path is not in the snapshot,
    /// [`CodehubError::InvalidPath`] when it cannot be normalized.
    pub fn get(&self, path: &str) -> Result<&FileContent> {
        let normalized = normalize_path(path)?;
        self.files
            .get(&normalized)
            .ok_or(CodehubError::PathNotFound(normalized))
    }

    /// Whether the snapshot contains a file at `path`
    pub fn contains(&self, path: &str) -> bool {
        normalize_path(path)
            .map(|p| self.files.contains_key(&p))
            .unwrap_or(false)
    }

    /// Iterate over files in lexicographic path order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &FileContent)> {
        self.files.iter().map(|(path, content)| (path.as_str(), content))
    }

    /// Iterate over paths in lexicographic order
    pub fn paths(&self) -> impl Iterator<Item = &str> {
        self.files.keys().map(String::as_str)
    }

    /// Total size of all files in bytes
    pub fn total_size(&self) -> u64 {
        self.files.values().map(|c| c.len() as u64).sum()
    }

    /// Apply edits, producing a new snapshot
    ///
    /// Writes create or replace files, tombstones remove them (a tombstone for
    /// a path that does not exist is ignored). All paths are validated before
    /// anything is applied; the receiver is never modified.
    pub fn merge(&self, edits: &EditSet) -> Result<Snapshot> {
        let normalized = edits.normalized()?;
        if normalized.is_empty() {
            return Ok(self.clone());
        }

        let mut files = (*self.files).clone();
        for (path, edit) in normalized {
            match edit {
                Edit::Write(content) => {
                    files.insert(path, content.clone());
                }
                Edit::Delete => {
                    if files.remove(&path).is_none() {
                        trace!("Ignoring tombstone for absent path {}", path);
                    }
                }
            }
        }
        check_tree_conflicts(&files)?;

        Ok(Snapshot {
            files: Arc::new(files),
        })
    }

    /// SHA-256 digest over every path and content, in path order
    ///
    /// Two snapshots have the same digest exactly when they hold the same files.
    pub fn digest(&self) -> String {
        let mut hasher = Sha256::new();
        for (path, content) in self.files.iter() {
            hasher.update((path.len() as u64).to_le_bytes());
            hasher.update(path.as_bytes());
            hasher.update((content.len() as u64).to_le_bytes());
            hasher.update(content.as_bytes());
        }
        hex::encode(hasher.finalize())
    }
}

impl fmt::Debug for Snapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map()
            .entries(self.files.iter().map(|(p, c)| (p, c.len())))
            .finish()
    }
}

impl TryFrom<BTreeMap<String, FileContent>> for Snapshot {
    type Error = CodehubError;

    fn try_from(files: BTreeMap<String, FileContent>) -> Result<Self> {
        Snapshot::new(files)
    }
}

impl From<Snapshot> for BTreeMap<String, FileContent> {
    fn from(snapshot: Snapshot) -> Self {
        Arc::try_unwrap(snapshot.files).unwrap_or_else(|shared| (*shared).clone())
    }
}

/// Reject a path that is a file and also the directory of another file
fn check_tree_conflicts(files: &BTreeMap<String, FileContent>) -> Result<()> {
    for path in files.keys() {
        let prefix = format!("{}/", path);
        if let Some((child, _)) = files.range(prefix.clone()..).next() {
            if child.starts_with(&prefix) {
                return Err(CodehubError::invalid_path(
                    child.as_str(),
                    format!("{} is a file, not a directory", path),
                ));
            }
        }
    }
    Ok(())
}
