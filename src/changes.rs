//! Structured differences between two snapshots
//!
//! [`diff_snapshots`] compares two [`Snapshot`]s path by path and reports every
//! path as added, removed, modified (with a line-level [`EditScript`]) or
//! unchanged. Output is always in lexicographic path order, so diffing the same
//! pair twice gives identical results.
//!
//! ## Examples
//!
//! ```rust
//! use codehub::changes::{diff_snapshots, ChangeKind};
//! use codehub::snapshot::{EditSet, Snapshot};
//!
//! let base = Snapshot::new([("README.md", "# Hello\n")]).unwrap();
//! let target = base.merge(&EditSet::new().write("LICENSE", "MIT")).unwrap();
//!
//! let diff = diff_snapshots(&base, &target);
//! let changed: Vec<_> = diff.changed().map(|c| (c.path(), c.kind())).collect();
//! assert_eq!(changed, vec![("LICENSE", ChangeKind::Added)]);
//! assert_eq!(diff.stats.files_unchanged, 1);
//! ```

use crate::commit::Revision;
use crate::diff::{diff_lines, unified_diff, EditScript};
use crate::snapshot::{FileContent, Snapshot};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use tracing::debug;

/// Category of a per-path change
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChangeKind {
    /// Path only in the target
    Added,
    /// Path only in the base
    Removed,
    /// Path in both with different content
    Modified,
    /// Path in both with identical content
    Unchanged,
}

impl fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let symbol = match self {
            ChangeKind::Added => "A",
            ChangeKind::Removed => "D",
            ChangeKind::Modified => "M",
            ChangeKind::Unchanged => " ",
        };
        write!(f, "{}", symbol)
    }
}

/// Change of a single path between two snapshots
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PathChange {
    /// File created in the target
    Added {
        /// Path of the file
        path: String,
        /// Content in the target
        content: FileContent,
    },
    /// File deleted in the target
    Removed {
        /// Path of the file
        path: String,
        /// Content in the base
        content: FileContent,
    },
    /// File content changed
    Modified {
        /// Path of the file
        path: String,
        /// Edit script from base content to target content
        script: EditScript,
    },
    /// File identical in both snapshots
    Unchanged {
        /// Path of the file
        path: String,
    },
}

impl PathChange {
    /// Path this change applies to
    pub fn path(&self) -> &str {
        match self {
            PathChange::Added { path, .. }
            | PathChange::Removed { path, .. }
            | PathChange::Modified { path, .. }
            | PathChange::Unchanged { path } => path,
        }
    }

    /// Category of the change
    pub fn kind(&self) -> ChangeKind {
        match self {
            PathChange::Added { .. } => ChangeKind::Added,
            PathChange::Removed { .. } => ChangeKind::Removed,
            PathChange::Modified { .. } => ChangeKind::Modified,
            PathChange::Unchanged { .. } => ChangeKind::Unchanged,
        }
    }

    /// Line-level script for this change
    ///
    /// Added and removed files are scripted against empty content.
    pub fn script(&self) -> EditScript {
        match self {
            PathChange::Added { content, .. } => diff_lines(b"", content.as_bytes()),
            PathChange::Removed { content, .. } => diff_lines(content.as_bytes(), b""),
            PathChange::Modified { script, .. } => script.clone(),
            PathChange::Unchanged { .. } => EditScript::default(),
        }
    }

    /// Render the change as a unified diff (empty for unchanged paths)
    pub fn to_unified(&self, context: usize) -> String {
        let path = self.path();
        match self {
            PathChange::Added { .. } => unified_diff(None, Some(path), &self.script(), context),
            PathChange::Removed { .. } => unified_diff(Some(path), None, &self.script(), context),
            PathChange::Modified { script, .. } => {
                unified_diff(Some(path), Some(path), script, context)
            }
            PathChange::Unchanged { .. } => String::new(),
        }
    }
}

/// Summary counts for a [`DiffResult`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiffStats {
    /// Number of added files
    pub files_added: usize,
    /// Number of removed files
    pub files_removed: usize,
    /// Number of modified files
    pub files_modified: usize,
    /// Number of unchanged files
    pub files_unchanged: usize,
    /// Modified files compared as binary
    pub binary_files: usize,
    /// Lines inserted by modified files
    pub lines_added: usize,
    /// Lines deleted by modified files
    pub lines_deleted: usize,
}

impl DiffStats {
    /// Check if there are any changes
    pub fn has_changes(&self) -> bool {
        self.files_added > 0 || self.files_removed > 0 || self.files_modified > 0
    }

    /// Number of touched paths
    pub fn total_changes(&self) -> usize {
        self.files_added + self.files_removed + self.files_modified
    }

    fn record(&mut self, change: &PathChange) {
        match change {
            PathChange::Added { .. } => self.files_added += 1,
            PathChange::Removed { .. } => self.files_removed += 1,
            PathChange::Modified { script, .. } => {
                self.files_modified += 1;
                if script.is_binary() {
                    self.binary_files += 1;
                }
                self.lines_added += script.lines_added();
                self.lines_deleted += script.lines_deleted();
            }
            PathChange::Unchanged { .. } => self.files_unchanged += 1,
        }
    }
}

/// Per-path changes between two snapshots
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiffResult {
    /// Revision of the base snapshot, when it came from a history
    pub base_revision: Option<Revision>,
    /// Revision of the target snapshot, when it came from a history
    pub target_revision: Option<Revision>,
    /// Every path of either snapshot, in lexicographic order
    pub changes: Vec<PathChange>,
    /// Summary counts
    pub stats: DiffStats,
}

impl DiffResult {
    /// Attach the revisions the snapshots were taken from
    pub fn with_revisions(mut self, base: Revision, target: Revision) -> Self {
        self.base_revision = Some(base);
        self.target_revision = Some(target);
        self
    }

    /// Changes other than `Unchanged`, in path order
    pub fn changed(&self) -> impl Iterator<Item = &PathChange> {
        self.changes
            .iter()
            .filter(|c| c.kind() != ChangeKind::Unchanged)
    }

    /// Change for a specific path
    pub fn get(&self, path: &str) -> Option<&PathChange> {
        self.changes
            .binary_search_by(|c| c.path().cmp(path))
            .ok()
            .map(|i| &self.changes[i])
    }

    /// Whether the two snapshots are identical
    pub fn is_empty(&self) -> bool {
        !self.stats.has_changes()
    }

    /// Render every changed path as one unified diff
    pub fn to_unified(&self, context: usize) -> String {
        self.changed().map(|c| c.to_unified(context)).collect()
    }
}

/// Pairing of one path before the edit scripts are computed
enum Pending {
    Done(PathChange),
    Modified {
        path: String,
        old: FileContent,
        new: FileContent,
    },
}

/// Compare two snapshots path by path
///
/// Pure and deterministic. Edit scripts of modified files are computed in
/// parallel; the output order is always lexicographic by path.
pub fn diff_snapshots(base: &Snapshot, target: &Snapshot) -> DiffResult {
    let mut pending = Vec::with_capacity(base.len().max(target.len()));
    let mut old_iter = base.iter().peekable();
    let mut new_iter = target.iter().peekable();

    // Both sides iterate in path order, so a merge walk pairs them up
    loop {
        let order = match (old_iter.peek(), new_iter.peek()) {
            (None, None) => break,
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (Some((old_path, _)), Some((new_path, _))) => old_path.cmp(new_path),
        };

        let entry = match order {
            Ordering::Less => old_iter.next().map(|(path, content)| {
                Pending::Done(PathChange::Removed {
                    path: path.to_string(),
                    content: content.clone(),
                })
            }),
            Ordering::Greater => new_iter.next().map(|(path, content)| {
                Pending::Done(PathChange::Added {
                    path: path.to_string(),
                    content: content.clone(),
                })
            }),
            Ordering::Equal => old_iter
                .next()
                .zip(new_iter.next())
                .map(|((path, old), (_, new))| {
                    if old == new {
                        Pending::Done(PathChange::Unchanged {
                            path: path.to_string(),
                        })
                    } else {
                        Pending::Modified {
                            path: path.to_string(),
                            old: old.clone(),
                            new: new.clone(),
                        }
                    }
                }),
        };
        pending.extend(entry);
    }

    let changes: Vec<PathChange> = pending
        .into_par_iter()
        .map(|entry| match entry {
            Pending::Done(change) => change,
            Pending::Modified { path, old, new } => PathChange::Modified {
                script: diff_lines(old.as_bytes(), new.as_bytes()),
                path,
            },
        })
        .collect();

    let mut stats = DiffStats::default();
    changes.iter().for_each(|c| stats.record(c));

    debug!(
        "Snapshot diff: {} added, {} removed, {} modified, {} unchanged",
        stats.files_added, stats.files_removed, stats.files_modified, stats.files_unchanged
    );

    DiffResult {
        base_revision: None,
        target_revision: None,
        changes,
        stats,
    }
}
