//! Line-level diff computation for file contents
//!
//! This module turns two versions of a file into an [`EditScript`]: an ordered
//! sequence of `Equal`, `Delete` and `Insert` runs over the lines of both texts.
//! Keeping `Equal` and `Insert` runs reconstructs the new text exactly; keeping
//! `Equal` and `Delete` runs reconstructs the old text exactly.
//!
//! ## Algorithm
//!
//! Lines are aligned along a Longest Common Subsequence found with Myers'
//! linear-space algorithm, after trimming the common prefix and suffix. The
//! resulting script is minimal in the total number of inserted plus deleted lines. Within
//! every gap between two `Equal` runs the deleted lines are emitted before the
//! inserted lines, so identical input always produces identical output.
//!
//! Lines keep their `\n` terminator. `"a"` and `"a\n"` are different lines, which
//! is what makes reconstruction exact for files with or without a final newline.
//!
//! Binary content (a NUL byte or invalid UTF-8 on either side) is not split into
//! lines: the script is a single [`EditOp::Replace`].
//!
//! ## Examples
//!
//! ```rust
//! use codehub::diff::{diff_lines, EditOp};
//!
//! let script = diff_lines(b"# Hello\n", b"# Hello\nWorld\n");
//! assert_eq!(
//!     script.ops(),
//!     &[
//!         EditOp::Equal(vec!["# Hello\n".to_string()]),
//!         EditOp::Insert(vec!["World\n".to_string()]),
//!     ]
//! );
//! assert_eq!(script.reconstruct_new(), b"# Hello\nWorld\n");
//! ```

use crate::snapshot::{is_binary, FileContent};
use serde::{Deserialize, Serialize};
use std::fmt::Write as _;
use std::ops::{Index, IndexMut, Range};
use tracing::trace;

/// One run of an edit script
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum EditOp {
    /// Lines present in both texts
    Equal(Vec<String>),
    /// Lines only in the new text
    Insert(Vec<String>),
    /// Lines only in the old text
    Delete(Vec<String>),
    /// Binary content replaced wholesale
    Replace {
        /// Entire old content
        old: FileContent,
        /// Entire new content
        new: FileContent,
    },
}

/// Ordered sequence of edit runs transforming one text into another
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EditScript {
    ops: Vec<EditOp>,
}

impl EditScript {
    /// Runs in order
    pub fn ops(&self) -> &[EditOp] {
        &self.ops
    }

    /// Whether the script has no runs (both texts empty, or identical binaries)
    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    /// Whether this is a binary replacement
    pub fn is_binary(&self) -> bool {
        matches!(self.ops.as_slice(), [EditOp::Replace { .. }])
    }

    /// Whether the script describes no change at all
    pub fn is_unchanged(&self) -> bool {
        self.ops.iter().all(|op| matches!(op, EditOp::Equal(_)))
    }

    /// Number of inserted lines
    pub fn lines_added(&self) -> usize {
        self.ops
            .iter()
            .map(|op| match op {
                EditOp::Insert(lines) => lines.len(),
                _ => 0,
            })
            .sum()
    }

    /// Number of deleted lines
    pub fn lines_deleted(&self) -> usize {
        self.ops
            .iter()
            .map(|op| match op {
                EditOp::Delete(lines) => lines.len(),
                _ => 0,
            })
            .sum()
    }

    /// Rebuild the old text from `Equal` and `Delete` runs
    pub fn reconstruct_old(&self) -> Vec<u8> {
        let mut out = Vec::new();
        for op in &self.ops {
            match op {
                EditOp::Equal(lines) | EditOp::Delete(lines) => {
                    lines.iter().for_each(|l| out.extend_from_slice(l.as_bytes()))
                }
                EditOp::Insert(_) => {}
                EditOp::Replace { old, .. } => out.extend_from_slice(old.as_bytes()),
            }
        }
        out
    }

    /// Rebuild the new text from `Equal` and `Insert` runs
    pub fn reconstruct_new(&self) -> Vec<u8> {
        let mut out = Vec::new();
        for op in &self.ops {
            match op {
                EditOp::Equal(lines) | EditOp::Insert(lines) => {
                    lines.iter().for_each(|l| out.extend_from_slice(l.as_bytes()))
                }
                EditOp::Delete(_) => {}
                EditOp::Replace { new, .. } => out.extend_from_slice(new.as_bytes()),
            }
        }
        out
    }

    /// Group the script into hunks with `context` unchanged lines around changes
    ///
    /// Binary scripts have no hunks.
    pub fn hunks(&self, context: usize) -> Vec<Hunk> {
        let rows = self.rows();
        let changed: Vec<usize> = rows
            .iter()
            .enumerate()
            .filter(|(_, row)| !matches!(row, Row::Context { .. }))
            .map(|(i, _)| i)
            .collect();
        if changed.is_empty() {
            return Vec::new();
        }

        // Merge change windows that overlap or touch
        let mut windows: Vec<(usize, usize)> = Vec::new();
        for &i in &changed {
            let start = i.saturating_sub(context);
            let end = (i + context + 1).min(rows.len());
            match windows.last_mut() {
                Some(last) if start <= last.1 => last.1 = end,
                _ => windows.push((start, end)),
            }
        }

        windows
            .into_iter()
            .map(|(start, end)| {
                let mut builder = HunkBuilder::new(&rows[start]);
                for row in &rows[start..end] {
                    builder.push(row);
                }
                builder.build()
            })
            .collect()
    }

    fn rows(&self) -> Vec<Row<'_>> {
        let mut rows = Vec::new();
        let mut old_no = 0;
        let mut new_no = 0;
        for op in &self.ops {
            match op {
                EditOp::Equal(lines) => {
                    for line in lines {
                        rows.push(Row::Context { line, old_no, new_no });
                        old_no += 1;
                        new_no += 1;
                    }
                }
                EditOp::Delete(lines) => {
                    for line in lines {
                        rows.push(Row::Deleted { line, old_no, new_no });
                        old_no += 1;
                    }
                }
                EditOp::Insert(lines) => {
                    for line in lines {
                        rows.push(Row::Added { line, old_no, new_no });
                        new_no += 1;
                    }
                }
                EditOp::Replace { .. } => {}
            }
        }
        rows
    }
}

impl IntoIterator for EditScript {
    type Item = EditOp;
    type IntoIter = std::vec::IntoIter<EditOp>;

    fn into_iter(self) -> Self::IntoIter {
        self.ops.into_iter()
    }
}

/// A line inside a [`Hunk`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum HunkLine {
    /// Unchanged line shown for context
    Context(String),
    /// Line only in the new text
    Added(String),
    /// Line only in the old text
    Deleted(String),
}

/// A contiguous group of changes with surrounding context
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Hunk {
    /// First old line covered (1-based, 0 when the hunk covers no old lines)
    pub old_start: usize,
    /// Number of old lines covered
    pub old_count: usize,
    /// First new line covered (1-based, 0 when the hunk covers no new lines)
    pub new_start: usize,
    /// Number of new lines covered
    pub new_count: usize,
    /// Lines in display order, terminators included
    pub lines: Vec<HunkLine>,
}

impl Hunk {
    /// Unified diff header, e.g. `@@ -1,2 +1,3 @@`
    pub fn header(&self) -> String {
        format!(
            "@@ -{},{} +{},{} @@",
            self.old_start, self.old_count, self.new_start, self.new_count
        )
    }
}

/// Row of the flattened script with 0-based positions before the row
enum Row<'a> {
    Context { line: &'a str, old_no: usize, new_no: usize },
    Deleted { line: &'a str, old_no: usize, new_no: usize },
    Added { line: &'a str, old_no: usize, new_no: usize },
}

impl Row<'_> {
    fn positions(&self) -> (usize, usize) {
        match self {
            Row::Context { old_no, new_no, .. }
            | Row::Deleted { old_no, new_no, .. }
            | Row::Added { old_no, new_no, .. } => (*old_no, *new_no),
        }
    }
}

/// Helper for building diff hunks
struct HunkBuilder {
    old_before: usize,
    new_before: usize,
    old_count: usize,
    new_count: usize,
    lines: Vec<HunkLine>,
}

impl HunkBuilder {
    fn new(first: &Row<'_>) -> Self {
        let (old_before, new_before) = first.positions();
        Self {
            old_before,
            new_before,
            old_count: 0,
            new_count: 0,
            lines: Vec::new(),
        }
    }

    fn push(&mut self, row: &Row<'_>) {
        match row {
            Row::Context { line, .. } => {
                self.old_count += 1;
                self.new_count += 1;
                self.lines.push(HunkLine::Context(line.to_string()));
            }
            Row::Deleted { line, .. } => {
                self.old_count += 1;
                self.lines.push(HunkLine::Deleted(line.to_string()));
            }
            Row::Added { line, .. } => {
                self.new_count += 1;
                self.lines.push(HunkLine::Added(line.to_string()));
            }
        }
    }

    fn build(self) -> Hunk {
        // git convention: an empty side points at the line before the hunk
        let start = |before: usize, count: usize| if count == 0 { before } else { before + 1 };
        Hunk {
            old_start: start(self.old_before, self.old_count),
            old_count: self.old_count,
            new_start: start(self.new_before, self.new_count),
            new_count: self.new_count,
            lines: self.lines,
        }
    }
}

/// Split text into lines, each keeping its `\n` terminator
pub fn split_lines(text: &str) -> Vec<&str> {
    text.split_inclusive('\n').collect()
}

/// Compute the line-level edit script between two contents
///
/// Pure and deterministic. See the module documentation for the exact rules.
pub fn diff_lines(old: &[u8], new: &[u8]) -> EditScript {
    if is_binary(old) || is_binary(new) {
        if old == new {
            return EditScript::default();
        }
        trace!("Binary content, emitting whole-file replacement");
        return EditScript {
            ops: vec![EditOp::Replace {
                old: FileContent::from(old),
                new: FileContent::from(new),
            }],
        };
    }

    // Both sides were just checked to be valid UTF-8
    let old_text = String::from_utf8_lossy(old);
    let new_text = String::from_utf8_lossy(new);
    let old_lines = split_lines(&old_text);
    let new_lines = split_lines(&new_text);

    let changes = compute_changes(&old_lines, &new_lines);
    EditScript {
        ops: coalesce(changes, &old_lines, &new_lines),
    }
}

/// Line-level change before coalescing into runs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Change {
    Keep(usize),   // old line index
    Delete(usize), // old line index
    Insert(usize), // new line index
}

fn compute_changes(old_lines: &[&str], new_lines: &[&str]) -> Vec<Change> {
    let prefix = common_prefix(old_lines, new_lines);
    let suffix = common_suffix(&old_lines[prefix..], &new_lines[prefix..]);

    let old_mid = &old_lines[prefix..old_lines.len() - suffix];
    let new_mid = &new_lines[prefix..new_lines.len() - suffix];

    let mut changes: Vec<Change> = (0..prefix).map(Change::Keep).collect();
    for change in align(old_mid, new_mid) {
        changes.push(match change {
            Change::Keep(i) => Change::Keep(i + prefix),
            Change::Delete(i) => Change::Delete(i + prefix),
            Change::Insert(j) => Change::Insert(j + prefix),
        });
    }
    changes.extend((old_lines.len() - suffix..old_lines.len()).map(Change::Keep));
    changes
}

/// Align two line sequences along a longest common subsequence
///
/// Linear-space Myers: each region is split at the middle snake of one of its
/// shortest edit paths until a side runs out, which keeps the script minimal in
/// O((N+M)D) time.
fn align(old_lines: &[&str], new_lines: &[&str]) -> Vec<Change> {
    let max_d = (old_lines.len() + new_lines.len() + 1) / 2 + 1;
    let mut aligner = Aligner {
        old: old_lines,
        new: new_lines,
        forward: Diagonals::new(max_d),
        backward: Diagonals::new(max_d),
        changes: Vec::with_capacity(old_lines.len() + new_lines.len()),
    };
    aligner.conquer(0..old_lines.len(), 0..new_lines.len());
    aligner.changes
}

/// Furthest x reached on each diagonal `k = x - y`
struct Diagonals {
    offset: isize,
    v: Vec<usize>,
}

impl Diagonals {
    fn new(max_d: usize) -> Self {
        Self {
            offset: max_d as isize,
            v: vec![0; 2 * max_d + 1],
        }
    }
}

impl Index<isize> for Diagonals {
    type Output = usize;

    fn index(&self, k: isize) -> &usize {
        &self.v[(k + self.offset) as usize]
    }
}

impl IndexMut<isize> for Diagonals {
    fn index_mut(&mut self, k: isize) -> &mut usize {
        &mut self.v[(k + self.offset) as usize]
    }
}

struct Aligner<'a> {
    old: &'a [&'a str],
    new: &'a [&'a str],
    forward: Diagonals,
    backward: Diagonals,
    changes: Vec<Change>,
}

impl Aligner<'_> {
    fn conquer(&mut self, mut old: Range<usize>, mut new: Range<usize>) {
        let prefix = common_prefix(&self.old[old.clone()], &self.new[new.clone()]);
        self.changes.extend((old.start..old.start + prefix).map(Change::Keep));
        old.start += prefix;
        new.start += prefix;

        let suffix = common_suffix(&self.old[old.clone()], &self.new[new.clone()]);
        let tail = old.end - suffix..old.end;
        old.end -= suffix;
        new.end -= suffix;

        if old.is_empty() {
            self.changes.extend(new.map(Change::Insert));
        } else if new.is_empty() {
            self.changes.extend(old.map(Change::Delete));
        } else if let Some((x, y)) = self.middle_snake(old.clone(), new.clone()) {
            self.conquer(old.start..x, new.start..y);
            self.conquer(x..old.end, y..new.end);
        } else {
            self.changes.extend(old.map(Change::Delete));
            self.changes.extend(new.map(Change::Insert));
        }

        self.changes.extend(tail.map(Change::Keep));
    }

    /// Split point of a shortest edit path through the region
    ///
    /// Runs the forward search from the top-left and the backward search from
    /// the bottom-right in lockstep until they overlap on a diagonal.
    fn middle_snake(&mut self, old: Range<usize>, new: Range<usize>) -> Option<(usize, usize)> {
        let n = old.len();
        let m = new.len();
        let delta = n as isize - m as isize;
        let odd = delta & 1 == 1;
        let d_max = ((n + m + 1) / 2 + 1) as isize;

        self.forward[1] = 0;
        self.backward[1] = 0;

        for d in 0..d_max {
            for k in (-d..=d).rev().step_by(2) {
                let mut x = if k == -d || (k != d && self.forward[k - 1] < self.forward[k + 1]) {
                    self.forward[k + 1]
                } else {
                    self.forward[k - 1] + 1
                };
                let y = (x as isize - k) as usize;
                let (x0, y0) = (x, y);
                if x < n && y < m {
                    x += common_prefix(
                        &self.old[old.start + x..old.end],
                        &self.new[new.start + y..new.end],
                    );
                }
                self.forward[k] = x;

                if odd && (k - delta).abs() < d && x + self.backward[delta - k] >= n {
                    return Some((old.start + x0, new.start + y0));
                }
            }

            for k in (-d..=d).rev().step_by(2) {
                let mut x = if k == -d || (k != d && self.backward[k - 1] < self.backward[k + 1]) {
                    self.backward[k + 1]
                } else {
                    self.backward[k - 1] + 1
                };
                let mut y = (x as isize - k) as usize;
                if x < n && y < m {
                    let advance = common_suffix(
                        &self.old[old.start..old.end - x],
                        &self.new[new.start..new.end - y],
                    );
                    x += advance;
                    y += advance;
                }
                self.backward[k] = x;

                if !odd && (k - delta).abs() <= d && x + self.forward[delta - k] >= n {
                    return Some((old.start + n - x, new.start + m - y));
                }
            }
        }
        None
    }
}

fn common_prefix(a: &[&str], b: &[&str]) -> usize {
    a.iter().zip(b).take_while(|(x, y)| x == y).count()
}

fn common_suffix(a: &[&str], b: &[&str]) -> usize {
    a.iter().rev().zip(b.iter().rev()).take_while(|(x, y)| x == y).count()
}

/// Turn line changes into runs, deletes before inserts within each gap
fn coalesce(changes: Vec<Change>, old_lines: &[&str], new_lines: &[&str]) -> Vec<EditOp> {
    let mut ops = Vec::new();
    let mut equal: Vec<String> = Vec::new();
    let mut deleted: Vec<String> = Vec::new();
    let mut inserted: Vec<String> = Vec::new();

    let flush_gap = |ops: &mut Vec<EditOp>, deleted: &mut Vec<String>, inserted: &mut Vec<String>| {
        if !deleted.is_empty() {
            ops.push(EditOp::Delete(std::mem::take(deleted)));
        }
        if !inserted.is_empty() {
            ops.push(EditOp::Insert(std::mem::take(inserted)));
        }
    };

    for change in changes {
        match change {
            Change::Keep(i) => {
                flush_gap(&mut ops, &mut deleted, &mut inserted);
                equal.push(old_lines[i].to_string());
            }
            Change::Delete(i) => {
                if !equal.is_empty() {
                    ops.push(EditOp::Equal(std::mem::take(&mut equal)));
                }
                deleted.push(old_lines[i].to_string());
            }
            Change::Insert(j) => {
                if !equal.is_empty() {
                    ops.push(EditOp::Equal(std::mem::take(&mut equal)));
                }
                inserted.push(new_lines[j].to_string());
            }
        }
    }
    flush_gap(&mut ops, &mut deleted, &mut inserted);
    if !equal.is_empty() {
        ops.push(EditOp::Equal(equal));
    }
    ops
}

/// Render a script as a unified diff
///
/// `None` paths render as `/dev/null`, which is how added and removed files
/// are shown.
pub fn unified_diff(
    old_path: Option<&str>,
    new_path: Option<&str>,
    script: &EditScript,
    context: usize,
) -> String {
    let old_label = old_path.map_or_else(|| "/dev/null".to_string(), |p| format!("a/{}", p));
    let new_label = new_path.map_or_else(|| "/dev/null".to_string(), |p| format!("b/{}", p));

    let mut out = String::new();
    if script.is_binary() {
        let _ = writeln!(out, "Binary files {} and {} differ", old_label, new_label);
        return out;
    }

    let hunks = script.hunks(context);
    if hunks.is_empty() {
        return out;
    }

    let _ = writeln!(out, "--- {}", old_label);
    let _ = writeln!(out, "+++ {}", new_label);
    for hunk in &hunks {
        let _ = writeln!(out, "{}", hunk.header());
        for line in &hunk.lines {
            let (marker, text) = match line {
                HunkLine::Context(t) => (' ', t),
                HunkLine::Added(t) => ('+', t),
                HunkLine::Deleted(t) => ('-', t),
            };
            out.push(marker);
            out.push_str(text);
            if !text.ends_with('\n') {
                out.push_str("\n\\ No newline at end of file\n");
            }
        }
    }
    out
}
