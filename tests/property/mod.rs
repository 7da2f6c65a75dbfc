//! Property-based testing for CodeHub
//!
//! Uses proptest to check the snapshot, diff and history invariants across
//! randomly generated trees, texts and edit sets.

use ::codehub::*;
use proptest::prelude::*;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Paths like `d1/f3.txt`; leaf names never collide with directory names
fn path_strategy() -> impl Strategy<Value = String> {
    (prop::collection::vec("d[0-2]", 0..=2), "f[0-9]\\.txt").prop_map(|(dirs, file)| {
        let mut parts = dirs;
        parts.push(file);
        parts.join("/")
    })
}

/// Texts built from a few repeated lines so that diffs find common runs
fn text_strategy() -> impl Strategy<Value = String> {
    prop::collection::vec(
        prop_oneof![
            Just("alpha\n".to_string()),
            Just("beta\n".to_string()),
            Just("gamma\n".to_string()),
            Just("\n".to_string()),
            Just("no newline".to_string()),
            "[a-z ]{0,12}\n",
        ],
        0..40,
    )
    .prop_map(|lines| lines.concat())
}

/// Mostly text, sometimes binary
fn content_strategy() -> impl Strategy<Value = Vec<u8>> {
    prop_oneof![
        4 => text_strategy().prop_map(String::into_bytes),
        1 => prop::collection::vec(any::<u8>(), 1..64).prop_map(|mut bytes| {
            bytes[0] = 0;
            bytes
        }),
    ]
}

fn tree_strategy() -> impl Strategy<Value = BTreeMap<String, Vec<u8>>> {
    prop::collection::btree_map(path_strategy(), content_strategy(), 0..12)
}

/// Edits keyed by path; `None` is a tombstone
fn edits_strategy() -> impl Strategy<Value = BTreeMap<String, Option<Vec<u8>>>> {
    prop::collection::btree_map(path_strategy(), prop::option::weighted(0.7, content_strategy()), 0..8)
}

/// Longer texts over a tiny alphabet, so alignments have many candidates
fn dense_text_strategy() -> impl Strategy<Value = String> {
    prop::collection::vec("[a-d]\n", 0..300).prop_map(|lines| lines.concat())
}

/// LCS length by the textbook quadratic table, one row at a time
fn lcs_len(a: &[&str], b: &[&str]) -> usize {
    let mut prev = vec![0usize; b.len() + 1];
    for x in a {
        let mut cur = vec![0usize; b.len() + 1];
        for (j, y) in b.iter().enumerate() {
            cur[j + 1] = if x == y { prev[j] + 1 } else { prev[j + 1].max(cur[j]) };
        }
        prev = cur;
    }
    prev[b.len()]
}

fn edit_distance(a: &str, b: &str) -> usize {
    let a: Vec<&str> = a.split_inclusive('\n').collect();
    let b: Vec<&str> = b.split_inclusive('\n').collect();
    a.len() + b.len() - 2 * lcs_len(&a, &b)
}

fn snapshot(tree: &BTreeMap<String, Vec<u8>>) -> Snapshot {
    Snapshot::new(tree.iter().map(|(p, c)| (p.as_str(), c.clone()))).unwrap()
}

fn edit_set(edits: &BTreeMap<String, Option<Vec<u8>>>) -> EditSet {
    edits
        .iter()
        .map(|(path, edit)| match edit {
            Some(content) => (path.clone(), Edit::Write(content.clone().into())),
            None => (path.clone(), Edit::Delete),
        })
        .collect()
}

/// Store holding one commit with `tree`
fn store_with(tree: &BTreeMap<String, Vec<u8>>) -> CommitStore {
    let persistence = Arc::new(MemoryPersistence::new());
    persistence
        .save_repository(&RepositoryRecord::new(RepositoryId(1), UserId(1), "prop"))
        .unwrap();
    let store = CommitStore::new(RepositoryId(1), persistence);
    store.initialize(snapshot(tree), UserId(1), "initial").unwrap();
    store
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(128))]

    /// Merging no edits gives back the same snapshot
    #[test]
    fn merge_without_edits_is_identity(tree in tree_strategy()) {
        let base = snapshot(&tree);
        prop_assert_eq!(base.merge(&EditSet::new()).unwrap(), base);
    }

    /// The diff of a merge lists exactly the paths whose content changed
    #[test]
    fn diff_of_merge_reports_touched_paths(tree in tree_strategy(), edits in edits_strategy()) {
        let base = snapshot(&tree);
        let merged = base.merge(&edit_set(&edits)).unwrap();
        let diff = diff_snapshots(&base, &merged);

        let mut expected = Vec::new();
        for (path, edit) in &edits {
            let before = tree.get(path);
            let kind = match (before, edit.as_ref()) {
                (None, Some(_)) => ChangeKind::Added,
                (Some(_), None) => ChangeKind::Removed,
                (Some(old), Some(new)) if old != new => ChangeKind::Modified,
                _ => continue,
            };
            expected.push((path.clone(), kind));
        }

        let actual: Vec<(String, ChangeKind)> = diff
            .changed()
            .map(|change| (change.path().to_string(), change.kind()))
            .collect();
        prop_assert_eq!(actual, expected);
    }

    /// Diffing the same pair twice gives the same sorted output
    #[test]
    fn diff_is_deterministic_and_sorted(a in tree_strategy(), b in tree_strategy()) {
        let (a, b) = (snapshot(&a), snapshot(&b));
        let first = diff_snapshots(&a, &b);
        let second = diff_snapshots(&a, &b);
        prop_assert_eq!(&first, &second);

        let paths: Vec<&str> = first.changes.iter().map(|c| c.path()).collect();
        let mut sorted = paths.clone();
        sorted.sort_unstable();
        sorted.dedup();
        prop_assert_eq!(paths, sorted);
    }

    /// A text diffed against itself is one equal run
    #[test]
    fn diff_lines_of_identical_text(x in text_strategy()) {
        let script = diff_lines(x.as_bytes(), x.as_bytes());
        if x.is_empty() {
            prop_assert!(script.is_empty());
        } else {
            prop_assert_eq!(script.ops().len(), 1);
            prop_assert!(matches!(&script.ops()[0], EditOp::Equal(_)));
            prop_assert_eq!(script.reconstruct_new(), x.into_bytes());
        }
    }

    /// Equal+Delete rebuilds the old text and Equal+Insert the new one
    #[test]
    fn diff_lines_reconstructs_both_sides(a in content_strategy(), b in content_strategy()) {
        let script = diff_lines(&a, &b);
        if script.is_empty() {
            // Only identical binaries or two empty texts
            prop_assert_eq!(a, b);
        } else {
            prop_assert_eq!(script.reconstruct_old(), a);
            prop_assert_eq!(script.reconstruct_new(), b);
        }
    }

    /// Scripts change exactly as many lines as a minimal alignment needs
    #[test]
    fn diff_lines_is_minimal(a in text_strategy(), b in text_strategy()) {
        let script = diff_lines(a.as_bytes(), b.as_bytes());
        prop_assert_eq!(script.lines_added() + script.lines_deleted(), edit_distance(&a, &b));
    }

    /// Minimality holds on long, repetitive texts too
    #[test]
    fn diff_lines_is_minimal_on_dense_texts(a in dense_text_strategy(), b in dense_text_strategy()) {
        let script = diff_lines(a.as_bytes(), b.as_bytes());
        prop_assert_eq!(script.lines_added() + script.lines_deleted(), edit_distance(&a, &b));
        prop_assert_eq!(script.reconstruct_old(), a.into_bytes());
        prop_assert_eq!(script.reconstruct_new(), b.into_bytes());
    }

    /// Runs alternate and every gap lists its deletions before its insertions
    #[test]
    fn diff_lines_runs_are_canonical(a in text_strategy(), b in text_strategy()) {
        let script = diff_lines(a.as_bytes(), b.as_bytes());
        for pair in script.ops().windows(2) {
            let ok = matches!(
                (&pair[0], &pair[1]),
                (EditOp::Equal(_), EditOp::Insert(_))
                    | (EditOp::Equal(_), EditOp::Delete(_))
                    | (EditOp::Delete(_), EditOp::Insert(_))
                    | (EditOp::Delete(_), EditOp::Equal(_))
                    | (EditOp::Insert(_), EditOp::Equal(_))
            );
            prop_assert!(ok, "unexpected run order: {:?}", pair);
        }
        for op in script.ops() {
            if let EditOp::Equal(lines) | EditOp::Insert(lines) | EditOp::Delete(lines) = op {
                prop_assert!(!lines.is_empty());
            }
        }
    }

    /// Hunks account for every added and deleted line
    #[test]
    fn hunks_cover_all_changes(a in text_strategy(), b in text_strategy(), context in 0usize..5) {
        let script = diff_lines(a.as_bytes(), b.as_bytes());
        let (mut added, mut deleted) = (0, 0);
        for hunk in script.hunks(context) {
            for line in &hunk.lines {
                match line {
                    diff::HunkLine::Added(_) => added += 1,
                    diff::HunkLine::Deleted(_) => deleted += 1,
                    diff::HunkLine::Context(_) => {}
                }
            }
        }
        prop_assert_eq!(added, script.lines_added());
        prop_assert_eq!(deleted, script.lines_deleted());
    }

    /// Edits that reproduce the base are rejected
    #[test]
    fn reproducing_the_base_is_an_empty_commit(tree in tree_strategy()) {
        prop_assume!(!tree.is_empty());
        let store = store_with(&tree);
        let rewrite: EditSet = tree
            .iter()
            .map(|(path, content)| (path.clone(), Edit::Write(content.clone().into())))
            .collect();

        let result = store.commit(Revision(1), &rewrite, UserId(1), "noop");
        prop_assert!(matches!(result, Err(CodehubError::EmptyCommit { .. })), "expected EmptyCommit");
        prop_assert_eq!(store.len(), 1);
    }

    /// Commits against revisions outside 1..=head are rejected
    #[test]
    fn commit_base_must_exist(base in prop_oneof![Just(0u64), 2u64..1000]) {
        let store = store_with(&BTreeMap::from([("a.txt".to_string(), b"a".to_vec())]));
        let result = store.commit(Revision(base), &EditSet::new().write("b.txt", "b"), UserId(1), "x");
        let is_not_found = matches!(result, Err(CodehubError::RevisionNotFound { .. }));
        prop_assert!(is_not_found, "expected RevisionNotFound");
        prop_assert_eq!(store.head_revision(), Revision(1));
    }

    /// Snapshots survive both storage encodings unchanged
    #[test]
    fn snapshot_serialization_round_trips(tree in tree_strategy()) {
        let original = snapshot(&tree);

        let json = serde_json::to_string(&original).unwrap();
        prop_assert_eq!(&serde_json::from_str::<Snapshot>(&json).unwrap(), &original);

        let bytes = bincode::serde::encode_to_vec(&original, bincode::config::standard()).unwrap();
        let (decoded, _): (Snapshot, usize) =
            bincode::serde::decode_from_slice(&bytes, bincode::config::standard()).unwrap();
        prop_assert_eq!(decoded.digest(), original.digest());
        prop_assert_eq!(decoded, original);
    }

    /// A sequence of commits keeps the history contiguous and verifiable
    #[test]
    fn histories_stay_valid(
        tree in tree_strategy(),
        rounds in prop::collection::vec(edits_strategy(), 1..8)
    ) {
        prop_assume!(!tree.is_empty());
        let store = store_with(&tree);
        let mut expected = snapshot(&tree);

        for edits in &rounds {
            let edits = edit_set(edits);
            let next = expected.merge(&edits).unwrap();
            match store.commit(store.head_revision(), &edits, UserId(2), "round") {
                Ok(commit) => {
                    prop_assert_eq!(&commit.snapshot, &next);
                    expected = next;
                }
                Err(CodehubError::EmptyCommit { .. }) => prop_assert_eq!(&next, &expected),
                Err(e) => return Err(TestCaseError::fail(e.to_string())),
            }
        }

        let commits: Vec<_> = store.history().commits().cloned().collect();
        let report = HistoryVerifier::new(RepositoryId(1)).verify(&commits);
        prop_assert!(report.is_valid(), "{}", report.summary());
        prop_assert_eq!(store.snapshot_at(store.head_revision()).unwrap(), expected);
    }
}
