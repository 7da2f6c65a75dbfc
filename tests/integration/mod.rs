//! Integration tests for CodeHub
//!
//! Drives a file-backed hub through long randomized histories and checks every
//! revision against an independent model of the expected trees.

use ::codehub::*;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use tempfile::TempDir;
use tracing::info;

/// Expected tree of one revision
pub type Tree = BTreeMap<String, Vec<u8>>;

/// Test harness for history scenarios against on-disk storage
pub struct HubTestHarness {
    pub storage_dir: TempDir,
    pub hub: Hub,
    pub owner: UserId,
    pub generator: ContentGenerator,
    /// Expected tree per repository, index 0 is revision 1
    pub model: BTreeMap<RepositoryId, Vec<Tree>>,
}

impl HubTestHarness {
    /// Create a harness with fresh storage
    pub fn new() -> Self {
        Self::with_compression(CompressionStrategy::Fast)
    }

    pub fn with_compression(compression: CompressionStrategy) -> Self {
        let storage_dir = TempDir::new().unwrap();
        let hub = HubBuilder::new()
            .storage_path(storage_dir.path().join("hub"))
            .compression_strategy(compression)
            .build()
            .unwrap();

        Self {
            storage_dir,
            hub,
            owner: UserId(1),
            generator: ContentGenerator::new(42),
            model: BTreeMap::new(),
        }
    }

    pub fn storage_path(&self) -> PathBuf {
        self.storage_dir.path().join("hub")
    }

    /// Drop the hub and load it again from disk
    pub fn reopen(&mut self) {
        self.hub = Hub::open(self.storage_path()).unwrap();
    }

    /// Create a repository holding a generated project
    pub fn create_project(&mut self, name: &str, config: ProjectConfig) -> Arc<Repository> {
        let mut tree = Tree::new();
        for depth in 1..=config.max_depth {
            for dir in 0..config.dirs_per_level {
                let prefix: Vec<String> = (0..depth).map(|level| format!("dir_{}_{}", level, dir)).collect();
                for file in 0..config.files_per_dir {
                    let path = format!("{}/file_{}.txt", prefix.join("/"), file);
                    tree.insert(path, self.generator.text(config.file_size_range.clone()));
                }
            }
        }

        let snapshot = Snapshot::new(tree.iter().map(|(p, c)| (p.as_str(), c.clone()))).unwrap();
        let repo = self
            .hub
            .create_repository_with(CreateRepository::new(self.owner, name).files(snapshot))
            .unwrap();
        self.model.insert(repo.id(), vec![tree]);
        repo
    }

    /// Apply random writes and deletions on top of the head and commit them
    ///
    /// Returns `None` when the random edits happened to change nothing.
    pub fn mutate(&mut self, repo: RepositoryId, config: MutationConfig) -> Option<Arc<Commit>> {
        let history = self.model.get(&repo).unwrap();
        let mut tree = history.last().unwrap().clone();
        let head = Revision(history.len() as u64);
        let mut edits: BTreeMap<String, Edit> = BTreeMap::new();

        for index in 0..config.num_mutations {
            let paths: Vec<String> = tree.keys().cloned().collect();
            match self.generator.rng.random_range(0..3) {
                0 if !paths.is_empty() => {
                    let path = paths[self.generator.rng.random_range(0..paths.len())].clone();
                    let content = self.generator.text(config.file_size_range.clone());
                    edits.insert(path.clone(), Edit::Write(content.clone().into()));
                    tree.insert(path, content);
                }
                1 if !paths.is_empty() => {
                    let path = paths[self.generator.rng.random_range(0..paths.len())].clone();
                    edits.insert(path.clone(), Edit::Delete);
                    tree.remove(&path);
                }
                _ => {
                    let path = format!("mutated/{}_{}.txt", head, index);
                    let content = if index % 7 == 0 {
                        self.generator.binary(64)
                    } else {
                        self.generator.text(config.file_size_range.clone())
                    };
                    edits.insert(path.clone(), Edit::Write(content.clone().into()));
                    tree.insert(path, content);
                }
            }
        }

        // Later edits of a path replace earlier ones
        let edits: EditSet = edits.into_iter().collect();
        match self
            .hub
            .commit_to_repository(repo, head, &edits, self.owner, &format!("Mutate r{}", head))
        {
            Ok(commit) => {
                self.model.get_mut(&repo).unwrap().push(tree);
                Some(commit)
            }
            Err(CodehubError::EmptyCommit { .. }) => None,
            Err(e) => panic!("commit failed: {}", e),
        }
    }

    /// Check every stored revision against the model
    pub fn check_against_model(&self, repo: RepositoryId) {
        let expected = &self.model[&repo];
        let repository = self.hub.get_repository(repo).unwrap();
        assert_eq!(repository.history().len(), expected.len());

        for (index, tree) in expected.iter().enumerate() {
            let revision = Revision(index as u64 + 1);
            let snapshot = self.hub.get_snapshot(repo, revision).unwrap();
            let actual: Tree = snapshot
                .iter()
                .map(|(path, content)| (path.to_string(), content.as_bytes().to_vec()))
                .collect();
            assert_eq!(&actual, tree, "revision {} differs from the model", revision);
        }
    }
}

impl Default for HubTestHarness {
    fn default() -> Self {
        Self::new()
    }
}

/// Deterministic content generator
pub struct ContentGenerator {
    rng: StdRng,
}

impl ContentGenerator {
    pub fn new(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
        }
    }

    /// Lines of words, ending in a newline most of the time
    pub fn text(&mut self, size_range: std::ops::Range<usize>) -> Vec<u8> {
        let size = self.rng.random_range(size_range);
        let words = ["fn", "let", "mut", "struct", "impl", "match", "self", "return", "lorem", "ipsum"];
        let mut content = Vec::with_capacity(size + 16);
        while content.len() < size {
            content.extend_from_slice(words[self.rng.random_range(0..words.len())].as_bytes());
            content.push(if self.rng.random_range(0..6) == 0 { b'\n' } else { b' ' });
        }
        if self.rng.random_range(0..4) != 0 {
            content.push(b'\n');
        }
        content
    }

    /// Random bytes that always contain a NUL
    pub fn binary(&mut self, size: usize) -> Vec<u8> {
        let mut content = vec![0u8; size.max(1)];
        self.rng.fill(&mut content[..]);
        content[0] = 0;
        content
    }
}

#[derive(Debug, Clone)]
pub struct ProjectConfig {
    pub max_depth: usize,
    pub dirs_per_level: usize,
    pub files_per_dir: usize,
    pub file_size_range: std::ops::Range<usize>,
}

impl Default for ProjectConfig {
    fn default() -> Self {
        Self {
            max_depth: 2,
            dirs_per_level: 3,
            files_per_dir: 4,
            file_size_range: 20..400,
        }
    }
}

#[derive(Debug, Clone)]
pub struct MutationConfig {
    pub num_mutations: usize,
    pub file_size_range: std::ops::Range<usize>,
}

impl Default for MutationConfig {
    fn default() -> Self {
        Self {
            num_mutations: 6,
            file_size_range: 20..400,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracing_test::traced_test;

    #[test]
    #[traced_test]
    fn test_long_history_survives_reopen() {
        let mut harness = HubTestHarness::new();
        let repo = harness.create_project("project", ProjectConfig::default()).id();

        let mut commits = 0;
        for _ in 0..15 {
            if harness.mutate(repo, MutationConfig::default()).is_some() {
                commits += 1;
            }
        }
        info!("Made {} commits", commits);
        harness.check_against_model(repo);

        harness.reopen();
        harness.check_against_model(repo);

        let report = harness.hub.verify_repository(repo).unwrap();
        assert!(report.is_valid(), "{}", report.summary());
        assert_eq!(report.total_commits, commits + 1);
        assert!(logs_contain("Committed revision"));
    }

    #[test]
    fn test_every_compression_strategy_round_trips() {
        for strategy in [
            CompressionStrategy::None,
            CompressionStrategy::Fast,
            CompressionStrategy::Adaptive { min_size: 256 },
        ] {
            let mut harness = HubTestHarness::with_compression(strategy);
            let repo = harness.create_project("compressed", ProjectConfig::default()).id();
            for _ in 0..3 {
                harness.mutate(repo, MutationConfig::default());
            }
            harness.reopen();
            harness.check_against_model(repo);
        }
    }

    #[test]
    fn test_readme_edit_walkthrough() {
        let hub = Hub::in_memory().unwrap();
        let repo = hub
            .create_repository_with(
                CreateRepository::new(UserId(1), "hello")
                    .files(Snapshot::new([("README.md", "# Hello\n")]).unwrap()),
            )
            .unwrap();

        let commit = hub
            .commit_to_repository(
                repo.id(),
                Revision(1),
                &EditSet::new().write("README.md", "# Hello\nWorld\n"),
                UserId(1),
                "Say hello to the world",
            )
            .unwrap();
        assert_eq!(commit.revision, Revision(2));

        let diff = hub.get_diff(repo.id(), Revision(1), Revision(2)).unwrap();
        let changed: Vec<_> = diff.changed().collect();
        assert_eq!(changed.len(), 1);
        assert_eq!(changed[0].kind(), ChangeKind::Modified);
        assert_eq!(changed[0].path(), "README.md");
        assert_eq!(
            changed[0].script().ops(),
            &[
                EditOp::Equal(vec!["# Hello\n".to_string()]),
                EditOp::Insert(vec!["World\n".to_string()]),
            ]
        );
        assert!(diff.to_unified(3).contains("+World\n"));
    }

    #[test]
    fn test_license_and_empty_base() {
        let hub = Hub::in_memory().unwrap();
        let repo = hub.create_repository(UserId(1), "hello-world", "My first CodeHub repo", false).unwrap();

        hub.commit_to_repository(repo.id(), Revision(1), &EditSet::new().write("LICENSE", "MIT"), UserId(1), "Add license")
            .unwrap();

        let diff = hub.get_diff(repo.id(), Revision(1), Revision(2)).unwrap();
        let changed: Vec<_> = diff.changed().map(|c| (c.kind(), c.path().to_string())).collect();
        assert_eq!(changed, vec![(ChangeKind::Added, "LICENSE".to_string())]);

        let from_empty = hub.get_diff(repo.id(), Revision(0), Revision(2)).unwrap();
        assert!(from_empty.changed().all(|c| c.kind() == ChangeKind::Added));
        assert_eq!(
            from_empty.changed().map(|c| c.path()).collect::<Vec<_>>(),
            vec!["LICENSE", "README.md"]
        );
        assert_eq!(from_empty.stats.files_added, 2);
    }

    #[test]
    fn test_history_paging_across_reopen() {
        let mut harness = HubTestHarness::new();
        let repo = harness.create_project("paged", ProjectConfig::default()).id();
        while harness.model[&repo].len() < 45 {
            harness.mutate(repo, MutationConfig::default());
        }
        harness.reopen();

        let mut seen = Vec::new();
        let mut page = 1;
        loop {
            let listing = harness.hub.list_history(repo, page).unwrap();
            seen.extend(listing.entries.iter().map(|e| e.revision.0));
            if !listing.has_more {
                assert_eq!(listing.total_pages(), page);
                break;
            }
            page += 1;
        }
        assert_eq!(seen, (1..=45).rev().collect::<Vec<u64>>());
        assert!(harness.hub.list_history(repo, page + 1).unwrap().entries.is_empty());
    }

    #[test]
    fn test_diffs_rebuild_target_contents() {
        let mut harness = HubTestHarness::new();
        let repo = harness.create_project("diffs", ProjectConfig::default()).id();
        for _ in 0..8 {
            harness.mutate(repo, MutationConfig::default());
        }

        let head = harness.model[&repo].len() as u64;
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..10 {
            let from = rng.random_range(0..=head);
            let to = rng.random_range(1..=head);
            let diff = harness.hub.get_diff(repo, Revision(from), Revision(to)).unwrap();
            let target = &harness.model[&repo][to as usize - 1];

            for change in diff.changed() {
                match change {
                    PathChange::Added { path, content } => {
                        assert_eq!(content.as_bytes(), target[path].as_slice())
                    }
                    PathChange::Removed { path, .. } => assert!(!target.contains_key(path)),
                    PathChange::Modified { path, script } => {
                        assert_eq!(script.reconstruct_new(), target[path])
                    }
                    PathChange::Unchanged { .. } => unreachable!("changed() skips unchanged paths"),
                }
            }
        }
    }

    #[test]
    #[traced_test]
    fn test_hub_listing_after_reopen() {
        let mut harness = HubTestHarness::new();
        let public = harness.create_project("public", ProjectConfig::default()).id();
        harness
            .hub
            .create_repository(UserId(2), "secret", "", true)
            .unwrap();
        harness.hub.set_stars_count(public, 3).unwrap();
        harness.reopen();

        let explore = harness.hub.explore(None);
        assert_eq!(explore.len(), 1);
        assert_eq!(explore[0].record.name, "public");
        assert_eq!(explore[0].record.stars_count, 3);

        assert_eq!(harness.hub.explore(Some(UserId(2))).len(), 2);
        assert!(logs_contain("Hub ready with 2 repositories"));
    }
}
