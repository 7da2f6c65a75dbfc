//! Chaos tests for CodeHub
//!
//! Damages storage on disk and injects persistence failures, then checks that
//! the hub either refuses to load or keeps a consistent history.

use ::codehub::*;
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tempfile::TempDir;
use tracing::{info, warn};

/// Persistence that fails on demand
///
/// Wraps [`MemoryPersistence`]; while `fail_commits` is set, or once the
/// commit budget runs out, `save_commit` returns a storage error.
#[derive(Default)]
pub struct FlakyPersistence {
    inner: MemoryPersistence,
    pub fail_commits: AtomicBool,
    pub fail_records: AtomicBool,
    commits_left: Mutex<Option<usize>>,
    pub failures: AtomicUsize,
}

impl FlakyPersistence {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allow `n` more commits, then fail every following one
    pub fn fail_after(&self, n: usize) {
        *self.commits_left.lock() = Some(n);
    }

    pub fn stored_commits(&self, id: RepositoryId) -> usize {
        self.inner.commit_count(id)
    }

    fn injected(&self, what: &str) -> CodehubError {
        self.failures.fetch_add(1, Ordering::SeqCst);
        warn!("Injected {} failure", what);
        CodehubError::storage(format!("injected {} failure", what))
    }
}

impl Persistence for FlakyPersistence {
    fn save_repository(&self, record: &RepositoryRecord) -> Result<()> {
        if self.fail_records.load(Ordering::SeqCst) {
            return Err(self.injected("record"));
        }
        self.inner.save_repository(record)
    }

    fn save_commit(&self, repository_id: RepositoryId, commit: &Commit) -> Result<()> {
        if self.fail_commits.load(Ordering::SeqCst) {
            return Err(self.injected("commit"));
        }
        {
            let mut left = self.commits_left.lock();
            match left.as_mut() {
                Some(0) => return Err(self.injected("commit")),
                Some(n) => *n -= 1,
                None => {}
            }
        }
        self.inner.save_commit(repository_id, commit)
    }

    fn load_repository(&self, id: RepositoryId) -> Result<StoredRepository> {
        self.inner.load_repository(id)
    }

    fn list_repositories(&self) -> Result<Vec<RepositoryId>> {
        self.inner.list_repositories()
    }

    fn delete_repository(&self, id: RepositoryId) -> Result<()> {
        self.inner.delete_repository(id)
    }
}

/// Random damage to storage files
pub struct ChaosEngine {
    rng: StdRng,
}

impl ChaosEngine {
    pub fn new(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
        }
    }

    /// Flip random bytes in a file
    pub fn corrupt_file(&mut self, path: &Path) -> anyhow::Result<()> {
        let mut content = fs::read(path)?;
        anyhow::ensure!(!content.is_empty(), "{} is empty", path.display());
        for _ in 0..(content.len() / 16).max(4) {
            let index = self.rng.random_range(0..content.len());
            content[index] ^= 0xFF;
        }
        fs::write(path, content)?;
        Ok(())
    }

    /// Cut a file in half
    pub fn truncate_file(&mut self, path: &Path) -> anyhow::Result<()> {
        let content = fs::read(path)?;
        fs::write(path, &content[..content.len() / 2])?;
        Ok(())
    }

    /// Pick a random file with the given extension below `dir`
    pub fn pick_file(&mut self, dir: &Path, extension: &str) -> anyhow::Result<PathBuf> {
        let mut files = Vec::new();
        collect_files(dir, extension, &mut files)?;
        anyhow::ensure!(!files.is_empty(), "no .{} files in {}", extension, dir.display());
        files.sort();
        Ok(files.swap_remove(self.rng.random_range(0..files.len())))
    }
}

fn collect_files(dir: &Path, extension: &str, out: &mut Vec<PathBuf>) -> anyhow::Result<()> {
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_dir() {
            collect_files(&path, extension, out)?;
        } else if path.extension().and_then(|e| e.to_str()) == Some(extension) {
            out.push(path);
        }
    }
    Ok(())
}

/// A storage directory holding one repository with a few commits
fn populated_storage(commits: usize) -> (TempDir, PathBuf, RepositoryId) {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("hub");
    let hub = HubBuilder::new()
        .storage_path(path.clone())
        .compression_strategy(CompressionStrategy::None)
        .build()
        .unwrap();
    let repo = hub.create_repository(UserId(1), "victim", "", false).unwrap();
    for i in 0..commits {
        hub.commit_to_repository(
            repo.id(),
            repo.history().head_revision(),
            &EditSet::new().write(format!("file_{}.txt", i), format!("content {}\n", i)),
            UserId(1),
            "add file",
        )
        .unwrap();
    }
    (dir, path, repo.id())
}

fn commit_file(storage: &Path, id: RepositoryId, revision: u64) -> PathBuf {
    storage
        .join("repositories")
        .join(id.to_string())
        .join("commits")
        .join(format!("{:010}.commit", revision))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracing_test::traced_test;

    #[test]
    #[traced_test]
    fn test_corrupted_commit_refuses_to_load() {
        let (_dir, storage, _) = populated_storage(5);
        let mut chaos = ChaosEngine::new(42);
        let victim = chaos.pick_file(&storage, "commit").unwrap();
        info!("Corrupting {:?}", victim);
        chaos.corrupt_file(&victim).unwrap();

        assert!(Hub::open(storage).is_err());
    }

    #[test]
    fn test_truncated_commit_refuses_to_load() {
        let (_dir, storage, id) = populated_storage(3);
        ChaosEngine::new(1)
            .truncate_file(&commit_file(&storage, id, 2))
            .unwrap();
        assert!(Hub::open(storage).is_err());
    }

    #[test]
    fn test_missing_commit_is_detected() {
        let (_dir, storage, id) = populated_storage(4);
        fs::remove_file(commit_file(&storage, id, 3)).unwrap();

        let err = Hub::open(storage).unwrap_err();
        assert!(err.is_corruption(), "unexpected error: {}", err);
    }

    #[test]
    fn test_swapped_commits_are_detected() {
        let (_dir, storage, id) = populated_storage(4);
        let second = commit_file(&storage, id, 2);
        let third = commit_file(&storage, id, 3);
        let a = fs::read(&second).unwrap();
        let b = fs::read(&third).unwrap();
        fs::write(&second, b).unwrap();
        fs::write(&third, a).unwrap();

        let err = Hub::open(storage).unwrap_err();
        assert!(err.is_corruption(), "unexpected error: {}", err);
    }

    #[test]
    fn test_corrupted_record_refuses_to_load() {
        let (_dir, storage, id) = populated_storage(1);
        let record = storage.join("repositories").join(id.to_string()).join("repository.json");
        fs::write(&record, "{ not json").unwrap();
        assert!(matches!(Hub::open(storage), Err(CodehubError::Json(_))));
    }

    #[test]
    fn test_stray_files_are_ignored() {
        let (_dir, storage, id) = populated_storage(2);
        let commits = commit_file(&storage, id, 1).parent().unwrap().to_path_buf();
        fs::write(commits.join("notes.txt"), "left by an operator").unwrap();
        fs::write(commits.join(".tmpXYZ"), "partial write").unwrap();

        let hub = Hub::open(storage).unwrap();
        assert_eq!(hub.get_repository(id).unwrap().history().len(), 3);
    }

    #[test]
    #[traced_test]
    fn test_failed_persistence_leaves_head_unchanged() {
        let persistence = Arc::new(FlakyPersistence::new());
        let hub = HubBuilder::new().persistence(persistence.clone()).build().unwrap();
        let repo = hub.create_repository(UserId(1), "flaky", "", false).unwrap();

        persistence.fail_commits.store(true, Ordering::SeqCst);
        let err = hub
            .commit_to_repository(repo.id(), Revision(1), &EditSet::new().write("a.txt", "a"), UserId(1), "lost")
            .unwrap_err();
        assert!(matches!(err, CodehubError::Storage(_)));
        assert_eq!(repo.history().head_revision(), Revision(1));
        assert_eq!(persistence.stored_commits(repo.id()), 1);
        assert!(logs_contain("Injected commit failure"));

        // The same base works once storage recovers
        persistence.fail_commits.store(false, Ordering::SeqCst);
        let commit = hub
            .commit_to_repository(repo.id(), Revision(1), &EditSet::new().write("a.txt", "a"), UserId(1), "kept")
            .unwrap();
        assert_eq!(commit.revision, Revision(2));
        assert!(hub.verify_repository(repo.id()).unwrap().is_valid());
    }

    #[test]
    fn test_intermittent_failures_keep_history_contiguous() {
        let persistence = Arc::new(FlakyPersistence::new());
        let hub = HubBuilder::new().persistence(persistence.clone()).build().unwrap();
        let repo = hub.create_repository(UserId(1), "intermittent", "", false).unwrap();

        let mut rng = StdRng::seed_from_u64(9);
        let mut landed = 1;
        for i in 0..40 {
            let fail = rng.random_bool(0.3);
            persistence.fail_commits.store(fail, Ordering::SeqCst);
            let result = hub.commit_to_repository(
                repo.id(),
                repo.history().head_revision(),
                &EditSet::new().write("counter.txt", format!("{}\n", i)),
                UserId(1),
                "tick",
            );
            assert_eq!(result.is_ok(), !fail);
            if result.is_ok() {
                landed += 1;
            }
        }

        assert_eq!(repo.history().len(), landed);
        assert_eq!(persistence.stored_commits(repo.id()), landed);
        let report = hub.verify_repository(repo.id()).unwrap();
        assert!(report.is_valid(), "{}", report.summary());

        // Reload from what was actually stored
        let reloaded = HubBuilder::new().persistence(persistence.clone()).build().unwrap();
        assert_eq!(reloaded.get_repository(repo.id()).unwrap().history().len(), landed);
    }

    #[test]
    fn test_failed_initial_commit_rolls_back_creation() {
        let persistence = Arc::new(FlakyPersistence::new());
        persistence.fail_after(0);
        let hub = HubBuilder::new().persistence(persistence.clone()).build().unwrap();

        assert!(hub.create_repository(UserId(1), "doomed", "", false).is_err());
        assert_eq!(hub.repository_count(), 0);
        assert!(hub.find_by_name(UserId(1), "doomed").is_none());
        assert!(persistence.list_repositories().unwrap().is_empty());

        persistence.fail_after(usize::MAX);
        hub.create_repository(UserId(1), "doomed", "", false).unwrap();
    }

    #[test]
    fn test_failed_record_update_keeps_old_record() {
        let persistence = Arc::new(FlakyPersistence::new());
        let hub = HubBuilder::new().persistence(persistence.clone()).build().unwrap();
        let repo = hub.create_repository(UserId(1), "stable", "before", false).unwrap();

        persistence.fail_records.store(true, Ordering::SeqCst);
        let update = RepositoryUpdate {
            description: Some("after".to_string()),
            is_private: None,
        };
        assert!(hub.update_repository(repo.id(), update).is_err());
        assert!(hub.set_stars_count(repo.id(), 10).is_err());
        assert_eq!(repo.record().description, "before");
        assert_eq!(repo.record().stars_count, 0);
        assert_eq!(persistence.failures.load(Ordering::SeqCst), 2);
    }
}
