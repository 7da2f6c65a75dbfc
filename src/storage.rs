//! Persistence backends for repositories and their commits
//!
//! The history core talks to storage through the [`Persistence`] trait. Two
//! implementations are provided:
//!
//! - [`MemoryPersistence`]: concurrent in-memory maps, for tests and ephemeral hubs
//! - [`FileStorage`]: a directory on disk
//!
//! ## Architecture
//!
//! [`FileStorage`] uses the following layout:
//!
//! ```text
//! storage_root/
//! ├── metadata.json                # Storage metadata
//! └── repositories/
//!     └── <repository_id>/
//!         ├── repository.json      # Repository record
//!         └── commits/
//!             └── <revision>.commit  # Commit with full snapshot (bincode, LZ4)
//! ```
//!
//! Revisions are zero-padded to ten digits so directory order is revision order.
//! Commit files are written to a temporary file and moved into place without
//! replacing an existing file: a revision that is already stored can never be
//! overwritten, and a crash mid-write leaves no partial commit behind.

use crate::collections::{concurrent_map, ConcurrentMap};
use crate::commit::Commit;
use crate::compression::{CompressionEngine, CompressionStats, CompressionStrategy};
use crate::error::{CodehubError, Result};
use crate::repository::RepositoryRecord;
use crate::types::{RepositoryId, StorageMetadata};
use crate::utils::{atomic_create, atomic_write};
use chrono::Utc;
use parking_lot::Mutex;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, trace};

/// Current on-disk format version
pub const FORMAT_VERSION: u32 = 1;

const METADATA_FILE: &str = "metadata.json";
const REPOSITORIES_DIR: &str = "repositories";
const RECORD_FILE: &str = "repository.json";
const COMMITS_DIR: &str = "commits";
const COMMIT_EXT: &str = "commit";

/// A repository as loaded from persistence
#[derive(Debug, Clone)]
pub struct StoredRepository {
    /// Identity record
    pub record: RepositoryRecord,
    /// All commits, ordered by revision
    pub commits: Vec<Commit>,
}

/// Durable storage for repositories and commits
///
/// `save_commit` must be durable when it returns `Ok`: the commit store only
/// publishes a commit after this call succeeded.
pub trait Persistence: Send + Sync {
    /// Create or replace a repository record
    fn save_repository(&self, record: &RepositoryRecord) -> Result<()>;

    /// Append a commit; fails if its revision is already stored
    fn save_commit(&self, repository_id: RepositoryId, commit: &Commit) -> Result<()>;

    /// Load a record with its full history
    fn load_repository(&self, id: RepositoryId) -> Result<StoredRepository>;

    /// Identifiers of every stored repository, ascending
    fn list_repositories(&self) -> Result<Vec<RepositoryId>>;

    /// Remove a repository and all its commits
    fn delete_repository(&self, id: RepositoryId) -> Result<()>;
}

/// In-memory persistence
#[derive(Default)]
pub struct MemoryPersistence {
    records: ConcurrentMap<RepositoryId, RepositoryRecord>,
    commits: ConcurrentMap<RepositoryId, Vec<Commit>>,
}

impl MemoryPersistence {
    /// Create empty storage
    pub fn new() -> Self {
        Self {
            records: concurrent_map(),
            commits: concurrent_map(),
        }
    }

    /// Number of commits stored for a repository
    pub fn commit_count(&self, id: RepositoryId) -> usize {
        self.commits.get(&id).map_or(0, |c| c.len())
    }
}

impl std::fmt::Debug for MemoryPersistence {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryPersistence")
            .field("repositories", &self.records.len())
            .finish()
    }
}

impl Persistence for MemoryPersistence {
    fn save_repository(&self, record: &RepositoryRecord) -> Result<()> {
        self.records.insert(record.id, record.clone());
        Ok(())
    }

    fn save_commit(&self, repository_id: RepositoryId, commit: &Commit) -> Result<()> {
        if !self.records.contains_key(&repository_id) {
            return Err(CodehubError::RepositoryNotFound(repository_id));
        }
        let mut commits = self.commits.entry(repository_id).or_default();
        if commits.iter().any(|c| c.revision == commit.revision) {
            return Err(CodehubError::ConcurrentModification(format!(
                "revision {} of repository {} is already stored",
                commit.revision, repository_id
            )));
        }
        commits.push(commit.clone());
        Ok(())
    }

    fn load_repository(&self, id: RepositoryId) -> Result<StoredRepository> {
        let record = self
            .records
            .get(&id)
            .map(|r| r.clone())
            .ok_or(CodehubError::RepositoryNotFound(id))?;
        let mut commits = self.commits.get(&id).map(|c| c.clone()).unwrap_or_default();
        commits.sort_by_key(|c| c.revision);
        Ok(StoredRepository { record, commits })
    }

    fn list_repositories(&self) -> Result<Vec<RepositoryId>> {
        let mut ids: Vec<RepositoryId> = self.records.iter().map(|e| *e.key()).collect();
        ids.sort();
        Ok(ids)
    }

    fn delete_repository(&self, id: RepositoryId) -> Result<()> {
        self.commits.remove(&id);
        self.records
            .remove(&id)
            .map(|_| ())
            .ok_or(CodehubError::RepositoryNotFound(id))
    }
}

/// Persistence in a storage directory
pub struct FileStorage {
    root: PathBuf,
    metadata: StorageMetadata,
    compression: Mutex<CompressionEngine>,
}

impl std::fmt::Debug for FileStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileStorage")
            .field("root", &self.root)
            .field("compression", &self.metadata.compression)
            .finish()
    }
}

impl FileStorage {
    /// Initialize a new storage directory
    ///
    /// # Errors
    ///
    /// - [`CodehubError::StorageAlreadyExists`] if the directory already holds storage
    /// - [`CodehubError::Io`] if the directory cannot be created
    pub fn init(root: PathBuf, compression: CompressionStrategy) -> Result<Self> {
        if root.join(METADATA_FILE).exists() {
            return Err(CodehubError::StorageAlreadyExists(root));
        }

        fs::create_dir_all(root.join(REPOSITORIES_DIR))?;
        let metadata = StorageMetadata {
            format_version: FORMAT_VERSION,
            codehub_version: env!("CARGO_PKG_VERSION").to_string(),
            created_at: Utc::now(),
            compression,
        };
        atomic_write(
            &root.join(METADATA_FILE),
            serde_json::to_string_pretty(&metadata)?.as_bytes(),
        )?;

        info!("Initialized storage at {:?}", root);
        Ok(Self {
            root,
            metadata,
            compression: Mutex::new(CompressionEngine::new(compression)),
        })
    }

    /// Open an existing storage directory
    ///
    /// # Errors
    ///
    /// - [`CodehubError::StorageNotInitialized`] if no storage exists at `root`
    /// - [`CodehubError::Storage`] if the format version is not supported
    pub fn open(root: PathBuf) -> Result<Self> {
        let metadata_path = root.join(METADATA_FILE);
        if !metadata_path.exists() {
            return Err(CodehubError::StorageNotInitialized(root));
        }

        let metadata: StorageMetadata = serde_json::from_str(&fs::read_to_string(&metadata_path)?)?;
        if metadata.format_version != FORMAT_VERSION {
            return Err(CodehubError::storage(format!(
                "unsupported storage format version {} (expected {})",
                metadata.format_version, FORMAT_VERSION
            )));
        }

        info!("Opened storage at {:?}", root);
        Ok(Self {
            compression: Mutex::new(CompressionEngine::new(metadata.compression)),
            root,
            metadata,
        })
    }

    /// Open storage at `root`, initializing it first if needed
    pub fn init_or_open(root: PathBuf, compression: CompressionStrategy) -> Result<Self> {
        if root.join(METADATA_FILE).exists() {
            Self::open(root)
        } else {
            Self::init(root, compression)
        }
    }

    /// Root directory of this storage
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Storage metadata
    pub fn metadata(&self) -> &StorageMetadata {
        &self.metadata
    }

    /// Compression statistics since this storage was opened
    pub fn compression_stats(&self) -> CompressionStats {
        self.compression.lock().stats().clone()
    }

    fn repository_dir(&self, id: RepositoryId) -> PathBuf {
        self.root.join(REPOSITORIES_DIR).join(id.to_string())
    }

    fn commit_path(&self, id: RepositoryId, commit: &Commit) -> PathBuf {
        self.repository_dir(id)
            .join(COMMITS_DIR)
            .join(format!("{:010}.{}", commit.revision.0, COMMIT_EXT))
    }

    fn encode_commit(&self, commit: &Commit) -> Result<Vec<u8>> {
        let bytes = bincode::serde::encode_to_vec(commit, bincode::config::standard())?;
        self.compression.lock().compress(&bytes)
    }

    fn decode_commit(&self, path: &Path) -> Result<Commit> {
        let framed = fs::read(path)?;
        let bytes = self.compression.lock().decompress(&framed)?;
        let (commit, _): (Commit, _) =
            bincode::serde::decode_from_slice(&bytes, bincode::config::standard())?;
        Ok(commit)
    }
}

impl Persistence for FileStorage {
    fn save_repository(&self, record: &RepositoryRecord) -> Result<()> {
        let dir = self.repository_dir(record.id);
        fs::create_dir_all(dir.join(COMMITS_DIR))?;
        atomic_write(
            &dir.join(RECORD_FILE),
            serde_json::to_string_pretty(record)?.as_bytes(),
        )?;
        debug!("Stored repository record {} ({})", record.id, record.name);
        Ok(())
    }

    fn save_commit(&self, repository_id: RepositoryId, commit: &Commit) -> Result<()> {
        if !self.repository_dir(repository_id).join(RECORD_FILE).exists() {
            return Err(CodehubError::RepositoryNotFound(repository_id));
        }
        let blob = self.encode_commit(commit)?;
        let path = self.commit_path(repository_id, commit);
        atomic_create(&path, &blob)?;
        debug!(
            "Stored commit r{} of repository {} ({} bytes)",
            commit.revision,
            repository_id,
            blob.len()
        );
        Ok(())
    }

    fn load_repository(&self, id: RepositoryId) -> Result<StoredRepository> {
        let dir = self.repository_dir(id);
        let record_path = dir.join(RECORD_FILE);
        if !record_path.exists() {
            return Err(CodehubError::RepositoryNotFound(id));
        }
        let record: RepositoryRecord = serde_json::from_str(&fs::read_to_string(&record_path)?)?;
        if record.id != id {
            return Err(CodehubError::CorruptionDetected(format!(
                "record in {:?} belongs to repository {}",
                record_path, record.id
            )));
        }

        let mut paths = Vec::new();
        let commits_dir = dir.join(COMMITS_DIR);
        if commits_dir.exists() {
            for entry in fs::read_dir(&commits_dir)? {
                let path = entry?.path();
                if path.extension().and_then(|e| e.to_str()) == Some(COMMIT_EXT) {
                    paths.push(path);
                } else {
                    trace!("Skipping stray file {:?}", path);
                }
            }
        }
        paths.sort();

        let commits = paths
            .iter()
            .map(|path| self.decode_commit(path))
            .collect::<Result<Vec<_>>>()?;
        debug!("Loaded repository {} with {} commits", id, commits.len());
        Ok(StoredRepository { record, commits })
    }

    fn list_repositories(&self) -> Result<Vec<RepositoryId>> {
        let mut ids = Vec::new();
        let dir = self.root.join(REPOSITORIES_DIR);
        if dir.exists() {
            for entry in fs::read_dir(dir)? {
                let entry = entry?;
                if !entry.path().join(RECORD_FILE).exists() {
                    continue;
                }
                if let Some(id) = entry
                    .file_name()
                    .to_str()
                    .and_then(|name| name.parse::<u64>().ok())
                {
                    ids.push(RepositoryId(id));
                }
            }
        }
        ids.sort();
        Ok(ids)
    }

    fn delete_repository(&self, id: RepositoryId) -> Result<()> {
        let dir = self.repository_dir(id);
        if !dir.exists() {
            return Err(CodehubError::RepositoryNotFound(id));
        }
        fs::remove_dir_all(dir)?;
        info!("Deleted repository {} from storage", id);
        Ok(())
    }
}
