//! Main hub implementation
//!
//! This module provides [`Hub`], the entry point the surrounding web
//! application talks to. It owns every [`Repository`] and exposes the
//! operations a hosted-repository service needs: creating repositories,
//! committing edits, reading snapshots and diffs, and paging through history.
//!
//! ## Overview
//!
//! The hub coordinates several subsystems:
//!
//! - **Registry**: concurrent maps from id and from `(owner, name)` to repository
//! - **Commit Stores**: one per repository, serializing its commits
//! - **Persistence**: where records and commits are made durable
//! - **Markup Renderer**: turns commit messages and READMEs into safe markup
//!
//! ## Thread Safety
//!
//! Every method takes `&self`. Commits to the same repository serialize on
//! that repository's commit store; everything else proceeds concurrently.
//! Authentication is the caller's concern: author and viewer ids are always
//! passed in explicitly.
//!
//! ## Examples
//!
//! ```rust
//! use codehub::{EditSet, Hub, Revision, UserId};
//!
//! # fn main() -> codehub::Result<()> {
//! let hub = Hub::in_memory()?;
//! let repo = hub.create_repository(UserId(1), "hello-world", "My first repo", false)?;
//!
//! let edits = EditSet::new().write("LICENSE", "MIT");
//! let commit = hub.commit_to_repository(repo.id(), Revision(1), &edits, UserId(1), "Add license")?;
//! assert_eq!(commit.revision, Revision(2));
//!
//! let diff = hub.get_diff(repo.id(), Revision(1), Revision(2))?;
//! assert_eq!(diff.changed().count(), 1);
//! # Ok(())
//! # }
//! ```

use crate::changes::DiffResult;
use crate::collections::{concurrent_map, ConcurrentMap};
use crate::commit::{Commit, Revision};
use crate::compression::CompressionStrategy;
use crate::error::{CodehubError, Result};
use crate::history::{CommitStore, HistoryPage};
use crate::render::{EscapingRenderer, MarkupRenderer, SafeMarkup};
use crate::repository::{default_snapshot, validate_name, Repository, RepositoryInfo, RepositoryRecord};
use crate::snapshot::{EditSet, Snapshot};
use crate::storage::{FileStorage, MemoryPersistence, Persistence};
use crate::types::{HubConfig, Page, RepositoryId, UserId};
use crate::verification::{HistoryVerifier, VerificationReport};
use std::cmp::Reverse;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

/// Message of the seeded initial commit
pub const INITIAL_COMMIT_MESSAGE: &str = "Initial commit";

/// Request to create a repository
///
/// # Examples
///
/// ```rust
/// use codehub::{CreateRepository, Snapshot, UserId};
///
/// let request = CreateRepository::new(UserId(1), "dotfiles")
///     .description("My configuration")
///     .private(true)
///     .files(Snapshot::new([(".vimrc", "set number\n")]).unwrap());
/// assert!(request.is_private);
/// ```
#[derive(Debug, Clone)]
pub struct CreateRepository {
    /// Owner of the new repository
    pub owner_id: UserId,
    /// Repository name, unique per owner
    pub name: String,
    /// Free-form description
    pub description: String,
    /// Whether only the owner may see it
    pub is_private: bool,
    /// Files of the initial commit (a README is generated when None)
    pub initial_files: Option<Snapshot>,
    /// Message of the initial commit
    pub message: String,
}

impl CreateRepository {
    /// Start a request for a public repository with a generated README
    pub fn new(owner_id: UserId, name: impl Into<String>) -> Self {
        Self {
            owner_id,
            name: name.into(),
            description: String::new(),
            is_private: false,
            initial_files: None,
            message: INITIAL_COMMIT_MESSAGE.to_string(),
        }
    }

    /// Set the description
    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Set visibility
    pub fn private(mut self, is_private: bool) -> Self {
        self.is_private = is_private;
        self
    }

    /// Use these files for the initial commit
    pub fn files(mut self, snapshot: Snapshot) -> Self {
        self.initial_files = Some(snapshot);
        self
    }

    /// Set the initial commit message
    pub fn message(mut self, message: impl Into<String>) -> Self {
        self.message = message.into();
        self
    }
}

/// Changes to a repository's identity; `None` fields stay as they are
#[derive(Debug, Clone, Default)]
pub struct RepositoryUpdate {
    /// New description
    pub description: Option<String>,
    /// New visibility
    pub is_private: Option<bool>,
}

/// The repository service
pub struct Hub {
    config: HubConfig,
    persistence: Arc<dyn Persistence>,
    renderer: Arc<dyn MarkupRenderer>,
    repositories: ConcurrentMap<RepositoryId, Arc<Repository>>,
    names: ConcurrentMap<(UserId, String), RepositoryId>,
    next_id: AtomicU64,
}

impl std::fmt::Debug for Hub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Hub")
            .field("config", &self.config)
            .field("repositories", &self.repositories.len())
            .field("next_id", &self.next_id.load(Ordering::Relaxed))
            .finish()
    }
}

impl Hub {
    /// Hub keeping everything in memory, with default settings
    pub fn in_memory() -> Result<Self> {
        HubBuilder::new().build()
    }

    /// Open (or initialize) a hub stored in `storage_path`
    ///
    /// Every stored repository is reloaded and its history verified.
    ///
    /// # Errors
    ///
    /// - [`CodehubError::CorruptionDetected`] if a stored history is invalid
    /// - any storage error while reading
    pub fn open(storage_path: PathBuf) -> Result<Self> {
        HubBuilder::new().storage_path(storage_path).build()
    }

    fn load(
        config: HubConfig,
        persistence: Arc<dyn Persistence>,
        renderer: Arc<dyn MarkupRenderer>,
    ) -> Result<Self> {
        let hub = Self {
            config,
            persistence,
            renderer,
            repositories: concurrent_map(),
            names: concurrent_map(),
            next_id: AtomicU64::new(1),
        };

        let ids = hub.persistence.list_repositories()?;
        let mut max_id = 0;
        for id in ids {
            max_id = max_id.max(id.0);
            let stored = hub.persistence.load_repository(id)?;
            if stored.commits.is_empty() {
                warn!("Skipping repository {} ({}): no commits", id, stored.record.name);
                continue;
            }
            let history = CommitStore::from_commits(id, stored.commits, Arc::clone(&hub.persistence))?;
            hub.names
                .insert((stored.record.owner_id, stored.record.name.clone()), id);
            hub.repositories
                .insert(id, Arc::new(Repository::new(stored.record, history)));
        }
        hub.next_id.store(max_id + 1, Ordering::SeqCst);

        info!("Hub ready with {} repositories", hub.repositories.len());
        Ok(hub)
    }

    /// Active configuration
    pub fn config(&self) -> &HubConfig {
        &self.config
    }

    /// Number of repositories
    pub fn repository_count(&self) -> usize {
        self.repositories.len()
    }

    /// Create a repository seeded with one initial commit
    ///
    /// The initial commit holds a README built from the name and description.
    pub fn create_repository(
        &self,
        owner_id: UserId,
        name: &str,
        description: &str,
        is_private: bool,
    ) -> Result<Arc<Repository>> {
        self.create_repository_with(
            CreateRepository::new(owner_id, name)
                .description(description)
                .private(is_private),
        )
    }

    /// Create a repository from a full request
    ///
    /// # Errors
    ///
    /// - [`CodehubError::InvalidName`] if the name is not acceptable
    /// - [`CodehubError::RepositoryExists`] if the owner already has this name
    /// - [`CodehubError::FileTooLarge`] if an initial file exceeds the size limit
    /// - [`CodehubError::EmptyCommit`] if the initial snapshot has no files
    #[instrument(skip(self, request), fields(owner = %request.owner_id, name = %request.name))]
    pub fn create_repository_with(&self, request: CreateRepository) -> Result<Arc<Repository>> {
        validate_name(&request.name)?;
        let snapshot = match request.initial_files {
            Some(snapshot) => snapshot,
            None => default_snapshot(&request.name, &request.description)?,
        };
        if let Some((path, size)) = snapshot
            .iter()
            .map(|(path, content)| (path, content.len()))
            .max_by_key(|(_, size)| *size)
        {
            self.check_size(path, size)?;
        }

        let key = (request.owner_id, request.name.clone());
        let id = {
            let entry = self.names.entry(key.clone());
            match entry {
                dashmap::mapref::entry::Entry::Occupied(_) => {
                    return Err(CodehubError::RepositoryExists {
                        owner: request.owner_id,
                        name: request.name,
                    });
                }
                dashmap::mapref::entry::Entry::Vacant(vacant) => {
                    let id = RepositoryId(self.next_id.fetch_add(1, Ordering::SeqCst));
                    vacant.insert(id);
                    id
                }
            }
        };

        let record = RepositoryRecord {
            description: request.description,
            is_private: request.is_private,
            ..RepositoryRecord::new(id, request.owner_id, request.name)
        };

        match self.seed(record, snapshot, request.message) {
            Ok(repository) => {
                self.repositories.insert(id, Arc::clone(&repository));
                info!("Created repository {} ({})", id, key.1);
                Ok(repository)
            }
            Err(e) => {
                self.names.remove(&key);
                Err(e)
            }
        }
    }

    fn seed(&self, record: RepositoryRecord, snapshot: Snapshot, message: String) -> Result<Arc<Repository>> {
        let id = record.id;
        let owner = record.owner_id;
        self.persistence.save_repository(&record)?;

        let history = CommitStore::new(id, Arc::clone(&self.persistence));
        if let Err(e) = history.initialize(snapshot, owner, message) {
            if let Err(cleanup) = self.persistence.delete_repository(id) {
                warn!("Failed to remove half-created repository {}: {}", id, cleanup);
            }
            return Err(e);
        }
        Ok(Arc::new(Repository::new(record, history)))
    }

    fn check_size(&self, path: &str, size: usize) -> Result<()> {
        let limit = self.config.max_file_size;
        if limit > 0 && size as u64 > limit {
            return Err(CodehubError::FileTooLarge {
                path: path.to_string(),
                size: size as u64,
                limit,
            });
        }
        Ok(())
    }

    /// Repository by id
    pub fn get_repository(&self, id: RepositoryId) -> Result<Arc<Repository>> {
        self.repositories
            .get(&id)
            .map(|r| Arc::clone(r.value()))
            .ok_or(CodehubError::RepositoryNotFound(id))
    }

    /// Repository by owner and name
    pub fn find_by_name(&self, owner_id: UserId, name: &str) -> Option<Arc<Repository>> {
        let id = *self.names.get(&(owner_id, name.to_string()))?;
        self.get_repository(id).ok()
    }

    /// Append a commit to a repository
    ///
    /// # Errors
    ///
    /// - [`CodehubError::RepositoryNotFound`] if the repository does not exist
    /// - [`CodehubError::FileTooLarge`] if an edit exceeds the size limit
    /// - everything [`CommitStore::commit`] can return
    #[instrument(skip(self, edits, message))]
    pub fn commit_to_repository(
        &self,
        repository_id: RepositoryId,
        base: Revision,
        edits: &EditSet,
        author_id: UserId,
        message: &str,
    ) -> Result<Arc<Commit>> {
        let repository = self.get_repository(repository_id)?;
        if let Some((path, size)) = edits.largest_write() {
            self.check_size(path, size)?;
        }
        repository.history().commit(base, edits, author_id, message)
    }

    /// Snapshot of a repository at `revision`
    pub fn get_snapshot(&self, repository_id: RepositoryId, revision: Revision) -> Result<Snapshot> {
        let repository = self.get_repository(repository_id)?;
        Ok(repository.history().at(revision)?.snapshot.clone())
    }

    /// Commit of a repository at `revision`
    pub fn get_commit(&self, repository_id: RepositoryId, revision: Revision) -> Result<Arc<Commit>> {
        self.get_repository(repository_id)?.history().at(revision)
    }

    /// Diff between two revisions; revision 0 is the empty snapshot
    #[instrument(skip(self))]
    pub fn get_diff(&self, repository_id: RepositoryId, from: Revision, to: Revision) -> Result<DiffResult> {
        self.get_repository(repository_id)?.history().diff_between(from, to)
    }

    /// A page of commit metadata, newest first; pages start at 1
    pub fn list_history(&self, repository_id: RepositoryId, page: usize) -> Result<HistoryPage> {
        let repository = self.get_repository(repository_id)?;
        Ok(repository
            .history()
            .history()
            .page(Page::new(page, self.config.history_page_size)))
    }

    /// Repositories of `owner_id` that `viewer` may see, most recently updated first
    pub fn list_for_owner(&self, owner_id: UserId, viewer: Option<UserId>) -> Vec<RepositoryInfo> {
        let mut listing: Vec<RepositoryInfo> = self
            .visible_to(viewer)
            .filter(|info| info.record.owner_id == owner_id)
            .collect();
        listing.sort_by_key(|info| (Reverse(info.updated_at), info.record.id));
        listing
    }

    /// Front-page listing: most starred first, then most recently updated
    pub fn explore(&self, viewer: Option<UserId>) -> Vec<RepositoryInfo> {
        let mut listing: Vec<RepositoryInfo> = self.visible_to(viewer).collect();
        listing.sort_by_key(|info| {
            (
                Reverse(info.record.stars_count),
                Reverse(info.updated_at),
                info.record.id,
            )
        });
        listing.truncate(self.config.explore_limit);
        listing
    }

    fn visible_to(&self, viewer: Option<UserId>) -> impl Iterator<Item = RepositoryInfo> {
        // Collect handles first so no map shard stays locked while reading
        let repositories: Vec<Arc<Repository>> = self
            .repositories
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect();
        repositories
            .into_iter()
            .filter(move |repository| repository.is_visible_to(viewer))
            .map(|repository| repository.info())
    }

    /// Change description or visibility
    #[instrument(skip(self, update))]
    pub fn update_repository(&self, id: RepositoryId, update: RepositoryUpdate) -> Result<RepositoryRecord> {
        let repository = self.get_repository(id)?;
        repository.update_record(
            |record| {
                if let Some(description) = update.description {
                    record.description = description;
                }
                if let Some(is_private) = update.is_private {
                    record.is_private = is_private;
                }
            },
            |record| self.persistence.save_repository(record),
        )
    }

    /// Store the star counter maintained by the caller
    pub fn set_stars_count(&self, id: RepositoryId, stars_count: u64) -> Result<()> {
        let repository = self.get_repository(id)?;
        repository.update_record(
            |record| record.stars_count = stars_count,
            |record| self.persistence.save_repository(record),
        )?;
        debug!("Repository {} now has {} stars", id, stars_count);
        Ok(())
    }

    /// Delete a repository with its whole history
    #[instrument(skip(self))]
    pub fn delete_repository(&self, id: RepositoryId) -> Result<()> {
        let repository = self.get_repository(id)?;
        repository
            .history()
            .close(|| self.persistence.delete_repository(id))?;
        self.repositories.remove(&id);
        self.names.remove(&(repository.owner_id(), repository.name()));
        info!("Deleted repository {}", id);
        Ok(())
    }

    /// Commit message of a revision as safe markup
    pub fn render_commit_message(&self, id: RepositoryId, revision: Revision) -> Result<SafeMarkup> {
        let commit = self.get_commit(id, revision)?;
        Ok(self.renderer.render_safe(&commit.message))
    }

    /// README of a revision as safe markup, if the revision has a text README
    /// at its root
    pub fn render_readme(&self, id: RepositoryId, revision: Revision) -> Result<Option<SafeMarkup>> {
        let snapshot = self.get_snapshot(id, revision)?;
        Ok(find_readme(&snapshot).map(|text| self.renderer.render_safe(text)))
    }

    /// Verify a repository's history
    pub fn verify_repository(&self, id: RepositoryId) -> Result<VerificationReport> {
        let repository = self.get_repository(id)?;
        let commits: Vec<Arc<Commit>> = repository.history().history().commits().cloned().collect();
        Ok(HistoryVerifier::new(id).verify(&commits))
    }
}

/// Root-level README text, preferring `README.md`
fn find_readme(snapshot: &Snapshot) -> Option<&str> {
    if let Ok(content) = snapshot.get("README.md") {
        if let Some(text) = content.as_text() {
            return Some(text);
        }
    }
    snapshot
        .iter()
        .filter(|(path, _)| !path.contains('/'))
        .filter(|(path, _)| {
            let lower = path.to_ascii_lowercase();
            lower == "readme" || lower.starts_with("readme.")
        })
        .find_map(|(_, content)| content.as_text())
}

/// Builder for configuring a [`Hub`]
///
/// # Examples
///
/// ```rust
/// use codehub::{CompressionStrategy, HubBuilder};
///
/// let hub = HubBuilder::new()
///     .history_page_size(50)
///     .max_file_size(10 * 1024 * 1024)
///     .compression_strategy(CompressionStrategy::Fast)
///     .build()
///     .unwrap();
/// assert_eq!(hub.config().history_page_size, 50);
/// ```
pub struct HubBuilder {
    config: HubConfig,
    persistence: Option<Arc<dyn Persistence>>,
    renderer: Arc<dyn MarkupRenderer>,
}

impl HubBuilder {
    /// Create a new builder with default settings
    pub fn new() -> Self {
        Self {
            config: HubConfig::default(),
            persistence: None,
            renderer: Arc::new(EscapingRenderer),
        }
    }

    /// Replace the whole configuration
    pub fn config(mut self, config: HubConfig) -> Self {
        self.config = config;
        self
    }

    /// Store data in a directory (initialized on first use)
    pub fn storage_path(mut self, path: PathBuf) -> Self {
        self.config.storage_path = Some(path);
        self
    }

    /// Use a custom persistence backend, overriding `storage_path`
    pub fn persistence(mut self, persistence: Arc<dyn Persistence>) -> Self {
        self.persistence = Some(persistence);
        self
    }

    /// Use a custom markup renderer
    pub fn renderer(mut self, renderer: impl MarkupRenderer + 'static) -> Self {
        self.renderer = Arc::new(renderer);
        self
    }

    /// Commits per history page
    pub fn history_page_size(mut self, size: usize) -> Self {
        self.config.history_page_size = size;
        self
    }

    /// Repositories in the explore listing
    pub fn explore_limit(mut self, limit: usize) -> Self {
        self.config.explore_limit = limit;
        self
    }

    /// Maximum size of a single file in bytes (0 = no limit)
    pub fn max_file_size(mut self, size: u64) -> Self {
        self.config.max_file_size = size;
        self
    }

    /// Compression for newly initialized storage
    pub fn compression_strategy(mut self, strategy: CompressionStrategy) -> Self {
        self.config.compression = strategy;
        self
    }

    /// Build the hub, loading any existing repositories
    ///
    /// # Errors
    ///
    /// - [`CodehubError::InvalidConfiguration`] for unusable settings
    /// - storage errors while opening or loading
    pub fn build(self) -> Result<Hub> {
        self.config.validate()?;
        let persistence: Arc<dyn Persistence> = match (self.persistence, &self.config.storage_path) {
            (Some(persistence), _) => persistence,
            (None, Some(path)) => Arc::new(FileStorage::init_or_open(
                path.clone(),
                self.config.compression,
            )?),
            (None, None) => Arc::new(MemoryPersistence::new()),
        };
        Hub::load(self.config, persistence, self.renderer)
    }
}

impl Default for HubBuilder {
    fn default() -> Self {
        Self::new()
    }
}
