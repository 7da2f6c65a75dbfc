//! # CodeHub CLI - Repository history from the terminal
//!
//! A command-line front end over a CodeHub storage directory, handy for
//! inspecting stored repositories and scripting imports.
//!
//! ## Usage
//! ```bash
//! # Initialize storage in ./.codehub
//! codehub init
//!
//! # Create a repository from a directory (respects .gitignore)
//! codehub create hello-world -d "My first repo" --from-dir ./project
//!
//! # Commit a changed file
//! codehub commit hello-world -m "Update readme" --set README.md=./README.md
//!
//! # Browse history and compare revisions
//! codehub log hello-world
//! codehub diff hello-world 1 2
//! ```

use anyhow::{anyhow, bail, Context};
use clap::{Parser, Subcommand, ValueEnum};
use codehub::utils::{format_bytes, hash_data, short_hash};
use codehub::{
    ChangeKind, CodehubError, CompressionStrategy, CreateRepository, EditSet, FileStorage, Hub,
    HubBuilder, HubConfig, Repository, Revision, Snapshot, UserId,
};
use colored::*;
use humantime::format_duration;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing_subscriber::EnvFilter;

/// Settings written by `init` next to the stored repositories
const CONFIG_FILE: &str = "config.json";

/// CodeHub CLI - snapshot history for hosted repositories
#[derive(Parser)]
#[command(name = "codehub")]
#[command(version)]
#[command(about = "Inspect and edit CodeHub repository histories")]
#[command(long_about = None)]
struct Cli {
    /// Storage directory (defaults to ./.codehub)
    #[arg(short, long, global = true)]
    storage: Option<PathBuf>,

    /// Acting user id
    #[arg(short, long, global = true, default_value_t = 1)]
    user: u64,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize a storage directory
    Init {
        /// Compression strategy
        #[arg(long, value_enum, default_value = "fast")]
        compression: CompressionMode,
    },

    /// Create a repository
    Create {
        /// Repository name
        name: String,

        /// Description
        #[arg(short, long, default_value = "")]
        description: String,

        /// Only visible to its owner
        #[arg(long)]
        private: bool,

        /// Import the initial files from a directory
        #[arg(long)]
        from_dir: Option<PathBuf>,

        /// Initial commit message
        #[arg(short, long)]
        message: Option<String>,
    },

    /// List repositories
    #[command(alias = "ls")]
    List {
        /// Only repositories of this owner (default: explore listing)
        #[arg(long)]
        owner: Option<u64>,
    },

    /// Commit edits to a repository
    #[command(alias = "ci")]
    Commit {
        /// Repository name or id
        repository: String,

        /// Revision the edits were made against (default: head)
        #[arg(short, long)]
        base: Option<u64>,

        /// Commit message
        #[arg(short, long)]
        message: String,

        /// Write a file: PATH=LOCAL_FILE
        #[arg(long = "set", value_name = "PATH=FILE")]
        writes: Vec<String>,

        /// Delete a path
        #[arg(long = "delete", value_name = "PATH")]
        deletes: Vec<String>,

        /// Make the tree match a directory
        #[arg(long, conflicts_with_all = ["writes", "deletes"])]
        from_dir: Option<PathBuf>,
    },

    /// Show commit history, newest first
    Log {
        /// Repository name or id
        repository: String,

        /// Page number
        #[arg(short, long, default_value_t = 1)]
        page: usize,
    },

    /// Show a commit and its files
    Show {
        /// Repository name or id
        repository: String,

        /// Revision (default: head)
        revision: Option<u64>,
    },

    /// Print a file
    Cat {
        /// Repository name or id
        repository: String,

        /// File path
        path: String,

        /// Revision (default: head)
        #[arg(short, long)]
        revision: Option<u64>,
    },

    /// Compare two revisions
    Diff {
        /// Repository name or id
        repository: String,

        /// Base revision (0 for the empty tree)
        from: u64,

        /// Target revision
        to: u64,

        /// Number of context lines to show (defaults to the configured value)
        #[arg(long)]
        context: Option<usize>,

        /// Show only statistics
        #[arg(long)]
        stat: bool,
    },

    /// Verify history integrity
    Verify {
        /// Repository name or id (default: all)
        repository: Option<String>,
    },
}

#[derive(Copy, Clone, PartialEq, Eq, ValueEnum)]
enum CompressionMode {
    None,
    Fast,
    Adaptive,
}

impl From<CompressionMode> for CompressionStrategy {
    fn from(mode: CompressionMode) -> Self {
        match mode {
            CompressionMode::None => CompressionStrategy::None,
            CompressionMode::Fast => CompressionStrategy::Fast,
            CompressionMode::Adaptive => CompressionStrategy::Adaptive { min_size: 4096 },
        }
    }
}

fn main() {
    let cli = Cli::parse();

    // Set up logging; --verbose wins over RUST_LOG
    let filter = if cli.verbose {
        EnvFilter::new("codehub=debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    if std::env::var("NO_COLOR").is_ok() {
        colored::control::set_override(false);
    }

    if let Err(e) = run(cli) {
        let message = match e.downcast_ref::<CodehubError>() {
            Some(error) => error.user_message(),
            None => format!("{:#}", e),
        };
        eprintln!("{}: {}", "Error".red().bold(), message);
        std::process::exit(1);
    }
}

/// Main command runner
fn run(cli: Cli) -> anyhow::Result<()> {
    let storage_path = cli.storage.unwrap_or_else(|| PathBuf::from(".codehub"));
    let user = UserId(cli.user);

    match cli.command {
        Commands::Init { compression } => cmd_init(storage_path, compression),
        Commands::Create {
            name,
            description,
            private,
            from_dir,
            message,
        } => cmd_create(storage_path, user, name, description, private, from_dir, message),
        Commands::List { owner } => cmd_list(storage_path, user, owner.map(UserId)),
        Commands::Commit {
            repository,
            base,
            message,
            writes,
            deletes,
            from_dir,
        } => cmd_commit(storage_path, user, repository, base, message, writes, deletes, from_dir),
        Commands::Log { repository, page } => cmd_log(storage_path, user, repository, page),
        Commands::Show {
            repository,
            revision,
        } => cmd_show(storage_path, user, repository, revision),
        Commands::Cat {
            repository,
            path,
            revision,
        } => cmd_cat(storage_path, user, repository, path, revision),
        Commands::Diff {
            repository,
            from,
            to,
            context,
            stat,
        } => cmd_diff(storage_path, user, repository, from, to, context, stat),
        Commands::Verify { repository } => cmd_verify(storage_path, user, repository),
    }
}

/// Initialize a storage directory
///
/// The directory holds `metadata.json` and one folder per repository with its
/// record and compressed commit files.
fn cmd_init(storage_path: PathBuf, compression: CompressionMode) -> anyhow::Result<()> {
    println!("{}", "Initializing CodeHub storage...".blue().bold());
    let compression: CompressionStrategy = compression.into();
    FileStorage::init(storage_path.clone(), compression)?;
    let config = HubConfig {
        compression,
        ..HubConfig::default()
    };
    config.save(&storage_path.join(CONFIG_FILE))?;

    println!("{} Initialized storage", "✓".green().bold());
    println!("  Storage: {}", storage_path.display().to_string().cyan());
    println!("\nNext steps:");
    println!(
        "  - Create a repository: {}",
        "codehub create my-repo --from-dir .".yellow()
    );
    Ok(())
}

/// Create a repository, optionally importing a directory
fn cmd_create(
    storage_path: PathBuf,
    user: UserId,
    name: String,
    description: String,
    private: bool,
    from_dir: Option<PathBuf>,
    message: Option<String>,
) -> anyhow::Result<()> {
    let hub = open_hub(storage_path)?;
    let start = Instant::now();

    let mut request = CreateRepository::new(user, name)
        .description(description)
        .private(private);
    if let Some(dir) = from_dir {
        let files = read_tree(&dir)?;
        request = request.files(Snapshot::new(files)?);
    }
    if let Some(message) = message {
        request = request.message(message);
    }

    let repo = hub.create_repository_with(request)?;
    let head = repo.history().head()?;
    println!(
        "{} Created {} ({} files, {}) in {}",
        "✓".green().bold(),
        repo.name().cyan().bold(),
        head.stats.file_count,
        format_bytes(head.stats.total_size),
        format_duration(round(start.elapsed()))
    );
    println!("  Id: {}", repo.id().to_string().yellow());
    Ok(())
}

/// List repositories
fn cmd_list(storage_path: PathBuf, user: UserId, owner: Option<UserId>) -> anyhow::Result<()> {
    let hub = open_hub(storage_path)?;
    let listing = match owner {
        Some(owner) => hub.list_for_owner(owner, Some(user)),
        None => hub.explore(Some(user)),
    };

    if listing.is_empty() {
        println!("{}", "No repositories found.".yellow());
        return Ok(());
    }

    for info in listing {
        let visibility = if info.record.is_private {
            "private".red()
        } else {
            "public".green()
        };
        println!(
            "{:>4} {} {} {} {}",
            info.record.id.to_string().yellow(),
            info.record.name.cyan().bold(),
            visibility,
            format!("★ {}", info.record.stars_count).dimmed(),
            format!("r{} {}", info.head_revision, info.updated_at.format("%Y-%m-%d %H:%M")).dimmed()
        );
        if !info.record.description.is_empty() {
            println!("     {}", info.record.description);
        }
    }
    Ok(())
}

/// Commit edits to a repository
#[allow(clippy::too_many_arguments)]
fn cmd_commit(
    storage_path: PathBuf,
    user: UserId,
    repository: String,
    base: Option<u64>,
    message: String,
    writes: Vec<String>,
    deletes: Vec<String>,
    from_dir: Option<PathBuf>,
) -> anyhow::Result<()> {
    let hub = open_hub(storage_path)?;
    let repo = resolve_repository(&hub, user, &repository)?;
    let base = base.map(Revision).unwrap_or_else(|| repo.history().head_revision());

    let mut edits = EditSet::new();
    if let Some(dir) = from_dir {
        let files = read_tree(&dir)?;
        let current = repo.history().snapshot_at(base)?;
        for path in current.paths().filter(|p| !files.contains_key(*p)) {
            edits = edits.delete(path);
        }
        for (path, content) in files {
            edits = edits.write(path, content);
        }
    } else {
        for assignment in writes {
            let (path, file) = assignment
                .split_once('=')
                .ok_or_else(|| anyhow!("expected PATH=FILE, got {:?}", assignment))?;
            let content = std::fs::read(file).with_context(|| format!("reading {}", file))?;
            edits = edits.write(path, content);
        }
        for path in deletes {
            edits = edits.delete(path);
        }
    }
    if edits.is_empty() {
        bail!("nothing to commit; use --set, --delete or --from-dir");
    }

    let commit = hub.commit_to_repository(repo.id(), base, &edits, user, &message)?;
    println!(
        "{} {} r{} {}",
        "✓".green().bold(),
        repo.name().cyan(),
        commit.revision.to_string().yellow().bold(),
        commit.short_hash().dimmed()
    );
    println!(
        "  {} added, {} modified, {} removed",
        commit.stats.files_added.to_string().green(),
        commit.stats.files_modified.to_string().yellow(),
        commit.stats.files_removed.to_string().red()
    );
    if commit.base_revision.next() != commit.revision {
        println!(
            "  {}",
            format!("applied over r{} (made against r{})", commit.revision.0 - 1, commit.base_revision).dimmed()
        );
    }
    Ok(())
}

/// Show one page of history
fn cmd_log(storage_path: PathBuf, user: UserId, repository: String, page: usize) -> anyhow::Result<()> {
    let hub = open_hub(storage_path)?;
    let repo = resolve_repository(&hub, user, &repository)?;
    let page = hub.list_history(repo.id(), page)?;

    if page.entries.is_empty() {
        println!("{}", "No commits on this page.".yellow());
        return Ok(());
    }

    for summary in &page.entries {
        println!(
            "{} {} {} {}",
            format!("r{}", summary.revision).yellow().bold(),
            short_hash(&summary.commit_hash).dimmed(),
            summary.created_at.format("%Y-%m-%d %H:%M:%S").to_string().dimmed(),
            summary.title().cyan()
        );
        println!(
            "    {} files changed by user {}",
            summary.stats.files_changed(),
            summary.author_id
        );
    }
    println!(
        "\n{}",
        format!(
            "Page {} of {} ({} commits)",
            page.page.number,
            page.total_pages(),
            page.total
        )
        .dimmed()
    );
    Ok(())
}

/// Show a commit and the files of its snapshot
fn cmd_show(
    storage_path: PathBuf,
    user: UserId,
    repository: String,
    revision: Option<u64>,
) -> anyhow::Result<()> {
    let hub = open_hub(storage_path)?;
    let repo = resolve_repository(&hub, user, &repository)?;
    let revision = revision.map(Revision).unwrap_or_else(|| repo.history().head_revision());
    let commit = hub.get_commit(repo.id(), revision)?;

    println!("{} {}", "Revision:".bold(), commit.revision.to_string().yellow());
    println!("{} {}", "Hash:".bold(), commit.commit_hash);
    println!("{} {}", "Base:".bold(), commit.base_revision);
    println!("{} {}", "Author:".bold(), commit.author_id);
    println!("{} {}", "Date:".bold(), commit.created_at.to_rfc3339());
    println!("\n    {}\n", commit.message.replace('\n', "\n    "));

    println!(
        "{} ({} files, {})",
        "Files:".bold(),
        commit.stats.file_count,
        format_bytes(commit.stats.total_size)
    );
    for (path, content) in commit.snapshot.iter() {
        let kind = if content.is_binary() { "bin" } else { "txt" };
        println!(
            "  {} {} {:>10} {}",
            &hash_data(content.as_bytes())[..8],
            kind.dimmed(),
            format_bytes(content.len() as u64),
            path.cyan()
        );
    }
    Ok(())
}

/// Print a file to stdout
fn cmd_cat(
    storage_path: PathBuf,
    user: UserId,
    repository: String,
    path: String,
    revision: Option<u64>,
) -> anyhow::Result<()> {
    use std::io::Write;

    let hub = open_hub(storage_path)?;
    let repo = resolve_repository(&hub, user, &repository)?;
    let revision = revision.map(Revision).unwrap_or_else(|| repo.history().head_revision());
    let snapshot = hub.get_snapshot(repo.id(), revision)?;
    let content = snapshot.get(&path)?;

    let mut stdout = std::io::stdout().lock();
    stdout.write_all(content.as_bytes())?;
    stdout.flush()?;
    Ok(())
}

/// Compare two revisions
fn cmd_diff(
    storage_path: PathBuf,
    user: UserId,
    repository: String,
    from: u64,
    to: u64,
    context: Option<usize>,
    stat_only: bool,
) -> anyhow::Result<()> {
    let hub = open_hub(storage_path)?;
    let repo = resolve_repository(&hub, user, &repository)?;
    let diff = hub.get_diff(repo.id(), Revision(from), Revision(to))?;

    println!(
        "{} {} → {}",
        "Comparing".blue().bold(),
        format!("r{}", from).yellow(),
        format!("r{}", to).yellow()
    );
    println!();

    if diff.is_empty() {
        println!("{}", "No differences.".green());
        return Ok(());
    }

    if stat_only {
        for change in diff.changed() {
            let script = change.script();
            let kind = match change.kind() {
                ChangeKind::Added => "A".green(),
                ChangeKind::Removed => "D".red(),
                ChangeKind::Modified => "M".yellow(),
                ChangeKind::Unchanged => " ".normal(),
            };
            if script.is_binary() {
                println!(" {} {} {}", kind, change.path(), "(binary)".dimmed());
            } else {
                println!(
                    " {} {} {} {}",
                    kind,
                    change.path(),
                    format!("+{}", script.lines_added()).green(),
                    format!("-{}", script.lines_deleted()).red()
                );
            }
        }
    } else {
        let context = context.unwrap_or(hub.config().diff_context_lines);
        for line in diff.to_unified(context).lines() {
            if line.starts_with("+++") || line.starts_with("---") {
                println!("{}", line.bold());
            } else if line.starts_with("@@") {
                println!("{}", line.cyan());
            } else if line.starts_with('+') {
                println!("{}", line.green());
            } else if line.starts_with('-') {
                println!("{}", line.red());
            } else {
                println!("{}", line);
            }
        }
    }

    let stats = &diff.stats;
    println!(
        "\n {} files changed, {} insertions(+), {} deletions(-)",
        stats.total_changes(),
        stats.lines_added.to_string().green(),
        stats.lines_deleted.to_string().red()
    );
    Ok(())
}

/// Verify one or all repositories
fn cmd_verify(storage_path: PathBuf, user: UserId, repository: Option<String>) -> anyhow::Result<()> {
    let hub = open_hub(storage_path)?;
    let repositories = match repository {
        Some(name) => vec![resolve_repository(&hub, user, &name)?],
        None => hub
            .explore(Some(user))
            .into_iter()
            .chain(hub.list_for_owner(user, Some(user)))
            .map(|info| hub.get_repository(info.record.id))
            .collect::<codehub::Result<Vec<_>>>()?,
    };

    let mut seen = std::collections::BTreeSet::new();
    let mut failures = 0;
    for repo in repositories.into_iter().filter(|r| seen.insert(r.id())) {
        let report = hub.verify_repository(repo.id())?;
        if report.is_valid() {
            println!("{} {} {}", "✓".green().bold(), repo.name().cyan(), report.summary().dimmed());
        } else {
            failures += 1;
            println!("{} {} {}", "✗".red().bold(), repo.name().cyan(), report.summary());
            for error in &report.errors {
                println!("    {}", error.red());
            }
        }
    }

    if failures > 0 {
        bail!("{} repositories failed verification", failures);
    }
    Ok(())
}

// Helper functions

/// Open an existing storage directory
fn open_hub(storage_path: PathBuf) -> anyhow::Result<Hub> {
    if !storage_path.exists() {
        bail!(
            "No CodeHub storage at {}. Run 'codehub init' first.",
            storage_path.display()
        );
    }
    let config_path = storage_path.join(CONFIG_FILE);
    let config = if config_path.exists() {
        HubConfig::load(&config_path).with_context(|| format!("loading {}", config_path.display()))?
    } else {
        HubConfig::default()
    };
    let hub = HubBuilder::new().config(config).storage_path(storage_path).build()?;
    Ok(hub)
}

/// Look a repository up by name (for the acting user) or by id
fn resolve_repository(hub: &Hub, user: UserId, reference: &str) -> anyhow::Result<Arc<Repository>> {
    if let Some(repo) = hub.find_by_name(user, reference) {
        return Ok(repo);
    }
    let id = reference
        .parse::<u64>()
        .map_err(|_| anyhow!("no repository named {:?} for user {}", reference, user))?;
    let repo = hub.get_repository(codehub::RepositoryId(id))?;
    if !repo.is_visible_to(Some(user)) {
        return Err(CodehubError::RepositoryNotFound(repo.id()).into());
    }
    Ok(repo)
}

/// Read a directory into `path -> bytes`, honoring .gitignore files
fn read_tree(dir: &Path) -> anyhow::Result<BTreeMap<String, Vec<u8>>> {
    let mut files = BTreeMap::new();
    for entry in ignore::WalkBuilder::new(dir).build() {
        let entry = entry?;
        if !entry.file_type().is_some_and(|t| t.is_file()) {
            continue;
        }
        let relative = entry
            .path()
            .strip_prefix(dir)
            .with_context(|| format!("{} is outside {}", entry.path().display(), dir.display()))?;
        let path = relative
            .components()
            .map(|c| {
                c.as_os_str()
                    .to_str()
                    .ok_or_else(|| anyhow!("{} is not valid UTF-8", entry.path().display()))
            })
            .collect::<anyhow::Result<Vec<_>>>()?
            .join("/");
        let content = std::fs::read(entry.path())
            .with_context(|| format!("reading {}", entry.path().display()))?;
        files.insert(path, content);
    }
    if files.is_empty() {
        bail!("{} contains no files", dir.display());
    }
    Ok(files)
}

/// Drop sub-millisecond noise before printing a duration
fn round(duration: Duration) -> Duration {
    Duration::from_millis(duration.as_millis() as u64)
}
