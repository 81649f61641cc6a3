//! Main bakim API implementation
//!
//! [`Bakim`] owns a validated configuration, the archive layout for the run's
//! branch and the attribute guard. Each source argument is processed to
//! completion, timestamp pass included, before the next one starts.

use crate::archive::{today_branch, ArchiveLayout};
use crate::context::TraversalContext;
use crate::engine::BackupEngine;
use crate::error::{BakimError, Result};
use crate::immutable::{AttributeGuard, ImmutableFlag, NoProtection};
use crate::linker::SnapshotLinker;
use crate::types::{BackupReport, BakimConfig, NEWEST_DIR};
use crate::walker::{SourceRoot, TreeWalker};
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{debug, info, warn};

/// Incremental backup into a dated archive
///
/// # Examples
///
/// ```rust,no_run
/// use bakim::BakimBuilder;
/// use std::path::PathBuf;
///
/// # fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let bakim = BakimBuilder::new()
///     .archive_root(PathBuf::from("/srv/backup"))
///     .build()?;
///
/// let report = bakim.backup(&[PathBuf::from("/home/user/documents")])?;
/// println!("{} entries archived", report.entries_archived());
/// # Ok(())
/// # }
/// ```
pub struct Bakim {
    config: BakimConfig,
    layout: ArchiveLayout,
    guard: Box<dyn AttributeGuard>,
}

impl std::fmt::Debug for Bakim {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Bakim")
            .field("config", &self.config)
            .field("layout", &self.layout)
            .field("guard", &"<dyn AttributeGuard>")
            .finish()
    }
}

impl Bakim {
    /// Build an instance from a configuration with the default guard
    pub fn new(config: BakimConfig) -> Result<Self> {
        BakimBuilder::from_config(config).build()
    }

    /// Configuration in effect
    pub fn config(&self) -> &BakimConfig {
        &self.config
    }

    /// Archive layout for this run's branch
    pub fn layout(&self) -> &ArchiveLayout {
        &self.layout
    }

    /// Back up every source argument in order
    ///
    /// The archive root, branch and `newest` directories are created first;
    /// failing to do so aborts before any source is read. The first fatal
    /// error stops the run, leaving already-archived entries in place.
    pub fn backup(&self, sources: &[PathBuf]) -> Result<BackupReport> {
        if sources.is_empty() {
            return Err(BakimError::Usage("no source files given".to_string()));
        }
        let start = Instant::now();
        let mut total = BackupReport::default();
        total.warnings += self.layout.prepare(self.config.archive_owner)?;

        for source in sources {
            let report = self.backup_source(source)?;
            total.merge(&report);
        }

        total.duration_ms = start.elapsed().as_millis() as u64;
        info!(
            "Backup of {} argument(s) finished: {} archived, {} unchanged, {} warnings",
            total.arguments,
            total.entries_archived(),
            total.unchanged,
            total.warnings
        );
        Ok(total)
    }

    /// Back up a single source argument
    pub fn backup_one(&self, source: &Path) -> Result<BackupReport> {
        self.backup(&[source.to_path_buf()])
    }

    fn backup_source(&self, arg: &Path) -> Result<BackupReport> {
        let start = Instant::now();
        let source = SourceRoot::resolve(arg)?;
        info!("Backing up {:?} into {:?}", source.root(), self.layout.primary());

        let walker = TreeWalker::new(source.clone(), self.layout.root().to_path_buf())
            .max_open(self.config.max_open_dirs);
        let linker = SnapshotLinker::new(&self.layout);
        let engine = BackupEngine::new(&self.layout, &linker, self.guard.as_ref());
        let mut ctx = TraversalContext::new(source, self.config.archive_owner);

        let walked = walker
            .entries()
            .try_for_each(|entry| engine.process(&mut ctx, &entry?).map(|_| ()));

        // Directories written so far still carry the widened mode
        let mut report = ctx.finish();
        if let Err(e) = walked {
            warn!("Aborted {:?} after restoring pending directories: {}", arg, e);
            return Err(e);
        }
        report.duration_ms = start.elapsed().as_millis() as u64;
        debug!("Argument {:?} done: {:?}", arg, report);
        Ok(report)
    }
}

/// Builder for configuring a [`Bakim`] instance
///
/// # Examples
///
/// ```rust
/// use bakim::BakimBuilder;
/// use std::path::PathBuf;
///
/// let bakim = BakimBuilder::new()
///     .archive_root(PathBuf::from("/srv/backup"))
///     .branch("2024-03-01")
///     .protect(false)
///     .build()
///     .unwrap();
/// assert_eq!(bakim.layout().primary(), PathBuf::from("/srv/backup/2024-03-01"));
/// ```
pub struct BakimBuilder {
    config: BakimConfig,
    guard: Option<Box<dyn AttributeGuard>>,
}

impl std::fmt::Debug for BakimBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BakimBuilder")
            .field("config", &self.config)
            .field("custom_guard", &self.guard.is_some())
            .finish()
    }
}

impl BakimBuilder {
    /// Create a new builder with default settings
    pub fn new() -> Self {
        Self::from_config(BakimConfig::default())
    }

    /// Start from an existing configuration
    pub fn from_config(config: BakimConfig) -> Self {
        Self {
            config,
            guard: None,
        }
    }

    /// Set the archive root (must be absolute)
    pub fn archive_root(mut self, root: PathBuf) -> Self {
        self.config.archive_root = root;
        self
    }

    /// Override the date-derived branch label
    pub fn branch(mut self, branch: impl Into<String>) -> Self {
        self.config.branch = Some(branch.into());
        self
    }

    /// Bound the number of directory handles the walker keeps open
    pub fn max_open_dirs(mut self, max_open_dirs: usize) -> Self {
        self.config.max_open_dirs = max_open_dirs;
        self
    }

    /// Owner forced onto archive-level directories, or `None` to leave them alone
    pub fn archive_owner(mut self, owner: Option<(u32, u32)>) -> Self {
        self.config.archive_owner = owner;
        self
    }

    /// Whether archived files are marked immutable
    pub fn protect(mut self, protect: bool) -> Self {
        self.config.protect = protect;
        self
    }

    /// Use a custom attribute guard instead of the immutable flag
    ///
    /// Takes precedence over [`protect`](Self::protect).
    pub fn guard(mut self, guard: Box<dyn AttributeGuard>) -> Self {
        self.guard = Some(guard);
        self
    }

    /// Validate the configuration and build the instance
    pub fn build(self) -> Result<Bakim> {
        let BakimBuilder { mut config, guard } = self;

        if config.archive_root.as_os_str().is_empty() {
            return Err(BakimError::InvalidConfiguration(
                "archive root must not be empty".to_string(),
            ));
        }
        if !config.archive_root.is_absolute() {
            return Err(BakimError::InvalidConfiguration(format!(
                "archive root must be absolute: {:?}",
                config.archive_root
            )));
        }
        if config.max_open_dirs == 0 {
            return Err(BakimError::InvalidConfiguration(
                "max_open_dirs must be at least 1".to_string(),
            ));
        }

        let branch = match &config.branch {
            Some(b)
                if b.is_empty() || b.contains('/') || b == "." || b == ".." || b == NEWEST_DIR =>
            {
                return Err(BakimError::InvalidConfiguration(format!(
                    "invalid branch label: {:?}",
                    b
                )));
            }
            Some(b) => b.clone(),
            None => today_branch(),
        };
        config.archive_root = config.archive_root.components().collect();

        let guard = guard.unwrap_or_else(|| {
            if config.protect {
                Box::new(ImmutableFlag)
            } else {
                Box::new(NoProtection)
            }
        });

        let layout = ArchiveLayout::new(config.archive_root.clone(), branch);
        debug!("Configured archive layout {:?}", layout);
        Ok(Bakim {
            config,
            layout,
            guard,
        })
    }
}

impl Default for BakimBuilder {
    fn default() -> Self {
        Self::new()
    }
}
