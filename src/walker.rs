//! Depth-first traversal of one source argument
//!
//! The walker never follows symlinks (not even when the argument itself is a
//! link), prunes everything under the archive root, and yields each visited
//! entry together with its archive-relative suffix. Mutation is left to the
//! consumer, which holds the per-argument traversal context.
//!
//! ## Relative paths
//!
//! An argument is split into a *base* (its parent directory) and the suffix
//! below it, so backing up `/home/ann/docs/` archives `docs/...`:
//!
//! ```text
//! /home/ann/docs/notes/todo.txt
//! └──base──┘└────suffix────────┘
//! ```

use crate::error::{BakimError, Result};
use crate::types::{EntryKind, EntryStat, DEFAULT_MAX_OPEN_DIRS};
use std::path::{Path, PathBuf};
use tracing::trace;
use walkdir::WalkDir;

/// A source argument resolved into its absolute root and base offset
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceRoot {
    root: PathBuf,
    base: PathBuf,
}

impl SourceRoot {
    /// Resolve an invocation argument
    ///
    /// Trailing slashes and `.` components are dropped. Arguments without a
    /// final name (`.`, `..`, `/`) are canonicalized first.
    pub fn resolve(arg: &Path) -> Result<Self> {
        if arg.as_os_str().is_empty() {
            return Err(BakimError::Usage("empty path argument".to_string()));
        }
        let mut root: PathBuf = std::path::absolute(arg)
            .map_err(|e| BakimError::file_op("resolve", arg, e))?
            .components()
            .collect();
        if root.file_name().is_none() {
            root = root
                .canonicalize()
                .map_err(|e| BakimError::file_op("resolve", arg, e))?;
        }
        let base = root
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("/"));
        Ok(Self { root, base })
    }

    /// Absolute path of the argument
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Base offset stripped from every visited path
    pub fn base(&self) -> &Path {
        &self.base
    }
}

/// One visited entry
#[derive(Debug, Clone)]
pub struct WalkEntry {
    /// Absolute source path
    pub path: PathBuf,
    /// Archive-relative suffix
    pub relative: PathBuf,
    /// Depth below the argument (the argument itself is 0)
    pub depth: usize,
    /// `lstat` of the source
    pub stat: EntryStat,
}

impl WalkEntry {
    /// Inode type
    pub fn kind(&self) -> EntryKind {
        self.stat.kind
    }

    /// Number of parent references needed to climb from this entry's
    /// location in a mirror tree back to the mirror's parent
    pub fn link_depth(&self) -> usize {
        self.relative.components().count().saturating_sub(1)
    }
}

/// Walker over one source argument
#[derive(Debug, Clone)]
pub struct TreeWalker {
    source: SourceRoot,
    exclude: PathBuf,
    max_open: usize,
}

impl TreeWalker {
    /// Walk `source`, pruning every path under `exclude`
    pub fn new(source: SourceRoot, exclude: PathBuf) -> Self {
        Self {
            source,
            exclude,
            max_open: DEFAULT_MAX_OPEN_DIRS,
        }
    }

    /// Bound the number of directory handles held open at once
    pub fn max_open(mut self, max_open: usize) -> Self {
        self.max_open = max_open.max(1);
        self
    }

    /// Source argument being walked
    pub fn source(&self) -> &SourceRoot {
        &self.source
    }

    /// Iterate entries depth-first, parents before children
    ///
    /// A listing failure is yielded as an error; callers stop at the first one.
    pub fn entries(&self) -> impl Iterator<Item = Result<WalkEntry>> + '_ {
        let exclude = self.exclude.as_path();
        WalkDir::new(self.source.root())
            .follow_links(false)
            .follow_root_links(false)
            .max_open(self.max_open)
            .into_iter()
            .filter_entry(move |entry| {
                let keep = !entry.path().starts_with(exclude);
                if !keep {
                    trace!("Pruning archive path {:?}", entry.path());
                }
                keep
            })
            .filter_map(move |entry| self.visit(entry).transpose())
    }

    fn visit(
        &self,
        entry: std::result::Result<walkdir::DirEntry, walkdir::Error>,
    ) -> Result<Option<WalkEntry>> {
        let entry = entry?;
        let relative = entry
            .path()
            .strip_prefix(self.source.base())
            .map_err(|_| {
                BakimError::internal(format!(
                    "{:?} is not below {:?}",
                    entry.path(),
                    self.source.base()
                ))
            })?
            .to_path_buf();
        if relative.as_os_str().is_empty() {
            return Ok(None);
        }
        let metadata = entry.metadata()?;
        Ok(Some(WalkEntry {
            path: entry.path().to_path_buf(),
            relative,
            depth: entry.depth(),
            stat: EntryStat::from(&metadata),
        }))
    }
}
