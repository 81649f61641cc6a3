//! Archive layout under the archive root
//!
//! ```text
//! archive_root/
//! ├── 2024-03-01/        primary archive for the branch
//! ├── 2024-03-01-aa/     collision slots, same relative layout
//! ├── 2024-03-01-ab/
//! └── newest/            symlink view of the latest copy of every path
//! ```

use crate::error::{BakimError, Result};
use crate::types::NEWEST_DIR;
use crate::utils;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Branch label for the current local date (`YYYY-MM-DD`)
pub fn today_branch() -> String {
    chrono::Local::now().format("%Y-%m-%d").to_string()
}

/// Fixed directories of one run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveLayout {
    root: PathBuf,
    branch: String,
    primary: PathBuf,
    newest: PathBuf,
}

impl ArchiveLayout {
    /// Describe the layout for `branch` under `root`
    pub fn new(root: PathBuf, branch: String) -> Self {
        let primary = root.join(&branch);
        let newest = root.join(NEWEST_DIR);
        Self {
            root,
            branch,
            primary,
            newest,
        }
    }

    /// Archive root
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Branch label
    pub fn branch(&self) -> &str {
        &self.branch
    }

    /// Primary archive directory (`root/branch`)
    pub fn primary(&self) -> &Path {
        &self.primary
    }

    /// Latest-version view (`root/newest`)
    pub fn newest(&self) -> &Path {
        &self.newest
    }

    /// Directory for the collision slot with the given suffix
    pub fn slot_dir(&self, suffix: &str) -> PathBuf {
        self.root.join(format!("{}-{}", self.branch, suffix))
    }

    /// Create the archive root, the primary directory and `newest`
    ///
    /// Existing directories are reused. When `owner` is given, those
    /// directories are handed to that account; failing to do so is only a
    /// warning. Returns the number of warnings.
    pub fn prepare(&self, owner: Option<(u32, u32)>) -> Result<usize> {
        utils::check_path_len(&self.primary)?;
        utils::check_path_len(&self.newest)?;

        fs::create_dir_all(&self.root).map_err(|source| BakimError::ArchiveSetup {
            path: self.root.clone(),
            source,
        })?;
        ensure_dir(&self.primary)?;
        ensure_dir(&self.newest)?;

        let mut warnings = 0;
        if let Some((uid, gid)) = owner {
            for dir in [&self.root, &self.primary, &self.newest] {
                warnings += chown_archive_dir(dir, uid, gid);
            }
        }
        debug!("Archive prepared at {:?} (branch {})", self.root, self.branch);
        Ok(warnings)
    }
}

/// Create `path` as a directory unless it already is one
pub(crate) fn ensure_dir(path: &Path) -> Result<bool> {
    match fs::create_dir(path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::AlreadyExists && path.is_dir() => Ok(false),
        Err(source) => Err(BakimError::ArchiveSetup {
            path: path.to_path_buf(),
            source,
        }),
    }
}

/// Best-effort ownership change for archive-level directories
pub(crate) fn chown_archive_dir(path: &Path, uid: u32, gid: u32) -> usize {
    match utils::set_owner(path, uid, gid) {
        Ok(()) => 0,
        Err(e) => {
            warn!("Failed to chown {:?} to {}:{}: {}", path, uid, gid, e);
            1
        }
    }
}
