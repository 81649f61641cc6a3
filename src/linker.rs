//! The `newest` view
//!
//! `archive_root/newest` mirrors the source layout. Directories are real
//! directories; every file and symlink is a relative symlink into whichever
//! archive directory (primary or collision slot) received its latest copy:
//!
//! ```text
//! newest/a/file.txt -> ../../2024-03-01-aa/a/file.txt
//! ```
//!
//! Entries are replaced, never appended to: whatever sits at the path is
//! removed first, recursively if it is a directory.

use crate::archive::ArchiveLayout;
use crate::error::{BakimError, Result};
use crate::utils;
use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};
use tracing::trace;

/// Maintains the latest-version view
#[derive(Debug, Clone)]
pub struct SnapshotLinker {
    root: PathBuf,
    newest: PathBuf,
}

impl SnapshotLinker {
    /// Linker for the `newest` directory of `layout`
    pub fn new(layout: &ArchiveLayout) -> Self {
        Self {
            root: layout.root().to_path_buf(),
            newest: layout.newest().to_path_buf(),
        }
    }

    /// Relative target for the view entry of `rel`
    ///
    /// `depth` is the entry's depth below the source argument; the link climbs
    /// `depth + 1` levels to reach the archive root.
    pub fn link_target(&self, rel: &Path, archive_dir: &Path, depth: usize) -> Result<PathBuf> {
        let archive_rel = archive_dir.strip_prefix(&self.root).map_err(|_| {
            BakimError::internal(format!(
                "{:?} is not inside archive root {:?}",
                archive_dir, self.root
            ))
        })?;
        let mut target = PathBuf::new();
        for _ in 0..=depth {
            target.push(Component::ParentDir);
        }
        target.push(archive_rel);
        target.push(rel);
        utils::check_path_len(&target)?;
        Ok(target)
    }

    /// Point `newest/rel` at `archive_dir/rel`
    pub fn relink(&self, rel: &Path, archive_dir: &Path, depth: usize) -> Result<()> {
        let link = utils::join_checked(&self.newest, rel)?;
        let target = self.link_target(rel, archive_dir, depth)?;
        self.ensure_parents(rel)?;
        remove_entry(&link)?;
        std::os::unix::fs::symlink(&target, &link)
            .map_err(|e| BakimError::file_op("create symlink", &link, e))?;
        trace!("Linked {:?} -> {:?}", link, target);
        Ok(())
    }

    /// Make `newest/rel` a real directory, replacing any non-directory there
    pub fn relink_dir(&self, rel: &Path) -> Result<()> {
        let dir = utils::join_checked(&self.newest, rel)?;
        self.ensure_parents(rel)?;
        make_real_dir(&dir)
    }

    /// Materialize the ancestors of `rel` under `newest` as real directories
    ///
    /// Nothing under `newest` may be traversed through a symlink, or removal
    /// would reach into the archive itself.
    fn ensure_parents(&self, rel: &Path) -> Result<()> {
        let Some(parent) = rel.parent() else {
            return Ok(());
        };
        let mut dir = self.newest.clone();
        for component in parent.components() {
            dir.push(component);
            make_real_dir(&dir)?;
        }
        Ok(())
    }
}

fn make_real_dir(dir: &Path) -> Result<()> {
    match fs::symlink_metadata(dir) {
        Ok(m) if m.is_dir() => return Ok(()),
        Ok(_) => remove_entry(dir)?,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => return Err(BakimError::file_op("stat", dir, e)),
    }
    fs::create_dir(dir).map_err(|e| BakimError::file_op("create directory", dir, e))
}

fn remove_entry(path: &Path) -> Result<()> {
    let result = match fs::symlink_metadata(path) {
        Ok(m) if m.is_dir() => fs::remove_dir_all(path),
        Ok(_) => fs::remove_file(path),
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
        Err(e) => Err(e),
    };
    result.map_err(|e| BakimError::file_op("remove", path, e))
}
