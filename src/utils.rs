//! Utility functions for bakim
//!
//! ## Categories of Utilities
//!
//! ### Path Building
//! - Length-checked joins that refuse to build a path at or above `PATH_MAX`
//!
//! ### Probing
//! - `lstat` classification into found / missing / blocked-by-non-directory
//!
//! ### Metadata Replication
//! - Permission bits, ownership (`lchown`) and access/modification times
//!
//! ## Error Handling
//!
//! Path-length violations are fatal [`BakimError::PathTooLong`] errors. The
//! replication helpers return plain `io::Result` so the caller can decide
//! whether a failure is fatal or only worth a warning.

use crate::error::{BakimError, Result};
use crate::types::EntryStat;
use filetime::FileTime;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::trace;

/// Platform ceiling for path lengths, in bytes including the terminator
pub const PATH_LIMIT: usize = libc::PATH_MAX as usize;

/// Fail if `path` would reach the platform path-length ceiling
///
/// # Example
///
/// ```rust,ignore
/// use crate::utils::check_path_len;
/// use std::path::Path;
///
/// assert!(check_path_len(Path::new("/big/2024-03-01/a")).is_ok());
/// ```
pub fn check_path_len(path: &Path) -> Result<()> {
    let len = path.as_os_str().len();
    if len >= PATH_LIMIT {
        return Err(BakimError::PathTooLong {
            path: path.to_path_buf(),
            len,
            limit: PATH_LIMIT,
        });
    }
    Ok(())
}

/// Join `rel` onto `base`, refusing paths that reach `PATH_MAX`
///
/// `rel` is expected to be relative; an empty `rel` yields `base` itself.
pub fn join_checked(base: &Path, rel: &Path) -> Result<PathBuf> {
    let joined = if rel.as_os_str().is_empty() {
        base.to_path_buf()
    } else {
        base.join(rel)
    };
    check_path_len(&joined)?;
    Ok(joined)
}

/// Result of looking up a destination path without following symlinks
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Probe {
    /// Something exists at the path
    Found(EntryStat),
    /// Nothing exists at the path
    Missing,
    /// A component of the path exists but is not a directory
    NotADirectory,
}

/// `lstat` a path and classify the two expected failure modes
///
/// "Does not exist" and "not a directory" are normal outcomes here; any other
/// failure is returned as an error.
pub fn probe(path: &Path) -> Result<Probe> {
    match fs::symlink_metadata(path) {
        Ok(metadata) => Ok(Probe::Found(EntryStat::from(&metadata))),
        Err(e) if e.raw_os_error() == Some(libc::ENOTDIR) => {
            trace!("Probe blocked by non-directory: {:?}", path);
            Ok(Probe::NotADirectory)
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(Probe::Missing),
        Err(e) => Err(BakimError::file_op("stat", path, e)),
    }
}

/// Set permission bits (including setuid/setgid/sticky)
pub fn set_mode(path: &Path, mode: u32) -> io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(mode & 0o7777))
}

/// Change owner and group without following a trailing symlink
pub fn set_owner(path: &Path, uid: u32, gid: u32) -> io::Result<()> {
    std::os::unix::fs::lchown(path, Some(uid), Some(gid))
}

/// Restore access and modification times on a file or directory
pub fn set_times(path: &Path, accessed: FileTime, modified: FileTime) -> io::Result<()> {
    filetime::set_file_times(path, accessed, modified)
}

/// Read symlink target
pub fn read_symlink(path: &Path) -> Result<PathBuf> {
    fs::read_link(path).map_err(|e| BakimError::file_op("read link", path, e))
}

/// Format bytes in human-readable form
///
/// ```rust,ignore
/// use crate::utils::format_bytes;
///
/// assert_eq!(format_bytes(0), "0 B");
/// assert_eq!(format_bytes(1536), "1.50 KB");
/// ```
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB", "PB"];
    let mut size = bytes as f64;
    let mut unit_idx = 0;

    while size >= 1024.0 && unit_idx < UNITS.len() - 1 {
        size /= 1024.0;
        unit_idx += 1;
    }

    if unit_idx == 0 {
        format!("{} {}", size as u64, UNITS[unit_idx])
    } else {
        format!("{:.2} {}", size, UNITS[unit_idx])
    }
}
