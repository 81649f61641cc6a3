//! Type-aware equality between a source entry and its archived counterpart
//!
//! | kind      | compared fields                                 |
//! |-----------|-------------------------------------------------|
//! | regular   | mtime (seconds), size, mode & 0o777, uid, gid   |
//! | directory | mode & 0o777, uid, gid                          |
//! | symlink   | uid, gid, link target bytes                     |
//!
//! Entries of different kinds are never the same.

use crate::error::{BakimError, Result};
use crate::types::{EntryKind, EntryStat};
use crate::utils::read_symlink;
use std::path::Path;

/// Compare the metadata-only part of two entries
///
/// Returns `None` for symlink pairs, whose answer also depends on the link
/// targets (see [`same`]).
pub fn same_metadata(a: &EntryStat, b: &EntryStat) -> Option<bool> {
    if a.kind != b.kind {
        return Some(false);
    }
    let owner = a.uid == b.uid && a.gid == b.gid;
    match a.kind {
        EntryKind::Regular => Some(
            owner && a.mtime == b.mtime && a.size == b.size && a.perm_bits() == b.perm_bits(),
        ),
        EntryKind::Directory => Some(owner && a.perm_bits() == b.perm_bits()),
        EntryKind::Symlink if !owner => Some(false),
        EntryKind::Symlink => None,
        EntryKind::Other => Some(false),
    }
}

/// Decide whether `a` and `b` hold the same content
///
/// `paths` must be supplied when both entries are symlinks, since the targets
/// cannot be recovered from metadata; omitting them is reported as an
/// internal error.
pub fn same(a: &EntryStat, b: &EntryStat, paths: Option<(&Path, &Path)>) -> Result<bool> {
    if let Some(answer) = same_metadata(a, b) {
        return Ok(answer);
    }
    let (a_path, b_path) = paths.ok_or_else(|| {
        BakimError::internal("symlink comparison requires both link paths")
    })?;
    let a_target = read_symlink(a_path)?;
    let b_target = read_symlink(b_path)?;
    Ok(a_target.as_os_str() == b_target.as_os_str())
}
