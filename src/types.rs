//! Core data types used throughout the bakim library
//!
//! ## Overview
//!
//! - **Entries**: [`EntryKind`], [`EntryStat`] - what the walker saw for one path
//! - **Configuration**: [`BakimConfig`] - archive location and run parameters
//! - **Results**: [`BackupReport`] - counters for a completed run
//!
//! ## Examples
//!
//! ```rust
//! use bakim::types::BakimConfig;
//! use std::path::PathBuf;
//!
//! let config = BakimConfig {
//!     archive_root: PathBuf::from("/srv/backup"),
//!     branch: Some("2024-03-01".to_string()),
//!     ..Default::default()
//! };
//! assert_eq!(config.max_open_dirs, 20);
//! ```

use filetime::FileTime;
use serde::{Deserialize, Serialize};
use std::fs;
use std::os::unix::fs::MetadataExt;
use std::path::PathBuf;

/// Default location of the archive root
pub const DEFAULT_ARCHIVE_ROOT: &str = "/big";

/// Default bound on simultaneously open directory handles during a walk
pub const DEFAULT_MAX_OPEN_DIRS: usize = 20;

/// Name of the latest-version view under the archive root
pub const NEWEST_DIR: &str = "newest";

/// Inode type of a visited entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EntryKind {
    /// Regular file
    Regular,
    /// Directory
    Directory,
    /// Symbolic link (never followed)
    Symlink,
    /// Device, socket, fifo
    Other,
}

impl EntryKind {
    /// Classify a file type without following symlinks
    pub fn from_file_type(ft: fs::FileType) -> Self {
        if ft.is_symlink() {
            EntryKind::Symlink
        } else if ft.is_dir() {
            EntryKind::Directory
        } else if ft.is_file() {
            EntryKind::Regular
        } else {
            EntryKind::Other
        }
    }
}

/// Snapshot of the `lstat` fields bakim cares about
///
/// Copied out of [`fs::Metadata`] so comparisons can be made (and tested)
/// without touching the filesystem again.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntryStat {
    /// Inode type
    pub kind: EntryKind,
    /// Permission bits including setuid/setgid/sticky (`st_mode & 0o7777`)
    pub mode: u32,
    /// Owning user
    pub uid: u32,
    /// Owning group
    pub gid: u32,
    /// Size in bytes
    pub size: u64,
    /// Modification time, seconds since the epoch
    pub mtime: i64,
    /// Modification time, nanosecond part
    pub mtime_nsec: u32,
    /// Access time, seconds since the epoch
    pub atime: i64,
    /// Access time, nanosecond part
    pub atime_nsec: u32,
}

impl EntryStat {
    /// Access time as a [`FileTime`]
    pub fn accessed(&self) -> FileTime {
        FileTime::from_unix_time(self.atime, self.atime_nsec)
    }

    /// Modification time as a [`FileTime`]
    pub fn modified(&self) -> FileTime {
        FileTime::from_unix_time(self.mtime, self.mtime_nsec)
    }

    /// Low nine permission bits
    pub fn perm_bits(&self) -> u32 {
        self.mode & 0o777
    }
}

impl From<&fs::Metadata> for EntryStat {
    fn from(metadata: &fs::Metadata) -> Self {
        Self {
            kind: EntryKind::from_file_type(metadata.file_type()),
            mode: metadata.mode() & 0o7777,
            uid: metadata.uid(),
            gid: metadata.gid(),
            size: metadata.size(),
            mtime: metadata.mtime(),
            mtime_nsec: metadata.mtime_nsec().clamp(0, 999_999_999) as u32,
            atime: metadata.atime(),
            atime_nsec: metadata.atime_nsec().clamp(0, 999_999_999) as u32,
        }
    }
}

/// Configuration for a bakim instance
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BakimConfig {
    /// Ancestor of every dated archive and of the `newest` view
    pub archive_root: PathBuf,
    /// Branch label override; `None` uses today's date (`YYYY-MM-DD`)
    pub branch: Option<String>,
    /// Bound on simultaneously open directory handles per walk
    pub max_open_dirs: usize,
    /// Owner forced onto archive-level directories (root, branch, slots, `newest`)
    pub archive_owner: Option<(u32, u32)>,
    /// Whether archived regular files get the immutable attribute
    pub protect: bool,
}

impl Default for BakimConfig {
    fn default() -> Self {
        Self {
            archive_root: PathBuf::from(DEFAULT_ARCHIVE_ROOT),
            branch: None,
            max_open_dirs: DEFAULT_MAX_OPEN_DIRS,
            archive_owner: Some((0, 0)),
            protect: true,
        }
    }
}

/// Counters for a completed backup run
///
/// # Examples
///
/// ```rust
/// # use bakim::types::BackupReport;
/// let mut total = BackupReport::default();
/// let part = BackupReport { files_archived: 3, collisions: 1, ..Default::default() };
/// total.merge(&part);
/// total.merge(&part);
/// assert_eq!(total.files_archived, 6);
/// assert_eq!(total.entries_archived(), 6);
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackupReport {
    /// Number of source arguments processed
    pub arguments: usize,
    /// Regular files copied into an archive directory
    pub files_archived: usize,
    /// Directories created in an archive directory
    pub directories_archived: usize,
    /// Symlinks recreated in an archive directory
    pub symlinks_archived: usize,
    /// Entries whose archived copy was already identical
    pub unchanged: usize,
    /// Entries routed to a collision slot
    pub collisions: usize,
    /// Collision slot directories created on disk
    pub slots_created: usize,
    /// Entries of unsupported type (devices, sockets, fifos)
    pub skipped: usize,
    /// Bytes copied for regular files
    pub bytes_copied: u64,
    /// Recoverable failures that were logged and skipped
    pub warnings: usize,
    /// Wall-clock duration in milliseconds
    pub duration_ms: u64,
}

impl BackupReport {
    /// Total entries written during the run
    pub fn entries_archived(&self) -> usize {
        self.files_archived + self.directories_archived + self.symlinks_archived
    }

    /// Accumulate another report into this one
    pub fn merge(&mut self, other: &BackupReport) {
        self.arguments += other.arguments;
        self.files_archived += other.files_archived;
        self.directories_archived += other.directories_archived;
        self.symlinks_archived += other.symlinks_archived;
        self.unchanged += other.unchanged;
        self.collisions += other.collisions;
        self.slots_created += other.slots_created;
        self.skipped += other.skipped;
        self.bytes_copied += other.bytes_copied;
        self.warnings += other.warnings;
        self.duration_ms += other.duration_ms;
    }
}
