//! Deferred restoration of directory timestamps
//!
//! Writing children into an archived directory bumps its modification time,
//! so the original times are captured in a [`DirRecord`] when the directory is
//! created (or found already archived) and put back in one pass after the
//! whole source argument has been written. The recorded mode is re-applied in
//! the same pass, since directories are kept owner-writable while populated.

use crate::types::EntryStat;
use crate::utils;
use filetime::FileTime;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Original times and mode of one archived directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirRecord {
    path: PathBuf,
    accessed: FileTime,
    modified: FileTime,
    mode: u32,
}

impl DirRecord {
    /// Capture the times and mode of `source` for the archived directory at `path`
    pub fn new(path: PathBuf, source: &EntryStat) -> Self {
        Self {
            path,
            accessed: source.accessed(),
            modified: source.modified(),
            mode: source.mode,
        }
    }

    /// Archived directory this record restores
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Permission bits captured with the record
    pub fn mode(&self) -> u32 {
        self.mode
    }
}

/// Queue of directory records pending restoration for one source argument
#[derive(Debug, Default)]
pub struct TimestampQueue {
    records: Vec<DirRecord>,
    // latest record per path
    index: HashMap<PathBuf, usize>,
}

impl TimestampQueue {
    /// Create an empty queue
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a directory for later restoration
    pub fn push(&mut self, record: DirRecord) {
        self.index.insert(record.path.clone(), self.records.len());
        self.records.push(record);
    }

    /// Number of pending records
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Pending record for an archived directory, if any
    pub fn find(&self, path: &Path) -> Option<&DirRecord> {
        self.index.get(path).map(|&i| &self.records[i])
    }

    /// Whether nothing is pending
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Restore every recorded mode and timestamp, consuming the queue
    ///
    /// Must only run once all descendants have been written. Records are
    /// applied newest first, so children are fixed before a parent loses its
    /// owner write or search bit. Failures are logged and counted; the
    /// returned value is the number of failures.
    pub fn fix_all(self) -> usize {
        debug!("Restoring timestamps on {} directories", self.records.len());
        let mut failures = 0;
        for record in self.records.into_iter().rev() {
            if let Err(e) = utils::set_mode(&record.path, record.mode) {
                warn!("Failed to restore mode {:o} on {:?}: {}", record.mode, record.path, e);
                failures += 1;
            }
            if let Err(e) = utils::set_times(&record.path, record.accessed, record.modified) {
                warn!("Failed to restore timestamps on {:?}: {}", record.path, e);
                failures += 1;
            }
        }
        failures
    }
}
