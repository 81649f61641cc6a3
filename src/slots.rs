//! Collision slots
//!
//! When a path in the primary archive already holds different content (or is
//! blocked by a non-directory ancestor), the entry goes to an alternate archive
//! directory named `branch-aa`, `branch-ab`, ... `branch-zz`. Each slot mirrors
//! the primary layout, so missing ancestors are *paved* inside the slot before
//! the entry can be written there.
//!
//! The allocator only remembers slots for the current source argument. Slot
//! directories left by earlier arguments or earlier invocations are found
//! again by probing the disk while searching for an unused suffix.

use crate::archive::{chown_archive_dir, ArchiveLayout};
use crate::error::{BakimError, Result};
use crate::sameness::same;
use crate::timestamps::{DirRecord, TimestampQueue};
use crate::types::{BackupReport, EntryKind, EntryStat};
use crate::utils::{self, Probe};
use crate::walker::WalkEntry;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, trace, warn};

/// Number of two-letter suffixes available per branch
pub const MAX_SLOTS: usize = 26 * 26;

/// Suffix for the slot at `index` (`0 -> "aa"`, `27 -> "bb"`), `None` past the end
pub fn slot_suffix(index: usize) -> Option<String> {
    if index >= MAX_SLOTS {
        return None;
    }
    let hi = (b'a' + (index / 26) as u8) as char;
    let lo = (b'a' + (index % 26) as u8) as char;
    Some(format!("{}{}", hi, lo))
}

/// Slot chosen for an entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlotGrant {
    /// Slot directory (an alternate archive root for the branch)
    pub dir: PathBuf,
    /// Whether the slot already holds identical content for the entry
    pub found_existing: bool,
}

enum Fit {
    Identical,
    Vacant,
    Occupied,
}

/// Per-argument registry of collision slots
#[derive(Debug)]
pub struct SlotAllocator {
    known: Vec<PathBuf>,
    source_base: PathBuf,
    archive_owner: Option<(u32, u32)>,
}

impl SlotAllocator {
    /// Create an empty registry for an argument whose base offset is `source_base`
    pub fn new(source_base: PathBuf, archive_owner: Option<(u32, u32)>) -> Self {
        Self {
            known: Vec::new(),
            source_base,
            archive_owner,
        }
    }

    /// Slots seen so far, in the order they were discovered or created
    pub fn known(&self) -> &[PathBuf] {
        &self.known
    }

    /// Find a slot that already holds `entry` or can accept it
    ///
    /// Known slots are tried first, in order. After that, suffixes are walked
    /// from `aa`: an existing slot directory is adopted and tried, a missing
    /// one is created. Running out of suffixes is fatal.
    pub fn allocate_or_find(
        &mut self,
        layout: &ArchiveLayout,
        entry: &WalkEntry,
        pending: &mut TimestampQueue,
        report: &mut BackupReport,
    ) -> Result<SlotGrant> {
        for i in 0..self.known.len() {
            let dir = self.known[i].clone();
            if let Some(grant) = self.try_slot(dir, layout, entry, pending, report)? {
                return Ok(grant);
            }
        }

        for index in 0..MAX_SLOTS {
            let Some(suffix) = slot_suffix(index) else {
                break;
            };
            let dir = layout.slot_dir(&suffix);
            if self.known.contains(&dir) {
                continue;
            }
            utils::check_path_len(&dir)?;
            match fs::create_dir(&dir) {
                Ok(()) => {
                    debug!("Created collision slot {:?}", dir);
                    report.slots_created += 1;
                    if let Some((uid, gid)) = self.archive_owner {
                        report.warnings += chown_archive_dir(&dir, uid, gid);
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                    let is_dir = fs::symlink_metadata(&dir)
                        .map(|m| m.is_dir())
                        .unwrap_or(false);
                    if !is_dir {
                        warn!("Skipping slot name {:?}: not a directory", dir);
                        report.warnings += 1;
                        continue;
                    }
                    trace!("Rediscovered collision slot {:?}", dir);
                }
                Err(e) => return Err(BakimError::file_op("create collision slot", &dir, e)),
            }
            self.known.push(dir.clone());
            if let Some(grant) = self.try_slot(dir, layout, entry, pending, report)? {
                return Ok(grant);
            }
        }

        Err(BakimError::SlotsExhausted {
            branch: layout.branch().to_string(),
        })
    }

    fn try_slot(
        &self,
        dir: PathBuf,
        layout: &ArchiveLayout,
        entry: &WalkEntry,
        pending: &mut TimestampQueue,
        report: &mut BackupReport,
    ) -> Result<Option<SlotGrant>> {
        let fit = self.fit(&dir, layout, entry, pending, report)?;
        Ok(match fit {
            Fit::Identical => Some(SlotGrant {
                dir,
                found_existing: true,
            }),
            Fit::Vacant => Some(SlotGrant {
                dir,
                found_existing: false,
            }),
            Fit::Occupied => None,
        })
    }

    fn fit(
        &self,
        dir: &Path,
        layout: &ArchiveLayout,
        entry: &WalkEntry,
        pending: &mut TimestampQueue,
        report: &mut BackupReport,
    ) -> Result<Fit> {
        let dst = utils::join_checked(dir, &entry.relative)?;
        match utils::probe(&dst)? {
            Probe::Found(stat) => {
                if same(&entry.stat, &stat, Some((entry.path.as_path(), dst.as_path())))? {
                    Ok(Fit::Identical)
                } else {
                    Ok(Fit::Occupied)
                }
            }
            Probe::NotADirectory => Ok(Fit::Occupied),
            Probe::Missing => {
                let parent = entry.relative.parent().unwrap_or_else(|| Path::new(""));
                if self.pave(dir, parent, layout, pending, report)? {
                    Ok(Fit::Vacant)
                } else {
                    Ok(Fit::Occupied)
                }
            }
        }
    }

    /// Create every missing ancestor of an entry inside a slot
    ///
    /// Modes and owners are taken from the primary archive's copy of each
    /// component (falling back to the source directory), and the source
    /// directory's times are queued for restoration. Existing ancestors
    /// without owner access are opened up until the queue is drained.
    /// Returns `false` when a component exists but is not a directory.
    fn pave(
        &self,
        dir: &Path,
        parent: &Path,
        layout: &ArchiveLayout,
        pending: &mut TimestampQueue,
        report: &mut BackupReport,
    ) -> Result<bool> {
        let mut rel = PathBuf::new();
        for component in parent.components() {
            rel.push(component);
            let target = utils::join_checked(dir, &rel)?;
            match utils::probe(&target)? {
                Probe::Found(stat) if stat.kind == EntryKind::Directory => {
                    if stat.mode & 0o700 != 0o700 {
                        if let Err(e) = utils::set_mode(&target, stat.mode | 0o700) {
                            warn!("Failed to open up {:?}: {}", target, e);
                            report.warnings += 1;
                        }
                        pending.push(DirRecord::new(target, &stat));
                    }
                    continue;
                }
                Probe::Found(_) | Probe::NotADirectory => {
                    trace!("Cannot pave {:?}: {:?} is not a directory", dir, rel);
                    return Ok(false);
                }
                Probe::Missing => {}
            }

            let template = self.component_template(layout, &rel, pending)?;
            fs::create_dir(&target)
                .map_err(|e| BakimError::file_op("create directory", &target, e))?;
            utils::set_mode(&target, template.mode | 0o700)
                .map_err(|e| BakimError::file_op("set mode on", &target, e))?;
            if let Err(e) = utils::set_owner(&target, template.uid, template.gid) {
                warn!("Failed to chown {:?}: {}", target, e);
                report.warnings += 1;
            }
            pending.push(DirRecord::new(target, &template));
            trace!("Paved {:?} in {:?}", rel, dir);
        }
        Ok(true)
    }

    /// Metadata to give a paved component: the mode recorded for it in the
    /// primary archive, its owner there, and the source directory's times
    fn component_template(
        &self,
        layout: &ArchiveLayout,
        rel: &Path,
        pending: &TimestampQueue,
    ) -> Result<EntryStat> {
        let source_path = utils::join_checked(&self.source_base, rel)?;
        let source = fs::symlink_metadata(&source_path)
            .map(|m| EntryStat::from(&m))
            .map_err(|e| BakimError::file_op("stat source directory", &source_path, e))?;

        let primary = utils::join_checked(layout.primary(), rel)?;
        let mut template = match utils::probe(&primary)? {
            Probe::Found(archived) if archived.kind == EntryKind::Directory => EntryStat {
                mode: archived.mode,
                uid: archived.uid,
                gid: archived.gid,
                ..source
            },
            _ => source,
        };
        // Directories written this run are still owner-writable on disk
        if let Some(record) = pending.find(&primary) {
            template.mode = record.mode();
        }
        Ok(template)
    }
}
