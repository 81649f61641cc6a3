//! Per-entry backup logic
//!
//! Every visited entry runs through a small state machine against a candidate
//! archive directory, starting with the primary one:
//!
//! ```text
//!            ┌── missing ─────────────────────────> Create
//! Probe ─────┼── present and identical ───────────> NoOp
//!            └── different / blocked by a file ───> Collide
//!                                                     │
//!                    slot already holds it <──────────┤──> NoOp
//!                    slot accepts it      <───────────┘──> Create
//! ```
//!
//! Create copies the entry, replicates mode, owner and times, protects
//! regular files, and points the `newest` view at the directory written.
//! Secondary steps that fail are logged as warnings and counted; everything
//! else aborts the run.

use crate::archive::ArchiveLayout;
use crate::context::TraversalContext;
use crate::error::{BakimError, Result};
use crate::immutable::{AttributeGuard, Protection};
use crate::linker::SnapshotLinker;
use crate::sameness::same;
use crate::timestamps::DirRecord;
use crate::types::EntryKind;
use crate::utils::{self, Probe};
use crate::walker::WalkEntry;
use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, trace, warn};

/// What happened to one entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    /// Written into the given archive directory
    Created(PathBuf),
    /// Already present with identical content in the given archive directory
    Unchanged(PathBuf),
    /// Not a file, directory or symlink
    Skipped,
}

/// Applies the backup state machine to walked entries
pub struct BackupEngine<'a> {
    layout: &'a ArchiveLayout,
    linker: &'a SnapshotLinker,
    guard: &'a dyn AttributeGuard,
}

impl<'a> BackupEngine<'a> {
    /// Engine writing into `layout`
    pub fn new(
        layout: &'a ArchiveLayout,
        linker: &'a SnapshotLinker,
        guard: &'a dyn AttributeGuard,
    ) -> Self {
        Self {
            layout,
            linker,
            guard,
        }
    }

    /// Back up one entry
    pub fn process(&self, ctx: &mut TraversalContext, entry: &WalkEntry) -> Result<Action> {
        if entry.kind() == EntryKind::Other {
            debug!("Skipping special file {:?}", entry.path);
            ctx.report.skipped += 1;
            return Ok(Action::Skipped);
        }
        self.backup_into(ctx, entry, self.layout.primary())
    }

    fn backup_into(
        &self,
        ctx: &mut TraversalContext,
        entry: &WalkEntry,
        dir: &Path,
    ) -> Result<Action> {
        let dst = utils::join_checked(dir, &entry.relative)?;
        match utils::probe(&dst)? {
            Probe::Missing => self.create(ctx, entry, dir, &dst),
            Probe::Found(stat)
                if same(&entry.stat, &stat, Some((entry.path.as_path(), dst.as_path())))? =>
            {
                Ok(self.unchanged(ctx, entry, dir, dst))
            }
            Probe::Found(_) | Probe::NotADirectory => self.collide(ctx, entry),
        }
    }

    fn collide(&self, ctx: &mut TraversalContext, entry: &WalkEntry) -> Result<Action> {
        ctx.report.collisions += 1;
        let grant = ctx.slots.allocate_or_find(
            self.layout,
            entry,
            &mut ctx.pending,
            &mut ctx.report,
        )?;
        debug!(
            "Collision on {:?}, using slot {:?} (existing: {})",
            entry.relative, grant.dir, grant.found_existing
        );
        let dst = utils::join_checked(&grant.dir, &entry.relative)?;
        if grant.found_existing {
            Ok(self.unchanged(ctx, entry, &grant.dir, dst))
        } else {
            self.create(ctx, entry, &grant.dir, &dst)
        }
    }

    fn unchanged(
        &self,
        ctx: &mut TraversalContext,
        entry: &WalkEntry,
        dir: &Path,
        dst: PathBuf,
    ) -> Action {
        trace!("Unchanged: {:?}", entry.relative);
        ctx.report.unchanged += 1;
        if entry.kind() == EntryKind::Directory {
            // New children may still land here; the timestamp pass puts the mode back
            if entry.stat.mode & 0o700 != 0o700 {
                soft(ctx, "open up", &dst, utils::set_mode(&dst, entry.stat.mode | 0o700));
            }
            ctx.pending.push(DirRecord::new(dst, &entry.stat));
        }
        Action::Unchanged(dir.to_path_buf())
    }

    fn create(
        &self,
        ctx: &mut TraversalContext,
        entry: &WalkEntry,
        dir: &Path,
        dst: &Path,
    ) -> Result<Action> {
        let linked = match entry.kind() {
            EntryKind::Regular => {
                self.copy_file(ctx, entry, dst)?;
                self.linker.relink(&entry.relative, dir, entry.link_depth())
            }
            EntryKind::Directory => {
                self.make_dir(ctx, entry, dst)?;
                self.linker.relink_dir(&entry.relative)
            }
            EntryKind::Symlink => {
                self.make_symlink(ctx, entry, dst)?;
                self.linker.relink(&entry.relative, dir, entry.link_depth())
            }
            EntryKind::Other => return Ok(Action::Skipped),
        };
        match linked {
            Ok(()) => {}
            Err(e @ BakimError::PathTooLong { .. }) => return Err(e),
            Err(e) => {
                warn!("Failed to update newest view for {:?}: {}", entry.relative, e);
                ctx.report.warnings += 1;
            }
        }
        debug!("Archived {:?} into {:?}", entry.relative, dir);
        Ok(Action::Created(dir.to_path_buf()))
    }

    fn copy_file(&self, ctx: &mut TraversalContext, entry: &WalkEntry, dst: &Path) -> Result<()> {
        let mut src = File::open(&entry.path)
            .map_err(|e| BakimError::file_op("open source file", &entry.path, e))?;
        let mut out = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(dst)
            .map_err(|e| BakimError::file_op("create archive file", dst, e))?;
        let copied = io::copy(&mut src, &mut out)
            .map_err(|e| BakimError::file_op("copy into", dst, e))?;
        drop(out);

        // Owner first: chown clears setuid/setgid bits
        soft(ctx, "chown", dst, utils::set_owner(dst, entry.stat.uid, entry.stat.gid));
        utils::set_mode(dst, entry.stat.mode)
            .map_err(|e| BakimError::file_op("set mode on", dst, e))?;
        soft(
            ctx,
            "restore timestamps on",
            dst,
            utils::set_times(dst, entry.stat.accessed(), entry.stat.modified()),
        );

        match self.guard.protect(dst) {
            Ok(Protection::Applied) => trace!("Protected {:?}", dst),
            Ok(Protection::Skipped) => {}
            Err(e) => {
                warn!("Failed to set immutable flag on {:?}: {}", dst, e);
                ctx.report.warnings += 1;
            }
        }

        ctx.report.files_archived += 1;
        ctx.report.bytes_copied += copied;
        Ok(())
    }

    fn make_dir(&self, ctx: &mut TraversalContext, entry: &WalkEntry, dst: &Path) -> Result<()> {
        fs::create_dir(dst).map_err(|e| BakimError::file_op("create directory", dst, e))?;
        // Stays owner-writable until the timestamp pass applies the real mode
        utils::set_mode(dst, entry.stat.mode | 0o700)
            .map_err(|e| BakimError::file_op("set mode on", dst, e))?;
        soft(ctx, "chown", dst, utils::set_owner(dst, entry.stat.uid, entry.stat.gid));
        ctx.pending.push(DirRecord::new(dst.to_path_buf(), &entry.stat));
        ctx.report.directories_archived += 1;
        Ok(())
    }

    fn make_symlink(
        &self,
        ctx: &mut TraversalContext,
        entry: &WalkEntry,
        dst: &Path,
    ) -> Result<()> {
        let target = utils::read_symlink(&entry.path)?;
        std::os::unix::fs::symlink(&target, dst)
            .map_err(|e| BakimError::file_op("create symlink", dst, e))?;
        soft(ctx, "chown", dst, utils::set_owner(dst, entry.stat.uid, entry.stat.gid));
        ctx.report.symlinks_archived += 1;
        Ok(())
    }
}

/// Log and count a failure that does not invalidate the archived copy
fn soft(ctx: &mut TraversalContext, op: &str, path: &Path, result: io::Result<()>) {
    if let Err(e) = result {
        warn!("Failed to {} {:?}: {}", op, path, e);
        ctx.report.warnings += 1;
    }
}
