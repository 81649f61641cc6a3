//! Multi-run integration tests for bakim
//!
//! Each scenario drives the public API over a temporary source tree and a
//! separate temporary archive root, then inspects the archive on disk.

use ::bakim::{AttributeGuard, BackupReport, Bakim, BakimBuilder, Protection};
use filetime::FileTime;
use std::cell::RefCell;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::rc::Rc;
use tempfile::TempDir;
use tracing::info;

/// Branch label used by every harness
pub const BRANCH: &str = "2024-03-01";

/// Guard that records every path it is asked to protect
#[derive(Debug, Clone, Default)]
pub struct RecordingGuard {
    pub protected: Rc<RefCell<Vec<PathBuf>>>,
}

impl AttributeGuard for RecordingGuard {
    fn protect(&self, path: &Path) -> io::Result<Protection> {
        self.protected.borrow_mut().push(path.to_path_buf());
        Ok(Protection::Applied)
    }
}

/// Guard that always fails, as an unprivileged process would
#[derive(Debug, Clone, Copy, Default)]
pub struct DeniedGuard;

impl AttributeGuard for DeniedGuard {
    fn protect(&self, _path: &Path) -> io::Result<Protection> {
        Err(io::Error::from_raw_os_error(libc::EPERM))
    }
}

/// Test harness for backup scenarios
pub struct BakimTestHarness {
    pub source_dir: TempDir,
    pub archive_dir: TempDir,
    pub bakim: Bakim,
    pub guard: RecordingGuard,
    clock: i64,
}

impl BakimTestHarness {
    /// Create a new test harness with a recording guard
    pub fn new() -> Self {
        let source_dir = TempDir::new().unwrap();
        let archive_dir = TempDir::new().unwrap();
        let guard = RecordingGuard::default();
        let bakim = BakimBuilder::new()
            .archive_root(archive_dir.path().to_path_buf())
            .branch(BRANCH)
            .archive_owner(None)
            .guard(Box::new(guard.clone()))
            .build()
            .unwrap();

        Self {
            source_dir,
            archive_dir,
            bakim,
            guard,
            clock: 1_700_000_000,
        }
    }

    /// Absolute path of `rel` in the source tree
    pub fn src(&self, rel: &str) -> PathBuf {
        self.source_dir.path().join(rel)
    }

    /// Write a source file with a fresh, strictly increasing mtime
    pub fn write(&mut self, rel: &str, content: &str) -> PathBuf {
        let path = self.src(rel);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(&path, content).unwrap();
        self.clock += 60;
        filetime::set_file_mtime(&path, FileTime::from_unix_time(self.clock, 0)).unwrap();
        path
    }

    /// Back up `rel` from the source tree
    pub fn run(&self, rel: &str) -> BackupReport {
        let report = self.bakim.backup_one(&self.src(rel)).unwrap();
        info!("Run report: {:?}", report);
        report
    }

    /// Contents of `rel` inside the archive directory `dir`
    pub fn archived(&self, dir: &Path, rel: &str) -> String {
        fs::read_to_string(dir.join(rel)).unwrap()
    }

    /// Contents of `rel` reached through the `newest` view
    pub fn newest(&self, rel: &str) -> String {
        fs::read_to_string(self.bakim.layout().newest().join(rel)).unwrap()
    }

    /// Names of every collision slot directory on disk
    pub fn slots_on_disk(&self) -> Vec<String> {
        let prefix = format!("{}-", BRANCH);
        let mut slots: Vec<String> = fs::read_dir(self.archive_dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .filter(|name| name.starts_with(&prefix))
            .collect();
        slots.sort();
        slots
    }

    /// Snapshot of every entry under `newest`: relative path and link target
    pub fn newest_listing(&self) -> Vec<(PathBuf, Option<PathBuf>)> {
        let newest = self.bakim.layout().newest();
        let mut listing: Vec<_> = walkdir::WalkDir::new(newest)
            .min_depth(1)
            .into_iter()
            .map(|e| {
                let e = e.unwrap();
                let rel = e.path().strip_prefix(newest).unwrap().to_path_buf();
                (rel, fs::read_link(e.path()).ok())
            })
            .collect();
        listing.sort();
        listing
    }
}

impl Default for BakimTestHarness {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracing_test::traced_test;

    #[test]
    fn test_two_run_scenario() {
        let mut harness = BakimTestHarness::new();
        harness.write("a/file.txt", "v1");

        // Run 1: archived into the primary directory and protected
        let report = harness.run("a");
        assert_eq!(report.files_archived, 1);
        let primary = harness.bakim.layout().primary().to_path_buf();
        assert_eq!(harness.archived(&primary, "a/file.txt"), "v1");
        assert_eq!(
            harness.guard.protected.borrow().as_slice(),
            &[primary.join("a/file.txt")]
        );
        assert_eq!(
            fs::read_link(harness.bakim.layout().newest().join("a/file.txt")).unwrap(),
            PathBuf::from(format!("../../{}/a/file.txt", BRANCH))
        );

        // Run 2: mtime and size differ, so v2 lands in the first slot
        harness.write("a/file.txt", "v2 is longer");
        let report = harness.run("a");
        assert_eq!(report.collisions, 1);
        assert_eq!(report.slots_created, 1);

        let slot = harness.bakim.layout().slot_dir("aa");
        assert_eq!(harness.archived(&slot, "a/file.txt"), "v2 is longer");
        assert_eq!(harness.archived(&primary, "a/file.txt"), "v1");
        assert_eq!(
            fs::read_link(harness.bakim.layout().newest().join("a/file.txt")).unwrap(),
            PathBuf::from(format!("../../{}-aa/a/file.txt", BRANCH))
        );
        assert_eq!(harness.newest("a/file.txt"), "v2 is longer");
        assert_eq!(harness.guard.protected.borrow().len(), 2);
    }

    #[test]
    fn test_idempotence() {
        let mut harness = BakimTestHarness::new();
        harness.write("tree/one.txt", "1");
        harness.write("tree/sub/two.txt", "2");
        std::os::unix::fs::symlink("sub/two.txt", harness.src("tree/link")).unwrap();

        let first = harness.run("tree");
        assert_eq!(first.entries_archived(), 5);
        let listing = harness.newest_listing();

        let second = harness.run("tree");
        assert_eq!(second.entries_archived(), 0);
        assert_eq!(second.unchanged, 5);
        assert_eq!(second.collisions, 0);
        assert!(harness.slots_on_disk().is_empty());
        assert_eq!(harness.newest_listing(), listing);
    }

    #[test]
    fn test_each_change_gets_next_slot() {
        let mut harness = BakimTestHarness::new();
        for version in 1..=4 {
            harness.write("doc/page.txt", &format!("version {}", version));
            harness.run("doc");
        }

        assert_eq!(
            harness.slots_on_disk(),
            vec!["2024-03-01-aa", "2024-03-01-ab", "2024-03-01-ac"]
        );
        let layout = harness.bakim.layout();
        assert_eq!(harness.archived(layout.primary(), "doc/page.txt"), "version 1");
        assert_eq!(harness.archived(&layout.slot_dir("ac"), "doc/page.txt"), "version 4");
        assert_eq!(harness.newest("doc/page.txt"), "version 4");
    }

    #[test]
    fn test_reverting_finds_existing_slot() {
        let mut harness = BakimTestHarness::new();
        let path = harness.write("cfg/app.conf", "old");
        let old_mtime = FileTime::from_last_modification_time(&fs::metadata(&path).unwrap());
        harness.run("cfg");

        harness.write("cfg/app.conf", "new");
        harness.run("cfg");

        // Putting back exactly the first version matches the primary copy
        fs::write(&path, "old").unwrap();
        filetime::set_file_mtime(&path, old_mtime).unwrap();
        let report = harness.run("cfg");
        assert_eq!(report.files_archived, 0);
        assert_eq!(report.unchanged, 2);
        assert_eq!(harness.slots_on_disk().len(), 1);

        // Going forward again rediscovers the slot instead of allocating one
        harness.write("cfg/app.conf", "new");
        let mtime = FileTime::from_last_modification_time(
            &fs::metadata(harness.bakim.layout().slot_dir("aa").join("cfg/app.conf")).unwrap(),
        );
        filetime::set_file_mtime(&path, mtime).unwrap();
        let report = harness.run("cfg");
        assert_eq!(report.collisions, 1);
        assert_eq!(report.slots_created, 0);
        assert_eq!(report.files_archived, 0);
        assert_eq!(harness.slots_on_disk().len(), 1);
    }

    #[test]
    fn test_new_file_in_changed_tree_goes_to_primary() {
        let mut harness = BakimTestHarness::new();
        harness.write("proj/a.txt", "a1");
        harness.run("proj");

        harness.write("proj/a.txt", "a2");
        harness.write("proj/deeper/b.txt", "b1");
        let report = harness.run("proj");
        assert_eq!(report.collisions, 1);

        let layout = harness.bakim.layout();
        assert_eq!(harness.archived(layout.primary(), "proj/deeper/b.txt"), "b1");
        assert!(!layout.slot_dir("aa").join("proj/deeper").exists());
        assert_eq!(harness.newest("proj/a.txt"), "a2");
        assert_eq!(harness.newest("proj/deeper/b.txt"), "b1");
    }

    #[test]
    fn test_file_replaced_by_directory() {
        let mut harness = BakimTestHarness::new();
        harness.write("top/x", "plain file");
        harness.run("top");

        fs::remove_file(harness.src("top/x")).unwrap();
        harness.write("top/x/inner.txt", "inside");
        let report = harness.run("top");
        assert_eq!(report.slots_created, 1);

        let layout = harness.bakim.layout();
        assert_eq!(harness.archived(layout.primary(), "top/x"), "plain file");
        assert_eq!(harness.archived(&layout.slot_dir("aa"), "top/x/inner.txt"), "inside");

        // newest/top/x turned from a link into a real directory
        let meta = fs::symlink_metadata(layout.newest().join("top/x")).unwrap();
        assert!(meta.is_dir());
        assert_eq!(harness.newest("top/x/inner.txt"), "inside");
        // The primary copy survived the view being rebuilt
        assert_eq!(harness.archived(layout.primary(), "top/x"), "plain file");
    }

    #[test]
    fn test_slot_paving_uses_directory_modes() {
        use std::os::unix::fs::PermissionsExt;

        let mut harness = BakimTestHarness::new();
        harness.write("m/private/deep/f.txt", "one");
        fs::set_permissions(harness.src("m/private"), fs::Permissions::from_mode(0o750)).unwrap();
        harness.run("m");

        harness.write("m/private/deep/f.txt", "two");
        harness.run("m");

        let slot = harness.bakim.layout().slot_dir("aa");
        let mode = fs::metadata(slot.join("m/private")).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode, 0o750);
        assert_eq!(harness.archived(&slot, "m/private/deep/f.txt"), "two");
    }

    #[test]
    fn test_directory_timestamps_across_slots() {
        let mut harness = BakimTestHarness::new();
        harness.write("t/d/f.txt", "1");
        harness.run("t");

        harness.write("t/d/f.txt", "2");
        let when = FileTime::from_unix_time(1_400_000_000, 0);
        filetime::set_file_times(harness.src("t/d"), when, when).unwrap();
        harness.run("t");

        let layout = harness.bakim.layout();
        for dir in [layout.primary().to_path_buf(), layout.slot_dir("aa")] {
            let meta = fs::metadata(dir.join("t/d")).unwrap();
            assert_eq!(
                FileTime::from_last_modification_time(&meta),
                when,
                "mtime of {:?}",
                dir
            );
        }
    }

    #[test]
    fn test_symlink_target_change() {
        let mut harness = BakimTestHarness::new();
        harness.write("s/a.txt", "A");
        harness.write("s/b.txt", "B");
        std::os::unix::fs::symlink("a.txt", harness.src("s/current")).unwrap();
        harness.run("s");

        fs::remove_file(harness.src("s/current")).unwrap();
        std::os::unix::fs::symlink("b.txt", harness.src("s/current")).unwrap();
        let report = harness.run("s");
        assert_eq!(report.collisions, 1);
        assert_eq!(report.symlinks_archived, 1);

        let layout = harness.bakim.layout();
        assert_eq!(
            fs::read_link(layout.primary().join("s/current")).unwrap(),
            PathBuf::from("a.txt")
        );
        assert_eq!(
            fs::read_link(layout.slot_dir("aa").join("s/current")).unwrap(),
            PathBuf::from("b.txt")
        );
        assert_eq!(
            fs::read_link(layout.newest().join("s/current")).unwrap(),
            PathBuf::from("../../2024-03-01-aa/s/current")
        );
    }

    #[test]
    #[traced_test]
    fn test_guard_failure_is_logged_not_fatal() {
        let source_dir = TempDir::new().unwrap();
        let archive_dir = TempDir::new().unwrap();
        let bakim = BakimBuilder::new()
            .archive_root(archive_dir.path().to_path_buf())
            .branch(BRANCH)
            .archive_owner(None)
            .guard(Box::new(DeniedGuard))
            .build()
            .unwrap();

        let root = source_dir.path().join("w");
        fs::create_dir(&root).unwrap();
        fs::write(root.join("one"), "1").unwrap();
        fs::write(root.join("two"), "2").unwrap();

        let report = bakim.backup_one(&root).unwrap();
        assert_eq!(report.files_archived, 2);
        assert_eq!(report.warnings, 2);
        assert!(logs_contain("Failed to set immutable flag"));
    }

    #[test]
    fn test_slots_are_per_argument() {
        let mut harness = BakimTestHarness::new();
        harness.write("p/f", "p1");
        harness.write("q/f", "q1");
        harness
            .bakim
            .backup(&[harness.src("p"), harness.src("q")])
            .unwrap();

        harness.write("p/f", "p2");
        harness.write("q/f", "q2");
        let report = harness
            .bakim
            .backup(&[harness.src("p"), harness.src("q")])
            .unwrap();

        // The second argument rediscovers slot aa on disk and fits there
        assert_eq!(report.collisions, 2);
        assert_eq!(report.slots_created, 1);
        assert_eq!(harness.newest("p/f"), "p2");
        assert_eq!(harness.newest("q/f"), "q2");
    }
}
