//! Write protection for archived entries
//!
//! After a regular file has been copied into the archive the engine asks an
//! [`AttributeGuard`] to protect it. The default guard, [`ImmutableFlag`],
//! sets the filesystem-level immutable attribute (`chattr +i`) through the
//! `FS_IOC_GETFLAGS` / `FS_IOC_SETFLAGS` ioctls, which blocks writes, renames
//! and unlinks even for the file's owner.
//!
//! Protection is best effort. The engine logs a failure as a warning and keeps
//! going, since the archived copy is still valid without the flag.

use std::fs;
use std::io;
use std::path::Path;

/// Outcome of a protection request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protection {
    /// The attribute is now set
    Applied,
    /// The entry type does not support the attribute, nothing was done
    Skipped,
}

/// Capability for write-protecting archived entries
pub trait AttributeGuard {
    /// Protect `path` against later modification
    fn protect(&self, path: &Path) -> io::Result<Protection>;
}

/// Guard that sets the ext2-style immutable flag
#[derive(Debug, Clone, Copy, Default)]
pub struct ImmutableFlag;

/// Guard that leaves archived entries writable
#[derive(Debug, Clone, Copy, Default)]
pub struct NoProtection;

impl AttributeGuard for NoProtection {
    fn protect(&self, _path: &Path) -> io::Result<Protection> {
        Ok(Protection::Skipped)
    }
}

impl AttributeGuard for ImmutableFlag {
    fn protect(&self, path: &Path) -> io::Result<Protection> {
        // Only regular files and directories carry inode flags
        let file_type = fs::symlink_metadata(path)?.file_type();
        if !file_type.is_file() && !file_type.is_dir() {
            return Ok(Protection::Skipped);
        }
        let flags = sys::get_flags(path)?;
        sys::set_flags(path, flags | sys::FS_IMMUTABLE_FL)?;
        Ok(Protection::Applied)
    }
}

impl ImmutableFlag {
    /// Whether `path` currently has the immutable flag
    pub fn is_set(path: &Path) -> io::Result<bool> {
        Ok(sys::get_flags(path)? & sys::FS_IMMUTABLE_FL != 0)
    }
}

#[cfg(target_os = "linux")]
mod sys {
    use std::fs::File;
    use std::io;
    use std::os::unix::io::AsRawFd;
    use std::path::Path;

    pub const FS_IMMUTABLE_FL: libc::c_int = 0x0000_0010;

    #[cfg(any(
        target_arch = "powerpc",
        target_arch = "powerpc64",
        target_arch = "mips",
        target_arch = "mips64",
        target_arch = "sparc64"
    ))]
    mod layout {
        pub const READ: u64 = 2;
        pub const WRITE: u64 = 4;
        pub const DIR_SHIFT: u64 = 29;
    }

    #[cfg(not(any(
        target_arch = "powerpc",
        target_arch = "powerpc64",
        target_arch = "mips",
        target_arch = "mips64",
        target_arch = "sparc64"
    )))]
    mod layout {
        pub const READ: u64 = 2;
        pub const WRITE: u64 = 1;
        pub const DIR_SHIFT: u64 = 30;
    }

    const fn ioc(dir: u64, nr: u64) -> u64 {
        let size = std::mem::size_of::<libc::c_long>() as u64;
        (dir << layout::DIR_SHIFT) | (size << 16) | ((b'f' as u64) << 8) | nr
    }

    // _IOR('f', 1, long) and _IOW('f', 2, long)
    const FS_IOC_GETFLAGS: u64 = ioc(layout::READ, 1);
    const FS_IOC_SETFLAGS: u64 = ioc(layout::WRITE, 2);

    pub fn get_flags(path: &Path) -> io::Result<libc::c_int> {
        let file = File::open(path)?;
        let mut flags: libc::c_int = 0;
        // The kernel reads and writes an int through the pointer
        let r = unsafe {
            libc::ioctl(
                file.as_raw_fd(),
                FS_IOC_GETFLAGS as _,
                &mut flags as *mut libc::c_int,
            )
        };
        if r == -1 {
            return Err(io::Error::last_os_error());
        }
        Ok(flags)
    }

    pub fn set_flags(path: &Path, flags: libc::c_int) -> io::Result<()> {
        let file = File::open(path)?;
        let r = unsafe {
            libc::ioctl(
                file.as_raw_fd(),
                FS_IOC_SETFLAGS as _,
                &flags as *const libc::c_int,
            )
        };
        if r == -1 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }
}

#[cfg(not(target_os = "linux"))]
mod sys {
    use std::io;
    use std::path::Path;

    pub const FS_IMMUTABLE_FL: libc::c_int = 0x0000_0010;

    pub fn get_flags(_path: &Path) -> io::Result<libc::c_int> {
        Err(io::Error::new(
            io::ErrorKind::Unsupported,
            "inode flags are only supported on Linux",
        ))
    }

    pub fn set_flags(path: &Path, _flags: libc::c_int) -> io::Result<()> {
        get_flags(path).map(|_| ())
    }
}
