//! # Bakim - Incremental, versioned filesystem backup
//!
//! Copies new and changed entries of one or more source trees into a dated
//! archive directory, keeps every differing version side by side, and
//! maintains a `newest` view that always points at the latest copy of each
//! path.
//!
//! ## Overview
//!
//! A run archives into `archive_root/<branch>`, where the branch defaults to
//! today's date:
//!
//! - Entries missing from the archive are copied, with mode, owner and times
//!   replicated
//! - Entries already archived with identical metadata are left alone
//! - Entries whose archived copy differs go to a collision slot
//!   (`<branch>-aa`, `<branch>-ab`, ... up to 676 per branch), so no archived
//!   byte is ever overwritten
//! - Archived regular files are marked immutable
//! - `archive_root/newest` mirrors the source tree with relative symlinks into
//!   whichever archive directory holds each path's latest copy
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use bakim::BakimBuilder;
//! use std::path::PathBuf;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let bakim = BakimBuilder::new()
//!     .archive_root(PathBuf::from("/srv/backup"))
//!     .build()?;
//!
//! let report = bakim.backup(&[
//!     PathBuf::from("/etc"),
//!     PathBuf::from("/home/user/projects"),
//! ])?;
//! println!(
//!     "{} archived, {} unchanged, {} collisions",
//!     report.entries_archived(),
//!     report.unchanged,
//!     report.collisions
//! );
//! # Ok(())
//! # }
//! ```
//!
//! ## Testing Without Privileges
//!
//! Setting the immutable flag and forcing archive ownership to root both need
//! privileges. Both can be turned off, or the guard replaced:
//!
//! ```rust
//! use bakim::{AttributeGuard, BakimBuilder, Protection};
//! use std::path::{Path, PathBuf};
//!
//! struct LogOnly;
//!
//! impl AttributeGuard for LogOnly {
//!     fn protect(&self, path: &Path) -> std::io::Result<Protection> {
//!         println!("would protect {:?}", path);
//!         Ok(Protection::Skipped)
//!     }
//! }
//!
//! let bakim = BakimBuilder::new()
//!     .archive_root(PathBuf::from("/tmp/bakim-archive"))
//!     .archive_owner(None)
//!     .guard(Box::new(LogOnly))
//!     .build()
//!     .unwrap();
//! # let _ = bakim;
//! ```
//!
//! ## Error Handling
//!
//! Operations return `Result<T, BakimError>`. Only failures that leave the
//! archive untrustworthy are errors: path-length overruns, archive setup,
//! copying or creating an entry, walking a source, running out of collision
//! slots. Ownership, timestamp, immutability and `newest` failures are logged
//! through `tracing` and counted in [`BackupReport::warnings`].
//!
//! ## Module Organization
//!
//! - [`bakim`]: the [`Bakim`] entry point and its builder
//! - [`walker`]: source argument resolution and traversal
//! - [`engine`]: per-entry probe, create and collide logic
//! - [`sameness`]: type-aware equality of source and archived entries
//! - [`slots`]: collision slot naming, discovery and paving
//! - [`linker`]: the `newest` view
//! - [`timestamps`]: deferred directory timestamp repair
//! - [`immutable`]: the immutable-flag guard
//! - [`types`]: common types and data structures
//! - [`error`]: error types and handling

// Public API modules
pub mod archive;
pub mod bakim;
pub mod context;
pub mod engine;
pub mod error;
pub mod immutable;
pub mod linker;
pub mod sameness;
pub mod slots;
pub mod timestamps;
pub mod types;
pub mod utils;
pub mod walker;

// Re-export main types for convenience
pub use archive::ArchiveLayout;
pub use bakim::{Bakim, BakimBuilder};
pub use engine::{Action, BackupEngine};
pub use error::{BakimError, Result};
pub use immutable::{AttributeGuard, ImmutableFlag, NoProtection, Protection};
pub use types::*;
