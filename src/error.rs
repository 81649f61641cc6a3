//! Error types for the bakim library
//!
//! Only conditions that make the archive untrustworthy are surfaced as errors.
//! Secondary failures (ownership, timestamps, immutability flags, the `newest`
//! view) are logged as warnings by the engine and never reach this type.

use std::path::PathBuf;
use thiserror::Error;

/// Type alias for Results in the bakim library
pub type Result<T> = std::result::Result<T, BakimError>;

/// Main error type for all bakim operations
#[derive(Debug, Error)]
pub enum BakimError {
    /// I/O errors without a more specific context
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A filesystem operation on a specific path failed
    #[error("failed to {op} {path:?}: {source}")]
    FileOp {
        /// Operation being attempted (e.g. "open source file")
        op: &'static str,
        /// Path the operation was applied to
        path: PathBuf,
        /// Underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// A destination path would reach the platform path-length ceiling
    #[error("path exceeds PATH_MAX ({len} >= {limit} bytes): {path:?}")]
    PathTooLong {
        /// The path that would have been constructed
        path: PathBuf,
        /// Length of the path in bytes
        len: usize,
        /// Platform limit
        limit: usize,
    },

    /// Could not create the archive root, branch or `newest` directory
    #[error("cannot set up archive directory {path:?}: {source}")]
    ArchiveSetup {
        /// Directory that could not be created
        path: PathBuf,
        /// Underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// Every collision slot for the branch is taken
    #[error("all collision slots for branch {branch} are in use (duplicate-per-day limit)")]
    SlotsExhausted {
        /// Branch whose slots ran out
        branch: String,
    },

    /// Directory traversal failed
    #[error("walk failed: {0}")]
    Walk(#[from] walkdir::Error),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// Bad command-line usage
    #[error("usage: {0}")]
    Usage(String),

    /// Generic error for unexpected conditions
    #[error("Internal error: {0}")]
    Internal(String),
}

impl BakimError {
    /// Wrap an I/O error with the operation and path it came from
    pub fn file_op(op: &'static str, path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        BakimError::FileOp {
            op,
            path: path.into(),
            source,
        }
    }

    /// Create an internal error with a custom message
    pub fn internal(msg: impl Into<String>) -> Self {
        BakimError::Internal(msg.into())
    }

    /// Whether the error happened while preparing the archive layout
    pub fn is_setup(&self) -> bool {
        matches!(
            self,
            BakimError::ArchiveSetup { .. } | BakimError::InvalidConfiguration(_)
        )
    }

    /// Get a user-friendly error message with suggestions
    pub fn user_message(&self) -> String {
        match self {
            BakimError::PathTooLong { path, .. } => {
                format!(
                    "Destination path {:?} is too long for this system. \
                     Use a shorter archive root or back up a deeper subdirectory.",
                    path
                )
            }
            BakimError::SlotsExhausted { branch } => {
                format!(
                    "Branch {} already has the maximum number of collision slots. \
                     Try again tomorrow or pass a different --branch.",
                    branch
                )
            }
            BakimError::ArchiveSetup { path, source } => {
                format!(
                    "Cannot prepare archive directory {:?} ({}). \
                     Check that the archive root exists and is writable.",
                    path, source
                )
            }
            _ => self.to_string(),
        }
    }
}
