//! Error types for btrfs-compsize
//!
//! This module defines the error hierarchy for a scan:
//! - Per-target errors (missing path, permission, wrong filesystem)
//! - Transport errors from the tree-search ioctl (fatal for the run)
//! - Configuration and CLI errors
//! - Worker thread errors
//!
//! Design philosophy:
//! - Use thiserror for structured error types in library code
//! - Keep per-target failures separate from run-fatal failures so the
//!   scheduler can decide between "record and continue" and "abort"
//! - Preserve error chains for debugging

use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Top-level error type for a btrfs-compsize run
#[derive(Error, Debug)]
pub enum CompsizeError {
    /// Tree-search transport errors (fatal)
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Worker/concurrency errors
    #[error("Worker error: {0}")]
    Worker(#[from] WorkerError),
}

/// Errors tied to a single input path
///
/// These never abort a run: the scheduler records them against the path
/// and keeps going with the remaining targets.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TargetError {
    /// Path does not exist
    #[error("Path not found: '{path}'")]
    NotFound { path: PathBuf },

    /// Path exists but cannot be opened or listed
    #[error("Permission denied: '{path}'")]
    PermissionDenied { path: PathBuf },

    /// Path is not on a btrfs filesystem
    #[error("Not on a btrfs filesystem: '{path}'")]
    NotBtrfs { path: PathBuf },

    /// Path is neither a regular file nor a directory
    #[error("Not a regular file or directory: '{path}'")]
    NotFileOrDirectory { path: PathBuf },

    /// Any other I/O failure while opening or listing the path
    #[error("Failed to access '{path}': {reason}")]
    Io { path: PathBuf, reason: String },
}

impl TargetError {
    /// Classify an I/O error raised while accessing `path`
    pub fn from_io(path: &Path, err: &io::Error) -> Self {
        let path = path.to_path_buf();
        match err.kind() {
            io::ErrorKind::NotFound => TargetError::NotFound { path },
            io::ErrorKind::PermissionDenied => TargetError::PermissionDenied { path },
            _ => TargetError::Io {
                path,
                reason: err.to_string(),
            },
        }
    }

    /// Path this error is recorded against
    pub fn path(&self) -> &Path {
        match self {
            TargetError::NotFound { path }
            | TargetError::PermissionDenied { path }
            | TargetError::NotBtrfs { path }
            | TargetError::NotFileOrDirectory { path }
            | TargetError::Io { path, .. } => path,
        }
    }
}

/// Tree-search transport errors
///
/// Any of these means the backing interface does not behave the way the
/// decoder expects. Retrying the same query cannot help, so the whole run
/// is aborted.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// The search ioctl itself failed
    #[error("Tree search failed for inode {inode} (errno {code}): {reason}")]
    Ioctl {
        inode: u64,
        code: i32,
        reason: String,
    },

    /// The response buffer does not decode to whole items
    #[error("Malformed search response at byte {offset}: need {needed} bytes, {available} available")]
    Malformed {
        offset: usize,
        needed: usize,
        available: usize,
    },

    /// The kernel reported more items than the request allowed
    #[error("Search returned {returned} items but only {requested} were requested")]
    TooManyItems { returned: u32, requested: u32 },

    /// Cursor advancement failed to move the search key forward
    #[error("Search cursor for inode {inode} did not advance past ({objectid}, {item_type}, {offset})")]
    CursorStalled {
        inode: u64,
        objectid: u64,
        item_type: u8,
        offset: u64,
    },
}

impl TransportError {
    /// Build an ioctl error from the last OS error
    pub fn from_os(inode: u64, err: &io::Error) -> Self {
        TransportError::Ioctl {
            inode,
            code: err.raw_os_error().unwrap_or(0),
            reason: err.to_string(),
        }
    }

    /// Check if this error was caused by missing privileges
    ///
    /// The tree-search ioctl requires CAP_SYS_ADMIN.
    pub fn is_privilege_error(&self) -> bool {
        matches!(self, TransportError::Ioctl { code, .. } if *code == libc::EPERM)
    }
}

/// Configuration and CLI errors
#[derive(Error, Debug)]
pub enum ConfigError {
    /// No paths were given
    #[error("At least one path is required")]
    NoPaths,

    /// Invalid worker count
    #[error("Invalid worker count {count}: must be between 1 and {max}")]
    InvalidWorkerCount { count: usize, max: usize },

    /// Invalid number of items per search query
    #[error("Invalid items per query {count}: must be between 1 and {max}")]
    InvalidItemsPerQuery { count: u32, max: u32 },

    /// Invalid exclude pattern
    #[error("Invalid exclude pattern '{pattern}': {reason}")]
    InvalidExcludePattern { pattern: String, reason: String },
}

/// Worker thread errors
#[derive(Error, Debug)]
pub enum WorkerError {
    /// Worker panicked
    #[error("Worker {id} panicked: {message}")]
    Panicked { id: usize, message: String },

    /// Worker thread could not be spawned
    #[error("Failed to spawn worker {id}: {reason}")]
    SpawnFailed { id: usize, reason: String },
}

/// Result type alias for CompsizeError
pub type Result<T> = std::result::Result<T, CompsizeError>;

/// Result type alias for TargetError
pub type TargetResult<T> = std::result::Result<T, TargetError>;

/// Result type alias for TransportError
pub type TransportResult<T> = std::result::Result<T, TransportError>;

/// Outcome of processing a single target
#[derive(Debug)]
pub enum TargetOutcome {
    /// Regular file scanned
    Scanned { path: PathBuf, extents: u64 },

    /// Directory expanded into child targets
    Expanded { path: PathBuf, children: usize },

    /// Ignored (excluded, other device, symlink inside a directory, ...)
    Ignored { path: PathBuf, reason: &'static str },

    /// Recorded failure, run continues
    Failed(TargetError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_target_error_from_io() {
        let path = Path::new("/data/missing");
        let err = io::Error::from(io::ErrorKind::NotFound);
        assert_eq!(
            TargetError::from_io(path, &err),
            TargetError::NotFound {
                path: path.to_path_buf()
            }
        );

        let err = io::Error::from(io::ErrorKind::PermissionDenied);
        assert!(matches!(
            TargetError::from_io(path, &err),
            TargetError::PermissionDenied { .. }
        ));

        let err = io::Error::new(io::ErrorKind::Other, "boom");
        let target = TargetError::from_io(path, &err);
        assert!(matches!(target, TargetError::Io { .. }));
        assert_eq!(target.path(), path);
    }

    #[test]
    fn test_privilege_error() {
        let eperm = TransportError::from_os(257, &io::Error::from_raw_os_error(libc::EPERM));
        assert!(eperm.is_privilege_error());

        let enotty = TransportError::from_os(257, &io::Error::from_raw_os_error(libc::ENOTTY));
        assert!(!enotty.is_privilege_error());
    }

    #[test]
    fn test_error_conversion() {
        let err = TransportError::Malformed {
            offset: 10,
            needed: 32,
            available: 12,
        };
        let top: CompsizeError = err.into();
        assert!(matches!(top, CompsizeError::Transport(_)));
        assert!(top.to_string().starts_with("Transport error: Malformed search response"));

        let worker: CompsizeError = WorkerError::Panicked {
            id: 3,
            message: "boom".into(),
        }
        .into();
        assert_eq!(worker.to_string(), "Worker error: Worker 3 panicked: boom");
    }
}
