//! Target resolution
//!
//! The scheduler never touches the filesystem directly. It asks an
//! `ExtentSource` what a path is, lists directories through it, and opens
//! files through it to get a tree-search transport. `FsSource` is the
//! real implementation; `btrfs::memory::MemorySource` serves tests and
//! benchmarks from a synthetic tree.

use crate::btrfs::transport::{IoctlTransport, TreeSearch};
use crate::error::{TargetError, TargetResult};
use std::fs;
use std::os::unix::fs::MetadataExt;
use std::path::{Path, PathBuf};

/// What a path refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetKind {
    File,
    Directory,
    Symlink,
    /// Device node, FIFO, socket
    Other,
}

/// Result of inspecting a path
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TargetInfo {
    pub kind: TargetKind,

    /// Device id, used for one-file-system checks
    pub device: u64,
}

/// Resolves targets and opens them for extent queries
pub trait ExtentSource: Sync {
    /// Transport returned for an opened file
    type Transport<'a>: TreeSearch
    where
        Self: 'a;

    /// Inspect a path; `follow_links` resolves symlinks first
    fn inspect(&self, path: &Path, follow_links: bool) -> TargetResult<TargetInfo>;

    /// List the entries of a directory as full paths
    fn read_dir(&self, path: &Path) -> TargetResult<Vec<PathBuf>>;

    /// Open a regular file, returning its transport and inode number
    fn open<'a>(&'a self, path: &Path) -> TargetResult<(Self::Transport<'a>, u64)>;
}

/// Source backed by the mounted filesystem
#[derive(Debug, Clone, Copy, Default)]
pub struct FsSource;

impl ExtentSource for FsSource {
    type Transport<'a> = IoctlTransport;

    fn inspect(&self, path: &Path, follow_links: bool) -> TargetResult<TargetInfo> {
        let metadata = if follow_links {
            fs::metadata(path)
        } else {
            fs::symlink_metadata(path)
        }
        .map_err(|e| TargetError::from_io(path, &e))?;

        let file_type = metadata.file_type();
        let kind = if file_type.is_file() {
            TargetKind::File
        } else if file_type.is_dir() {
            TargetKind::Directory
        } else if file_type.is_symlink() {
            TargetKind::Symlink
        } else {
            TargetKind::Other
        };

        Ok(TargetInfo {
            kind,
            device: metadata.dev(),
        })
    }

    fn read_dir(&self, path: &Path) -> TargetResult<Vec<PathBuf>> {
        let entries = fs::read_dir(path).map_err(|e| TargetError::from_io(path, &e))?;
        entries
            .map(|entry| {
                entry
                    .map(|e| e.path())
                    .map_err(|e| TargetError::from_io(path, &e))
            })
            .collect()
    }

    fn open<'a>(&'a self, path: &Path) -> TargetResult<(Self::Transport<'a>, u64)> {
        let transport = IoctlTransport::open(path)?;
        let inode = transport.inode();
        Ok((transport, inode))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;
    use tempfile::tempdir;

    #[test]
    fn test_inspect_kinds() {
        let dir = tempdir().unwrap();
        let file_path = dir.path().join("data.bin");
        File::create(&file_path).unwrap();

        let source = FsSource;
        assert_eq!(
            source.inspect(dir.path(), true).unwrap().kind,
            TargetKind::Directory
        );
        assert_eq!(source.inspect(&file_path, true).unwrap().kind, TargetKind::File);

        let link = dir.path().join("link");
        std::os::unix::fs::symlink(&file_path, &link).unwrap();
        assert_eq!(source.inspect(&link, false).unwrap().kind, TargetKind::Symlink);
        assert_eq!(source.inspect(&link, true).unwrap().kind, TargetKind::File);
    }

    #[test]
    fn test_read_dir_lists_children() {
        let dir = tempdir().unwrap();
        File::create(dir.path().join("a")).unwrap();
        File::create(dir.path().join("b")).unwrap();

        let mut children = FsSource.read_dir(dir.path()).unwrap();
        children.sort();
        assert_eq!(children, vec![dir.path().join("a"), dir.path().join("b")]);
    }

    #[test]
    fn test_inspect_missing() {
        let dir = tempdir().unwrap();
        let missing = dir.path().join("missing");
        assert!(matches!(
            FsSource.inspect(&missing, true),
            Err(TargetError::NotFound { .. })
        ));
    }
}
