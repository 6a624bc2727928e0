//! Tree-search transport
//!
//! This module provides the `TreeSearch` trait, one bounded metadata query
//! per call, and its kernel implementation on top of
//! `BTRFS_IOC_TREE_SEARCH_V2`.
//!
//! Key safety considerations:
//! - The ioctl only ever writes into the caller's `SearchBuffer`, whose
//!   layout matches `btrfs_ioctl_search_args_v2`
//! - `buf_size` is reset before every call, so the kernel never writes
//!   past the owned result area
//! - The transport performs no writes to the filesystem

use crate::btrfs::buffer::{SearchBuffer, SEARCH_ARGS_HEADER_SIZE};
use crate::btrfs::types::{SearchKey, BTRFS_SUPER_MAGIC};
use crate::error::{TargetError, TargetResult, TransportError, TransportResult};
use std::fs::File;
use std::io;
use std::os::fd::AsRawFd;
use std::os::unix::fs::MetadataExt;
use std::path::Path;

/// `_IOWR(BTRFS_IOCTL_MAGIC, 17, struct btrfs_ioctl_search_args_v2)`
///
/// The read|write direction bits land on bits 30-31 on every Linux
/// architecture, so one encoding covers them all.
pub const BTRFS_IOC_TREE_SEARCH_V2: u32 = ioc_read_write(0x94, 17, SEARCH_ARGS_HEADER_SIZE as u32);

const fn ioc_read_write(ty: u32, nr: u32, size: u32) -> u32 {
    (3 << 30) | (size << 16) | (ty << 8) | nr
}

/// One bounded query against the filesystem's metadata trees
pub trait TreeSearch {
    /// Run a query for items inside `key`, requesting at most `nr_items`
    ///
    /// On success the buffer holds the returned records back to back and
    /// the return value is their count. Zero means nothing more matches.
    fn search(
        &mut self,
        key: &SearchKey,
        nr_items: u32,
        buffer: &mut SearchBuffer,
    ) -> TransportResult<u32>;
}

/// Tree-search transport backed by an open file on btrfs
///
/// One per scanned file; the descriptor is closed on drop.
pub struct IoctlTransport {
    file: File,
    inode: u64,
}

impl IoctlTransport {
    /// Open `path` for extent queries
    ///
    /// Fails with a per-target error when the path is missing, not
    /// readable, or not on btrfs.
    pub fn open(path: &Path) -> TargetResult<Self> {
        let file = File::open(path).map_err(|e| TargetError::from_io(path, &e))?;
        let metadata = file.metadata().map_err(|e| TargetError::from_io(path, &e))?;

        if !is_btrfs(&file).map_err(|e| TargetError::from_io(path, &e))? {
            return Err(TargetError::NotBtrfs {
                path: path.to_path_buf(),
            });
        }

        Ok(Self {
            file,
            inode: metadata.ino(),
        })
    }

    /// Inode number of the opened file
    pub fn inode(&self) -> u64 {
        self.inode
    }
}

impl TreeSearch for IoctlTransport {
    fn search(
        &mut self,
        key: &SearchKey,
        nr_items: u32,
        buffer: &mut SearchBuffer,
    ) -> TransportResult<u32> {
        buffer.prepare(key, nr_items);

        // SAFETY: the pointer refers to a live, exclusively borrowed
        // `SearchArgs` whose layout matches the ioctl argument, and
        // `buf_size` bounds the kernel's writes to the owned result area.
        let ret = unsafe {
            libc::ioctl(
                self.file.as_raw_fd(),
                BTRFS_IOC_TREE_SEARCH_V2 as _,
                buffer.as_mut_ptr(),
            )
        };
        if ret < 0 {
            return Err(TransportError::from_os(self.inode, &io::Error::last_os_error()));
        }

        let returned = buffer.returned_items();
        if returned > nr_items {
            return Err(TransportError::TooManyItems {
                returned,
                requested: nr_items,
            });
        }
        Ok(returned)
    }
}

/// Check the filesystem type of an open file
fn is_btrfs(file: &File) -> io::Result<bool> {
    let mut stat = std::mem::MaybeUninit::<libc::statfs>::uninit();

    // SAFETY: fstatfs fills the struct on success; we only read it then.
    let ret = unsafe { libc::fstatfs(file.as_raw_fd(), stat.as_mut_ptr()) };
    if ret < 0 {
        return Err(io::Error::last_os_error());
    }
    // SAFETY: fstatfs returned 0, so the struct is initialized.
    let stat = unsafe { stat.assume_init() };

    // f_type is signed and of varying width across targets; the magic is
    // defined by its low 32 bits.
    Ok(stat.f_type as u32 == BTRFS_SUPER_MAGIC)
}
