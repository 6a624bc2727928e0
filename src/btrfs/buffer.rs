//! Fixed-capacity tree-search buffer
//!
//! `SearchBuffer` owns one `btrfs_ioctl_search_args_v2` with an embedded
//! 64 KiB result area. The kernel accepts up to 16 MiB here; 64 KiB keeps
//! each worker's allocation small while still returning several hundred
//! extent items per call.
//!
//! Each worker owns exactly one buffer and reuses it for every query of
//! every file it scans.

use crate::btrfs::types::SearchKey;

/// Size of the result area in bytes
pub const SEARCH_BUFFER_SIZE: usize = 64 * 1024;

/// `struct btrfs_ioctl_search_key`
#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct RawSearchKey {
    pub tree_id: u64,
    pub min_objectid: u64,
    pub max_objectid: u64,
    pub min_offset: u64,
    pub max_offset: u64,
    pub min_transid: u64,
    pub max_transid: u64,
    pub min_type: u32,
    pub max_type: u32,
    /// In: items requested. Out: items returned.
    pub nr_items: u32,
    pub unused: u32,
    pub unused1: u64,
    pub unused2: u64,
    pub unused3: u64,
    pub unused4: u64,
}

/// `struct btrfs_ioctl_search_args_v2` with a fixed-size result area
#[repr(C)]
pub(crate) struct SearchArgs {
    pub key: RawSearchKey,
    pub buf_size: u64,
    pub buf: [u8; SEARCH_BUFFER_SIZE],
}

/// Size of the fixed part of the ioctl argument (key + buf_size)
pub(crate) const SEARCH_ARGS_HEADER_SIZE: usize = std::mem::size_of::<RawSearchKey>() + 8;

/// Owned, reusable tree-search argument and result buffer
pub struct SearchBuffer {
    args: Box<SearchArgs>,
}

impl SearchBuffer {
    pub fn new() -> Self {
        Self {
            args: Box::new(SearchArgs {
                key: RawSearchKey::default(),
                buf_size: SEARCH_BUFFER_SIZE as u64,
                buf: [0; SEARCH_BUFFER_SIZE],
            }),
        }
    }

    /// Capacity of the result area
    pub fn capacity(&self) -> usize {
        SEARCH_BUFFER_SIZE
    }

    /// Load the request for one query
    pub(crate) fn prepare(&mut self, key: &SearchKey, nr_items: u32) {
        self.args.key = RawSearchKey {
            tree_id: key.tree_id,
            min_objectid: key.min.objectid,
            max_objectid: key.max.objectid,
            min_offset: key.min.offset,
            max_offset: key.max.offset,
            min_transid: key.min_transid,
            max_transid: key.max_transid,
            min_type: u32::from(key.min.item_type),
            max_type: u32::from(key.max.item_type),
            nr_items,
            ..RawSearchKey::default()
        };
        self.args.buf_size = SEARCH_BUFFER_SIZE as u64;
    }

    /// Items the last query returned
    pub(crate) fn returned_items(&self) -> u32 {
        self.args.key.nr_items
    }

    pub(crate) fn set_returned_items(&mut self, count: u32) {
        self.args.key.nr_items = count;
    }

    /// Pointer handed to the ioctl
    pub(crate) fn as_mut_ptr(&mut self) -> *mut SearchArgs {
        &mut *self.args
    }

    /// Result area as written by the last query
    pub fn data(&self) -> &[u8] {
        &self.args.buf
    }

    pub(crate) fn data_mut(&mut self) -> &mut [u8] {
        &mut self.args.buf
    }
}

impl Default for SearchBuffer {
    fn default() -> Self {
        Self::new()
    }
}
