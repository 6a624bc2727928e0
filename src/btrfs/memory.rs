//! In-memory tree-search backend
//!
//! `MemoryTree` holds a synthetic set of btrfs items and answers queries
//! with the same buffer format the kernel produces, including the
//! "stop when the next item no longer fits" behaviour. `MemorySource`
//! adds a path namespace on top so the whole scheduler can run without
//! a btrfs mount or CAP_SYS_ADMIN.

use crate::btrfs::buffer::SearchBuffer;
use crate::btrfs::extent::encode_file_extent;
use crate::btrfs::transport::TreeSearch;
use crate::btrfs::types::{
    ExtentItem, ItemKey, SearchHeader, SearchKey, EXTENT_DATA_KEY, SEARCH_HEADER_SIZE,
};
use crate::error::{TargetError, TargetResult, TransportError, TransportResult};
use crate::source::{ExtentSource, TargetInfo, TargetKind};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone)]
struct StoredItem {
    transid: u64,
    payload: Vec<u8>,
}

/// Synthetic metadata tree
#[derive(Debug, Clone, Default)]
pub struct MemoryTree {
    items: BTreeMap<ItemKey, StoredItem>,
    failing_inodes: BTreeSet<u64>,
    corrupt_lengths: bool,
    replay_first_item: bool,
}

impl MemoryTree {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a file extent item under `(inode, EXTENT_DATA, file_offset)`
    pub fn insert_extent(&mut self, item: &ExtentItem, inline_len: usize) {
        let key = ItemKey::new(item.inode, EXTENT_DATA_KEY, item.file_offset);
        self.insert_raw(key, item.generation, encode_file_extent(item, inline_len));
    }

    /// Store an arbitrary item
    pub fn insert_raw(&mut self, key: ItemKey, transid: u64, payload: Vec<u8>) {
        self.items.insert(key, StoredItem { transid, payload });
    }

    /// Make every query for `inode` fail at the ioctl level
    pub fn fail_inode(&mut self, inode: u64) {
        self.failing_inodes.insert(inode);
    }

    /// Write headers whose length field overruns the buffer
    pub fn corrupt_lengths(&mut self) {
        self.corrupt_lengths = true;
    }

    /// Prepend the inode's first item to every query after the first
    pub fn replay_first_item(&mut self) {
        self.replay_first_item = true;
    }

    /// A transport reading from this tree
    pub fn transport(&self) -> MemoryTransport<'_> {
        MemoryTransport {
            tree: self,
            queries: 0,
        }
    }
}

/// Transport over a [`MemoryTree`]
pub struct MemoryTransport<'a> {
    tree: &'a MemoryTree,
    queries: u64,
}

impl MemoryTransport<'_> {
    /// Queries answered so far
    pub fn queries(&self) -> u64 {
        self.queries
    }
}

impl TreeSearch for MemoryTransport<'_> {
    fn search(
        &mut self,
        key: &SearchKey,
        nr_items: u32,
        buffer: &mut SearchBuffer,
    ) -> TransportResult<u32> {
        buffer.prepare(key, nr_items);
        let first_query = self.queries == 0;
        self.queries += 1;

        let inode = key.min.objectid;
        if self.tree.failing_inodes.contains(&inode) {
            return Err(TransportError::Ioctl {
                inode,
                code: libc::EIO,
                reason: "injected failure".into(),
            });
        }

        let replay = if self.tree.replay_first_item && !first_query {
            self.tree
                .items
                .range(ItemKey::new(inode, 0, 0)..)
                .next()
                .filter(|(k, _)| k.objectid == inode)
        } else {
            None
        };
        let in_range = if key.min <= key.max {
            Some(self.tree.items.range(key.min..=key.max))
        } else {
            None
        };
        let candidates = replay
            .into_iter()
            .chain(in_range.into_iter().flatten())
            .filter(|(_, item)| (key.min_transid..=key.max_transid).contains(&item.transid));

        let capacity = buffer.capacity();
        let corrupt = self.tree.corrupt_lengths;
        let data = buffer.data_mut();
        let mut offset = 0;
        let mut count = 0u32;

        for (item_key, item) in candidates {
            if count >= nr_items {
                break;
            }
            let footprint = SEARCH_HEADER_SIZE + item.payload.len();
            if offset + footprint > capacity {
                if count == 0 {
                    // What the kernel reports when not even one item fits
                    return Err(TransportError::Ioctl {
                        inode,
                        code: libc::EOVERFLOW,
                        reason: "buffer too small for one item".into(),
                    });
                }
                break;
            }

            let header = SearchHeader {
                transid: item.transid,
                objectid: item_key.objectid,
                offset: item_key.offset,
                item_type: u32::from(item_key.item_type),
                len: if corrupt {
                    u32::MAX
                } else {
                    item.payload.len() as u32
                },
            };
            header.encode(&mut data[offset..offset + SEARCH_HEADER_SIZE]);
            data[offset + SEARCH_HEADER_SIZE..offset + footprint].copy_from_slice(&item.payload);

            offset += footprint;
            count += 1;
        }

        buffer.set_returned_items(count);
        Ok(count)
    }
}

/// Entry of the in-memory namespace
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MemoryEntry {
    File { inode: u64 },
    Directory { children: Vec<PathBuf> },
    Symlink,
    /// Device node, FIFO or socket
    Special,
    /// Exists but cannot be opened or listed
    Denied,
    /// Regular file on another filesystem type
    Foreign,
}

/// Path namespace plus extent tree, standing in for a mounted btrfs
#[derive(Debug, Clone, Default)]
pub struct MemorySource {
    tree: MemoryTree,
    entries: BTreeMap<PathBuf, (MemoryEntry, u64)>,
}

impl MemorySource {
    pub fn new(tree: MemoryTree) -> Self {
        Self {
            tree,
            entries: BTreeMap::new(),
        }
    }

    pub fn tree_mut(&mut self) -> &mut MemoryTree {
        &mut self.tree
    }

    /// Add an entry on device 0, linking it into its parent directory
    pub fn add(&mut self, path: impl Into<PathBuf>, entry: MemoryEntry) -> &mut Self {
        self.add_on_device(path, entry, 0)
    }

    /// Add an entry on a specific device
    pub fn add_on_device(
        &mut self,
        path: impl Into<PathBuf>,
        entry: MemoryEntry,
        device: u64,
    ) -> &mut Self {
        let path = path.into();
        if let Some(parent) = path.parent() {
            if let Some((MemoryEntry::Directory { children }, _)) = self.entries.get_mut(parent) {
                if !children.contains(&path) {
                    children.push(path.clone());
                }
            }
        }
        self.entries.insert(path, (entry, device));
        self
    }

    pub fn add_dir(&mut self, path: impl Into<PathBuf>) -> &mut Self {
        self.add(path, MemoryEntry::Directory { children: Vec::new() })
    }

    pub fn add_file(&mut self, path: impl Into<PathBuf>, inode: u64) -> &mut Self {
        self.add(path, MemoryEntry::File { inode })
    }

    fn lookup(&self, path: &Path) -> TargetResult<&(MemoryEntry, u64)> {
        self.entries.get(path).ok_or_else(|| TargetError::NotFound {
            path: path.to_path_buf(),
        })
    }
}

impl ExtentSource for MemorySource {
    type Transport<'a> = MemoryTransport<'a>;

    fn inspect(&self, path: &Path, _follow_links: bool) -> TargetResult<TargetInfo> {
        let (entry, device) = self.lookup(path)?;
        let kind = match entry {
            MemoryEntry::File { .. } | MemoryEntry::Foreign | MemoryEntry::Denied => {
                TargetKind::File
            }
            MemoryEntry::Directory { .. } => TargetKind::Directory,
            MemoryEntry::Symlink => TargetKind::Symlink,
            MemoryEntry::Special => TargetKind::Other,
        };
        Ok(TargetInfo {
            kind,
            device: *device,
        })
    }

    fn read_dir(&self, path: &Path) -> TargetResult<Vec<PathBuf>> {
        match self.lookup(path)? {
            (MemoryEntry::Directory { children }, _) => Ok(children.clone()),
            (MemoryEntry::Denied, _) => Err(TargetError::PermissionDenied {
                path: path.to_path_buf(),
            }),
            _ => Err(TargetError::Io {
                path: path.to_path_buf(),
                reason: "not a directory".into(),
            }),
        }
    }

    fn open<'a>(&'a self, path: &Path) -> TargetResult<(Self::Transport<'a>, u64)> {
        match self.lookup(path)? {
            (MemoryEntry::File { inode }, _) => Ok((self.tree.transport(), *inode)),
            (MemoryEntry::Foreign, _) => Err(TargetError::NotBtrfs {
                path: path.to_path_buf(),
            }),
            (MemoryEntry::Denied, _) => Err(TargetError::PermissionDenied {
                path: path.to_path_buf(),
            }),
            _ => Err(TargetError::NotFileOrDirectory {
                path: path.to_path_buf(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::btrfs::types::{CompressionKind, ExtentKind};

    fn inline(inode: u64, len: u64) -> ExtentItem {
        ExtentItem {
            inode,
            file_offset: 0,
            generation: 3,
            kind: ExtentKind::Inline,
            compression: CompressionKind::None,
            disk_bytenr: 0,
            disk_num_bytes: len,
            num_bytes: len,
            ram_bytes: len,
        }
    }

    #[test]
    fn test_search_respects_bounds_and_count() {
        let mut tree = MemoryTree::new();
        tree.insert_extent(&inline(256, 10), 10);
        tree.insert_extent(&inline(257, 20), 20);
        tree.insert_extent(&inline(258, 30), 30);

        let mut transport = tree.transport();
        let mut buffer = SearchBuffer::new();
        let count = transport
            .search(&SearchKey::file_extents(257), 10, &mut buffer)
            .unwrap();
        assert_eq!(count, 1);

        let header = SearchHeader::decode(buffer.data()).unwrap();
        assert_eq!(header.objectid, 257);
        assert_eq!(header.len as usize, 21 + 20);
        assert_eq!(transport.queries(), 1);
    }

    #[test]
    fn test_search_stops_when_buffer_is_full() {
        let mut tree = MemoryTree::new();
        for i in 0..40u64 {
            let mut item = inline(900, 4000);
            item.file_offset = i * 4096;
            tree.insert_extent(&item, 4000);
        }

        let mut transport = tree.transport();
        let mut buffer = SearchBuffer::new();
        let count = transport
            .search(&SearchKey::file_extents(900), u32::MAX, &mut buffer)
            .unwrap();
        let footprint = SEARCH_HEADER_SIZE + 21 + 4000;
        assert_eq!(count as usize, buffer.capacity() / footprint);
    }

    #[test]
    fn test_injected_failure() {
        let mut tree = MemoryTree::new();
        tree.fail_inode(777);
        let mut transport = tree.transport();
        let mut buffer = SearchBuffer::new();
        let err = transport
            .search(&SearchKey::file_extents(777), 1, &mut buffer)
            .unwrap_err();
        assert!(matches!(err, TransportError::Ioctl { code, .. } if code == libc::EIO));
    }

    #[test]
    fn test_source_namespace() {
        let mut source = MemorySource::new(MemoryTree::new());
        source.add_dir("/vol");
        source.add_file("/vol/a", 257);
        source.add("/vol/fifo", MemoryEntry::Special);

        let children = source.read_dir(Path::new("/vol")).unwrap();
        assert_eq!(children, vec![PathBuf::from("/vol/a"), PathBuf::from("/vol/fifo")]);

        let info = source.inspect(Path::new("/vol/fifo"), false).unwrap();
        assert_eq!(info.kind, TargetKind::Other);

        let (_, inode) = source.open(Path::new("/vol/a")).unwrap();
        assert_eq!(inode, 257);

        assert!(matches!(
            source.inspect(Path::new("/vol/missing"), true),
            Err(TargetError::NotFound { .. })
        ));
    }
}
