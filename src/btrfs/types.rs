//! btrfs key, header and extent types
//!
//! These types mirror the pieces of btrfs metadata the scanner reads:
//! search keys for the tree-search ioctl, the per-item headers the kernel
//! writes into the response buffer, and decoded file extent items.

use serde::Serialize;
use std::fmt;

/// Item type of a file extent (`BTRFS_EXTENT_DATA_KEY`)
pub const EXTENT_DATA_KEY: u8 = 108;

/// Size of one `btrfs_ioctl_search_header` in the response buffer
pub const SEARCH_HEADER_SIZE: usize = 32;

/// Bytes of a file extent item shared by inline and regular extents
/// (generation, ram_bytes, compression, encryption, other_encoding, type)
pub const FILE_EXTENT_INLINE_DATA_START: usize = 21;

/// Size of a regular/prealloc `btrfs_file_extent_item`
pub const FILE_EXTENT_ITEM_SIZE: usize = 53;

/// Largest footprint an item the kernel could have left out of a batch
/// occupies in a response buffer
///
/// Inline items have no fixed upper size (up to a sector, which can be
/// 64 KiB), but the kernel only stores them at file offset 0, so an inline
/// item is always the first key of the range. If that first item does not
/// fit the query fails with `EOVERFLOW` instead of returning a short batch.
/// Every item after it is a regular or prealloc item of fixed size.
pub const MAX_ITEM_FOOTPRINT: usize = SEARCH_HEADER_SIZE + FILE_EXTENT_ITEM_SIZE;

/// `statfs` magic of a btrfs filesystem
pub const BTRFS_SUPER_MAGIC: u32 = 0x9123_683E;

/// A btrfs item key: (objectid, type, offset), ordered lexicographically
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ItemKey {
    pub objectid: u64,
    pub item_type: u8,
    pub offset: u64,
}

impl ItemKey {
    pub const fn new(objectid: u64, item_type: u8, offset: u64) -> Self {
        Self {
            objectid,
            item_type,
            offset,
        }
    }

    /// The smallest key strictly greater than this one
    ///
    /// Overflow of the offset carries into the type, and overflow of the
    /// type into the object id. Returns `None` past the largest key.
    pub fn successor(&self) -> Option<Self> {
        if let Some(offset) = self.offset.checked_add(1) {
            return Some(Self::new(self.objectid, self.item_type, offset));
        }
        if let Some(item_type) = self.item_type.checked_add(1) {
            return Some(Self::new(self.objectid, item_type, 0));
        }
        self.objectid
            .checked_add(1)
            .map(|objectid| Self::new(objectid, 0, 0))
    }
}

impl fmt::Display for ItemKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({} {} {})", self.objectid, self.item_type, self.offset)
    }
}

/// Bounds of one tree-search query
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SearchKey {
    /// Tree to search; 0 means the subvolume containing the opened file
    pub tree_id: u64,
    pub min: ItemKey,
    pub max: ItemKey,
    pub min_transid: u64,
    pub max_transid: u64,
}

impl SearchKey {
    /// Key covering every file extent item of `inode`
    pub fn file_extents(inode: u64) -> Self {
        Self {
            tree_id: 0,
            min: ItemKey::new(inode, EXTENT_DATA_KEY, 0),
            max: ItemKey::new(inode, EXTENT_DATA_KEY, u64::MAX),
            min_transid: 0,
            max_transid: u64::MAX,
        }
    }

    /// Move the lower bound past `last`
    ///
    /// Returns `false` when no key inside the bounds remains.
    pub fn advance_past(&mut self, last: ItemKey) -> bool {
        match last.successor() {
            Some(next) if next <= self.max => {
                self.min = next;
                true
            }
            _ => false,
        }
    }
}

/// Header the kernel writes in front of every returned item
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SearchHeader {
    pub transid: u64,
    pub objectid: u64,
    pub offset: u64,
    pub item_type: u32,
    pub len: u32,
}

impl SearchHeader {
    /// Decode a header from host-endian bytes
    ///
    /// `bytes` must hold at least [`SEARCH_HEADER_SIZE`] bytes.
    pub fn decode(bytes: &[u8]) -> Option<Self> {
        if bytes.len() < SEARCH_HEADER_SIZE {
            return None;
        }
        Some(Self {
            transid: ne_u64(bytes, 0),
            objectid: ne_u64(bytes, 8),
            offset: ne_u64(bytes, 16),
            item_type: ne_u32(bytes, 24),
            len: ne_u32(bytes, 28),
        })
    }

    /// Encode into host-endian bytes (used by the in-memory transport)
    pub fn encode(&self, out: &mut [u8]) {
        out[0..8].copy_from_slice(&self.transid.to_ne_bytes());
        out[8..16].copy_from_slice(&self.objectid.to_ne_bytes());
        out[16..24].copy_from_slice(&self.offset.to_ne_bytes());
        out[24..28].copy_from_slice(&self.item_type.to_ne_bytes());
        out[28..32].copy_from_slice(&self.len.to_ne_bytes());
    }

    /// Key of the item; types outside u8 saturate so they never match
    pub fn key(&self) -> ItemKey {
        let item_type = u8::try_from(self.item_type).unwrap_or(u8::MAX);
        ItemKey::new(self.objectid, item_type, self.offset)
    }
}

fn ne_u64(buf: &[u8], off: usize) -> u64 {
    let mut raw = [0u8; 8];
    raw.copy_from_slice(&buf[off..off + 8]);
    u64::from_ne_bytes(raw)
}

fn ne_u32(buf: &[u8], off: usize) -> u32 {
    let mut raw = [0u8; 4];
    raw.copy_from_slice(&buf[off..off + 4]);
    u32::from_ne_bytes(raw)
}

/// Compression applied to an extent
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
#[repr(u8)]
pub enum CompressionKind {
    None = 0,
    Zlib = 1,
    Lzo = 2,
    Zstd = 3,
    /// Any tag this tool does not know about
    Other = 4,
}

impl CompressionKind {
    /// Number of distinct kinds
    pub const COUNT: usize = 5;

    /// Every kind, in report order
    pub const ALL: [CompressionKind; Self::COUNT] = [
        CompressionKind::None,
        CompressionKind::Zlib,
        CompressionKind::Lzo,
        CompressionKind::Zstd,
        CompressionKind::Other,
    ];

    /// Map an on-disk compression tag
    pub fn from_tag(tag: u8) -> Self {
        match tag {
            0 => CompressionKind::None,
            1 => CompressionKind::Zlib,
            2 => CompressionKind::Lzo,
            3 => CompressionKind::Zstd,
            _ => CompressionKind::Other,
        }
    }

    /// Index into per-kind arrays
    pub fn index(self) -> usize {
        self as usize
    }

    pub fn name(self) -> &'static str {
        match self {
            CompressionKind::None => "none",
            CompressionKind::Zlib => "zlib",
            CompressionKind::Lzo => "lzo",
            CompressionKind::Zstd => "zstd",
            CompressionKind::Other => "other",
        }
    }
}

impl fmt::Display for CompressionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// How the extent's data is stored
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ExtentKind {
    /// Data embedded in the metadata item
    Inline = 0,
    /// Data in a separate extent on disk
    Regular = 1,
    /// Space reserved by fallocate, not yet written
    Prealloc = 2,
}

impl ExtentKind {
    pub fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            0 => Some(ExtentKind::Inline),
            1 => Some(ExtentKind::Regular),
            2 => Some(ExtentKind::Prealloc),
            _ => None,
        }
    }
}

/// A decoded file extent item
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExtentItem {
    /// Inode owning the extent
    pub inode: u64,

    /// Logical offset within the file
    pub file_offset: u64,

    /// Transaction that wrote the extent
    pub generation: u64,

    pub kind: ExtentKind,

    pub compression: CompressionKind,

    /// Physical address of the extent; 0 for inline extents and holes
    pub disk_bytenr: u64,

    /// Bytes the extent occupies on disk (compressed size)
    pub disk_num_bytes: u64,

    /// Logical bytes of the extent referenced by this file
    pub num_bytes: u64,

    /// Uncompressed size of the whole extent
    pub ram_bytes: u64,
}

impl ExtentItem {
    pub fn is_inline(&self) -> bool {
        self.kind == ExtentKind::Inline
    }

    /// A regular extent without a physical address is a sparse hole
    pub fn is_hole(&self) -> bool {
        !self.is_inline() && self.disk_bytenr == 0
    }

    /// Physical address to claim in the dedup tracker
    ///
    /// `None` for inline extents and holes, which own no disk extent.
    pub fn dedup_key(&self) -> Option<u64> {
        if self.is_inline() || self.is_hole() {
            None
        } else {
            Some(self.disk_bytenr)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_ordering() {
        let a = ItemKey::new(257, EXTENT_DATA_KEY, 4096);
        let b = ItemKey::new(257, EXTENT_DATA_KEY + 1, 0);
        let c = ItemKey::new(258, 0, 0);
        assert!(a < b);
        assert!(b < c);
    }

    #[test]
    fn test_successor_overflow() {
        let key = ItemKey::new(257, EXTENT_DATA_KEY, 10);
        assert_eq!(key.successor(), Some(ItemKey::new(257, EXTENT_DATA_KEY, 11)));

        let key = ItemKey::new(257, EXTENT_DATA_KEY, u64::MAX);
        assert_eq!(key.successor(), Some(ItemKey::new(257, EXTENT_DATA_KEY + 1, 0)));

        let key = ItemKey::new(257, u8::MAX, u64::MAX);
        assert_eq!(key.successor(), Some(ItemKey::new(258, 0, 0)));

        let key = ItemKey::new(u64::MAX, u8::MAX, u64::MAX);
        assert_eq!(key.successor(), None);
    }

    #[test]
    fn test_advance_past_bounds() {
        let mut key = SearchKey::file_extents(300);
        assert!(key.advance_past(ItemKey::new(300, EXTENT_DATA_KEY, 8192)));
        assert_eq!(key.min.offset, 8193);

        // Last possible offset for this type: successor leaves the window
        assert!(!key.advance_past(ItemKey::new(300, EXTENT_DATA_KEY, u64::MAX)));
    }

    #[test]
    fn test_header_round_trip() {
        let header = SearchHeader {
            transid: 9,
            objectid: 257,
            offset: 4096,
            item_type: EXTENT_DATA_KEY as u32,
            len: 53,
        };
        let mut buf = [0u8; SEARCH_HEADER_SIZE];
        header.encode(&mut buf);
        assert_eq!(SearchHeader::decode(&buf), Some(header));
        assert_eq!(SearchHeader::decode(&buf[..31]), None);
    }

    #[test]
    fn test_compression_tags() {
        assert_eq!(CompressionKind::from_tag(0), CompressionKind::None);
        assert_eq!(CompressionKind::from_tag(3), CompressionKind::Zstd);
        assert_eq!(CompressionKind::from_tag(42), CompressionKind::Other);
        for (i, kind) in CompressionKind::ALL.iter().enumerate() {
            assert_eq!(kind.index(), i);
        }
    }

    #[test]
    fn test_hole_detection() {
        let item = ExtentItem {
            inode: 257,
            file_offset: 0,
            generation: 1,
            kind: ExtentKind::Regular,
            compression: CompressionKind::None,
            disk_bytenr: 0,
            disk_num_bytes: 0,
            num_bytes: 65536,
            ram_bytes: 65536,
        };
        assert!(item.is_hole());
        assert_eq!(item.dedup_key(), None);

        let prealloc = ExtentItem {
            kind: ExtentKind::Prealloc,
            disk_bytenr: 1 << 20,
            disk_num_bytes: 65536,
            ..item
        };
        assert!(!prealloc.is_hole());
        assert_eq!(prealloc.dedup_key(), Some(1 << 20));
    }
}
