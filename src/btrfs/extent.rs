//! File extent item parser
//!
//! Decodes the payload of an `EXTENT_DATA` item. On-disk layout
//! (little-endian, packed):
//!
//! ```text
//! 0   generation      u64
//! 8   ram_bytes       u64
//! 16  compression     u8
//! 17  encryption      u8
//! 18  other_encoding  u16
//! 20  type            u8
//! 21  inline data...            (type == inline)
//! 21  disk_bytenr     u64       (type == regular / prealloc)
//! 29  disk_num_bytes  u64
//! 37  offset          u64
//! 45  num_bytes       u64
//! ```
//!
//! Records that do not match the layout are skipped rather than failing
//! the scan.

use crate::btrfs::types::{
    CompressionKind, ExtentItem, ExtentKind, SearchHeader, EXTENT_DATA_KEY,
    FILE_EXTENT_INLINE_DATA_START, FILE_EXTENT_ITEM_SIZE,
};
use std::fmt;
use tracing::debug;

/// Why a record was not turned into an [`ExtentItem`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// Item is not a file extent
    WrongItemType(u32),
    /// Payload shorter than the common prefix
    Truncated(usize),
    /// Unknown extent type tag
    UnknownExtentType(u8),
    /// Regular/prealloc payload with an unexpected size
    LayoutSize(usize),
    /// Key sorted before the search cursor
    OutOfOrder,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::WrongItemType(t) => write!(f, "item type {} is not a file extent", t),
            SkipReason::Truncated(len) => write!(f, "payload of {} bytes is truncated", len),
            SkipReason::UnknownExtentType(t) => write!(f, "unknown extent type {}", t),
            SkipReason::LayoutSize(len) => {
                write!(f, "extent payload is {} bytes, expected {}", len, FILE_EXTENT_ITEM_SIZE)
            }
            SkipReason::OutOfOrder => f.write_str("key precedes search cursor"),
        }
    }
}

/// Parse one file extent record
pub fn parse_file_extent(header: &SearchHeader, payload: &[u8]) -> Result<ExtentItem, SkipReason> {
    if header.item_type != u32::from(EXTENT_DATA_KEY) {
        return Err(SkipReason::WrongItemType(header.item_type));
    }
    if payload.len() < FILE_EXTENT_INLINE_DATA_START {
        return Err(SkipReason::Truncated(payload.len()));
    }

    let generation = le_u64(payload, 0);
    let ram_bytes = le_u64(payload, 8);
    let compression_tag = payload[16];
    let kind_tag = payload[20];

    let kind = ExtentKind::from_tag(kind_tag).ok_or(SkipReason::UnknownExtentType(kind_tag))?;
    let compression = CompressionKind::from_tag(compression_tag);
    if compression == CompressionKind::Other {
        debug!(
            inode = header.objectid,
            tag = compression_tag,
            "Unrecognized compression tag"
        );
    }

    let item = match kind {
        ExtentKind::Inline => ExtentItem {
            inode: header.objectid,
            file_offset: header.offset,
            generation,
            kind,
            compression,
            disk_bytenr: 0,
            disk_num_bytes: (payload.len() - FILE_EXTENT_INLINE_DATA_START) as u64,
            num_bytes: ram_bytes,
            ram_bytes,
        },
        ExtentKind::Regular | ExtentKind::Prealloc => {
            if payload.len() != FILE_EXTENT_ITEM_SIZE {
                return Err(SkipReason::LayoutSize(payload.len()));
            }
            ExtentItem {
                inode: header.objectid,
                file_offset: header.offset,
                generation,
                kind,
                compression,
                disk_bytenr: le_u64(payload, 21),
                disk_num_bytes: le_u64(payload, 29),
                num_bytes: le_u64(payload, 45),
                ram_bytes,
            }
        }
    };

    Ok(item)
}

/// Encode an extent item into its on-disk payload
///
/// Inline items get `inline_len` bytes of zeroed data after the prefix.
/// Used by the in-memory transport and tests.
pub fn encode_file_extent(item: &ExtentItem, inline_len: usize) -> Vec<u8> {
    let mut out = Vec::with_capacity(FILE_EXTENT_ITEM_SIZE.max(
        FILE_EXTENT_INLINE_DATA_START + inline_len,
    ));
    out.extend_from_slice(&item.generation.to_le_bytes());
    out.extend_from_slice(&item.ram_bytes.to_le_bytes());
    out.push(item.compression as u8);
    out.push(0); // encryption
    out.extend_from_slice(&0u16.to_le_bytes()); // other_encoding
    out.push(item.kind as u8);

    match item.kind {
        ExtentKind::Inline => out.resize(FILE_EXTENT_INLINE_DATA_START + inline_len, 0),
        ExtentKind::Regular | ExtentKind::Prealloc => {
            out.extend_from_slice(&item.disk_bytenr.to_le_bytes());
            out.extend_from_slice(&item.disk_num_bytes.to_le_bytes());
            // extent offset: where this file's reference starts inside the extent
            out.extend_from_slice(&0u64.to_le_bytes());
            out.extend_from_slice(&item.num_bytes.to_le_bytes());
        }
    }
    out
}

fn le_u64(buf: &[u8], off: usize) -> u64 {
    let mut raw = [0u8; 8];
    raw.copy_from_slice(&buf[off..off + 8]);
    u64::from_le_bytes(raw)
}
