//! Paginated extent search for one inode
//!
//! `ExtentSearch` turns repeated bounded tree-search queries into a lazy
//! sequence of decoded records:
//!
//! 1. The key starts at `(inode, EXTENT_DATA, 0)..=(inode, EXTENT_DATA, MAX)`
//! 2. Each batch is decoded header by header; items of other types, or
//!    keys that sort before the cursor, are reported as skipped
//! 3. A batch that was not full ends the sequence, otherwise the lower
//!    bound moves past the highest key seen and the next query runs
//! 4. An object id beyond the inode ends the sequence immediately

use crate::btrfs::buffer::SearchBuffer;
use crate::btrfs::extent::{parse_file_extent, SkipReason};
use crate::btrfs::transport::TreeSearch;
use crate::btrfs::types::{
    ExtentItem, ItemKey, SearchHeader, SearchKey, MAX_ITEM_FOOTPRINT, SEARCH_HEADER_SIZE,
};
use crate::error::{TransportError, TransportResult};

/// Default number of items requested per query
pub const DEFAULT_ITEMS_PER_QUERY: u32 = 4096;

/// One decoded record from the search
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SearchRecord {
    /// A file extent of the inode
    Extent(ExtentItem),

    /// A record that was stepped over
    Skipped { key: ItemKey, reason: SkipReason },
}

/// Lazy iterator over the extent records of one inode
pub struct ExtentSearch<'a, T: TreeSearch> {
    transport: &'a mut T,
    buffer: &'a mut SearchBuffer,
    inode: u64,
    key: SearchKey,
    items_per_query: u32,

    /// Items in the current batch
    batch_len: u32,
    /// Items consumed from the current batch
    batch_pos: u32,
    /// Byte offset of the next header in the buffer
    cursor: usize,
    /// Highest key decoded from the current batch
    highest: Option<ItemKey>,

    queried: bool,
    finished: bool,
    queries: u64,
}

impl<'a, T: TreeSearch> ExtentSearch<'a, T> {
    pub fn new(
        transport: &'a mut T,
        buffer: &'a mut SearchBuffer,
        inode: u64,
        items_per_query: u32,
    ) -> Self {
        Self {
            transport,
            buffer,
            inode,
            key: SearchKey::file_extents(inode),
            items_per_query: items_per_query.max(1),
            batch_len: 0,
            batch_pos: 0,
            cursor: 0,
            highest: None,
            queried: false,
            finished: false,
            queries: 0,
        }
    }

    /// Number of queries issued so far
    pub fn queries(&self) -> u64 {
        self.queries
    }

    /// Whether the last batch may have been cut short
    ///
    /// The kernel stops filling the buffer either at the requested item
    /// count or when the next item does not fit. A tail smaller than a
    /// regular extent item means more items may follow; see
    /// [`MAX_ITEM_FOOTPRINT`] for why inline items do not widen the bound.
    fn batch_was_full(&self) -> bool {
        self.batch_len >= self.items_per_query
            || self.buffer.capacity().saturating_sub(self.cursor) < MAX_ITEM_FOOTPRINT
    }

    /// Issue the next query; `Ok(false)` when the sequence is exhausted
    fn fetch(&mut self) -> TransportResult<bool> {
        if self.queried {
            if !self.batch_was_full() {
                return Ok(false);
            }
            let Some(last) = self.highest else {
                return Ok(false);
            };

            let previous = self.key.min;
            if !self.key.advance_past(last) {
                return Ok(false);
            }
            if self.key.min <= previous {
                return Err(TransportError::CursorStalled {
                    inode: self.inode,
                    objectid: previous.objectid,
                    item_type: previous.item_type,
                    offset: previous.offset,
                });
            }
        }

        let returned = self
            .transport
            .search(&self.key, self.items_per_query, self.buffer)?;
        self.queried = true;
        self.queries += 1;

        if returned > self.items_per_query {
            return Err(TransportError::TooManyItems {
                returned,
                requested: self.items_per_query,
            });
        }

        self.batch_len = returned;
        self.batch_pos = 0;
        self.cursor = 0;
        self.highest = None;
        Ok(returned > 0)
    }

    /// Decode the record at the cursor; `Ok(None)` ends the sequence
    fn decode_next(&mut self) -> TransportResult<Option<SearchRecord>> {
        let (header, parsed, end) = {
            let data = self.buffer.data();
            let start = self.cursor;
            let available = data.len().saturating_sub(start);

            let header = data
                .get(start..start + SEARCH_HEADER_SIZE)
                .and_then(SearchHeader::decode)
                .ok_or(TransportError::Malformed {
                    offset: start,
                    needed: SEARCH_HEADER_SIZE,
                    available,
                })?;

            let payload_start = start + SEARCH_HEADER_SIZE;
            let payload_end = payload_start
                .checked_add(header.len as usize)
                .unwrap_or(usize::MAX);
            let payload = data
                .get(payload_start..payload_end)
                .ok_or(TransportError::Malformed {
                    offset: start,
                    needed: SEARCH_HEADER_SIZE.saturating_add(header.len as usize),
                    available,
                })?;

            (header, parse_file_extent(&header, payload), payload_end)
        };

        self.cursor = end;
        self.batch_pos += 1;

        let key = header.key();
        self.highest = Some(self.highest.map_or(key, |h| h.max(key)));

        if header.objectid > self.inode {
            return Ok(None);
        }
        if key < self.key.min {
            return Ok(Some(SearchRecord::Skipped {
                key,
                reason: SkipReason::OutOfOrder,
            }));
        }

        Ok(Some(match parsed {
            Ok(item) => SearchRecord::Extent(item),
            Err(reason) => SearchRecord::Skipped { key, reason },
        }))
    }
}

impl<T: TreeSearch> Iterator for ExtentSearch<'_, T> {
    type Item = TransportResult<SearchRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if self.finished {
                return None;
            }

            if self.batch_pos < self.batch_len {
                return match self.decode_next() {
                    Ok(Some(record)) => Some(Ok(record)),
                    Ok(None) => {
                        self.finished = true;
                        None
                    }
                    Err(e) => {
                        self.finished = true;
                        Some(Err(e))
                    }
                };
            }

            match self.fetch() {
                Ok(true) => continue,
                Ok(false) => {
                    self.finished = true;
                    return None;
                }
                Err(e) => {
                    self.finished = true;
                    return Some(Err(e));
                }
            }
        }
    }
}
