//! btrfs metadata access
//!
//! Everything needed to enumerate the file extents of one inode:
//!
//! - `types`: keys, search headers and decoded extent items
//! - `buffer`: the owned ioctl argument with its 64 KiB result area
//! - `transport`: the `TreeSearch` trait and its ioctl implementation
//! - `extent`: file extent payload decoding
//! - `search`: paginated per-inode iteration over search results
//! - `memory`: an in-memory tree used by tests and benchmarks

pub mod buffer;
pub mod extent;
pub mod memory;
pub mod search;
pub mod transport;
pub mod types;

pub use buffer::{SearchBuffer, SEARCH_BUFFER_SIZE};
pub use extent::{parse_file_extent, SkipReason};
pub use memory::{MemoryEntry, MemorySource, MemoryTree};
pub use search::{ExtentSearch, SearchRecord, DEFAULT_ITEMS_PER_QUERY};
pub use transport::{IoctlTransport, TreeSearch};
pub use types::{CompressionKind, ExtentItem, ExtentKind, ItemKey, SearchHeader, SearchKey};
