//! Run-wide physical extent deduplication
//!
//! A physical extent shared by several files (reflinks, snapshots) must
//! count toward exclusive disk usage once. Workers call
//! [`DedupTracker::try_claim`] with the extent's disk address; exactly one
//! caller per address ever gets `true`.
//!
//! The set is split into shards, each behind its own lock, so workers
//! claiming unrelated extents rarely contend.

use parking_lot::Mutex;
use std::collections::HashSet;

/// Number of shards; a power of two so the shard index is a mask
const SHARD_COUNT: usize = 64;

/// Concurrent set of claimed physical extent addresses
pub struct DedupTracker {
    shards: Box<[Mutex<HashSet<u64>>]>,
}

impl DedupTracker {
    pub fn new() -> Self {
        let shards = (0..SHARD_COUNT)
            .map(|_| Mutex::new(HashSet::new()))
            .collect::<Vec<_>>()
            .into_boxed_slice();
        Self { shards }
    }

    /// Claim an address for exclusive accounting
    ///
    /// Returns `true` only for the first call with a given nonzero
    /// address. Address 0 means "no physical extent" and is never stored.
    pub fn try_claim(&self, addr: u64) -> bool {
        if addr == 0 {
            return false;
        }
        self.shard(addr).lock().insert(addr)
    }

    /// Number of claimed addresses
    pub fn len(&self) -> usize {
        self.shards.iter().map(|s| s.lock().len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.shards.iter().all(|s| s.lock().is_empty())
    }

    fn shard(&self, addr: u64) -> &Mutex<HashSet<u64>> {
        // Extent addresses are sector aligned, so the low bits carry no
        // information. Mix before masking.
        let mixed = addr.wrapping_mul(0x9E37_79B9_7F4A_7C15) >> 58;
        &self.shards[mixed as usize & (SHARD_COUNT - 1)]
    }
}

impl Default for DedupTracker {
    fn default() -> Self {
        Self::new()
    }
}
