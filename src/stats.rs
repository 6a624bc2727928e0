//! Compression statistics
//!
//! Each worker accumulates a private [`GlobalStats`] and merges it into the
//! run-wide accumulator once when it finishes. Merging is plain field-wise
//! addition, so the final totals do not depend on which worker saw which
//! file or in what order.

use crate::btrfs::types::{CompressionKind, ExtentItem, ExtentKind};
use serde::Serialize;
use std::ops::AddAssign;

/// Totals for one compression kind
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CompressionBucket {
    /// Extent references observed, shared or not
    pub referenced_count: u64,

    /// On-disk bytes summed over every reference
    pub referenced_disk_bytes: u64,

    /// Logical bytes the files reference
    pub referenced_logical_bytes: u64,

    /// Distinct physical extents
    pub exclusive_count: u64,

    /// On-disk bytes of distinct physical extents
    pub exclusive_disk_bytes: u64,

    /// Uncompressed bytes of distinct physical extents plus inline data
    pub exclusive_uncompressed_bytes: u64,

    pub inline_count: u64,
}

impl CompressionBucket {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// Disk usage relative to uncompressed size, in percent
    ///
    /// `None` when nothing uncompressed was recorded.
    pub fn ratio_percent(&self) -> Option<f64> {
        if self.exclusive_uncompressed_bytes == 0 {
            return None;
        }
        Some(self.exclusive_disk_bytes as f64 * 100.0 / self.exclusive_uncompressed_bytes as f64)
    }
}

impl AddAssign<&CompressionBucket> for CompressionBucket {
    fn add_assign(&mut self, rhs: &CompressionBucket) {
        self.referenced_count += rhs.referenced_count;
        self.referenced_disk_bytes += rhs.referenced_disk_bytes;
        self.referenced_logical_bytes += rhs.referenced_logical_bytes;
        self.exclusive_count += rhs.exclusive_count;
        self.exclusive_disk_bytes += rhs.exclusive_disk_bytes;
        self.exclusive_uncompressed_bytes += rhs.exclusive_uncompressed_bytes;
        self.inline_count += rhs.inline_count;
    }
}

/// Counters that are not tied to a compression kind
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ScanCounters {
    /// Regular files scanned
    pub files: u64,

    /// Directories expanded
    pub directories: u64,

    /// Regular and prealloc extent references
    pub regular_refs: u64,

    pub inline_extents: u64,

    pub prealloc_extents: u64,

    /// Sparse regions without storage
    pub holes: u64,

    /// Records stepped over while decoding
    pub skipped_items: u64,

    /// Tree-search queries issued
    pub queries: u64,
}

impl AddAssign<&ScanCounters> for ScanCounters {
    fn add_assign(&mut self, rhs: &ScanCounters) {
        self.files += rhs.files;
        self.directories += rhs.directories;
        self.regular_refs += rhs.regular_refs;
        self.inline_extents += rhs.inline_extents;
        self.prealloc_extents += rhs.prealloc_extents;
        self.holes += rhs.holes;
        self.skipped_items += rhs.skipped_items;
        self.queries += rhs.queries;
    }
}

/// Per-kind buckets plus run counters
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GlobalStats {
    buckets: [CompressionBucket; CompressionKind::COUNT],
    pub counters: ScanCounters,
}

impl GlobalStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one extent
    ///
    /// `claimed` is the dedup tracker's verdict for the extent's physical
    /// address; it is ignored for inline extents and holes.
    pub fn observe(&mut self, item: &ExtentItem, claimed: bool) {
        if item.is_hole() {
            self.counters.holes += 1;
            return;
        }

        let bucket = &mut self.buckets[item.compression.index()];
        match item.kind {
            ExtentKind::Inline => {
                bucket.referenced_logical_bytes += item.ram_bytes;
                bucket.exclusive_uncompressed_bytes += item.ram_bytes;
                bucket.inline_count += 1;
                self.counters.inline_extents += 1;
            }
            ExtentKind::Regular | ExtentKind::Prealloc => {
                bucket.referenced_count += 1;
                bucket.referenced_disk_bytes += item.disk_num_bytes;
                bucket.referenced_logical_bytes += item.num_bytes;
                if claimed {
                    bucket.exclusive_count += 1;
                    bucket.exclusive_disk_bytes += item.disk_num_bytes;
                    bucket.exclusive_uncompressed_bytes += item.ram_bytes;
                }
                self.counters.regular_refs += 1;
                if item.kind == ExtentKind::Prealloc {
                    self.counters.prealloc_extents += 1;
                }
            }
        }
    }

    /// Fold another accumulator into this one
    pub fn merge(&mut self, other: &GlobalStats) {
        *self += other;
    }

    pub fn bucket(&self, kind: CompressionKind) -> &CompressionBucket {
        &self.buckets[kind.index()]
    }

    /// Sum of every bucket
    pub fn total(&self) -> CompressionBucket {
        self.buckets
            .iter()
            .fold(CompressionBucket::default(), |mut acc, b| {
                acc += b;
                acc
            })
    }

    /// Non-empty buckets in report order
    pub fn iter(&self) -> impl Iterator<Item = (CompressionKind, &CompressionBucket)> {
        CompressionKind::ALL
            .into_iter()
            .map(move |kind| (kind, &self.buckets[kind.index()]))
            .filter(|(_, bucket)| !bucket.is_empty())
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.iter().all(CompressionBucket::is_empty)
            && self.counters == ScanCounters::default()
    }
}

impl AddAssign<&GlobalStats> for GlobalStats {
    fn add_assign(&mut self, rhs: &GlobalStats) {
        for (mine, theirs) in self.buckets.iter_mut().zip(rhs.buckets.iter()) {
            *mine += theirs;
        }
        self.counters += &rhs.counters;
    }
}

impl Serialize for GlobalStats {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        use serde::ser::SerializeStruct;

        let buckets: std::collections::BTreeMap<&str, &CompressionBucket> =
            self.iter().map(|(kind, bucket)| (kind.name(), bucket)).collect();

        let mut state = serializer.serialize_struct("GlobalStats", 3)?;
        state.serialize_field("total", &self.total())?;
        state.serialize_field("by_compression", &buckets)?;
        state.serialize_field("counters", &self.counters)?;
        state.end()
    }
}
