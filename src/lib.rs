//! btrfs-compsize - compression and disk usage report for btrfs
//!
//! Summing file sizes says little about what a btrfs volume actually
//! stores: extents may be compressed, and one physical extent may be
//! shared by many files through reflinks and snapshots. This crate walks
//! a set of paths, enumerates every file's data extents through the
//! kernel's tree-search ioctl, and reports per compression type:
//!
//! - **Disk Usage**: on-disk bytes, each physical extent counted once
//! - **Uncompressed**: the same extents before compression
//! - **Referenced**: logical bytes the files point at, shared data
//!   counted every time it is referenced
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                         Scheduler                               │
//! │   target queue (crossbeam) ─ DedupTracker ─ Mutex<GlobalStats>  │
//! └─────────────────────────────┬───────────────────────────────────┘
//!                               │
//!        ┌──────────────────────┼──────────────────────┐
//!        ▼                      ▼                      ▼
//!   ┌─────────┐            ┌─────────┐            ┌─────────┐
//!   │Worker 1 │            │Worker 2 │    ...     │Worker N │
//!   └────┬────┘            └────┬────┘            └────┬────┘
//!        │ ExtentSearch (pagination, cursor)           │
//!        ▼                                             ▼
//!   TreeSearch ── BTRFS_IOC_TREE_SEARCH_V2 ──► 64 KiB SearchBuffer
//!        │
//!        ▼
//!   parse_file_extent ─► try_claim(disk_bytenr) ─► local GlobalStats
//! ```
//!
//! # Example
//!
//! ```bash
//! # Whole volume, human-readable sizes
//! btrfs-compsize /mnt/pool
//!
//! # Stay on one filesystem, raw byte counts, JSON output
//! btrfs-compsize -x -b --json /home
//! ```

pub mod btrfs;
pub mod config;
pub mod dedup;
pub mod error;
pub mod progress;
pub mod source;
pub mod stats;
pub mod walker;

pub use config::{CliArgs, ScanConfig};
pub use dedup::DedupTracker;
pub use error::{CompsizeError, Result};
pub use source::{ExtentSource, FsSource};
pub use stats::{CompressionBucket, GlobalStats, ScanCounters};
pub use walker::{ScanReport, Scheduler};
