//! Integration tests for btrfs-compsize
//!
//! Note: scanning real files needs a btrfs mount and CAP_SYS_ADMIN.
//! These tests drive the full scheduler over the in-memory tree, and use
//! the local filesystem only for cases that fail before any tree search.

use btrfs_compsize::btrfs::memory::{MemoryEntry, MemorySource, MemoryTree};
use btrfs_compsize::btrfs::types::{CompressionKind, ExtentItem, ExtentKind};
use btrfs_compsize::config::ScanConfig;
use btrfs_compsize::error::{CompsizeError, TargetError, TransportError};
use btrfs_compsize::walker::Scheduler;
use std::path::PathBuf;
use tempfile::tempdir;

fn regular(
    inode: u64,
    file_offset: u64,
    bytenr: u64,
    compression: CompressionKind,
    disk: u64,
    ram: u64,
) -> ExtentItem {
    ExtentItem {
        inode,
        file_offset,
        generation: 42,
        kind: ExtentKind::Regular,
        compression,
        disk_bytenr: bytenr,
        disk_num_bytes: disk,
        num_bytes: ram,
        ram_bytes: ram,
    }
}

fn inline(inode: u64, len: u64) -> ExtentItem {
    ExtentItem {
        inode,
        file_offset: 0,
        generation: 42,
        kind: ExtentKind::Inline,
        compression: CompressionKind::None,
        disk_bytenr: 0,
        disk_num_bytes: len,
        num_bytes: len,
        ram_bytes: len,
    }
}

fn config(paths: &[&str], workers: usize) -> ScanConfig {
    let mut config = ScanConfig::new(paths.iter().map(PathBuf::from).collect());
    config.worker_count = workers;
    config
}

/// Two files sharing one zstd extent (a reflink copy)
fn reflinked_pair() -> MemorySource {
    let shared = regular(257, 0, 0x10_0000, CompressionKind::Zstd, 4096, 8192);
    let mut tree = MemoryTree::new();
    tree.insert_extent(&shared, 0);
    tree.insert_extent(&ExtentItem { inode: 258, ..shared }, 0);

    let mut source = MemorySource::new(tree);
    source.add_dir("/vol");
    source.add_file("/vol/a", 257);
    source.add_file("/vol/b", 258);
    source
}

#[test]
fn test_reflinked_extent_counted_once() {
    let report = Scheduler::new(config(&["/vol/a", "/vol/b"], 2), reflinked_pair())
        .run()
        .unwrap();

    let zstd = report.stats.bucket(CompressionKind::Zstd);
    assert_eq!(zstd.exclusive_disk_bytes, 4096);
    assert_eq!(zstd.exclusive_uncompressed_bytes, 8192);
    assert_eq!(zstd.referenced_logical_bytes, 16384);
    assert_eq!(zstd.exclusive_count, 1);
    assert_eq!(zstd.referenced_count, 2);
    assert_eq!(report.unique_extents, 1);
}

#[test]
fn test_order_independence() {
    let forward = Scheduler::new(config(&["/vol/a", "/vol/b"], 1), reflinked_pair())
        .run()
        .unwrap();
    let reverse = Scheduler::new(config(&["/vol/b", "/vol/a"], 1), reflinked_pair())
        .run()
        .unwrap();
    let parallel = Scheduler::new(config(&["/vol"], 8), reflinked_pair())
        .run()
        .unwrap();

    assert_eq!(forward.stats, reverse.stats);
    assert_eq!(forward.stats.total(), parallel.stats.total());
}

#[test]
fn test_inline_file() {
    let mut tree = MemoryTree::new();
    tree.insert_extent(&inline(300, 50), 50);

    let mut source = MemorySource::new(tree);
    source.add_file("/vol/small", 300);

    let report = Scheduler::new(config(&["/vol/small"], 1), source).run().unwrap();
    let total = report.stats.total();

    assert_eq!(total.inline_count, 1);
    assert_eq!(total.referenced_logical_bytes, 50);
    assert_eq!(total.exclusive_uncompressed_bytes, 50);
    assert_eq!(total.exclusive_disk_bytes, 0);
    assert_eq!(report.unique_extents, 0);
}

#[test]
fn test_directory_recursion_and_filters() {
    let mut tree = MemoryTree::new();
    tree.insert_extent(&regular(400, 0, 0x20_0000, CompressionKind::None, 8192, 8192), 0);
    tree.insert_extent(&regular(401, 0, 0x30_0000, CompressionKind::Zlib, 4096, 16384), 0);
    tree.insert_extent(&regular(402, 0, 0x40_0000, CompressionKind::Lzo, 4096, 16384), 0);
    tree.insert_extent(&regular(403, 0, 0x50_0000, CompressionKind::None, 4096, 4096), 0);

    let mut source = MemorySource::new(tree);
    source.add_on_device("/vol", MemoryEntry::Directory { children: Vec::new() }, 1);
    source.add_on_device("/vol/plain", MemoryEntry::File { inode: 400 }, 1);
    source.add_on_device("/vol/sub", MemoryEntry::Directory { children: Vec::new() }, 1);
    source.add_on_device("/vol/sub/packed", MemoryEntry::File { inode: 401 }, 1);
    source.add_on_device("/vol/sub/link", MemoryEntry::Symlink, 1);
    source.add_on_device("/vol/sub/fifo", MemoryEntry::Special, 1);
    source.add_on_device("/vol/.snapshots", MemoryEntry::Directory { children: Vec::new() }, 1);
    source.add_on_device("/vol/.snapshots/old", MemoryEntry::File { inode: 402 }, 1);
    source.add_on_device("/vol/mnt", MemoryEntry::Directory { children: Vec::new() }, 2);
    source.add_on_device("/vol/mnt/other", MemoryEntry::File { inode: 403 }, 2);

    let mut config = config(&["/vol"], 3);
    config.one_file_system = true;
    config.exclude_patterns = vec![regex::Regex::new(r"/\.snapshots").unwrap()];

    let report = Scheduler::new(config, source).run().unwrap();

    assert!(!report.has_failures());
    assert_eq!(report.stats.counters.files, 2);
    // /vol and /vol/sub
    assert_eq!(report.stats.counters.directories, 2);
    assert_eq!(report.stats.bucket(CompressionKind::Lzo).referenced_count, 0);
    assert_eq!(report.stats.bucket(CompressionKind::Zlib).exclusive_disk_bytes, 4096);
    assert_eq!(report.stats.bucket(CompressionKind::None).exclusive_disk_bytes, 8192);
}

#[test]
fn test_holes_and_prealloc() {
    let mut tree = MemoryTree::new();
    tree.insert_extent(&regular(500, 0, 0x60_0000, CompressionKind::None, 4096, 4096), 0);
    tree.insert_extent(&regular(500, 4096, 0, CompressionKind::None, 0, 1 << 20), 0);
    let prealloc = ExtentItem {
        kind: ExtentKind::Prealloc,
        file_offset: 4096 + (1 << 20),
        disk_bytenr: 0x70_0000,
        ..regular(500, 0, 0, CompressionKind::None, 65536, 65536)
    };
    tree.insert_extent(&prealloc, 0);

    let mut source = MemorySource::new(tree);
    source.add_file("/vol/sparse", 500);

    let report = Scheduler::new(config(&["/vol/sparse"], 1), source).run().unwrap();
    let none = report.stats.bucket(CompressionKind::None);

    assert_eq!(report.stats.counters.holes, 1);
    assert_eq!(report.stats.counters.prealloc_extents, 1);
    // The hole owns no disk extent and is never claimed
    assert_eq!(report.unique_extents, 2);
    assert_eq!(none.referenced_count, 2);
    assert_eq!(none.exclusive_disk_bytes, 4096 + 65536);
}

#[test]
fn test_many_extents_across_queries() {
    let mut tree = MemoryTree::new();
    for i in 0..1000u64 {
        tree.insert_extent(
            &regular(600, i * 131072, 0x100_0000 + i * 4096, CompressionKind::Zstd, 4096, 131072),
            0,
        );
    }
    let mut source = MemorySource::new(tree);
    source.add_file("/vol/big", 600);

    let mut config = config(&["/vol/big"], 1);
    config.items_per_query = 64;

    let report = Scheduler::new(config, source).run().unwrap();
    let zstd = report.stats.bucket(CompressionKind::Zstd);

    assert_eq!(zstd.exclusive_count, 1000);
    assert_eq!(zstd.referenced_count, 1000);
    assert!(report.stats.counters.queries >= 16);
}

#[test]
fn test_missing_path_is_partial_failure() {
    let report = Scheduler::new(config(&["/vol/missing", "/vol/a"], 2), reflinked_pair())
        .run()
        .unwrap();

    assert!(report.completed);
    assert_eq!(
        report.failures,
        vec![TargetError::NotFound {
            path: PathBuf::from("/vol/missing")
        }]
    );
    assert_eq!(report.stats.counters.files, 1);
    assert_eq!(report.stats.bucket(CompressionKind::Zstd).exclusive_disk_bytes, 4096);
}

#[test]
fn test_per_target_errors_are_collected() {
    let mut source = reflinked_pair();
    source.add("/vol/locked", MemoryEntry::Denied);
    source.add("/vol/ext4", MemoryEntry::Foreign);
    source.add("/dev-null", MemoryEntry::Special);

    let report = Scheduler::new(config(&["/vol", "/dev-null"], 4), source)
        .run()
        .unwrap();

    assert!(report.completed);
    assert_eq!(report.failures.len(), 3);
    assert!(report
        .failures
        .iter()
        .any(|f| matches!(f, TargetError::NotFileOrDirectory { .. })));
    assert!(report
        .failures
        .iter()
        .any(|f| matches!(f, TargetError::NotBtrfs { .. })));
    assert!(report
        .failures
        .iter()
        .any(|f| matches!(f, TargetError::PermissionDenied { .. })));
    assert_eq!(report.stats.counters.files, 2);
}

#[test]
fn test_transport_failure_aborts_run() {
    let mut source = reflinked_pair();
    source.tree_mut().fail_inode(258);

    let err = Scheduler::new(config(&["/vol"], 2), source).run().unwrap_err();
    assert!(matches!(
        err,
        CompsizeError::Transport(TransportError::Ioctl { inode: 258, .. })
    ));
}

#[test]
fn test_malformed_response_aborts_run() {
    let mut source = reflinked_pair();
    source.tree_mut().corrupt_lengths();

    let err = Scheduler::new(config(&["/vol/a"], 1), source).run().unwrap_err();
    assert!(matches!(
        err,
        CompsizeError::Transport(TransportError::Malformed { .. })
    ));
}

#[test]
fn test_real_filesystem_targets_fail_cleanly() {
    let dir = tempdir().unwrap();
    let missing = dir.path().join("missing");
    let file = dir.path().join("data.bin");
    std::fs::write(&file, b"hello").unwrap();

    let mut config = ScanConfig::new(vec![missing.clone(), file.clone()]);
    config.worker_count = 2;

    // Either the temp dir is not on btrfs (NotBtrfs) or it is and the
    // ioctl needs privileges this test may not have.
    match Scheduler::for_filesystem(config).run() {
        Ok(report) => {
            assert!(report.completed);
            assert!(report
                .failures
                .contains(&TargetError::NotFound { path: missing }));

            let not_btrfs = TargetError::NotBtrfs { path: file };
            if report.failures.contains(&not_btrfs) {
                assert_eq!(report.failures.len(), 2);
                assert_eq!(report.stats.counters.files, 0);
                assert!(report.stats.total().is_empty());
            }
            if report.failures.len() == 1 {
                // btrfs, and the tree search was permitted
                assert_eq!(report.stats.counters.files, 1);
                assert!(report.stats.counters.queries >= 1);
            }
        }
        Err(CompsizeError::Transport(e)) => assert!(e.is_privilege_error()),
        Err(e) => panic!("unexpected error: {}", e),
    }
}
