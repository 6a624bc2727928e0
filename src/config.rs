//! Configuration types for btrfs-compsize
//!
//! This module defines:
//! - CLI argument parsing using clap derive macros
//! - Runtime configuration with validation
//! - Worker pool sizing

use crate::btrfs::search::DEFAULT_ITEMS_PER_QUERY;
use crate::error::ConfigError;
use clap::Parser;
use regex::Regex;
use std::path::{Path, PathBuf};

/// Maximum reasonable worker count
const MAX_WORKERS: usize = 512;

/// Upper bound for items requested per tree-search query
const MAX_ITEMS_PER_QUERY: u32 = 65_536;

/// Up to this many CPUs, one worker per CPU
const SMALL_MACHINE_CPUS: usize = 6;

/// Pool size cap on large machines
const MAX_DEFAULT_WORKERS: usize = 24;

/// Report compression ratio and disk usage of files on btrfs
#[derive(Parser, Debug, Clone)]
#[command(
    name = "btrfs-compsize",
    version,
    about = "Report compression ratio and true disk usage of files on btrfs",
    long_about = "Walks the given files and directories, enumerates their data extents \
                  with the btrfs tree-search ioctl, and reports disk usage, uncompressed \
                  size and referenced size per compression type.\n\n\
                  Extents shared between files (reflinks, snapshots) are counted once \
                  toward disk usage. Requires CAP_SYS_ADMIN.",
    after_help = "EXAMPLES:\n    \
        btrfs-compsize /mnt/data\n    \
        btrfs-compsize -x -b /home /srv\n    \
        btrfs-compsize --exclude '/\\.snapshots/' --json /mnt/pool\n    \
        COMPSIZE_WORKERS=4 btrfs-compsize -p /var/lib/images"
)]
pub struct CliArgs {
    /// Files or directories to scan
    #[arg(value_name = "PATH", required = true)]
    pub paths: Vec<PathBuf>,

    /// Number of worker threads (default depends on CPU count)
    #[arg(short = 'j', long, env = "COMPSIZE_WORKERS", value_name = "NUM")]
    pub workers: Option<usize>,

    /// Show raw byte counts instead of human-readable sizes
    #[arg(short = 'b', long)]
    pub bytes: bool,

    /// Don't cross filesystem boundaries
    #[arg(short = 'x', long)]
    pub one_file_system: bool,

    /// Skip paths matching this regex (can be repeated)
    #[arg(long = "exclude", value_name = "REGEX", action = clap::ArgAction::Append)]
    pub exclude_patterns: Vec<String>,

    /// Print the report as JSON
    #[arg(long)]
    pub json: bool,

    /// Show a progress spinner on stderr
    #[arg(short = 'p', long)]
    pub progress: bool,

    /// Verbose output (debug logging)
    #[arg(short = 'v', long)]
    pub verbose: bool,

    /// Items requested per tree-search query
    #[arg(long, default_value_t = DEFAULT_ITEMS_PER_QUERY, value_name = "NUM")]
    pub items_per_query: u32,
}

/// Pick the worker pool size
///
/// An explicit override wins. Otherwise small machines get one worker per
/// CPU and mid-size machines half their CPUs. Extent lookups serialize on
/// the filesystem's tree locks, so large machines are capped.
pub fn resolve_worker_count(requested: Option<usize>, cpus: usize) -> usize {
    if let Some(count) = requested {
        return count;
    }
    let cpus = cpus.max(1);
    if cpus <= SMALL_MACHINE_CPUS {
        cpus
    } else if cpus < MAX_DEFAULT_WORKERS {
        cpus / 2
    } else {
        MAX_DEFAULT_WORKERS
    }
}

/// Validated runtime configuration
#[derive(Debug, Clone)]
pub struct ScanConfig {
    /// Input paths, scanned in order of discovery
    pub paths: Vec<PathBuf>,

    /// Number of worker threads
    pub worker_count: usize,

    /// Print byte counts instead of human-readable sizes
    pub raw_bytes: bool,

    /// Stay on the device of each input path
    pub one_file_system: bool,

    /// Compiled exclude patterns
    pub exclude_patterns: Vec<Regex>,

    /// Emit the report as JSON
    pub json: bool,

    /// Show progress indicator
    pub show_progress: bool,

    /// Verbose logging
    pub verbose: bool,

    /// Items requested per tree-search query
    pub items_per_query: u32,
}

impl ScanConfig {
    /// Configuration with defaults for the given paths
    pub fn new(paths: Vec<PathBuf>) -> Self {
        Self {
            paths,
            worker_count: resolve_worker_count(None, num_cpus::get()),
            raw_bytes: false,
            one_file_system: false,
            exclude_patterns: Vec::new(),
            json: false,
            show_progress: false,
            verbose: false,
            items_per_query: DEFAULT_ITEMS_PER_QUERY,
        }
    }

    /// Create and validate configuration from CLI arguments
    pub fn from_args(args: CliArgs) -> Result<Self, ConfigError> {
        if args.paths.is_empty() {
            return Err(ConfigError::NoPaths);
        }

        let worker_count = resolve_worker_count(args.workers, num_cpus::get());
        if worker_count == 0 || worker_count > MAX_WORKERS {
            return Err(ConfigError::InvalidWorkerCount {
                count: worker_count,
                max: MAX_WORKERS,
            });
        }

        if args.items_per_query == 0 || args.items_per_query > MAX_ITEMS_PER_QUERY {
            return Err(ConfigError::InvalidItemsPerQuery {
                count: args.items_per_query,
                max: MAX_ITEMS_PER_QUERY,
            });
        }

        let exclude_patterns = args
            .exclude_patterns
            .iter()
            .map(|p| {
                Regex::new(p).map_err(|e| ConfigError::InvalidExcludePattern {
                    pattern: p.clone(),
                    reason: e.to_string(),
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            paths: args.paths,
            worker_count,
            raw_bytes: args.bytes,
            one_file_system: args.one_file_system,
            exclude_patterns,
            json: args.json,
            show_progress: args.progress && !args.json,
            verbose: args.verbose,
            items_per_query: args.items_per_query,
        })
    }

    /// Check if a path should be excluded
    pub fn is_excluded(&self, path: &Path) -> bool {
        if self.exclude_patterns.is_empty() {
            return false;
        }
        let path = path.to_string_lossy();
        self.exclude_patterns.iter().any(|re| re.is_match(&path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> CliArgs {
        CliArgs::try_parse_from(std::iter::once("btrfs-compsize").chain(args.iter().copied()))
            .unwrap()
    }

    #[test]
    fn test_worker_policy() {
        assert_eq!(resolve_worker_count(None, 1), 1);
        assert_eq!(resolve_worker_count(None, 4), 4);
        assert_eq!(resolve_worker_count(None, 6), 6);
        assert_eq!(resolve_worker_count(None, 8), 4);
        assert_eq!(resolve_worker_count(None, 10), 5);
        assert_eq!(resolve_worker_count(None, 23), 11);
        assert_eq!(resolve_worker_count(None, 24), 24);
        assert_eq!(resolve_worker_count(None, 30), 24);
        assert_eq!(resolve_worker_count(None, 64), 24);
        assert_eq!(resolve_worker_count(None, 0), 1);
    }

    #[test]
    fn test_worker_override() {
        assert_eq!(resolve_worker_count(Some(2), 64), 2);
        assert_eq!(resolve_worker_count(Some(100), 4), 100);
    }

    #[test]
    fn test_from_args() {
        let config = ScanConfig::from_args(parse(&[
            "-j",
            "3",
            "-b",
            "-x",
            "--exclude",
            r"\.snapshots",
            "/mnt/a",
            "/mnt/b",
        ]))
        .unwrap();

        assert_eq!(config.worker_count, 3);
        assert!(config.raw_bytes);
        assert!(config.one_file_system);
        assert_eq!(config.paths.len(), 2);
        assert_eq!(config.items_per_query, DEFAULT_ITEMS_PER_QUERY);
    }

    #[test]
    fn test_invalid_worker_count() {
        let err = ScanConfig::from_args(parse(&["-j", "0", "/mnt"])).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidWorkerCount { count: 0, .. }));
    }

    #[test]
    fn test_invalid_items_per_query() {
        let err = ScanConfig::from_args(parse(&["-j", "1", "--items-per-query", "0", "/mnt"]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidItemsPerQuery { count: 0, .. }));
    }

    #[test]
    fn test_invalid_exclude_pattern() {
        let err = ScanConfig::from_args(parse(&["-j", "1", "--exclude", "(", "/mnt"])).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidExcludePattern { .. }));
    }

    #[test]
    fn test_paths_required() {
        assert!(CliArgs::try_parse_from(["btrfs-compsize"]).is_err());
    }

    #[test]
    fn test_json_disables_progress() {
        let config = ScanConfig::from_args(parse(&["-j", "1", "-p", "--json", "/mnt"])).unwrap();
        assert!(!config.show_progress);
        assert!(config.json);
    }

    #[test]
    fn test_exclude_pattern() {
        let mut config = ScanConfig::new(vec![PathBuf::from("/data")]);
        config.exclude_patterns = vec![Regex::new(r"/\.snapshots/").unwrap()];

        assert!(config.is_excluded(Path::new("/data/.snapshots/1/snapshot")));
        assert!(!config.is_excluded(Path::new("/data/myfile.txt")));
    }
}
