//! btrfs-compsize - compression and disk usage report for btrfs
//!
//! Entry point for the CLI application.

use anyhow::{Context, Result};
use btrfs_compsize::config::{CliArgs, ScanConfig};
use btrfs_compsize::error::CompsizeError;
use btrfs_compsize::progress::{
    print_failures, print_header, print_report, render_json, ProgressReporter,
};
use btrfs_compsize::walker::Scheduler;
use clap::Parser;
use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

/// Some targets could not be scanned
const EXIT_PARTIAL: u8 = 2;

/// Stopped by SIGINT
const EXIT_INTERRUPTED: u8 = 130;

fn main() -> ExitCode {
    match run() {
        Ok(code) => code,
        Err(e) => {
            error!("{:#}", e);
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

fn run() -> Result<ExitCode> {
    let args = CliArgs::parse();

    setup_logging(args.verbose)?;

    let config = ScanConfig::from_args(args).context("Invalid configuration")?;
    let raw_bytes = config.raw_bytes;
    let json = config.json;
    let show_progress = config.show_progress;

    if show_progress {
        print_header(&config.paths, config.worker_count);
    }

    let scheduler = Scheduler::for_filesystem(config);

    // Setup signal handler for graceful shutdown
    let shutdown_flag = scheduler.shutdown_flag();
    ctrlc::set_handler(move || {
        eprintln!("\nInterrupt received, shutting down...");
        shutdown_flag.store(true, Ordering::SeqCst);
    })
    .context("Failed to set signal handler")?;

    // Spinner runs on its own thread while the workers scan
    let done = Arc::new(AtomicBool::new(false));
    let spinner = if show_progress {
        let progress = scheduler.progress();
        let done = Arc::clone(&done);
        Some(thread::spawn(move || {
            let reporter = ProgressReporter::new();
            while !done.load(Ordering::Relaxed) {
                reporter.update(&progress.snapshot());
                thread::sleep(Duration::from_millis(100));
            }
            reporter.finish_and_clear();
        }))
    } else {
        None
    };

    let result = scheduler.run();

    done.store(true, Ordering::Relaxed);
    if let Some(handle) = spinner {
        if handle.join().is_err() {
            warn!("Progress display thread panicked");
        }
    }

    let report = match result {
        Ok(report) => report,
        Err(CompsizeError::Transport(e)) if e.is_privilege_error() => {
            return Err(e).context("Tree search requires CAP_SYS_ADMIN; run as root");
        }
        Err(e) => return Err(e).context("Scan failed"),
    };

    if !report.completed {
        info!("Scan was interrupted before completion");
        eprintln!("Scan interrupted; totals are incomplete and not reported");
        return Ok(ExitCode::from(EXIT_INTERRUPTED));
    }

    if json {
        println!("{}", render_json(&report).context("Failed to serialize report")?);
    } else {
        print_report(&report, raw_bytes);
    }

    if report.has_failures() {
        print_failures(&report.failures);
        info!(failures = report.failures.len(), "Scan completed with errors");
        return Ok(ExitCode::from(EXIT_PARTIAL));
    }

    Ok(ExitCode::SUCCESS)
}

fn setup_logging(verbose: bool) -> Result<()> {
    let default_filter = if verbose {
        "btrfs_compsize=debug,warn"
    } else {
        "btrfs_compsize=info,warn"
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .try_init()
        .map_err(|e| anyhow::anyhow!("{}", e))
        .context("Failed to initialize logging")?;

    Ok(())
}
