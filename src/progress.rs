//! Progress and report output
//!
//! Provides the live spinner shown during a scan and the final report in
//! table or JSON form.

use crate::error::TargetError;
use crate::stats::{CompressionBucket, GlobalStats};
use crate::walker::{ProgressSnapshot, ScanReport};
use console::style;
use humansize::{format_size, BINARY};
use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use std::fmt::Write as _;
use std::path::PathBuf;
use std::time::Duration;

/// Spinner that displays scan status on stderr
pub struct ProgressReporter {
    bar: ProgressBar,
}

impl ProgressReporter {
    pub fn new() -> Self {
        let bar = ProgressBar::with_draw_target(None, ProgressDrawTarget::stderr());

        if let Ok(spinner) = ProgressStyle::default_spinner()
            .template("{spinner:.green} [{elapsed_precise}] {msg}")
        {
            bar.set_style(spinner.tick_chars("⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏"));
        }
        bar.enable_steady_tick(Duration::from_millis(100));

        Self { bar }
    }

    /// Update the progress display
    pub fn update(&self, progress: &ProgressSnapshot) {
        let mut msg = format!(
            "Files: {} | Dirs: {} | Extents: {} | Rate: {:.0}/s",
            format_number(progress.files),
            format_number(progress.directories),
            format_number(progress.extents),
            progress.files_per_second(),
        );
        if progress.failures > 0 {
            let _ = write!(msg, " | Errors: {}", format_number(progress.failures));
        }
        self.bar.set_message(msg);
    }

    /// Finish and clear the progress display
    pub fn finish_and_clear(&self) {
        self.bar.finish_and_clear();
    }
}

impl Default for ProgressReporter {
    fn default() -> Self {
        Self::new()
    }
}

/// Format a number with thousands separators
pub fn format_number(n: u64) -> String {
    let digits = n.to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(c);
    }
    out
}

fn format_bytes(bytes: u64, raw: bool) -> String {
    if raw {
        bytes.to_string()
    } else {
        format_size(bytes, BINARY)
    }
}

fn format_percent(bucket: &CompressionBucket) -> String {
    match bucket.ratio_percent() {
        Some(p) => format!("{:.0}%", p),
        None => "-".into(),
    }
}

/// Render the statistics table
pub fn render_table(stats: &GlobalStats, raw_bytes: bool) -> String {
    let total = stats.total();
    let mut out = String::new();

    let _ = writeln!(
        out,
        "Processed {} files, {} regular extents ({} refs), {} inline.",
        stats.counters.files, total.exclusive_count, total.referenced_count, total.inline_count
    );
    if total.is_empty() {
        return out;
    }

    let _ = writeln!(
        out,
        "{:<10} {:<8} {:<12} {:<12} {:<12}",
        "Type", "Perc", "Disk Usage", "Uncompressed", "Referenced"
    );

    let mut row = |name: &str, bucket: &CompressionBucket| {
        let _ = writeln!(
            out,
            "{:<10} {:<8} {:<12} {:<12} {:<12}",
            name,
            format_percent(bucket),
            format_bytes(bucket.exclusive_disk_bytes, raw_bytes),
            format_bytes(bucket.exclusive_uncompressed_bytes, raw_bytes),
            format_bytes(bucket.referenced_logical_bytes, raw_bytes),
        );
    };

    row("TOTAL", &total);
    for (kind, bucket) in stats.iter() {
        row(kind.name(), bucket);
    }
    out
}

/// Print the statistics table to stdout
pub fn print_report(report: &ScanReport, raw_bytes: bool) {
    print!("{}", render_table(&report.stats, raw_bytes));
}

/// Render the report as pretty-printed JSON
pub fn render_json(report: &ScanReport) -> serde_json::Result<String> {
    serde_json::to_string_pretty(report)
}

/// List failed targets on stderr
pub fn print_failures(failures: &[TargetError]) {
    eprintln!();
    eprintln!(
        "{} {} path(s) could not be scanned:",
        style("Warning:").yellow().bold(),
        failures.len()
    );
    for failure in failures {
        eprintln!("  {}", style(failure).dim());
    }
}

/// Print a header at the start of the scan
pub fn print_header(paths: &[PathBuf], workers: usize) {
    eprintln!(
        "{} {}",
        style("btrfs-compsize").cyan().bold(),
        env!("CARGO_PKG_VERSION")
    );
    eprintln!("{}", style("─".repeat(50)).dim());
    for path in paths {
        eprintln!("  {} {}", style("Path:").bold(), path.display());
    }
    eprintln!("  {} {}", style("Workers:").bold(), workers);
    eprintln!();
}
