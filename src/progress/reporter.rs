//! Progress reporter implementation
//!
//! Uses an indicatif spinner on stderr, so that a pipe writing to stdout
//! is never interleaved with progress output. Byte counts come from a
//! pump's [`PumpStats`].

use crate::progress::PumpStats;
use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use std::time::Duration;

/// Progress spinner for one or more pumps
pub struct ProgressReporter {
    /// Spinner showing bytes moved and rate
    bar: ProgressBar,
    /// Is progress enabled
    enabled: bool,
}

impl ProgressReporter {
    /// Create a new progress reporter labelled `label`
    pub fn new(label: &str) -> Self {
        let bar = ProgressBar::with_draw_target(None, ProgressDrawTarget::stderr());
        bar.set_style(
            ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold.dim} {bytes} ({bytes_per_sec}) {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner()),
        );
        bar.set_prefix(label.to_string());
        bar.enable_steady_tick(Duration::from_millis(100));

        Self { bar, enabled: true }
    }

    /// Create a disabled progress reporter (for quiet mode)
    pub fn disabled() -> Self {
        Self {
            bar: ProgressBar::hidden(),
            enabled: false,
        }
    }

    /// Refresh the display from a pump's counters
    pub fn observe(&self, stats: &PumpStats) {
        self.bar.set_position(stats.bytes_copied());
    }

    /// Set current status message
    pub fn set_status(&self, msg: &str) {
        self.bar.set_message(msg.to_string());
    }

    /// Finish progress with success message
    pub fn finish_success(&self, message: &str) {
        self.bar.finish_with_message(format!("✓ {}", message));
    }

    /// Finish progress with error message
    pub fn finish_error(&self, message: &str) {
        self.bar.abandon_with_message(format!("✗ {}", message));
    }

    /// Check if progress is enabled
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }
}

/// Point-in-time view of a pump's counters
#[derive(Debug, Clone)]
pub struct ProgressSummary {
    /// Bytes written to the sink
    pub bytes_copied: u64,
    /// Read/write pairs completed
    pub chunks_copied: u64,
    /// Elapsed time
    pub elapsed: Duration,
    /// Throughput in bytes/second
    pub throughput: f64,
}

impl ProgressSummary {
    /// Capture the current counters
    pub fn from_stats(stats: &PumpStats) -> Self {
        Self {
            bytes_copied: stats.bytes_copied(),
            chunks_copied: stats.chunks_copied(),
            elapsed: stats.elapsed(),
            throughput: stats.throughput(),
        }
    }

    /// Average chunk size in bytes
    pub fn average_chunk(&self) -> u64 {
        if self.chunks_copied == 0 {
            0
        } else {
            self.bytes_copied / self.chunks_copied
        }
    }

    /// Print summary to stderr
    pub fn print(&self) {
        eprintln!("Bytes:    {}", humansize::format_size(self.bytes_copied, humansize::BINARY));
        eprintln!("Chunks:   {} (avg {})", self.chunks_copied,
            humansize::format_size(self.average_chunk(), humansize::BINARY)
        );
        eprintln!("Elapsed:  {:.1?}", self.elapsed);
        eprintln!("Speed:    {}/s", humansize::format_size(self.throughput as u64, humansize::BINARY));
    }
}
