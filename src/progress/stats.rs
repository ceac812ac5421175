//! Transfer counters shared between a pump worker and its observers

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Pump statistics, updated by the worker after every completed write
#[derive(Debug)]
pub struct PumpStats {
    /// Bytes written to the sink
    bytes_copied: AtomicU64,
    /// Read/write pairs completed
    chunks_copied: AtomicU64,
    /// When the pump was created
    created: Instant,
}

impl Default for PumpStats {
    fn default() -> Self {
        Self {
            bytes_copied: AtomicU64::new(0),
            chunks_copied: AtomicU64::new(0),
            created: Instant::now(),
        }
    }
}

impl PumpStats {
    /// Create zeroed statistics
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one completed write of `bytes` bytes
    pub fn record_chunk(&self, bytes: usize) {
        self.bytes_copied.fetch_add(bytes as u64, Ordering::Relaxed);
        self.chunks_copied.fetch_add(1, Ordering::Relaxed);
    }

    /// Total bytes written so far
    pub fn bytes_copied(&self) -> u64 {
        self.bytes_copied.load(Ordering::Relaxed)
    }

    /// Number of read/write pairs completed so far
    pub fn chunks_copied(&self) -> u64 {
        self.chunks_copied.load(Ordering::Relaxed)
    }

    /// Time since the pump was created
    pub fn elapsed(&self) -> Duration {
        self.created.elapsed()
    }

    /// Get throughput in bytes/second
    pub fn throughput(&self) -> f64 {
        let elapsed = self.elapsed().as_secs_f64();
        if elapsed > 0.0 {
            self.bytes_copied() as f64 / elapsed
        } else {
            0.0
        }
    }
}
