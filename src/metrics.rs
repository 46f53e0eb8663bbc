// Run metrics module
//
// Lightweight counters for how much work the batch runs did and how long it took

use crate::models::Operation;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

/// Process-wide batch metrics
///
/// Uses atomic operations for thread-safe tracking without locks. The batch
/// processor records into it and the binary logs the summary on exit.
#[derive(Debug)]
pub struct Metrics {
    /// Files converted to xlsx
    pub files_converted: AtomicUsize,

    /// Files saved without protection
    pub files_unlocked: AtomicUsize,

    /// Files whose processing failed
    pub files_failed: AtomicUsize,

    /// Extra attempts made for files that failed with a file error
    pub retries: AtomicUsize,

    /// Total per-file processing time in milliseconds
    pub total_processing_time_ms: AtomicU64,

    /// Number of state change events broadcast
    pub state_broadcasts: AtomicU64,

    start_time: Instant,
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            files_converted: AtomicUsize::new(0),
            files_unlocked: AtomicUsize::new(0),
            files_failed: AtomicUsize::new(0),
            retries: AtomicUsize::new(0),
            total_processing_time_ms: AtomicU64::new(0),
            state_broadcasts: AtomicU64::new(0),
            start_time: Instant::now(),
        }
    }

    /// Record a file that was processed successfully
    pub fn record_file_succeeded(&self, operation: Operation) {
        match operation {
            Operation::Convert => self.files_converted.fetch_add(1, Ordering::Relaxed),
            Operation::Unlock => self.files_unlocked.fetch_add(1, Ordering::Relaxed),
        };
    }

    pub fn record_file_failed(&self) {
        self.files_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_retry(&self) {
        self.retries.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_processing_time(&self, duration: Duration) {
        self.total_processing_time_ms
            .fetch_add(duration.as_millis() as u64, Ordering::Relaxed);
    }

    /// Record `count` broadcast state events
    pub fn record_state_broadcasts(&self, count: usize) {
        self.state_broadcasts.fetch_add(count as u64, Ordering::Relaxed);
    }

    /// Files attempted across all runs
    pub fn files_processed(&self) -> usize {
        self.files_converted.load(Ordering::Relaxed)
            + self.files_unlocked.load(Ordering::Relaxed)
            + self.files_failed.load(Ordering::Relaxed)
    }

    pub fn uptime(&self) -> Duration {
        self.start_time.elapsed()
    }

    /// Average processing time per attempted file in milliseconds
    pub fn avg_processing_time_ms(&self) -> f64 {
        let total = self.total_processing_time_ms.load(Ordering::Relaxed);
        let count = self.files_processed();
        if count > 0 {
            total as f64 / count as f64
        } else {
            0.0
        }
    }

    /// Log metrics summary
    pub fn log_summary(&self) {
        tracing::info!("=== Run Metrics Summary ===");
        tracing::info!("Uptime: {:.2}s", self.uptime().as_secs_f64());
        tracing::info!(
            "Files: {} converted, {} unlocked, {} failed, {} retries",
            self.files_converted.load(Ordering::Relaxed),
            self.files_unlocked.load(Ordering::Relaxed),
            self.files_failed.load(Ordering::Relaxed),
            self.retries.load(Ordering::Relaxed)
        );
        tracing::info!(
            "Total processing time: {:.2}s (avg: {:.2}ms per file)",
            self.total_processing_time_ms.load(Ordering::Relaxed) as f64 / 1000.0,
            self.avg_processing_time_ms()
        );
        tracing::info!(
            "State broadcasts: {}",
            self.state_broadcasts.load(Ordering::Relaxed)
        );
    }

    /// Log periodic metrics at batch checkpoints
    pub fn log_periodic(&self) {
        tracing::info!(
            "Metrics: {} files processed, {} failed, {} state broadcasts, uptime {:.0}s",
            self.files_processed(),
            self.files_failed.load(Ordering::Relaxed),
            self.state_broadcasts.load(Ordering::Relaxed),
            self.uptime().as_secs_f64()
        );
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}
