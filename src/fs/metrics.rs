//! # File I/O Metrics
//!
//! Lock-free counters for the file facade: how many operations were issued,
//! how they ended, how many bytes moved and how long they took. Collected by
//! the `CompletionTracker` and the pending-operation guard; read through
//! [`IOMetrics::snapshot`].

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use crate::fs::operations::FileOperationKind;

/// File I/O metrics for monitoring and observability
#[derive(Debug)]
pub struct IOMetrics {
    // Operation counters
    total_operations: AtomicU64,
    completed_operations: AtomicU64,
    failed_operations: AtomicU64,
    abandoned_operations: AtomicU64,
    callback_failures: AtomicU64,

    // Throughput
    total_bytes_read: AtomicU64,
    total_bytes_written: AtomicU64,

    // Timing metrics (in microseconds for better precision)
    total_duration_micros: AtomicU64,
    min_duration_micros: AtomicU64,
    max_duration_micros: AtomicU64,

    // Current state
    pending_operations: AtomicUsize,

    start_time: Instant,
}

/// Point-in-time copy of [`IOMetrics`]
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MetricsSnapshot {
    pub total_operations: u64,
    pub completed_operations: u64,
    pub failed_operations: u64,
    pub abandoned_operations: u64,
    pub callback_failures: u64,
    pub pending_operations: usize,
    pub total_bytes_read: u64,
    pub total_bytes_written: u64,
    pub average_duration: Duration,
    pub min_duration: Duration,
    pub max_duration: Duration,
}

impl Default for IOMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl IOMetrics {
    pub fn new() -> Self {
        Self {
            total_operations: AtomicU64::new(0),
            completed_operations: AtomicU64::new(0),
            failed_operations: AtomicU64::new(0),
            abandoned_operations: AtomicU64::new(0),
            callback_failures: AtomicU64::new(0),
            total_bytes_read: AtomicU64::new(0),
            total_bytes_written: AtomicU64::new(0),
            total_duration_micros: AtomicU64::new(0),
            min_duration_micros: AtomicU64::new(u64::MAX),
            max_duration_micros: AtomicU64::new(0),
            pending_operations: AtomicUsize::new(0),
            start_time: Instant::now(),
        }
    }

    /// Records the start of a file operation
    pub fn record_operation_start(&self) {
        self.total_operations.fetch_add(1, Ordering::Relaxed);
        self.pending_operations.fetch_add(1, Ordering::Relaxed);
    }

    /// Records the successful completion of a file operation
    pub fn record_operation_complete(
        &self,
        kind: FileOperationKind,
        duration: Duration,
        bytes_transferred: u64,
    ) {
        self.completed_operations.fetch_add(1, Ordering::Relaxed);
        self.pending_operations.fetch_sub(1, Ordering::Relaxed);

        match kind {
            FileOperationKind::Read => self
                .total_bytes_read
                .fetch_add(bytes_transferred, Ordering::Relaxed),
            FileOperationKind::Write => self
                .total_bytes_written
                .fetch_add(bytes_transferred, Ordering::Relaxed),
        };

        let duration_micros = u64::try_from(duration.as_micros()).unwrap_or(u64::MAX);
        self.total_duration_micros
            .fetch_add(duration_micros, Ordering::Relaxed);
        self.min_duration_micros
            .fetch_min(duration_micros, Ordering::Relaxed);
        self.max_duration_micros
            .fetch_max(duration_micros, Ordering::Relaxed);
    }

    /// Records a file operation that ended with an error
    pub fn record_operation_failed(&self) {
        self.failed_operations.fetch_add(1, Ordering::Relaxed);
        self.pending_operations.fetch_sub(1, Ordering::Relaxed);
    }

    /// Records an operation dropped by pool shutdown before it ran. The
    /// tracker records the matching failure when it completes the operation.
    pub fn record_operation_abandoned(&self) {
        self.abandoned_operations.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a callback that panicked
    pub fn record_callback_failure(&self) {
        self.callback_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn total_operations(&self) -> u64 {
        self.total_operations.load(Ordering::Relaxed)
    }

    pub fn completed_operations(&self) -> u64 {
        self.completed_operations.load(Ordering::Relaxed)
    }

    pub fn failed_operations(&self) -> u64 {
        self.failed_operations.load(Ordering::Relaxed)
    }

    pub fn abandoned_operations(&self) -> u64 {
        self.abandoned_operations.load(Ordering::Relaxed)
    }

    pub fn callback_failures(&self) -> u64 {
        self.callback_failures.load(Ordering::Relaxed)
    }

    pub fn pending_operations(&self) -> usize {
        self.pending_operations.load(Ordering::Relaxed)
    }

    pub fn total_bytes_read(&self) -> u64 {
        self.total_bytes_read.load(Ordering::Relaxed)
    }

    pub fn total_bytes_written(&self) -> u64 {
        self.total_bytes_written.load(Ordering::Relaxed)
    }

    /// Gets the average duration of successful operations
    pub fn average_duration(&self) -> Duration {
        let completed = self.completed_operations.load(Ordering::Relaxed);
        if completed == 0 {
            return Duration::ZERO;
        }

        let total_micros = self.total_duration_micros.load(Ordering::Relaxed);
        Duration::from_micros(total_micros / completed)
    }

    pub fn min_duration(&self) -> Duration {
        let min_micros = self.min_duration_micros.load(Ordering::Relaxed);
        if min_micros == u64::MAX {
            Duration::ZERO
        } else {
            Duration::from_micros(min_micros)
        }
    }

    pub fn max_duration(&self) -> Duration {
        Duration::from_micros(self.max_duration_micros.load(Ordering::Relaxed))
    }

    /// Gets the throughput in bytes per second since the metrics were created
    pub fn throughput_bytes_per_second(&self) -> f64 {
        let elapsed = self.start_time.elapsed().as_secs_f64();
        if elapsed == 0.0 {
            return 0.0;
        }

        let total_bytes = self.total_bytes_read() + self.total_bytes_written();
        total_bytes as f64 / elapsed
    }

    /// Gets the success rate of finished operations as a percentage
    pub fn success_rate(&self) -> f64 {
        let completed = self.completed_operations();
        let finished = completed + self.failed_operations();
        if finished == 0 {
            return 100.0;
        }

        (completed as f64 / finished as f64) * 100.0
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            total_operations: self.total_operations(),
            completed_operations: self.completed_operations(),
            failed_operations: self.failed_operations(),
            abandoned_operations: self.abandoned_operations(),
            callback_failures: self.callback_failures(),
            pending_operations: self.pending_operations(),
            total_bytes_read: self.total_bytes_read(),
            total_bytes_written: self.total_bytes_written(),
            average_duration: self.average_duration(),
            min_duration: self.min_duration(),
            max_duration: self.max_duration(),
        }
    }
}
