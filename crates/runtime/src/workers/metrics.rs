//! Worker loop counters.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde::Serialize;

/// Counters shared by every inference worker loop. Lock-free.
#[derive(Debug, Default)]
pub struct WorkerCounters {
    batches: AtomicU64,
    requests: AtomicU64,
    loop_errors: AtomicU64,
    total_batch_nanos: AtomicU64,
    peak_batch_size: AtomicU64,
}

impl WorkerCounters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_batch(&self, size: usize, elapsed: Duration) {
        self.batches.fetch_add(1, Ordering::Relaxed);
        self.requests.fetch_add(size as u64, Ordering::Relaxed);
        self.total_batch_nanos
            .fetch_add(elapsed.as_nanos() as u64, Ordering::Relaxed);
        self.peak_batch_size.fetch_max(size as u64, Ordering::Relaxed);
    }

    pub fn record_loop_error(&self) {
        self.loop_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn avg_batch_time(&self) -> Duration {
        let batches = self.batches.load(Ordering::Relaxed);
        if batches == 0 {
            Duration::ZERO
        } else {
            Duration::from_nanos(self.total_batch_nanos.load(Ordering::Relaxed) / batches)
        }
    }

    /// Individual fields are read atomically; the snapshot as a whole is not.
    pub fn snapshot(&self) -> WorkerStats {
        WorkerStats {
            batches: self.batches.load(Ordering::Relaxed),
            requests: self.requests.load(Ordering::Relaxed),
            loop_errors: self.loop_errors.load(Ordering::Relaxed),
            avg_batch_ms: self.avg_batch_time().as_secs_f64() * 1000.0,
            peak_batch_size: self.peak_batch_size.load(Ordering::Relaxed),
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize)]
pub struct WorkerStats {
    pub batches: u64,
    pub requests: u64,
    pub loop_errors: u64,
    pub avg_batch_ms: f64,
    pub peak_batch_size: u64,
}
