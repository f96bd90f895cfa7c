//! Optional throughput counters for the job system.
//!
//! Compiled in with the `metrics` cargo feature. Counters use relaxed
//! atomics and are incremented on the allocation, scheduling, execution and
//! completion paths.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

/// Live counters owned by one job system.
#[derive(Debug)]
pub(crate) struct Metrics {
    /// Job records allocated from the arena.
    pub(crate) created: AtomicU64,
    /// Handles pushed into the scheduler queues.
    pub(crate) scheduled: AtomicU64,
    /// Job bodies executed (playback re-runs count again).
    pub(crate) run: AtomicU64,
    /// Completions, i.e. jobs whose whole subtree drained.
    pub(crate) finished: AtomicU64,
    start_time: Instant,
}

impl Metrics {
    pub(crate) fn new() -> Self {
        Metrics {
            created: AtomicU64::new(0),
            scheduled: AtomicU64::new(0),
            run: AtomicU64::new(0),
            finished: AtomicU64::new(0),
            start_time: Instant::now(),
        }
    }

    pub(crate) fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            created: self.created.load(Ordering::Relaxed),
            scheduled: self.scheduled.load(Ordering::Relaxed),
            run: self.run.load(Ordering::Relaxed),
            finished: self.finished.load(Ordering::Relaxed),
            elapsed_seconds: self.start_time.elapsed().as_secs_f64(),
        }
    }
}

/// Snapshot of the counters at a point in time.
#[derive(Debug, Clone)]
pub struct MetricsSnapshot {
    pub created: u64,
    pub scheduled: u64,
    pub run: u64,
    pub finished: u64,
    pub elapsed_seconds: f64,
}

impl MetricsSnapshot {
    /// Completions per second since the system was constructed.
    pub fn jobs_per_second(&self) -> f64 {
        if self.elapsed_seconds > 0.0 {
            self.finished as f64 / self.elapsed_seconds
        } else {
            0.0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_reflects_counters() {
        let metrics = Metrics::new();
        metrics.created.fetch_add(3, Ordering::Relaxed);
        metrics.finished.fetch_add(2, Ordering::Relaxed);

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.created, 3);
        assert_eq!(snapshot.finished, 2);
        assert!(snapshot.elapsed_seconds >= 0.0);
    }
}
