// src/pipeline/metrics.rs

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Lock-free per-stage counters, shared between the running stage and the
/// task handle that reports them.
#[derive(Debug, Default)]
pub struct StageCounters {
    batches_in: AtomicU64,
    batches_out: AtomicU64,
    late_rows: AtomicU64,
    unwindowed_rows: AtomicU64,
    dropped_windows: AtomicU64,
    alerts_sent: AtomicU64,
    alerts_suppressed: AtomicU64,
}

impl StageCounters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_in(&self) {
        self.batches_in.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_out(&self, n: u64) {
        self.batches_out.fetch_add(n, Ordering::Relaxed);
    }

    pub fn record_late_rows(&self, n: u64) {
        self.late_rows.fetch_add(n, Ordering::Relaxed);
    }

    /// Rows that no window covers: in a gap between windows, or too close
    /// to the end of the timeline to have one.
    pub fn record_unwindowed_rows(&self, n: u64) {
        self.unwindowed_rows.fetch_add(n, Ordering::Relaxed);
    }

    pub fn record_dropped_windows(&self, n: u64) {
        self.dropped_windows.fetch_add(n, Ordering::Relaxed);
    }

    pub fn record_alert_sent(&self) {
        self.alerts_sent.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_alert_suppressed(&self) {
        self.alerts_suppressed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StageStats {
        StageStats {
            batches_in: self.batches_in.load(Ordering::Relaxed),
            batches_out: self.batches_out.load(Ordering::Relaxed),
            late_rows: self.late_rows.load(Ordering::Relaxed),
            unwindowed_rows: self.unwindowed_rows.load(Ordering::Relaxed),
            dropped_windows: self.dropped_windows.load(Ordering::Relaxed),
            alerts_sent: self.alerts_sent.load(Ordering::Relaxed),
            alerts_suppressed: self.alerts_suppressed.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of [`StageCounters`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct StageStats {
    pub batches_in: u64,
    pub batches_out: u64,
    pub late_rows: u64,
    pub unwindowed_rows: u64,
    pub dropped_windows: u64,
    pub alerts_sent: u64,
    pub alerts_suppressed: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_reflects_recorded_counts() {
        let counters = StageCounters::new();
        counters.record_in();
        counters.record_in();
        counters.record_out(3);
        counters.record_dropped_windows(1);
        counters.record_alert_suppressed();

        let stats = counters.snapshot();
        assert_eq!(stats.batches_in, 2);
        assert_eq!(stats.batches_out, 3);
        assert_eq!(stats.dropped_windows, 1);
        assert_eq!(stats.alerts_suppressed, 1);
        assert_eq!(stats.alerts_sent, 0);
    }
}
