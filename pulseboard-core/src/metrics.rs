// pulseboard-core/src/metrics.rs
//
// Explicit metrics interface — an object passed around rather than a global
// singleton, so callers (and tests) can hold their own handle. Plain
// `AtomicU64` fields plus a `*Snapshot` struct for point-in-time reads.

use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Default)]
pub struct Metrics {
    pub events_buffered: AtomicU64,
    pub events_processed: AtomicU64,
    pub events_late: AtomicU64,
    pub events_dropped: AtomicU64,
    pub events_dedup_hits: AtomicU64,
    pub segments_enter: AtomicU64,
    pub segments_exit: AtomicU64,
    pub segments_evaluations: AtomicU64,
    pub watermark_lag_ms: AtomicU64,
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            events_buffered: self.events_buffered.load(Ordering::Relaxed),
            events_processed: self.events_processed.load(Ordering::Relaxed),
            events_late: self.events_late.load(Ordering::Relaxed),
            events_dropped: self.events_dropped.load(Ordering::Relaxed),
            events_dedup_hits: self.events_dedup_hits.load(Ordering::Relaxed),
            segments_enter: self.segments_enter.load(Ordering::Relaxed),
            segments_exit: self.segments_exit.load(Ordering::Relaxed),
            segments_evaluations: self.segments_evaluations.load(Ordering::Relaxed),
            watermark_lag_ms: self.watermark_lag_ms.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub events_buffered: u64,
    pub events_processed: u64,
    pub events_late: u64,
    pub events_dropped: u64,
    pub events_dedup_hits: u64,
    pub segments_enter: u64,
    pub segments_exit: u64,
    pub segments_evaluations: u64,
    pub watermark_lag_ms: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_reflects_increments() {
        let m = Metrics::new();
        m.events_processed.fetch_add(3, Ordering::Relaxed);
        m.events_dropped.fetch_add(1, Ordering::Relaxed);
        let snap = m.snapshot();
        assert_eq!(snap.events_processed, 3);
        assert_eq!(snap.events_dropped, 1);
    }
}
