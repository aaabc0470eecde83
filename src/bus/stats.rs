//! Event bus statistics (spec.md §4.2 "Statistics"; supplemented per
//! SPEC_FULL.md §11 from the Python prototype's `EventBusStats`).

use std::sync::atomic::{AtomicU64, Ordering};

/// Cumulative counters plus running average/max handler latency.
///
/// All fields are independently atomic; a consistent snapshot is not
/// guaranteed across fields, matching the teacher's `Stats` struct in
/// `coordinator.rs` which exposes the same kind of best-effort counters.
#[derive(Debug, Default)]
pub struct BusStats {
    published: AtomicU64,
    processed: AtomicU64,
    failed: AtomicU64,
    total_latency_nanos: AtomicU64,
    max_latency_nanos: AtomicU64,
}

/// Point-in-time read of [`BusStats`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BusStatsSnapshot {
    pub published: u64,
    pub processed: u64,
    pub failed: u64,
    pub avg_latency: std::time::Duration,
    pub max_latency: std::time::Duration,
}

impl BusStats {
    pub fn record_publish(&self) {
        self.published.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_handler(&self, latency: std::time::Duration, failed: bool) {
        self.processed.fetch_add(1, Ordering::Relaxed);
        if failed {
            self.failed.fetch_add(1, Ordering::Relaxed);
        }
        let nanos = latency.as_nanos().min(u128::from(u64::MAX)) as u64;
        self.total_latency_nanos.fetch_add(nanos, Ordering::Relaxed);
        self.max_latency_nanos.fetch_max(nanos, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> BusStatsSnapshot {
        let processed = self.processed.load(Ordering::Relaxed);
        let total = self.total_latency_nanos.load(Ordering::Relaxed);
        let avg = if processed == 0 { 0 } else { total / processed };
        BusStatsSnapshot {
            published: self.published.load(Ordering::Relaxed),
            processed,
            failed: self.failed.load(Ordering::Relaxed),
            avg_latency: std::time::Duration::from_nanos(avg),
            max_latency: std::time::Duration::from_nanos(self.max_latency_nanos.load(Ordering::Relaxed)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn tracks_counters_and_latency() {
        let stats = BusStats::default();
        stats.record_publish();
        stats.record_publish();
        stats.record_handler(Duration::from_millis(10), false);
        stats.record_handler(Duration::from_millis(30), true);

        let snap = stats.snapshot();
        assert_eq!(snap.published, 2);
        assert_eq!(snap.processed, 2);
        assert_eq!(snap.failed, 1);
        assert_eq!(snap.avg_latency, Duration::from_millis(20));
        assert_eq!(snap.max_latency, Duration::from_millis(30));
    }
}
