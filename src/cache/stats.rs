//! Load Statistics Module
//!
//! Tracks loader activity. `LoadStats` belongs to a `Memo`: loads started
//! and settled, stale settlements that were discarded, immediate hits.
//! `BatchStats` belongs to a `KeyCache` and covers its batch loader only;
//! per-key loads are counted by each key's memo.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

// == Load Stats ==
/// Lock-free counters owned by a `Memo`.
#[derive(Debug, Default)]
pub struct LoadStats {
    loads_started: AtomicU64,
    loads_fulfilled: AtomicU64,
    loads_rejected: AtomicU64,
    stale_settlements: AtomicU64,
    hits: AtomicU64,
}

impl LoadStats {
    // == Constructor ==
    /// Creates a new LoadStats with all counters at zero.
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_load_started(&self) {
        self.loads_started.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_settled(&self, fulfilled: bool) {
        if fulfilled {
            self.loads_fulfilled.fetch_add(1, Ordering::Relaxed);
        } else {
            self.loads_rejected.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub(crate) fn record_stale(&self) {
        self.stale_settlements.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    // == Snapshot ==
    /// Point-in-time copy of all counters.
    pub fn snapshot(&self) -> LoadStatsSnapshot {
        LoadStatsSnapshot {
            loads_started: self.loads_started.load(Ordering::Relaxed),
            loads_fulfilled: self.loads_fulfilled.load(Ordering::Relaxed),
            loads_rejected: self.loads_rejected.load(Ordering::Relaxed),
            stale_settlements: self.stale_settlements.load(Ordering::Relaxed),
            hits: self.hits.load(Ordering::Relaxed),
        }
    }
}

// == Snapshot ==
/// Serializable copy of `LoadStats`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct LoadStatsSnapshot {
    /// Loader invocations (one per idle to pending transition)
    pub loads_started: u64,
    /// Loads whose success was written to the store
    pub loads_fulfilled: u64,
    /// Loads whose failure was written to the store
    pub loads_rejected: u64,
    /// Settlements dropped because a newer state had replaced their load
    pub stale_settlements: u64,
    /// `get` calls answered from a fulfilled state without waiting
    pub hits: u64,
}

impl LoadStatsSnapshot {
    // == Failure Rate ==
    /// Returns rejected / (fulfilled + rejected), or 0.0 if nothing settled.
    pub fn failure_rate(&self) -> f64 {
        let settled = self.loads_fulfilled + self.loads_rejected;
        if settled == 0 {
            0.0
        } else {
            self.loads_rejected as f64 / settled as f64
        }
    }
}

// == Batch Stats ==
/// Lock-free counters for a `KeyCache`'s batch loader.
#[derive(Debug, Default)]
pub struct BatchStats {
    batches: AtomicU64,
    batches_failed: AtomicU64,
    batch_keys: AtomicU64,
    batch_keys_missing: AtomicU64,
    stale_keys: AtomicU64,
}

impl BatchStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_batch(&self, keys: usize) {
        self.batches.fetch_add(1, Ordering::Relaxed);
        self.batch_keys.fetch_add(keys as u64, Ordering::Relaxed);
    }

    pub(crate) fn record_failed(&self) {
        self.batches_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_missing(&self, keys: usize) {
        self.batch_keys_missing.fetch_add(keys as u64, Ordering::Relaxed);
    }

    pub(crate) fn record_stale(&self, keys: usize) {
        self.stale_keys.fetch_add(keys as u64, Ordering::Relaxed);
    }

    /// Point-in-time copy of all counters.
    pub fn snapshot(&self) -> BatchStatsSnapshot {
        BatchStatsSnapshot {
            batches: self.batches.load(Ordering::Relaxed),
            batches_failed: self.batches_failed.load(Ordering::Relaxed),
            batch_keys: self.batch_keys.load(Ordering::Relaxed),
            batch_keys_missing: self.batch_keys_missing.load(Ordering::Relaxed),
            stale_keys: self.stale_keys.load(Ordering::Relaxed),
        }
    }
}

/// Serializable copy of `BatchStats`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BatchStatsSnapshot {
    /// Batch loader invocations
    pub batches: u64,
    /// Invocations that failed as a whole (error or panic)
    pub batches_failed: u64,
    /// Keys handed to the batch loader in total
    pub batch_keys: u64,
    /// Requested keys the batch loader did not return
    pub batch_keys_missing: u64,
    /// Keys whose pending state was replaced before their batch settled
    pub stale_keys: u64,
}

// == Unit Tests ==
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stats_new() {
        let stats = LoadStats::new().snapshot();
        assert_eq!(stats, LoadStatsSnapshot::default());
    }

    #[test]
    fn test_failure_rate_nothing_settled() {
        let stats = LoadStats::new();
        assert_eq!(stats.snapshot().failure_rate(), 0.0);
    }

    #[test]
    fn test_failure_rate_mixed() {
        let stats = LoadStats::new();
        stats.record_settled(true);
        stats.record_settled(false);
        stats.record_settled(true);
        stats.record_settled(false);
        assert_eq!(stats.snapshot().failure_rate(), 0.5);
    }

    #[test]
    fn test_record_counters() {
        let stats = LoadStats::new();
        stats.record_load_started();
        stats.record_load_started();
        stats.record_stale();
        stats.record_hit();

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.loads_started, 2);
        assert_eq!(snapshot.stale_settlements, 1);
        assert_eq!(snapshot.hits, 1);
    }

    #[test]
    fn test_batch_counters() {
        let stats = BatchStats::new();
        stats.record_batch(3);
        stats.record_batch(2);
        stats.record_failed();
        stats.record_missing(1);
        stats.record_stale(2);

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.batches, 2);
        assert_eq!(snapshot.batches_failed, 1);
        assert_eq!(snapshot.batch_keys, 5);
        assert_eq!(snapshot.batch_keys_missing, 1);
        assert_eq!(snapshot.stale_keys, 2);

        let json = serde_json::to_value(snapshot).unwrap();
        assert_eq!(json["batch_keys"], 5);
        assert!(json.get("hits").is_none());
    }

    #[test]
    fn test_snapshot_serializes() {
        let stats = LoadStats::new();
        stats.record_load_started();
        let json = serde_json::to_value(stats.snapshot()).unwrap();
        assert_eq!(json["loads_started"], 1);
        assert_eq!(json["stale_settlements"], 0);
    }
}
