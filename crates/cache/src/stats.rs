//! Cache statistics and metrics tracking
//!
//! This module provides types for tracking cache performance metrics
//! including hit rates, eviction counts and factory activity.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Statistics for cache performance monitoring
#[derive(Debug, Clone, Default)]
pub struct CacheStats {
    /// Current number of live entries
    pub size: usize,

    /// Soft capacity (None = unlimited)
    pub max_count: Option<usize>,

    /// Lookups that found a live entry
    pub hits: u64,

    /// Lookups that found nothing or an expired entry
    pub misses: u64,

    /// Entries written (new keys and replacements)
    pub inserts: u64,

    /// Live entries removed to satisfy the capacity bound
    pub evictions: u64,

    /// Expired entries removed
    pub expirations: u64,

    /// Factory executions started
    pub factory_invocations: u64,

    /// Factory executions that returned an error
    pub factory_failures: u64,

    /// Coordinator lock acquisitions that timed out
    pub coordinator_timeouts: u64,
}

impl CacheStats {
    /// Calculate hit rate (hits / total accesses)
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }

    /// Calculate miss rate (misses / total accesses)
    pub fn miss_rate(&self) -> f64 {
        1.0 - self.hit_rate()
    }

    /// Calculate fill percentage (size / max_count)
    pub fn fill_percentage(&self) -> Option<f64> {
        self.max_count.map(|max| if max == 0 { 0.0 } else { self.size as f64 / max as f64 })
    }

    /// Total number of access operations (hits + misses)
    pub fn total_accesses(&self) -> u64 {
        self.hits + self.misses
    }
}

/// Thread-safe metrics collector for cache operations
///
/// Counters are atomics shared between clones. When tracking is disabled
/// every `record_*` call is a no-op.
#[derive(Debug, Clone)]
pub(crate) struct MetricsCollector {
    enabled: bool,
    counters: Arc<Counters>,
}

#[derive(Debug, Default)]
struct Counters {
    hits: AtomicU64,
    misses: AtomicU64,
    inserts: AtomicU64,
    evictions: AtomicU64,
    expirations: AtomicU64,
    factory_invocations: AtomicU64,
    factory_failures: AtomicU64,
    coordinator_timeouts: AtomicU64,
}

impl MetricsCollector {
    pub(crate) fn new(enabled: bool) -> Self {
        Self { enabled, counters: Arc::new(Counters::default()) }
    }

    fn bump(&self, counter: &AtomicU64, n: u64) {
        if self.enabled && n > 0 {
            counter.fetch_add(n, Ordering::Relaxed);
        }
    }

    pub(crate) fn record_hit(&self) {
        self.bump(&self.counters.hits, 1);
    }

    pub(crate) fn record_miss(&self) {
        self.bump(&self.counters.misses, 1);
    }

    pub(crate) fn record_insert(&self) {
        self.bump(&self.counters.inserts, 1);
    }

    pub(crate) fn record_evictions(&self, n: u64) {
        self.bump(&self.counters.evictions, n);
    }

    pub(crate) fn record_expirations(&self, n: u64) {
        self.bump(&self.counters.expirations, n);
    }

    pub(crate) fn record_factory_invocation(&self) {
        self.bump(&self.counters.factory_invocations, 1);
    }

    pub(crate) fn record_factory_failure(&self) {
        self.bump(&self.counters.factory_failures, 1);
    }

    pub(crate) fn record_coordinator_timeout(&self) {
        self.bump(&self.counters.coordinator_timeouts, 1);
    }

    /// Get current statistics snapshot
    pub(crate) fn snapshot(&self, size: usize, max_count: Option<usize>) -> CacheStats {
        let c = &self.counters;
        CacheStats {
            size,
            max_count,
            hits: c.hits.load(Ordering::Relaxed),
            misses: c.misses.load(Ordering::Relaxed),
            inserts: c.inserts.load(Ordering::Relaxed),
            evictions: c.evictions.load(Ordering::Relaxed),
            expirations: c.expirations.load(Ordering::Relaxed),
            factory_invocations: c.factory_invocations.load(Ordering::Relaxed),
            factory_failures: c.factory_failures.load(Ordering::Relaxed),
            coordinator_timeouts: c.coordinator_timeouts.load(Ordering::Relaxed),
        }
    }

    /// Reset all metrics to zero
    pub(crate) fn reset(&self) {
        let c = &self.counters;
        for counter in [
            &c.hits,
            &c.misses,
            &c.inserts,
            &c.evictions,
            &c.expirations,
            &c.factory_invocations,
            &c.factory_failures,
            &c.coordinator_timeouts,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
    }
}

#[cfg(test)]
mod tests {
    //! Unit tests for cache::stats.
    use super::*;

    /// Validates rates on an empty snapshot.
    #[test]
    fn test_empty_stats_rates() {
        let stats = CacheStats::default();
        assert_eq!(stats.hit_rate(), 0.0);
        assert_eq!(stats.miss_rate(), 1.0);
        assert_eq!(stats.fill_percentage(), None);
    }

    /// Validates counters accumulate and reset.
    ///
    /// Assertions:
    /// - Confirms `stats.hits` equals `2` and `stats.misses` equals `1`.
    /// - Confirms `hit_rate()` equals `2.0 / 3.0`.
    /// - Confirms all counters read zero after `reset`.
    #[test]
    fn test_collector_records_and_resets() {
        let collector = MetricsCollector::new(true);
        collector.record_hit();
        collector.record_hit();
        collector.record_miss();
        collector.record_evictions(3);
        collector.record_factory_invocation();

        let stats = collector.snapshot(4, Some(8));
        assert_eq!(stats.hits, 2);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.evictions, 3);
        assert_eq!(stats.factory_invocations, 1);
        assert_eq!(stats.hit_rate(), 2.0 / 3.0);
        assert_eq!(stats.fill_percentage(), Some(0.5));

        collector.reset();
        let stats = collector.snapshot(0, None);
        assert_eq!(stats.total_accesses(), 0);
        assert_eq!(stats.evictions, 0);
    }

    /// Validates a disabled collector ignores records.
    #[test]
    fn test_disabled_collector_is_noop() {
        let collector = MetricsCollector::new(false);
        collector.record_hit();
        collector.record_insert();
        assert_eq!(collector.snapshot(0, None).hits, 0);
        assert_eq!(collector.snapshot(0, None).inserts, 0);
    }

    /// Validates clones share counters.
    #[test]
    fn test_clones_share_counters() {
        let collector = MetricsCollector::new(true);
        let clone = collector.clone();
        clone.record_miss();
        assert_eq!(collector.snapshot(0, None).misses, 1);
    }
}
