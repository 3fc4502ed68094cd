//! Cache utilities for monitoring and diagnostics
//!
//! [`CacheHealthReport`] turns a [`CacheStats`] snapshot into a health
//! status plus tuning recommendations.

use std::fmt;

use tracing::{info, warn};

use crate::stats::CacheStats;

/// Accesses required before the hit rate is judged
const MIN_ACCESSES: u64 = 100;

/// Cache health status
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheHealth {
    /// Cache is operating normally
    Healthy,
    /// Cache hit rate is low, consider tuning
    LowHitRate,
    /// Cache is nearly full, consider increasing the capacity bound
    NearCapacity,
    /// Cache has both low hit rate and near capacity
    Critical,
}

impl fmt::Display for CacheHealth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Healthy => write!(f, "Healthy"),
            Self::LowHitRate => write!(f, "Low Hit Rate"),
            Self::NearCapacity => write!(f, "Near Capacity"),
            Self::Critical => write!(f, "Critical"),
        }
    }
}

/// Cache health report with diagnostics
#[derive(Debug, Clone)]
pub struct CacheHealthReport {
    /// Overall health status
    pub health: CacheHealth,
    /// Statistics the report was built from
    pub stats: CacheStats,
    /// Recommendations for optimization
    pub recommendations: Vec<String>,
}

impl CacheHealthReport {
    /// Build a health report from a statistics snapshot
    ///
    /// # Thresholds
    /// - Low hit rate: < 50% after at least 100 accesses
    /// - Near capacity: > 85% full
    /// - High eviction rate: > 20% of accesses
    /// - High expiration rate: > 30% of accesses
    /// - High factory failure rate: > 10% of invocations
    ///
    /// # Example
    /// ```
    /// use stashline_cache::utils::{CacheHealth, CacheHealthReport};
    /// use stashline_cache::{CacheConfig, KeyedCache};
    ///
    /// let cache: KeyedCache<i32> =
    ///     KeyedCache::new(CacheConfig::builder().max_count(100).track_metrics(true).build());
    /// cache.set("a", 1).unwrap();
    ///
    /// let report = CacheHealthReport::new(cache.stats());
    /// assert_eq!(report.health, CacheHealth::Healthy);
    /// ```
    pub fn new(stats: CacheStats) -> Self {
        let mut recommendations = Vec::new();
        let accesses = stats.total_accesses();

        let low_hit_rate = stats.hit_rate() < 0.5 && accesses > MIN_ACCESSES;
        if low_hit_rate {
            recommendations.push(format!(
                "Hit rate is {:.2}%. Consider increasing max_count or the expiration.",
                stats.hit_rate() * 100.0
            ));
        }

        let fill = stats.fill_percentage();
        let near_capacity = fill.is_some_and(|pct| pct > 0.85);
        if let Some(pct) = fill.filter(|_| near_capacity) {
            recommendations
                .push(format!("Cache is {:.1}% full. Consider increasing max_count.", pct * 100.0));
        }

        if accesses > 0 {
            let eviction_rate = stats.evictions as f64 / accesses as f64;
            if eviction_rate > 0.2 {
                recommendations.push(format!(
                    "High eviction rate: {:.2}%. Cache may be too small for workload.",
                    eviction_rate * 100.0
                ));
            }

            let expiration_rate = stats.expirations as f64 / accesses as f64;
            if expiration_rate > 0.3 {
                recommendations.push(format!(
                    "High expiration rate: {:.2}%. Consider increasing the expiration.",
                    expiration_rate * 100.0
                ));
            }
        }

        if stats.factory_invocations > 0 {
            let failure_rate = stats.factory_failures as f64 / stats.factory_invocations as f64;
            if failure_rate > 0.1 {
                recommendations.push(format!(
                    "Factory failure rate: {:.2}%. Failed resolutions are retried on every miss.",
                    failure_rate * 100.0
                ));
            }
        }

        let health = match (low_hit_rate, near_capacity) {
            (true, true) => CacheHealth::Critical,
            (true, false) => CacheHealth::LowHitRate,
            (false, true) => CacheHealth::NearCapacity,
            (false, false) => CacheHealth::Healthy,
        };

        Self { health, stats, recommendations }
    }

    /// Log the health report using tracing
    pub fn log(&self) {
        match self.health {
            CacheHealth::Healthy => {
                info!(
                    health = %self.health,
                    hit_rate = self.stats.hit_rate(),
                    size = self.stats.size,
                    "Cache health check: Healthy"
                );
            }
            CacheHealth::LowHitRate | CacheHealth::NearCapacity | CacheHealth::Critical => {
                warn!(
                    health = %self.health,
                    hit_rate = self.stats.hit_rate(),
                    size = self.stats.size,
                    max_count = ?self.stats.max_count,
                    "Cache health check: Issues detected"
                );
            }
        }
        for rec in &self.recommendations {
            warn!(recommendation = %rec, "Cache optimization recommendation");
        }
    }
}

impl fmt::Display for CacheHealthReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Cache Health Report")?;
        writeln!(f, "===================")?;
        writeln!(f, "Status: {}", self.health)?;
        writeln!(f)?;
        writeln!(f, "Statistics:")?;
        writeln!(f, "  Size: {}/{:?}", self.stats.size, self.stats.max_count)?;
        writeln!(f, "  Hits: {}", self.stats.hits)?;
        writeln!(f, "  Misses: {}", self.stats.misses)?;
        writeln!(f, "  Hit Rate: {:.2}%", self.stats.hit_rate() * 100.0)?;
        writeln!(f, "  Evictions: {}", self.stats.evictions)?;
        writeln!(f, "  Expirations: {}", self.stats.expirations)?;
        writeln!(
            f,
            "  Factory: {} runs, {} failed",
            self.stats.factory_invocations, self.stats.factory_failures
        )?;
        if let Some(fill_pct) = self.stats.fill_percentage() {
            writeln!(f, "  Fill: {:.1}%", fill_pct * 100.0)?;
        }

        if !self.recommendations.is_empty() {
            writeln!(f)?;
            writeln!(f, "Recommendations:")?;
            for (i, rec) in self.recommendations.iter().enumerate() {
                writeln!(f, "  {}. {}", i + 1, rec)?;
            }
        }

        Ok(())
    }
}
