//! Concurrent entry storage shared by both cache flavours
//!
//! [`CacheStore`] owns the concurrent map and implements every algorithm
//! that does not care how map keys are formed: lazy expiration on lookup,
//! insert-or-replace, expiration sweeps, capacity eviction, and the
//! coordinated factory path. [`KeyedCache`](crate::KeyedCache) uses plain
//! keys as map keys; [`NamespacedCache`](crate::NamespacedCache) uses
//! length-prefixed `namespace` + `key` strings.

use std::future::Future;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use tracing::{debug, instrument, warn};

use crate::clock::Clock;
use crate::config::CacheConfig;
use crate::coordinator::ResolutionCoordinator;
use crate::entry::{add_duration, CacheEntry};
use crate::error::{CacheError, CacheResult, FactoryError};
use crate::factory::FactoryInfo;
use crate::stats::{CacheStats, MetricsCollector};

/// Result of looking a key up in the map
#[derive(Debug)]
pub(crate) enum Lookup<V> {
    /// A live entry
    Hit(CacheEntry<V>),
    /// An expired entry was found and removed
    Expired,
    /// Nothing stored under the key
    Missing,
}

#[derive(Debug, Clone, Copy)]
struct Settings {
    max_count: Option<usize>,
    expiration: Option<Duration>,
}

pub(crate) struct CacheStore<V, C> {
    items: DashMap<String, CacheEntry<V>>,
    settings: RwLock<Settings>,
    clean_up_time: Mutex<DateTime<Utc>>,
    coordinator: ResolutionCoordinator,
    metrics: MetricsCollector,
    clock: C,
}

impl<V, C> CacheStore<V, C>
where
    V: Clone + Send + Sync + 'static,
    C: Clock,
{
    pub(crate) fn new(config: &CacheConfig, clock: C) -> Self {
        let now = clock.now();
        Self {
            items: DashMap::new(),
            settings: RwLock::new(Settings {
                max_count: config.max_count,
                expiration: config.expiration,
            }),
            clean_up_time: Mutex::new(now),
            coordinator: ResolutionCoordinator::new(),
            metrics: MetricsCollector::new(config.track_metrics),
            clock,
        }
    }

    pub(crate) fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    pub(crate) fn max_count(&self) -> Option<usize> {
        self.settings.read().max_count
    }

    pub(crate) fn set_max_count(&self, max_count: Option<usize>) {
        self.settings.write().max_count = max_count;
    }

    pub(crate) fn expiration(&self) -> Option<Duration> {
        self.settings.read().expiration
    }

    pub(crate) fn set_expiration(&self, expiration: Option<Duration>) {
        self.settings.write().expiration = expiration;
    }

    /// Look up `map_key`, removing it if it has expired.
    ///
    /// Hits and misses are only counted when `record_access` is set.
    pub(crate) fn lookup(&self, map_key: &str, record_access: bool) -> Lookup<V> {
        let now = self.now();
        let ttl = self.expiration();

        let found = match self.items.get(map_key) {
            None => None,
            Some(entry) if entry.is_expired_at(now, ttl) => Some(None),
            Some(entry) => Some(Some(entry.clone())),
        };

        let result = match found {
            None => Lookup::Missing,
            Some(Some(entry)) => Lookup::Hit(entry),
            Some(None) => {
                // Only remove what is still expired; a writer may have replaced it meanwhile.
                if self.items.remove_if(map_key, |_, entry| entry.is_expired_at(now, ttl)).is_some()
                {
                    self.metrics.record_expirations(1);
                }
                Lookup::Expired
            }
        };

        if record_access {
            match result {
                Lookup::Hit(_) => self.metrics.record_hit(),
                Lookup::Expired | Lookup::Missing => self.metrics.record_miss(),
            }
        }
        result
    }

    /// Live entry for `map_key`, if any
    pub(crate) fn get_live(&self, map_key: &str) -> Option<CacheEntry<V>> {
        match self.lookup(map_key, true) {
            Lookup::Hit(entry) => Some(entry),
            Lookup::Expired | Lookup::Missing => None,
        }
    }

    /// Insert or replace the entry stored under `map_key`.
    ///
    /// An entry that is already expired on arrival is discarded and `None`
    /// is returned. Replacing an existing entry keeps its creation date.
    pub(crate) fn insert(
        &self,
        map_key: String,
        mut entry: CacheEntry<V>,
    ) -> Option<CacheEntry<V>> {
        if entry.is_expired_at(self.now(), self.expiration()) {
            debug!(key = %map_key, "discarding entry that is already expired");
            return None;
        }

        match self.items.entry(map_key) {
            Entry::Occupied(mut occupied) => {
                entry.inherit_creation(occupied.get());
                occupied.insert(entry.clone());
            }
            Entry::Vacant(vacant) => {
                vacant.insert(entry.clone());
            }
        }

        self.metrics.record_insert();
        self.remove_expired_auto();
        Some(entry)
    }

    /// Wrap `value` in a fresh entry and insert it
    pub(crate) fn store_value(
        &self,
        map_key: String,
        namespace: Option<&str>,
        key: &str,
        value: V,
        expiration: Option<Duration>,
    ) -> Option<CacheEntry<V>> {
        let namespace = namespace.map(str::to_owned);
        let entry = CacheEntry::new(namespace, key, value, self.now(), expiration);
        self.insert(map_key, entry)
    }

    pub(crate) fn remove(&self, map_key: &str) -> Option<CacheEntry<V>> {
        let removed = self.items.remove(map_key).map(|(_, entry)| entry);
        self.remove_expired_auto();
        removed
    }

    /// Remove `map_key` only if `predicate` holds for its entry
    pub(crate) fn remove_if<F>(&self, map_key: &str, predicate: F) -> bool
    where
        F: FnOnce(&CacheEntry<V>) -> bool,
    {
        let removed = self.items.remove_if(map_key, |_, entry| predicate(entry)).is_some();
        self.remove_expired_auto();
        removed
    }

    /// Remove every entry matching `predicate`, returning how many were removed
    pub(crate) fn remove_where<F>(&self, mut predicate: F) -> usize
    where
        F: FnMut(&CacheEntry<V>) -> bool,
    {
        let mut removed = 0;
        self.items.retain(|_, entry| {
            if predicate(&*entry) {
                removed += 1;
                false
            } else {
                true
            }
        });
        removed
    }

    /// Refresh the update date of a live entry in place
    pub(crate) fn touch(&self, map_key: &str) -> bool {
        let now = self.now();
        let ttl = self.expiration();
        match self.items.get_mut(map_key) {
            Some(mut entry) if !entry.is_expired_at(now, ttl) => {
                entry.force_extend_to(now);
                true
            }
            _ => false,
        }
    }

    /// Remove expired entries, then enforce the capacity bound.
    ///
    /// Returns the number of entries removed by both steps.
    pub(crate) fn remove_expired(&self, ttl_override: Option<Duration>) -> usize {
        let now = self.now();
        *self.clean_up_time.lock() = now;

        let ttl = ttl_override.or(self.expiration());
        let expired = self.remove_where(|entry| entry.is_expired_at(now, ttl));
        self.metrics.record_expirations(expired as u64);

        let evicted = self.enforce_capacity();
        if expired + evicted > 0 {
            debug!(expired, evicted, remaining = self.items.len(), "cache sweep complete");
        }
        expired + evicted
    }

    /// Remove entries last updated before `date` (and any expired entry),
    /// then enforce the capacity bound.
    pub(crate) fn remove_before(&self, date: DateTime<Utc>) -> usize {
        let now = self.now();
        let ttl = self.expiration();
        let removed =
            self.remove_where(|entry| entry.update_date() < date || entry.is_expired_at(now, ttl));
        self.metrics.record_expirations(removed as u64);
        removed + self.enforce_capacity()
    }

    /// Remove the entry with the earliest creation date
    pub(crate) fn remove_earliest(&self) -> Option<CacheEntry<V>> {
        let earliest = self
            .items
            .iter()
            .min_by_key(|item| item.value().creation_date())
            .map(|item| item.key().clone());

        earliest.and_then(|map_key| self.items.remove(&map_key)).map(|(_, entry)| entry)
    }

    /// Evict earliest-created entries until the count satisfies `max_count`.
    fn enforce_capacity(&self) -> usize {
        let Some(max_count) = self.max_count() else {
            return 0;
        };

        if max_count == 0 {
            let cleared = self.items.len();
            self.items.clear();
            self.metrics.record_evictions(cleared as u64);
            return cleared;
        }

        let excess = self.items.len().saturating_sub(max_count);
        if excess == 0 {
            return 0;
        }

        let mut by_age: Vec<(DateTime<Utc>, String)> = self
            .items
            .iter()
            .map(|item| (item.value().creation_date(), item.key().clone()))
            .collect();
        // Stable sort: ties keep iteration order.
        by_age.sort_by_key(|(created, _)| *created);

        let evicted = by_age
            .into_iter()
            .take(excess)
            .filter(|(_, map_key)| self.items.remove(map_key).is_some())
            .count();
        self.metrics.record_evictions(evicted as u64);
        evicted
    }

    /// Sweep if the cache is over capacity or the last sweep is older than
    /// the cache-wide TTL.
    ///
    /// Without a cache-wide TTL the interval is zero, so every mutation
    /// sweeps. Configure an expiration to amortize sweeps over many writes.
    pub(crate) fn remove_expired_auto(&self) {
        let settings = *self.settings.read();
        let over_capacity = settings.max_count.is_some_and(|max| self.items.len() > max);

        let last = *self.clean_up_time.lock();
        let due = self.now() >= add_duration(last, settings.expiration.unwrap_or(Duration::ZERO));

        if over_capacity || due {
            self.remove_expired(None);
        }
    }

    /// Snapshot of live entries matching `filter`
    pub(crate) fn live_entries<F>(&self, mut filter: F) -> Vec<CacheEntry<V>>
    where
        F: FnMut(&CacheEntry<V>) -> bool,
    {
        let now = self.now();
        let ttl = self.expiration();
        self.items
            .iter()
            .filter(|item| !item.value().is_expired_at(now, ttl) && filter(item.value()))
            .map(|item| item.value().clone())
            .collect()
    }

    /// Number of live entries matching `filter`
    pub(crate) fn live_count<F>(&self, mut filter: F) -> usize
    where
        F: FnMut(&CacheEntry<V>) -> bool,
    {
        let now = self.now();
        let ttl = self.expiration();
        self.items
            .iter()
            .filter(|item| !item.value().is_expired_at(now, ttl) && filter(item.value()))
            .count()
    }

    /// Whether any live entry matches `predicate`
    pub(crate) fn any_live<F>(&self, mut predicate: F) -> bool
    where
        F: FnMut(&CacheEntry<V>) -> bool,
    {
        let now = self.now();
        let ttl = self.expiration();
        self.items
            .iter()
            .any(|item| !item.value().is_expired_at(now, ttl) && predicate(item.value()))
    }

    pub(crate) fn clear(&self) {
        self.items.clear();
        *self.clean_up_time.lock() = self.now();
    }

    /// Raw number of stored entries, expired ones included
    #[cfg(test)]
    pub(crate) fn stored_len(&self) -> usize {
        self.items.len()
    }

    pub(crate) fn in_flight(&self) -> usize {
        self.coordinator.in_flight()
    }

    pub(crate) fn stats(&self) -> CacheStats {
        self.metrics.snapshot(self.live_count(|_| true), self.max_count())
    }

    pub(crate) fn reset_stats(&self) {
        self.metrics.reset();
    }

    /// Run `factory` for `key` at most once across concurrent callers.
    ///
    /// Callers queue on the coordinator slot for `map_key`. Whoever gets the
    /// lock first runs the factory; the others find the stored entry when
    /// they get their turn. A factory error is returned to the caller that
    /// ran it and nothing is cached.
    #[instrument(level = "debug", skip(self, map_key, factory))]
    pub(crate) async fn resolve(
        &self,
        map_key: &str,
        namespace: Option<&str>,
        key: &str,
        factory: FactoryInfo<V>,
        expiration: Option<Duration>,
    ) -> CacheResult<Option<CacheEntry<V>>> {
        let permit = self.coordinator.acquire(map_key, factory.timeout()).await;
        if permit.timed_out() {
            self.metrics.record_coordinator_timeout();
        }

        if let Lookup::Hit(entry) = self.lookup(map_key, false) {
            debug!("value produced by a concurrent resolution");
            return Ok(Some(entry));
        }

        self.metrics.record_factory_invocation();
        debug!("running factory");
        let value = match factory.call(key).await {
            Ok(value) => value,
            Err(err) => {
                self.metrics.record_factory_failure();
                warn!(error = %err, "factory failed");
                return Err(CacheError::factory(key, err));
            }
        };

        // Store before the permit drops so queued callers see the value.
        let stored = self.store_value(map_key.to_owned(), namespace, key, value, expiration);
        drop(permit);
        Ok(stored)
    }

    /// Await a caller-supplied initializer and store its value
    pub(crate) async fn initialize<Fut, E>(
        &self,
        map_key: &str,
        namespace: Option<&str>,
        key: &str,
        init: Fut,
        expiration: Option<Duration>,
    ) -> CacheResult<Option<CacheEntry<V>>>
    where
        Fut: Future<Output = Result<V, E>>,
        E: Into<FactoryError>,
    {
        match init.await {
            Ok(value) => {
                Ok(self.store_value(map_key.to_owned(), namespace, key, value, expiration))
            }
            Err(err) => Err(CacheError::factory(key, err.into())),
        }
    }
}
