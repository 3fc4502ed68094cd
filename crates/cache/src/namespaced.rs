//! TTL cache partitioned by namespace
//!
//! [`NamespacedCache`] stores every namespace in one map under composite
//! keys, so sweeps and the capacity bound apply across all
//! namespaces at once. Factories are registered per namespace and receive
//! the plain key. The empty namespace `""` is the un-namespaced partition.

use std::collections::BTreeSet;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tracing::{debug, warn};

use crate::clock::{Clock, SystemClock};
use crate::config::CacheConfig;
use crate::entry::CacheEntry;
use crate::error::{CacheError, CacheResult, FactoryError};
use crate::factory::FactoryInfo;
use crate::stats::CacheStats;
use crate::store::{CacheStore, Lookup};
use crate::sweeper::Sweeper;

/// Composite map key for `key` inside `namespace`
///
/// The byte length prefix makes the split point explicit, so no choice of
/// characters in either part can collide with another pair.
fn map_key(namespace: &str, key: &str) -> String {
    format!("{}:{namespace}{key}", namespace.len())
}

fn namespace_arg(namespace: &str) -> Option<&str> {
    (!namespace.is_empty()).then_some(namespace)
}

fn in_namespace<V>(entry: &CacheEntry<V>, namespace: &str) -> bool {
    entry.namespace().unwrap_or_default() == namespace
}

fn is_blank(key: &str) -> bool {
    key.trim().is_empty()
}

struct Inner<V, C> {
    store: CacheStore<V, C>,
    factories: DashMap<String, FactoryInfo<V>>,
}

/// Thread-safe TTL cache with per-namespace factories
pub struct NamespacedCache<V, C = SystemClock> {
    inner: Arc<Inner<V, C>>,
}

impl<V> NamespacedCache<V, SystemClock>
where
    V: Clone + Send + Sync + 'static,
{
    /// Create a cache on the system clock
    pub fn new(config: CacheConfig) -> Self {
        Self::with_clock(config, SystemClock)
    }
}

impl<V> Default for NamespacedCache<V, SystemClock>
where
    V: Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new(CacheConfig::default())
    }
}

impl<V, C> Clone for NamespacedCache<V, C> {
    fn clone(&self) -> Self {
        Self { inner: Arc::clone(&self.inner) }
    }
}

impl<V, C> fmt::Debug for NamespacedCache<V, C>
where
    V: Clone + Send + Sync + 'static,
    C: Clock,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NamespacedCache")
            .field("len", &self.len())
            .field("namespaces", &self.namespaces())
            .field("factories", &self.inner.factories.len())
            .finish()
    }
}

impl<V, C> NamespacedCache<V, C>
where
    V: Clone + Send + Sync + 'static,
    C: Clock,
{
    /// Create a cache reading time from `clock`
    pub fn with_clock(config: CacheConfig, clock: C) -> Self {
        Self {
            inner: Arc::new(Inner {
                store: CacheStore::new(&config, clock),
                factories: DashMap::new(),
            }),
        }
    }

    /// Live value for `key` in `namespace`
    ///
    /// # Errors
    /// [`CacheError::NotFound`] when absent or expired.
    pub fn get(&self, namespace: &str, key: &str) -> CacheResult<V> {
        self.try_get(namespace, key).ok_or_else(|| CacheError::not_found(key))
    }

    /// Insert or replace `key` in `namespace`
    ///
    /// # Errors
    /// [`CacheError::InvalidKey`] when `key` is blank.
    pub fn set(&self, namespace: &str, key: &str, value: V) -> CacheResult<()> {
        if is_blank(key) {
            return Err(CacheError::invalid_key("set"));
        }
        let store = &self.inner.store;
        store.store_value(map_key(namespace, key), namespace_arg(namespace), key, value, None);
        Ok(())
    }

    /// Live entry for `key`; on a miss the namespace's factory is started in
    /// the background and `None` is returned.
    pub fn get_info(&self, namespace: &str, key: &str) -> Option<CacheEntry<V>> {
        if is_blank(key) {
            return None;
        }
        match self.inner.store.lookup(&map_key(namespace, key), true) {
            Lookup::Hit(entry) => Some(entry),
            Lookup::Expired => None,
            Lookup::Missing => {
                self.spawn_resolution(namespace, key);
                None
            }
        }
    }

    /// Live entry for `key`, creating it with `init` on a miss
    pub fn get_info_with<F>(
        &self,
        namespace: &str,
        key: &str,
        init: F,
        expiration: Option<Duration>,
    ) -> Option<CacheEntry<V>>
    where
        F: FnOnce(&str) -> V,
    {
        if is_blank(key) {
            return None;
        }
        let composite = map_key(namespace, key);
        match self.inner.store.lookup(&composite, true) {
            Lookup::Hit(entry) => Some(entry),
            Lookup::Expired => None,
            Lookup::Missing => self.inner.store.store_value(
                composite,
                namespace_arg(namespace),
                key,
                init(key),
                expiration,
            ),
        }
    }

    /// Live entry for `key`, resolving a miss through the namespace's factory
    ///
    /// A freshly resolved entry uses `expiration` as its TTL override.
    ///
    /// # Errors
    /// [`CacheError::Factory`] when this caller ran the factory and it failed.
    pub async fn get_info_async(
        &self,
        namespace: &str,
        key: &str,
        expiration: Option<Duration>,
    ) -> CacheResult<Option<CacheEntry<V>>> {
        if is_blank(key) {
            return Ok(None);
        }
        let composite = map_key(namespace, key);
        match self.inner.store.lookup(&composite, true) {
            Lookup::Hit(entry) => Ok(Some(entry)),
            Lookup::Expired => Ok(None),
            Lookup::Missing => match self.factory(namespace) {
                Some(factory) => {
                    let ns = namespace_arg(namespace);
                    self.inner.store.resolve(&composite, ns, key, factory, expiration).await
                }
                None => Ok(None),
            },
        }
    }

    /// Live entry for `key`, awaiting `init` on a miss
    ///
    /// # Errors
    /// [`CacheError::Factory`] wrapping the initializer's error.
    pub async fn get_info_async_with<Fut, E>(
        &self,
        namespace: &str,
        key: &str,
        init: Fut,
        expiration: Option<Duration>,
    ) -> CacheResult<Option<CacheEntry<V>>>
    where
        Fut: Future<Output = Result<V, E>>,
        E: Into<FactoryError>,
    {
        if is_blank(key) {
            return Ok(None);
        }
        let composite = map_key(namespace, key);
        match self.inner.store.lookup(&composite, true) {
            Lookup::Hit(entry) => Ok(Some(entry)),
            Lookup::Expired => Ok(None),
            Lookup::Missing => {
                let ns = namespace_arg(namespace);
                self.inner.store.initialize(&composite, ns, key, init, expiration).await
            }
        }
    }

    /// Value for `key`, resolved through the namespace's factory
    ///
    /// # Errors
    /// [`CacheError::NotFound`] when no value could be produced, or
    /// [`CacheError::Factory`] when the factory failed.
    pub async fn get_async(
        &self,
        namespace: &str,
        key: &str,
        expiration: Option<Duration>,
    ) -> CacheResult<V> {
        self.get_info_async(namespace, key, expiration)
            .await?
            .map(CacheEntry::into_value)
            .ok_or_else(|| CacheError::not_found(key))
    }

    /// Value for `key`, awaiting `init` on a miss
    ///
    /// # Errors
    /// Same as [`get_async`](Self::get_async).
    pub async fn get_async_with<Fut, E>(
        &self,
        namespace: &str,
        key: &str,
        init: Fut,
        expiration: Option<Duration>,
    ) -> CacheResult<V>
    where
        Fut: Future<Output = Result<V, E>>,
        E: Into<FactoryError>,
    {
        self.get_info_async_with(namespace, key, init, expiration)
            .await?
            .map(CacheEntry::into_value)
            .ok_or_else(|| CacheError::not_found(key))
    }

    /// Resolve `key` through the namespace's factory, reporting a missing
    /// factory instead of an empty result.
    ///
    /// # Errors
    /// [`CacheError::NoFactory`] when nothing is registered for `namespace`,
    /// [`CacheError::Factory`] when the factory failed, or
    /// [`CacheError::NotFound`] when the produced entry was expired on arrival.
    pub async fn resolve(
        &self,
        namespace: &str,
        key: &str,
        expiration: Option<Duration>,
    ) -> CacheResult<CacheEntry<V>> {
        if is_blank(key) {
            return Err(CacheError::invalid_key("resolve"));
        }
        if let Some(entry) = self.try_get_info(namespace, key) {
            return Ok(entry);
        }
        let factory = self.factory(namespace).ok_or_else(|| CacheError::no_factory(namespace))?;
        let composite = map_key(namespace, key);
        self.inner
            .store
            .resolve(&composite, namespace_arg(namespace), key, factory, expiration)
            .await?
            .ok_or_else(|| CacheError::not_found(key))
    }

    /// Live value for `key` without consulting the factory
    pub fn try_get(&self, namespace: &str, key: &str) -> Option<V> {
        self.try_get_info(namespace, key).map(CacheEntry::into_value)
    }

    /// Live entry for `key` without consulting the factory
    pub fn try_get_info(&self, namespace: &str, key: &str) -> Option<CacheEntry<V>> {
        if is_blank(key) {
            return None;
        }
        self.inner.store.get_live(&map_key(namespace, key))
    }

    /// Insert or replace `key` in `namespace` with an optional per-entry TTL.
    ///
    /// A blank key is replaced with a generated one.
    pub fn add(
        &self,
        namespace: &str,
        key: &str,
        value: V,
        expiration: Option<Duration>,
    ) -> Option<CacheEntry<V>> {
        let now = self.inner.store.now();
        self.add_entry(CacheEntry::new(Some(namespace.to_owned()), key, value, now, expiration))
    }

    /// Insert or replace a prebuilt entry under its own namespace and key
    pub fn add_entry(&self, entry: CacheEntry<V>) -> Option<CacheEntry<V>> {
        let composite = map_key(entry.namespace().unwrap_or_default(), entry.key());
        self.inner.store.insert(composite, entry)
    }

    /// Insert or replace `key` with a backdated creation date
    pub fn add_at(
        &self,
        namespace: &str,
        key: &str,
        value: V,
        created_at: DateTime<Utc>,
        expiration: Option<Duration>,
    ) -> Option<CacheEntry<V>> {
        let now = self.inner.store.now();
        let ns = Some(namespace.to_owned());
        self.add_entry(CacheEntry::backdated(ns, key, value, created_at, now, expiration))
    }

    /// Whether `key` holds a live entry in `namespace`
    pub fn contains(&self, namespace: &str, key: &str) -> bool {
        !is_blank(key)
            && matches!(self.inner.store.lookup(&map_key(namespace, key), false), Lookup::Hit(_))
    }

    /// Whether any live entry in any namespace holds `value`
    pub fn contains_value(&self, value: &V) -> bool
    where
        V: PartialEq,
    {
        self.inner.store.any_live(|entry| entry.value() == value)
    }

    /// Remove `key` from `namespace`. Returns whether it was stored.
    pub fn remove(&self, namespace: &str, key: &str) -> bool {
        self.inner.store.remove(&map_key(namespace, key)).is_some()
    }

    /// Remove `entry` only if the stored entry holds an equal value
    pub fn remove_entry(&self, entry: &CacheEntry<V>) -> bool
    where
        V: PartialEq,
    {
        let composite = map_key(entry.namespace().unwrap_or_default(), entry.key());
        self.inner.store.remove_if(&composite, |stored| stored.value() == entry.value())
    }

    /// Remove every entry, in any namespace, matching `predicate`
    pub fn remove_all<F>(&self, predicate: F) -> usize
    where
        F: FnMut(&CacheEntry<V>) -> bool,
    {
        let removed = self.inner.store.remove_where(predicate);
        self.inner.store.remove_expired_auto();
        removed
    }

    /// Remove every entry holding `value`, in any namespace
    pub fn remove_value(&self, value: &V) -> usize
    where
        V: PartialEq,
    {
        self.remove_all(|entry| entry.value() == value)
    }

    /// Sweep expired entries in every namespace, then enforce the capacity bound
    pub fn remove_expired(&self, ttl_override: Option<Duration>) -> usize {
        self.inner.store.remove_expired(ttl_override)
    }

    /// Remove entries last updated before `date` in every namespace
    pub fn remove_before(&self, date: DateTime<Utc>) -> usize {
        self.inner.store.remove_before(date)
    }

    /// Remove the earliest-created entry across all namespaces
    pub fn remove_earliest(&self) -> Option<CacheEntry<V>> {
        self.inner.store.remove_earliest()
    }

    /// Refresh a live entry so its TTL restarts now
    pub fn touch(&self, namespace: &str, key: &str) -> bool {
        self.inner.store.touch(&map_key(namespace, key))
    }

    /// Register the factory for `namespace`, replacing any previous one
    pub fn register<F, Fut>(&self, namespace: &str, factory: F, timeout: Option<Duration>)
    where
        F: Fn(String) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<V, FactoryError>> + Send + 'static,
    {
        self.inner.factories.insert(namespace.to_owned(), FactoryInfo::new(factory, timeout));
        debug!(namespace, ?timeout, "factory registered");
    }

    /// Remove the factory for `namespace`. Returns whether one was registered.
    pub fn unregister(&self, namespace: &str) -> bool {
        self.inner.factories.remove(namespace).is_some()
    }

    /// Whether a factory is registered for `namespace`
    pub fn has_factory(&self, namespace: &str) -> bool {
        self.inner.factories.contains_key(namespace)
    }

    fn factory(&self, namespace: &str) -> Option<FactoryInfo<V>> {
        self.inner.factories.get(namespace).map(|info| info.value().clone())
    }

    fn spawn_resolution(&self, namespace: &str, key: &str) {
        let Some(factory) = self.factory(namespace) else {
            return;
        };
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            debug!(namespace, key, "no tokio runtime, skipping background resolution");
            return;
        };

        let cache = self.clone();
        let namespace = namespace.to_owned();
        let key = key.to_owned();
        handle.spawn(async move {
            let composite = map_key(&namespace, &key);
            let ns = namespace_arg(&namespace);
            if let Err(err) = cache.inner.store.resolve(&composite, ns, &key, factory, None).await {
                warn!(
                    namespace = %namespace,
                    key = %key,
                    error = %err,
                    "background resolution failed"
                );
            }
        });
    }

    /// Number of live entries across all namespaces
    pub fn len(&self) -> usize {
        self.inner.store.live_count(|_| true)
    }

    /// Number of live entries in `namespace`
    pub fn len_in(&self, namespace: &str) -> usize {
        self.inner.store.live_count(|entry| in_namespace(entry, namespace))
    }

    /// Whether no namespace holds a live entry
    pub fn is_empty(&self) -> bool {
        !self.inner.store.any_live(|_| true)
    }

    /// Snapshot of live entries across all namespaces
    pub fn to_vec(&self) -> Vec<CacheEntry<V>> {
        self.inner.store.live_entries(|_| true)
    }

    /// Snapshot of live entries in `namespace`
    pub fn to_vec_in(&self, namespace: &str) -> Vec<CacheEntry<V>> {
        self.inner.store.live_entries(|entry| in_namespace(entry, namespace))
    }

    /// Plain keys of live entries in `namespace`
    pub fn keys_in(&self, namespace: &str) -> Vec<String> {
        self.to_vec_in(namespace).iter().map(|entry| entry.key().to_owned()).collect()
    }

    /// Sorted namespaces that currently hold live entries (`""` for none)
    pub fn namespaces(&self) -> Vec<String> {
        self.to_vec()
            .iter()
            .map(|entry| entry.namespace().unwrap_or_default().to_owned())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    /// Remove every entry in every namespace
    pub fn clear(&self) {
        self.inner.store.clear();
    }

    /// Remove every entry in `namespace`, returning how many were removed
    pub fn clear_in(&self, namespace: &str) -> usize {
        let removed = self.inner.store.remove_where(|entry| in_namespace(entry, namespace));
        self.inner.store.remove_expired_auto();
        removed
    }

    /// Capacity bound across all namespaces, if any
    pub fn max_count(&self) -> Option<usize> {
        self.inner.store.max_count()
    }

    /// Change the capacity bound. Takes effect on the next sweep.
    pub fn set_max_count(&self, max_count: Option<usize>) {
        self.inner.store.set_max_count(max_count);
    }

    /// Cache-wide TTL, if any
    pub fn expiration(&self) -> Option<Duration> {
        self.inner.store.expiration()
    }

    /// Change the cache-wide TTL. Applies to existing entries too.
    pub fn set_expiration(&self, expiration: Option<Duration>) {
        self.inner.store.set_expiration(expiration);
    }

    /// Current statistics
    pub fn stats(&self) -> CacheStats {
        self.inner.store.stats()
    }

    /// Zero the statistics counters
    pub fn reset_stats(&self) {
        self.inner.store.reset_stats();
    }

    /// Number of keys with a factory resolution in flight
    pub fn in_flight(&self) -> usize {
        self.inner.store.in_flight()
    }

    /// Sweep all namespaces every `period` on the current tokio runtime
    ///
    /// # Errors
    /// [`CacheError::Runtime`] outside a tokio runtime, or
    /// [`CacheError::Config`] for a zero `period`.
    pub fn spawn_sweeper(&self, period: Duration) -> CacheResult<Sweeper> {
        Sweeper::spawn(Arc::downgrade(&self.inner), period, |inner| {
            inner.store.remove_expired(None)
        })
    }
}
