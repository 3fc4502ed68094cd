//! Keyed TTL cache with single-flight factory resolution
//!
//! [`KeyedCache`] is a cloneable handle over shared storage. Values are
//! looked up by string key, expire lazily on access, and are removed in bulk
//! by sweeps that run after mutations (throttled by the cache-wide TTL) or by
//! a background [`Sweeper`].
//!
//! A missing key can be filled three ways:
//! - a synchronous initializer passed to [`KeyedCache::get_info_with`]
//! - an async initializer passed to [`KeyedCache::get_info_async_with`]
//! - the registered factory, which runs at most once per key across
//!   concurrent callers of [`KeyedCache::get_info_async`]
//!
//! # Example
//! ```
//! use std::time::Duration;
//!
//! use stashline_cache::{CacheConfig, FactoryError, KeyedCache};
//!
//! # tokio_test::block_on(async {
//! let cache = KeyedCache::new(CacheConfig::ttl(Duration::from_secs(60)));
//! cache.register(|key: String| async move { Ok::<_, FactoryError>(key.len()) }, None);
//!
//! assert_eq!(cache.get_async("hello", None).await.unwrap(), 5);
//! assert_eq!(cache.try_get("hello"), Some(5));
//! # });
//! ```

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use tracing::{debug, warn};

use crate::clock::{Clock, SystemClock};
use crate::config::CacheConfig;
use crate::entry::CacheEntry;
use crate::error::{CacheError, CacheResult, FactoryError};
use crate::factory::FactoryInfo;
use crate::stats::CacheStats;
use crate::store::{CacheStore, Lookup};
use crate::sweeper::Sweeper;

fn is_blank(key: &str) -> bool {
    key.trim().is_empty()
}

struct Inner<V, C> {
    store: CacheStore<V, C>,
    factory: RwLock<Option<FactoryInfo<V>>>,
}

/// Thread-safe keyed TTL cache
///
/// Cloning is cheap and clones share storage, settings and the registered
/// factory.
pub struct KeyedCache<V, C = SystemClock> {
    inner: Arc<Inner<V, C>>,
}

impl<V> KeyedCache<V, SystemClock>
where
    V: Clone + Send + Sync + 'static,
{
    /// Create a cache driven by the system clock
    pub fn new(config: CacheConfig) -> Self {
        Self::with_clock(config, SystemClock)
    }
}

impl<V> Default for KeyedCache<V, SystemClock>
where
    V: Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new(CacheConfig::default())
    }
}

impl<V, C> Clone for KeyedCache<V, C> {
    fn clone(&self) -> Self {
        Self { inner: Arc::clone(&self.inner) }
    }
}

impl<V, C> fmt::Debug for KeyedCache<V, C>
where
    V: Clone + Send + Sync + 'static,
    C: Clock,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyedCache")
            .field("len", &self.len())
            .field("max_count", &self.max_count())
            .field("expiration", &self.expiration())
            .field("has_factory", &self.has_factory())
            .finish()
    }
}

impl<V, C> KeyedCache<V, C>
where
    V: Clone + Send + Sync + 'static,
    C: Clock,
{
    /// Create a cache driven by `clock`
    pub fn with_clock(config: CacheConfig, clock: C) -> Self {
        Self {
            inner: Arc::new(Inner {
                store: CacheStore::new(&config, clock),
                factory: RwLock::new(None),
            }),
        }
    }

    // Reads

    /// Live value for `key`
    ///
    /// # Errors
    /// [`CacheError::NotFound`] when the key is absent or expired. The
    /// registered factory is not consulted.
    pub fn get(&self, key: &str) -> CacheResult<V> {
        self.try_get(key).ok_or_else(|| CacheError::not_found(key))
    }

    /// Insert or replace the value for `key`
    ///
    /// # Errors
    /// [`CacheError::InvalidKey`] when `key` is blank.
    pub fn set(&self, key: &str, value: V) -> CacheResult<()> {
        if is_blank(key) {
            return Err(CacheError::invalid_key("set"));
        }
        self.inner.store.store_value(key.to_owned(), None, key, value, None);
        Ok(())
    }

    /// Live entry for `key`.
    ///
    /// An expired entry is removed and `None` returned. When nothing is
    /// stored and a factory is registered, a resolution is started in the
    /// background on the current tokio runtime and `None` is returned
    /// immediately; use [`get_info_async`](Self::get_info_async) to wait.
    pub fn get_info(&self, key: &str) -> Option<CacheEntry<V>> {
        if is_blank(key) {
            return None;
        }
        match self.inner.store.lookup(key, true) {
            Lookup::Hit(entry) => Some(entry),
            Lookup::Expired => None,
            Lookup::Missing => {
                self.spawn_resolution(key);
                None
            }
        }
    }

    /// Live entry for `key`, creating it with `init` when nothing is stored.
    ///
    /// The new entry uses `expiration` as its TTL override. If it would be
    /// expired on arrival it is discarded and `None` is returned.
    pub fn get_info_with<F>(
        &self,
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
        match self.inner.store.lookup(key, true) {
            Lookup::Hit(entry) => Some(entry),
            Lookup::Expired => None,
            Lookup::Missing => {
                self.inner.store.store_value(key.to_owned(), None, key, init(key), expiration)
            }
        }
    }

    /// Live entry for `key`, resolving a missing one through the registered
    /// factory.
    ///
    /// Concurrent callers for the same key share one factory execution. A
    /// freshly resolved entry uses `expiration` as its TTL override.
    /// Returns `Ok(None)` when no factory is registered.
    ///
    /// # Errors
    /// [`CacheError::Factory`] when this caller ran the factory and it failed.
    pub async fn get_info_async(
        &self,
        key: &str,
        expiration: Option<Duration>,
    ) -> CacheResult<Option<CacheEntry<V>>> {
        if is_blank(key) {
            return Ok(None);
        }
        match self.inner.store.lookup(key, true) {
            Lookup::Hit(entry) => Ok(Some(entry)),
            Lookup::Expired => Ok(None),
            Lookup::Missing => match self.factory() {
                Some(factory) => {
                    self.inner.store.resolve(key, None, key, factory, expiration).await
                }
                None => Ok(None),
            },
        }
    }

    /// Live entry for `key`, awaiting `init` when nothing is stored.
    ///
    /// `init` is not polled on a hit. It bypasses the single-flight
    /// coordinator.
    ///
    /// # Errors
    /// [`CacheError::Factory`] wrapping the initializer's error.
    pub async fn get_info_async_with<Fut, E>(
        &self,
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
        match self.inner.store.lookup(key, true) {
            Lookup::Hit(entry) => Ok(Some(entry)),
            Lookup::Expired => Ok(None),
            Lookup::Missing => {
                self.inner.store.initialize(key, None, key, init, expiration).await
            }
        }
    }

    /// Value for `key`, resolving it through the registered factory
    ///
    /// # Errors
    /// [`CacheError::NotFound`] when no value could be produced, or
    /// [`CacheError::Factory`] when the factory failed.
    pub async fn get_async(&self, key: &str, expiration: Option<Duration>) -> CacheResult<V> {
        self.get_info_async(key, expiration)
            .await?
            .map(CacheEntry::into_value)
            .ok_or_else(|| CacheError::not_found(key))
    }

    /// Value for `key`, awaiting `init` when nothing is stored
    ///
    /// # Errors
    /// Same as [`get_async`](Self::get_async).
    pub async fn get_async_with<Fut, E>(
        &self,
        key: &str,
        init: Fut,
        expiration: Option<Duration>,
    ) -> CacheResult<V>
    where
        Fut: Future<Output = Result<V, E>>,
        E: Into<FactoryError>,
    {
        self.get_info_async_with(key, init, expiration)
            .await?
            .map(CacheEntry::into_value)
            .ok_or_else(|| CacheError::not_found(key))
    }

    /// Live value for `key` without consulting the factory
    pub fn try_get(&self, key: &str) -> Option<V> {
        self.try_get_info(key).map(CacheEntry::into_value)
    }

    /// Live entry for `key` without consulting the factory
    pub fn try_get_info(&self, key: &str) -> Option<CacheEntry<V>> {
        if is_blank(key) {
            return None;
        }
        self.inner.store.get_live(key)
    }

    // Writes

    /// Insert or replace `key` with an optional per-entry TTL.
    ///
    /// A blank key is replaced with a generated one; read it back from the
    /// returned entry. Returns `None` if the entry was expired on arrival.
    pub fn add(
        &self,
        key: &str,
        value: V,
        expiration: Option<Duration>,
    ) -> Option<CacheEntry<V>> {
        let entry = CacheEntry::new(None, key, value, self.inner.store.now(), expiration);
        self.add_entry(entry)
    }

    /// Insert or replace a prebuilt entry under its own key
    pub fn add_entry(&self, entry: CacheEntry<V>) -> Option<CacheEntry<V>> {
        self.inner.store.insert(entry.key().to_owned(), entry)
    }

    /// Insert or replace `key` with a backdated creation date.
    ///
    /// Backdating makes the entry an earlier candidate for capacity eviction.
    /// When the key already exists its original creation date wins.
    pub fn add_at(
        &self,
        key: &str,
        value: V,
        created_at: DateTime<Utc>,
        expiration: Option<Duration>,
    ) -> Option<CacheEntry<V>> {
        let now = self.inner.store.now();
        self.add_entry(CacheEntry::backdated(None, key, value, created_at, now, expiration))
    }

    /// Whether a live entry exists for `key` (removes it if expired)
    pub fn contains(&self, key: &str) -> bool {
        !is_blank(key) && matches!(self.inner.store.lookup(key, false), Lookup::Hit(_))
    }

    /// Whether any live entry holds `value`
    pub fn contains_value(&self, value: &V) -> bool
    where
        V: PartialEq,
    {
        self.inner.store.any_live(|entry| entry.value() == value)
    }

    // Removal

    /// Remove `key`. Returns whether anything was removed.
    pub fn remove(&self, key: &str) -> bool {
        self.inner.store.remove(key).is_some()
    }

    /// Remove `entry` only if the stored entry under its key holds an equal value
    pub fn remove_entry(&self, entry: &CacheEntry<V>) -> bool
    where
        V: PartialEq,
    {
        self.inner.store.remove_if(entry.key(), |stored| stored.value() == entry.value())
    }

    /// Remove every entry matching `predicate`
    pub fn remove_all<F>(&self, predicate: F) -> usize
    where
        F: FnMut(&CacheEntry<V>) -> bool,
    {
        let removed = self.inner.store.remove_where(predicate);
        self.inner.store.remove_expired_auto();
        removed
    }

    /// Remove every entry holding `value`
    pub fn remove_value(&self, value: &V) -> usize
    where
        V: PartialEq,
    {
        self.remove_all(|entry| entry.value() == value)
    }

    /// Sweep expired entries, then evict the earliest-created entries down
    /// to the capacity bound.
    ///
    /// `ttl_override` replaces the cache-wide TTL for this sweep only.
    pub fn remove_expired(&self, ttl_override: Option<Duration>) -> usize {
        self.inner.store.remove_expired(ttl_override)
    }

    /// Remove entries last updated before `date`, plus anything expired
    pub fn remove_before(&self, date: DateTime<Utc>) -> usize {
        self.inner.store.remove_before(date)
    }

    /// Remove and return the entry with the earliest creation date
    pub fn remove_earliest(&self) -> Option<CacheEntry<V>> {
        self.inner.store.remove_earliest()
    }

    /// Reset the TTL clock of a live entry. Returns `false` if `key` is not live.
    pub fn touch(&self, key: &str) -> bool {
        self.inner.store.touch(key)
    }

    // Factory

    /// Register the factory used to resolve missing keys, replacing any
    /// previous one.
    ///
    /// `timeout` bounds how long a caller waits for a concurrent resolution
    /// of the same key before running the factory itself.
    pub fn register<F, Fut>(&self, factory: F, timeout: Option<Duration>)
    where
        F: Fn(String) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<V, FactoryError>> + Send + 'static,
    {
        *self.inner.factory.write() = Some(FactoryInfo::new(factory, timeout));
        debug!(?timeout, "factory registered");
    }

    /// Remove the registered factory. Returns whether one was registered.
    pub fn unregister(&self) -> bool {
        self.inner.factory.write().take().is_some()
    }

    /// Whether a factory is registered
    pub fn has_factory(&self) -> bool {
        self.inner.factory.read().is_some()
    }

    fn factory(&self) -> Option<FactoryInfo<V>> {
        self.inner.factory.read().clone()
    }

    fn spawn_resolution(&self, key: &str) {
        let Some(factory) = self.factory() else {
            return;
        };
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            debug!(key, "no tokio runtime, skipping background resolution");
            return;
        };

        let cache = self.clone();
        let key = key.to_owned();
        handle.spawn(async move {
            if let Err(err) = cache.inner.store.resolve(&key, None, &key, factory, None).await {
                warn!(key = %key, error = %err, "background resolution failed");
            }
        });
    }

    // Snapshots

    /// Number of live entries
    pub fn len(&self) -> usize {
        self.inner.store.live_count(|_| true)
    }

    /// Whether there are no live entries
    pub fn is_empty(&self) -> bool {
        !self.inner.store.any_live(|_| true)
    }

    /// Snapshot of live entries
    pub fn to_vec(&self) -> Vec<CacheEntry<V>> {
        self.inner.store.live_entries(|_| true)
    }

    /// Snapshot of live values by key
    pub fn to_map(&self) -> HashMap<String, V> {
        self.to_vec()
            .into_iter()
            .map(|entry| (entry.key().to_owned(), entry.into_value()))
            .collect()
    }

    /// Keys of live entries
    pub fn keys(&self) -> Vec<String> {
        self.to_vec().iter().map(|entry| entry.key().to_owned()).collect()
    }

    /// Values of live entries
    pub fn values(&self) -> Vec<V> {
        self.to_vec().into_iter().map(CacheEntry::into_value).collect()
    }

    /// Iterate over a snapshot of live entries
    pub fn iter(&self) -> std::vec::IntoIter<CacheEntry<V>> {
        self.to_vec().into_iter()
    }

    /// Remove every entry
    pub fn clear(&self) {
        self.inner.store.clear();
    }

    // Settings and monitoring

    /// Capacity bound, if any
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

    /// Current statistics (counters stay at zero unless metrics are tracked)
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

    /// Run [`remove_expired`](Self::remove_expired) every `period` on the
    /// current tokio runtime.
    ///
    /// The sweeper holds a weak reference and stops by itself once every
    /// cache handle is dropped.
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

impl<'a, V, C> IntoIterator for &'a KeyedCache<V, C>
where
    V: Clone + Send + Sync + 'static,
    C: Clock,
{
    type Item = CacheEntry<V>;
    type IntoIter = std::vec::IntoIter<CacheEntry<V>>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}
