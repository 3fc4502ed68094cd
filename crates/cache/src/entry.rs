//! Cache entry with expiration metadata
//!
//! A [`CacheEntry`] pairs an immutable value with the timestamps used for
//! expiration (`update_date`) and eviction ordering (`creation_date`).
//! Replacing a value means constructing a new entry; only the update date is
//! ever mutated in place.

use std::any::Any;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use uuid::Uuid;

/// Free-form user metadata attached to an entry
pub type Tag = Arc<dyn Any + Send + Sync>;

/// A cached value and its metadata.
///
/// # Example
/// ```
/// use std::time::Duration;
///
/// use chrono::Utc;
/// use stashline_cache::CacheEntry;
///
/// let now = Utc::now();
/// let entry = CacheEntry::new(None, "user:1", 42, now, Some(Duration::from_secs(60)));
///
/// assert!(!entry.is_expired_at(now, None));
/// assert!(entry.is_expired_at(now + chrono::Duration::seconds(60), None));
/// ```
#[derive(Clone)]
pub struct CacheEntry<V> {
    key: String,
    namespace: Option<String>,
    value: V,
    creation_date: DateTime<Utc>,
    update_date: DateTime<Utc>,
    expiration: Option<Duration>,
    tag: Option<Tag>,
}

impl<V> CacheEntry<V> {
    /// Create an entry created and updated at `at`.
    ///
    /// A blank key (empty or whitespace) is replaced with a random UUID so
    /// the entry can always be indexed.
    pub fn new(
        namespace: Option<String>,
        key: impl Into<String>,
        value: V,
        at: DateTime<Utc>,
        expiration: Option<Duration>,
    ) -> Self {
        let key = key.into();
        let key = if key.trim().is_empty() { Uuid::new_v4().to_string() } else { key };

        Self {
            key,
            namespace: namespace.filter(|ns| !ns.is_empty()),
            value,
            creation_date: at,
            update_date: at,
            expiration,
            tag: None,
        }
    }

    /// Create an entry whose creation date is backdated to `created_at`.
    ///
    /// A `created_at` later than `now` is clamped to `now`. The update date is
    /// always `now`.
    pub fn backdated(
        namespace: Option<String>,
        key: impl Into<String>,
        value: V,
        created_at: DateTime<Utc>,
        now: DateTime<Utc>,
        expiration: Option<Duration>,
    ) -> Self {
        let mut entry = Self::new(namespace, key, value, now, expiration);
        entry.creation_date = created_at.min(now);
        entry
    }

    /// Attach user metadata
    pub fn with_tag(mut self, tag: Tag) -> Self {
        self.tag = Some(tag);
        self
    }

    /// Entry key (never blank)
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Namespace, `None` when the entry is not namespaced
    pub fn namespace(&self) -> Option<&str> {
        self.namespace.as_deref()
    }

    /// Cached value
    pub fn value(&self) -> &V {
        &self.value
    }

    /// Consume the entry and return its value
    pub fn into_value(self) -> V {
        self.value
    }

    /// When the entry (or the first entry stored under its key) was created
    pub fn creation_date(&self) -> DateTime<Utc> {
        self.creation_date
    }

    /// Expiration anchor, refreshed by [`force_extend_to_now`](Self::force_extend_to_now)
    pub fn update_date(&self) -> DateTime<Utc> {
        self.update_date
    }

    /// Per-entry TTL override
    pub fn expiration(&self) -> Option<Duration> {
        self.expiration
    }

    /// User metadata
    pub fn tag(&self) -> Option<&Tag> {
        self.tag.as_ref()
    }

    /// Returns whether the entry is expired at `now`.
    ///
    /// The per-entry TTL wins over `cache_ttl`. With neither present the
    /// entry never expires.
    pub fn is_expired_at(&self, now: DateTime<Utc>, cache_ttl: Option<Duration>) -> bool {
        match self.expired_date(cache_ttl) {
            Some(expires) => now >= expires,
            None => false,
        }
    }

    /// [`is_expired_at`](Self::is_expired_at) against the system clock
    pub fn is_expired(&self, cache_ttl: Option<Duration>) -> bool {
        self.is_expired_at(Utc::now(), cache_ttl)
    }

    /// `update_date + (expiration ?? fallback_ttl)`, or `None` if neither TTL is set
    pub fn expired_date(&self, fallback_ttl: Option<Duration>) -> Option<DateTime<Utc>> {
        self.expiration.or(fallback_ttl).map(|ttl| add_duration(self.update_date, ttl))
    }

    /// Reset the TTL clock to `now` without touching the value
    pub fn force_extend_to(&mut self, now: DateTime<Utc>) {
        self.update_date = now;
    }

    /// [`force_extend_to`](Self::force_extend_to) with the system clock
    pub fn force_extend_to_now(&mut self) {
        self.force_extend_to(Utc::now());
    }

    /// Carry the creation date of the entry being replaced.
    pub(crate) fn inherit_creation(&mut self, previous: &CacheEntry<V>) {
        self.creation_date = previous.creation_date;
    }
}

impl<V: fmt::Debug> fmt::Debug for CacheEntry<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheEntry")
            .field("key", &self.key)
            .field("namespace", &self.namespace)
            .field("value", &self.value)
            .field("creation_date", &self.creation_date)
            .field("update_date", &self.update_date)
            .field("expiration", &self.expiration)
            .field("tagged", &self.tag.is_some())
            .finish()
    }
}

/// Saturating `DateTime + std::time::Duration`
pub(crate) fn add_duration(at: DateTime<Utc>, ttl: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(ttl)
        .ok()
        .and_then(|ttl| at.checked_add_signed(ttl))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}
