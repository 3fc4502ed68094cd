//! Thread-safe keyed TTL cache with single-flight value resolution.
//!
//! The crate provides two cache flavours over the same storage engine:
//!
//! - [`KeyedCache`]: string keys, one registered factory
//! - [`NamespacedCache`]: keys partitioned by namespace, one factory per
//!   namespace
//!
//! # Features
//!
//! - **Thread-safe**: `DashMap` storage behind a cheaply cloneable handle
//! - **TTL support**: cache-wide TTL with per-entry overrides, expired lazily
//!   on access and in bulk by sweeps
//! - **Bounded size**: optional soft capacity that evicts the
//!   earliest-created entries
//! - **Single-flight**: concurrent misses on one key run the factory once
//! - **Testable**: [`Clock`] abstraction with a [`MockClock`] for
//!   deterministic time
//! - **Metrics**: optional hit/miss/eviction/factory statistics
//!
//! # Examples
//!
//! ## TTL cache
//! ```
//! use std::time::Duration;
//!
//! use stashline_cache::{CacheConfig, KeyedCache};
//!
//! let cache: KeyedCache<String> = KeyedCache::new(CacheConfig::ttl(Duration::from_secs(300)));
//! cache.set("session", "data".to_string()).unwrap();
//! assert_eq!(cache.get("session").unwrap(), "data");
//! ```
//!
//! ## Namespaces
//! ```
//! use stashline_cache::{CacheConfig, NamespacedCache};
//!
//! let cache: NamespacedCache<u32> = NamespacedCache::new(CacheConfig::bounded(1000));
//! cache.set("users", "1", 10).unwrap();
//! cache.set("orders", "1", 20).unwrap();
//!
//! assert_eq!(cache.get("users", "1").unwrap(), 10);
//! assert_eq!(cache.len_in("orders"), 1);
//! ```

#![forbid(unsafe_code)]
#![warn(rust_2018_idioms)]
#![warn(clippy::all, clippy::perf, clippy::complexity, clippy::suspicious)]

pub mod clock;
pub mod config;
mod coordinator;
pub mod entry;
pub mod error;
mod factory;
pub mod keyed;
pub mod namespaced;
pub mod stats;
mod store;
pub mod sweeper;
pub mod utils;

pub use clock::{Clock, MockClock, SystemClock};
pub use config::{CacheConfig, CacheConfigBuilder};
pub use entry::{CacheEntry, Tag};
pub use error::{CacheError, CacheResult, ErrorClassification, ErrorSeverity, FactoryError};
pub use factory::FactoryFuture;
pub use keyed::KeyedCache;
pub use namespaced::NamespacedCache;
pub use stats::CacheStats;
pub use sweeper::Sweeper;
pub use utils::{CacheHealth, CacheHealthReport};
