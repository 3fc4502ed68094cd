//! Cache configuration types and builder patterns
//!
//! This module provides configuration types for customizing cache behavior:
//! the cache-wide TTL, the soft capacity bound and metrics collection.
//! Configurations can be built in code or loaded from TOML:
//!
//! ```toml
//! max_count = 1000
//! expiration_ms = 300000
//! track_metrics = true
//! ```

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::CacheResult;

/// Configuration for cache behavior
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Soft capacity (None = unlimited). When exceeded, a sweep evicts the
    /// earliest-created entries; `Some(0)` makes every sweep clear the cache.
    pub max_count: Option<usize>,

    /// Cache-wide time-to-live (None = entries only expire through their own
    /// per-entry TTL)
    #[serde(rename = "expiration_ms", with = "duration_millis_opt")]
    pub expiration: Option<Duration>,

    /// Whether to collect hit/miss/eviction statistics
    pub track_metrics: bool,
}

impl CacheConfig {
    /// Create a new configuration builder
    pub fn builder() -> CacheConfigBuilder {
        CacheConfigBuilder::default()
    }

    /// Quick preset for a TTL-only cache
    ///
    /// # Example
    /// ```
    /// use std::time::Duration;
    ///
    /// use stashline_cache::CacheConfig;
    ///
    /// let config = CacheConfig::ttl(Duration::from_secs(3600));
    /// assert_eq!(config.max_count, None);
    /// ```
    pub fn ttl(duration: Duration) -> Self {
        Self { max_count: None, expiration: Some(duration), track_metrics: false }
    }

    /// Quick preset for a capacity-bounded cache without TTL
    pub fn bounded(max_count: usize) -> Self {
        Self { max_count: Some(max_count), expiration: None, track_metrics: false }
    }

    /// Combined TTL + capacity bound
    pub fn ttl_bounded(ttl: Duration, max_count: usize) -> Self {
        Self { max_count: Some(max_count), expiration: Some(ttl), track_metrics: false }
    }

    /// Parse a configuration from TOML text
    ///
    /// Missing keys fall back to [`CacheConfig::default`].
    pub fn from_toml_str(text: &str) -> CacheResult<Self> {
        Ok(toml::from_str(text)?)
    }

    /// Read and parse a TOML configuration file
    pub fn from_toml_file(path: impl AsRef<Path>) -> CacheResult<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }
}

/// Builder for CacheConfig with fluent API
#[derive(Debug, Default)]
pub struct CacheConfigBuilder {
    config: CacheConfig,
}

impl CacheConfigBuilder {
    /// Create a new builder with default settings
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the soft capacity
    pub fn max_count(mut self, count: usize) -> Self {
        self.config.max_count = Some(count);
        self
    }

    /// Set the cache-wide time-to-live
    pub fn expiration(mut self, duration: Duration) -> Self {
        self.config.expiration = Some(duration);
        self
    }

    /// Enable or disable metrics tracking
    pub fn track_metrics(mut self, enabled: bool) -> Self {
        self.config.track_metrics = enabled;
        self
    }

    /// Build the configuration
    pub fn build(self) -> CacheConfig {
        self.config
    }
}

/// Serialize `Option<Duration>` as optional milliseconds
mod duration_millis_opt {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(duration: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match duration {
            Some(d) => serializer.serialize_some(&(d.as_millis() as u64)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
    where
        D: Deserializer<'de>,
    {
        Ok(Option::<u64>::deserialize(deserializer)?.map(Duration::from_millis))
    }
}

#[cfg(test)]
mod tests {
    //! Unit tests for cache::config.
    use super::*;

    /// Validates `CacheConfig::default` behavior.
    ///
    /// Assertions:
    /// - Ensures `config.max_count.is_none()` evaluates to true.
    /// - Ensures `config.expiration.is_none()` evaluates to true.
    /// - Ensures `!config.track_metrics` evaluates to true.
    #[test]
    fn test_cache_config_default() {
        let config = CacheConfig::default();
        assert!(config.max_count.is_none());
        assert!(config.expiration.is_none());
        assert!(!config.track_metrics);
    }

    /// Validates the preset constructors.
    #[test]
    fn test_cache_config_presets() {
        let ttl = Duration::from_secs(3600);

        assert_eq!(CacheConfig::ttl(ttl).expiration, Some(ttl));
        assert_eq!(CacheConfig::bounded(10).max_count, Some(10));

        let both = CacheConfig::ttl_bounded(ttl, 1000);
        assert_eq!(both.max_count, Some(1000));
        assert_eq!(both.expiration, Some(ttl));
    }

    /// Validates `CacheConfig::builder` behavior.
    ///
    /// Assertions:
    /// - Confirms `config.max_count` equals `Some(500)`.
    /// - Confirms `config.expiration` equals `Some(Duration::from_secs(1800))`.
    /// - Ensures `config.track_metrics` evaluates to true.
    #[test]
    fn test_cache_config_builder() {
        let config = CacheConfig::builder()
            .max_count(500)
            .expiration(Duration::from_secs(1800))
            .track_metrics(true)
            .build();

        assert_eq!(config.max_count, Some(500));
        assert_eq!(config.expiration, Some(Duration::from_secs(1800)));
        assert!(config.track_metrics);
    }

    /// Validates TOML parsing with all keys present.
    #[test]
    fn test_from_toml_str_full() {
        let config = CacheConfig::from_toml_str(
            "max_count = 3\nexpiration_ms = 1500\ntrack_metrics = true\n",
        )
        .unwrap();

        assert_eq!(config.max_count, Some(3));
        assert_eq!(config.expiration, Some(Duration::from_millis(1500)));
        assert!(config.track_metrics);
    }

    /// Validates missing TOML keys fall back to defaults.
    #[test]
    fn test_from_toml_str_partial() {
        let config = CacheConfig::from_toml_str("track_metrics = true").unwrap();
        assert_eq!(config.max_count, None);
        assert_eq!(config.expiration, None);
    }

    /// Validates malformed TOML is reported as a configuration error.
    #[test]
    fn test_from_toml_str_invalid() {
        let err = CacheConfig::from_toml_str("max_count = \"many\"").unwrap_err();
        assert!(matches!(err, crate::CacheError::Config { .. }));
    }

    /// Validates loading from a file on disk.
    #[test]
    fn test_from_toml_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache.toml");
        std::fs::write(&path, "max_count = 7\nexpiration_ms = 60000\n").unwrap();

        let config = CacheConfig::from_toml_file(&path).unwrap();
        assert_eq!(config, CacheConfig::ttl_bounded(Duration::from_secs(60), 7));
    }

    /// Validates serialization writes durations as milliseconds.
    #[test]
    fn test_to_toml_round_trip_shape() {
        let config = CacheConfig::ttl(Duration::from_secs(2));
        let text = toml::to_string(&config).unwrap();
        assert!(text.contains("expiration_ms = 2000"));
    }
}
