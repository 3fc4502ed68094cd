//! Error types for cache operations
//!
//! Everything the cache can surface to a caller is a [`CacheError`]:
//!
//! | Situation | Variant |
//! |-----------|---------|
//! | Throwing accessor found no live value | `NotFound` |
//! | Caller supplied a blank key | `InvalidKey` |
//! | Registered factory or initializer failed | `Factory` |
//! | Namespace has no factory registered | `NoFactory` |
//! | Configuration could not be read or parsed | `Config` |
//! | Background work requested outside a tokio runtime | `Runtime` |
//!
//! Races inside the single-flight coordinator (acquisition timeouts, slots
//! abandoned by a cancelled task) are recovered where they happen and are
//! never turned into a `CacheError`.
//!
//! ## ErrorClassification
//!
//! [`CacheError`] implements [`ErrorClassification`] so callers can make
//! retry and alerting decisions without matching on variants:
//!
//! ```
//! use stashline_cache::{CacheError, ErrorClassification, ErrorSeverity};
//!
//! let err = CacheError::not_found("session:42");
//! assert!(!err.is_retryable());
//! assert_eq!(err.severity(), ErrorSeverity::Info);
//! ```

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

/// Boxed error returned by factories and async initializers.
pub type FactoryError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Standard result type for cache operations
pub type CacheResult<T> = Result<T, CacheError>;

/// Errors surfaced by [`KeyedCache`](crate::KeyedCache) and
/// [`NamespacedCache`](crate::NamespacedCache).
#[derive(Debug, Clone, Error)]
pub enum CacheError {
    /// No live value exists for the key and nothing could produce one
    #[error("Cache key not found: '{key}'")]
    NotFound {
        /// Key that was looked up
        key: String,
    },

    /// A blank (empty or whitespace) key was passed to an operation that
    /// requires a caller-supplied key
    #[error("Invalid cache key for '{operation}': key must not be empty or whitespace")]
    InvalidKey {
        /// Operation that rejected the key
        operation: &'static str,
    },

    /// The factory or initializer that was executed for `key` failed
    #[error("Factory failed for key '{key}': {source}")]
    Factory {
        /// Key being resolved
        key: String,
        /// Error returned by the factory
        #[source]
        source: Arc<dyn std::error::Error + Send + Sync + 'static>,
    },

    /// No factory is registered for the namespace
    #[error("No factory registered for namespace '{namespace}'")]
    NoFactory {
        /// Namespace without a factory
        namespace: String,
    },

    /// Configuration could not be loaded
    #[error("Configuration error: {message}")]
    Config {
        /// What was wrong
        message: String,
    },

    /// A tokio runtime was required but none is running
    #[error("Runtime error: {message}")]
    Runtime {
        /// What was missing
        message: String,
    },
}

impl CacheError {
    /// Create a not found error
    pub fn not_found<K: Into<String>>(key: K) -> Self {
        Self::NotFound { key: key.into() }
    }

    /// Create an invalid key error for the named operation
    pub fn invalid_key(operation: &'static str) -> Self {
        Self::InvalidKey { operation }
    }

    /// Wrap a factory failure
    pub fn factory<K: Into<String>>(key: K, source: FactoryError) -> Self {
        Self::Factory { key: key.into(), source: Arc::from(source) }
    }

    /// Create a missing-factory error
    pub fn no_factory<N: Into<String>>(namespace: N) -> Self {
        Self::NoFactory { namespace: namespace.into() }
    }

    /// Create a configuration error
    pub fn config<S: Into<String>>(message: S) -> Self {
        Self::Config { message: message.into() }
    }

    /// Create a runtime error
    pub fn runtime<S: Into<String>>(message: S) -> Self {
        Self::Runtime { message: message.into() }
    }

    /// Returns `true` for the ordinary miss case
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// Convert error to structured logging fields
    pub fn as_tracing_fields(&self) -> Vec<(&'static str, String)> {
        let mut fields = vec![("error_type", self.error_type_name().to_string())];

        match self {
            Self::NotFound { key } => fields.push(("key", key.clone())),
            Self::InvalidKey { operation } => fields.push(("operation", (*operation).to_string())),
            Self::Factory { key, source } => {
                fields.push(("key", key.clone()));
                fields.push(("source", source.to_string()));
            }
            Self::NoFactory { namespace } => fields.push(("namespace", namespace.clone())),
            Self::Config { message } | Self::Runtime { message } => {
                fields.push(("message", message.clone()));
            }
        }

        fields
    }

    fn error_type_name(&self) -> &'static str {
        match self {
            Self::NotFound { .. } => "not_found",
            Self::InvalidKey { .. } => "invalid_key",
            Self::Factory { .. } => "factory",
            Self::NoFactory { .. } => "no_factory",
            Self::Config { .. } => "config",
            Self::Runtime { .. } => "runtime",
        }
    }
}

impl ErrorClassification for CacheError {
    fn is_retryable(&self) -> bool {
        // Failed resolutions are not cached, so the next call runs the factory again.
        matches!(self, Self::Factory { .. })
    }

    fn severity(&self) -> ErrorSeverity {
        match self {
            Self::NotFound { .. } => ErrorSeverity::Info,
            Self::InvalidKey { .. } => ErrorSeverity::Error,
            Self::Factory { .. } => ErrorSeverity::Warning,
            Self::NoFactory { .. } => ErrorSeverity::Warning,
            Self::Config { .. } => ErrorSeverity::Error,
            Self::Runtime { .. } => ErrorSeverity::Error,
        }
    }

    fn is_critical(&self) -> bool {
        self.severity() == ErrorSeverity::Critical
    }

    fn retry_after(&self) -> Option<Duration> {
        None
    }
}

impl From<toml::de::Error> for CacheError {
    fn from(err: toml::de::Error) -> Self {
        Self::config(format!("invalid TOML: {}", err))
    }
}

impl From<std::io::Error> for CacheError {
    fn from(err: std::io::Error) -> Self {
        Self::config(err.to_string())
    }
}

/// Error classification trait for consistent error handling
///
/// Provides a standard interface for classifying errors by their
/// characteristics so retry logic and monitoring stay uniform.
pub trait ErrorClassification {
    /// Check if this error is retryable
    ///
    /// Retryable errors are transient and may succeed if attempted again.
    fn is_retryable(&self) -> bool;

    /// Get the error severity level
    fn severity(&self) -> ErrorSeverity;

    /// Check if this is a critical error requiring immediate attention
    fn is_critical(&self) -> bool;

    /// Get the suggested retry delay if applicable
    fn retry_after(&self) -> Option<Duration>;
}

/// Error severity levels for monitoring and alerting
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ErrorSeverity {
    /// Informational, typically for debugging
    Info,
    /// Warning, should be monitored but not critical
    Warning,
    /// Error, requires attention and action
    Error,
    /// Critical, immediate action required
    Critical,
}

impl fmt::Display for ErrorSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Info => write!(f, "INFO"),
            Self::Warning => write!(f, "WARN"),
            Self::Error => write!(f, "ERROR"),
            Self::Critical => write!(f, "CRITICAL"),
        }
    }
}
