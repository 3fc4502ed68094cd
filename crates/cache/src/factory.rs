//! Registered value factories
//!
//! A factory turns a missing key into a value. It is stored type-erased so a
//! cache can hold one (or one per namespace) without extra type parameters.

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use futures::FutureExt;

use crate::error::FactoryError;

/// Future returned by a registered factory
pub type FactoryFuture<V> = BoxFuture<'static, Result<V, FactoryError>>;

type FactoryFn<V> = dyn Fn(String) -> FactoryFuture<V> + Send + Sync;

/// A registered factory together with its lock-acquisition timeout
pub(crate) struct FactoryInfo<V> {
    factory: Arc<FactoryFn<V>>,
    timeout: Option<Duration>,
}

impl<V: 'static> FactoryInfo<V> {
    pub(crate) fn new<F, Fut>(factory: F, timeout: Option<Duration>) -> Self
    where
        F: Fn(String) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<V, FactoryError>> + Send + 'static,
    {
        Self { factory: Arc::new(move |key| factory(key).boxed()), timeout }
    }
}

impl<V> FactoryInfo<V> {
    /// Start the factory for `key`
    pub(crate) fn call(&self, key: &str) -> FactoryFuture<V> {
        (self.factory)(key.to_owned())
    }

    /// How long a caller waits for another caller's resolution of the same key
    pub(crate) fn timeout(&self) -> Option<Duration> {
        self.timeout
    }
}

impl<V> Clone for FactoryInfo<V> {
    fn clone(&self) -> Self {
        Self { factory: Arc::clone(&self.factory), timeout: self.timeout }
    }
}

impl<V> fmt::Debug for FactoryInfo<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FactoryInfo").field("timeout", &self.timeout).finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_factory_receives_key() {
        let info =
            FactoryInfo::new(|key: String| async move { Ok::<_, FactoryError>(key.len()) }, None);
        assert_eq!(info.call("four").await.unwrap(), 4);
        assert_eq!(info.timeout(), None);
    }

    #[tokio::test]
    async fn test_factory_error_passes_through() {
        let info: FactoryInfo<u32> = FactoryInfo::new(
            |_key: String| async move { Err::<u32, FactoryError>("boom".into()) },
            Some(Duration::from_millis(5)),
        );
        let err = info.clone().call("k").await.unwrap_err();
        assert_eq!(err.to_string(), "boom");
        assert_eq!(info.timeout(), Some(Duration::from_millis(5)));
    }
}
