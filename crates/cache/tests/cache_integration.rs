//! Integration tests for the keyed and namespaced caches
//!
//! Covers TTL expiry, capacity eviction, single-flight factory resolution
//! under concurrency, namespace isolation and configuration loading.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use stashline_cache::{
    CacheConfig, CacheError, CacheHealth, CacheHealthReport, FactoryError, KeyedCache, MockClock,
    NamespacedCache,
};

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn mock_keyed<V>(config: CacheConfig) -> (KeyedCache<V, MockClock>, MockClock)
where
    V: Clone + Send + Sync + 'static,
{
    let clock = MockClock::fixed();
    (KeyedCache::with_clock(config, clock.clone()), clock)
}

/// Verifies an entry is readable before its TTL and gone once it elapses.
///
/// # Test Steps
/// 1. Store a value in a cache with a 50ms TTL
/// 2. Advance the clock to 49ms and read it back
/// 3. Advance to 50ms and confirm `get` reports `NotFound`
#[test]
fn test_ttl_expiry() {
    let (cache, clock) = mock_keyed(CacheConfig::ttl(Duration::from_millis(50)));
    cache.set("a", 1).unwrap();

    clock.advance(Duration::from_millis(49));
    assert_eq!(cache.get("a").unwrap(), 1);

    clock.advance(Duration::from_millis(1));
    assert!(matches!(cache.get("a"), Err(CacheError::NotFound { .. })));
}

/// Verifies entries without any TTL survive arbitrarily long.
#[test]
fn test_no_ttl_is_permanent() {
    let (cache, clock) = mock_keyed(CacheConfig::default());
    cache.set("forever", "v".to_string()).unwrap();

    clock.advance(Duration::from_secs(10 * 365 * 24 * 3600));
    cache.remove_expired(None);
    assert_eq!(cache.get("forever").unwrap(), "v");
}

/// Verifies the capacity bound keeps the most recently created entries.
///
/// # Test Steps
/// 1. Configure `max_count = 3`
/// 2. Add five keys with strictly increasing creation dates
/// 3. Confirm only the three newest remain
#[test]
fn test_capacity_keeps_newest() {
    let (cache, clock) = mock_keyed(CacheConfig::bounded(3));
    for (i, key) in ["k1", "k2", "k3", "k4", "k5"].iter().enumerate() {
        cache.set(key, i).unwrap();
        clock.advance(Duration::from_millis(1));
    }
    cache.remove_expired(None);

    let mut keys = cache.keys();
    keys.sort();
    assert_eq!(keys, vec!["k3", "k4", "k5"]);
}

/// Verifies overwriting a key keeps its creation date and moves its update date.
#[test]
fn test_overwrite_keeps_creation_date() {
    let (cache, clock) = mock_keyed(CacheConfig::default());
    cache.set("k", 1).unwrap();
    let first = cache.try_get_info("k").unwrap();

    clock.advance(Duration::from_secs(1));
    cache.set("k", 2).unwrap();
    let second = cache.try_get_info("k").unwrap();

    assert_eq!(second.creation_date(), first.creation_date());
    assert!(second.update_date() > first.update_date());
    assert_eq!(*second.value(), 2);
}

/// Verifies removal is idempotent and a set/get round trip is exact.
#[test]
fn test_round_trip_and_idempotent_removal() {
    let (cache, _clock) = mock_keyed(CacheConfig::ttl(Duration::from_secs(60)));
    let value = vec![1u8, 2, 3];

    cache.set("bytes", value.clone()).unwrap();
    assert_eq!(cache.get("bytes").unwrap(), value);

    assert!(cache.remove("bytes"));
    assert!(!cache.remove("bytes"));
    assert!(!cache.contains("bytes"));
}

/// Verifies 50 concurrent callers on a missing key share one factory run.
///
/// # Test Steps
/// 1. Register a slow factory that counts its invocations
/// 2. Spawn 50 tasks calling `get_async` on the same key
/// 3. Confirm one invocation, identical results and no coordinator slots left
#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn test_single_flight_under_contention() {
    init_tracing();
    let cache: KeyedCache<String> = KeyedCache::new(CacheConfig::default());
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);
    cache.register(
        move |key: String| {
            let counter = Arc::clone(&counter);
            async move {
                let n = counter.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(20)).await;
                Ok(format!("{key}-{n}"))
            }
        },
        None,
    );

    let handles: Vec<_> = (0..50)
        .map(|_| {
            let cache = cache.clone();
            tokio::spawn(async move { cache.get_async("shared", None).await })
        })
        .collect();
    let results: Vec<String> =
        join_all(handles).await.into_iter().map(|r| r.unwrap().unwrap()).collect();

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert!(results.iter().all(|v| v == "shared-0"));
    assert_eq!(cache.in_flight(), 0);
}

/// Verifies different keys resolve in parallel rather than serially.
#[tokio::test(start_paused = true)]
async fn test_distinct_keys_resolve_independently() {
    let cache: KeyedCache<usize> = KeyedCache::new(CacheConfig::default());
    cache.register(
        |key: String| async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            Ok(key.len())
        },
        None,
    );

    let start = tokio::time::Instant::now();
    let results = join_all(["a", "bb", "ccc"].iter().map(|key| cache.get_async(key, None))).await;

    assert_eq!(results.into_iter().map(Result::unwrap).collect::<Vec<_>>(), vec![1, 2, 3]);
    assert!(start.elapsed() < Duration::from_millis(200));
}

/// Verifies a lock timeout lets the waiting caller proceed instead of hanging.
///
/// # Test Steps
/// 1. Register a factory taking 100ms with a 10ms acquisition timeout
/// 2. Run two callers on the same key concurrently
/// 3. Confirm both complete and one timeout was recorded
#[tokio::test(start_paused = true)]
async fn test_timeout_never_deadlocks() {
    let config = CacheConfig::builder().track_metrics(true).build();
    let cache: KeyedCache<u32> = KeyedCache::new(config);
    cache.register(
        |_key: String| async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            Ok(7)
        },
        Some(Duration::from_millis(10)),
    );

    let (a, b) = tokio::join!(cache.get_async("slow", None), cache.get_async("slow", None));
    assert_eq!(a.unwrap(), 7);
    assert_eq!(b.unwrap(), 7);

    let stats = cache.stats();
    assert_eq!(stats.coordinator_timeouts, 1);
    assert_eq!(stats.factory_invocations, 2);
    assert_eq!(cache.in_flight(), 0);
}

/// Verifies a failed resolution is not cached and the next call retries.
#[tokio::test]
async fn test_factory_failure_is_retried() {
    let cache: KeyedCache<u32> = KeyedCache::new(CacheConfig::default());
    let attempts = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&attempts);
    cache.register(
        move |_key: String| {
            let attempt = counter.fetch_add(1, Ordering::SeqCst);
            async move {
                if attempt == 0 {
                    Err::<u32, FactoryError>("backend down".into())
                } else {
                    Ok(1)
                }
            }
        },
        None,
    );

    let err = cache.get_async("k", None).await.unwrap_err();
    assert!(matches!(err, CacheError::Factory { ref key, .. } if key == "k"));
    assert!(!cache.contains("k"));
    assert_eq!(cache.get_async("k", None).await.unwrap(), 1);
    assert_eq!(attempts.load(Ordering::SeqCst), 2);
    assert_eq!(cache.in_flight(), 0);
}

/// Verifies the non-blocking `get_info` eventually populates the entry.
#[tokio::test]
async fn test_get_info_populates_in_background() {
    let cache: KeyedCache<String> = KeyedCache::new(CacheConfig::default());
    cache.register(|key: String| async move { Ok(key.repeat(2)) }, None);

    assert!(cache.get_info("ab").is_none());

    let populated = tokio::time::timeout(Duration::from_secs(1), async {
        loop {
            if let Some(entry) = cache.try_get_info("ab") {
                return entry.into_value();
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await;
    assert_eq!(populated.unwrap(), "abab");
}

/// Verifies identical keys in different namespaces never collide.
///
/// # Test Steps
/// 1. Store different values for key `k` in namespaces `A` and `B`
/// 2. Register a factory for `A` only and resolve a new key in both
/// 3. Clear `A` and confirm `B` is untouched
#[tokio::test]
async fn test_namespace_isolation() {
    let cache: NamespacedCache<String> = NamespacedCache::new(CacheConfig::default());
    cache.set("A", "k", "from-a".into()).unwrap();
    cache.set("B", "k", "from-b".into()).unwrap();
    assert_eq!(cache.get("A", "k").unwrap(), "from-a");
    assert_eq!(cache.get("B", "k").unwrap(), "from-b");

    cache.register("A", |key: String| async move { Ok(format!("a:{key}")) }, None);
    assert_eq!(cache.get_async("A", "new", None).await.unwrap(), "a:new");
    assert!(cache.get_async("B", "new", None).await.unwrap_err().is_not_found());
    assert!(matches!(cache.resolve("B", "new", None).await, Err(CacheError::NoFactory { .. })));

    assert_eq!(cache.clear_in("A"), 2);
    assert_eq!(cache.len(), 1);
    assert_eq!(cache.namespaces(), vec!["B".to_string()]);
}

/// Verifies single flight is scoped per namespace.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_namespaced_single_flight() {
    let cache: NamespacedCache<usize> = NamespacedCache::new(CacheConfig::default());
    let calls = Arc::new(AtomicUsize::new(0));
    for ns in ["x", "y"] {
        let counter = Arc::clone(&calls);
        cache.register(
            ns,
            move |key: String| {
                counter.fetch_add(1, Ordering::SeqCst);
                async move {
                    tokio::time::sleep(Duration::from_millis(10)).await;
                    Ok(key.len())
                }
            },
            None,
        );
    }

    let tasks = (0..20).map(|i| {
        let cache = cache.clone();
        let ns = if i % 2 == 0 { "x" } else { "y" };
        tokio::spawn(async move { cache.get_async(ns, "key", None).await })
    });
    for result in join_all(tasks).await {
        assert_eq!(result.unwrap().unwrap(), 3);
    }

    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert_eq!(cache.in_flight(), 0);
}

/// Verifies the background sweeper removes expired entries without writes.
#[tokio::test(start_paused = true)]
async fn test_sweeper_removes_expired_entries() {
    let clock = MockClock::fixed();
    let config =
        CacheConfig::builder().expiration(Duration::from_secs(5)).track_metrics(true).build();
    let cache: KeyedCache<u32, MockClock> = KeyedCache::with_clock(config, clock.clone());
    cache.set("a", 1).unwrap();
    cache.set("b", 2).unwrap();

    let sweeper = cache.spawn_sweeper(Duration::from_secs(1)).unwrap();
    clock.advance(Duration::from_secs(6));
    tokio::time::sleep(Duration::from_millis(1500)).await;

    assert_eq!(cache.stats().expirations, 2);
    assert!(cache.is_empty());
    sweeper.stop();
}

/// Verifies configuration loaded from TOML drives the cache.
#[test]
fn test_config_from_toml_file() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("cache.toml");
    std::fs::write(&path, "max_count = 2\nexpiration_ms = 1000\ntrack_metrics = true\n")?;

    let config = CacheConfig::from_toml_file(&path)?;
    let (cache, clock) = mock_keyed(config);
    cache.set("a", 1)?;
    clock.advance(Duration::from_millis(1));
    cache.set("b", 2)?;
    clock.advance(Duration::from_millis(1));
    cache.set("c", 3)?;

    assert_eq!(cache.len(), 2);
    assert!(!cache.contains("a"));
    assert_eq!(cache.stats().evictions, 1);
    assert_eq!(cache.expiration(), Some(Duration::from_secs(1)));
    Ok(())
}

/// Verifies health reporting reflects cache statistics.
#[test]
fn test_health_report_from_cache() {
    let config = CacheConfig::builder().max_count(10).track_metrics(true).build();
    let (cache, _clock) = mock_keyed(config);
    for i in 0..9 {
        cache.set(&format!("k{i}"), i).unwrap();
    }
    for i in 0..9 {
        assert_eq!(cache.get(&format!("k{i}")).unwrap(), i);
    }

    let report = CacheHealthReport::new(cache.stats());
    assert_eq!(report.health, CacheHealth::NearCapacity);
    report.log();
}
