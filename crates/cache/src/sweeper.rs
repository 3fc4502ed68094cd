//! Background expiration sweeps
//!
//! Automatic sweeps only run when a cache is mutated. A [`Sweeper`] covers
//! caches that are mostly read: it runs a sweep on a fixed period from a
//! tokio task until it is stopped, dropped, or the cache itself is dropped.

use std::sync::Weak;
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, trace};

use crate::error::{CacheError, CacheResult};

/// Handle to a running background sweep task
///
/// Dropping the handle stops the task.
#[derive(Debug)]
pub struct Sweeper {
    handle: JoinHandle<()>,
    period: Duration,
}

impl Sweeper {
    /// Spawn a task that calls `sweep` on `target` every `period`.
    ///
    /// The task only holds `target` weakly and exits once it can no longer
    /// be upgraded.
    pub(crate) fn spawn<T, F>(target: Weak<T>, period: Duration, sweep: F) -> CacheResult<Self>
    where
        T: Send + Sync + 'static,
        F: Fn(&T) -> usize + Send + 'static,
    {
        if period.is_zero() {
            return Err(CacheError::config("sweep period must be greater than zero"));
        }
        let runtime = Handle::try_current()
            .map_err(|_| CacheError::runtime("sweeper requires an active Tokio runtime"))?;

        let handle = runtime.spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            interval.tick().await;

            loop {
                interval.tick().await;

                let Some(strong) = target.upgrade() else {
                    debug!("cache dropped, stopping sweeper");
                    break;
                };
                let removed = sweep(&strong);
                trace!(removed, "background sweep finished");
            }
        });

        debug!(period_ms = period.as_millis() as u64, "sweeper started");
        Ok(Self { handle, period })
    }

    /// Sweep period
    pub fn period(&self) -> Duration {
        self.period
    }

    /// Whether the background task is still running
    pub fn is_running(&self) -> bool {
        !self.handle.is_finished()
    }

    /// Stop the background task
    pub fn stop(&self) {
        self.handle.abort();
    }
}

impl Drop for Sweeper {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

#[cfg(test)]
mod tests {
    //! Unit tests for cache::sweeper.
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use super::*;

    /// Validates the sweep runs once per period and not immediately.
    ///
    /// Assertions:
    /// - No sweep happens before the first period elapses.
    /// - Three periods produce three sweeps.
    #[tokio::test(start_paused = true)]
    async fn test_sweeps_on_period() {
        let counter = Arc::new(AtomicUsize::new(0));
        let sweeper = Sweeper::spawn(Arc::downgrade(&counter), Duration::from_secs(1), |c| {
            c.fetch_add(1, Ordering::SeqCst);
            0
        })
        .unwrap();

        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(counter.load(Ordering::SeqCst), 0);

        tokio::time::sleep(Duration::from_millis(2600)).await;
        assert_eq!(counter.load(Ordering::SeqCst), 3);
        assert!(sweeper.is_running());
        assert_eq!(sweeper.period(), Duration::from_secs(1));
    }

    /// Validates the task exits when its target is dropped.
    #[tokio::test(start_paused = true)]
    async fn test_stops_when_target_dropped() {
        let target = Arc::new(AtomicUsize::new(0));
        let sweeper =
            Sweeper::spawn(Arc::downgrade(&target), Duration::from_millis(10), |_| 0).unwrap();

        drop(target);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!sweeper.is_running());
    }

    /// Validates `stop` aborts the task.
    #[tokio::test(start_paused = true)]
    async fn test_stop_aborts() {
        let target = Arc::new(AtomicUsize::new(0));
        let sweeper =
            Sweeper::spawn(Arc::downgrade(&target), Duration::from_millis(10), |_| 0).unwrap();

        sweeper.stop();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!sweeper.is_running());
    }

    /// Validates spawn errors for a zero period and outside a runtime.
    #[test]
    fn test_spawn_errors() {
        let target = Arc::new(0usize);
        let outside = Sweeper::spawn(Arc::downgrade(&target), Duration::from_secs(1), |_| 0);
        assert!(matches!(outside, Err(CacheError::Runtime { .. })));

        let zero = Sweeper::spawn(Arc::downgrade(&target), Duration::ZERO, |_| 0);
        assert!(matches!(zero, Err(CacheError::Config { .. })));
    }
}
