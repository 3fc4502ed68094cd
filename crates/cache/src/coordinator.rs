//! Single-flight coordination for factory resolution
//!
//! When several callers miss on the same key at once, only one of them should
//! run the (expensive) factory. The [`ResolutionCoordinator`] hands out a
//! per-key async mutex for the duration of a resolution:
//!
//! ```text
//! Idle ──acquire──▶ Resolving { waiters: n } ──last permit dropped──▶ Done (slot removed)
//! ```
//!
//! Each slot carries a waiter count that is only ever changed while holding
//! the map's entry lock for that key, so a slot is removed exactly when the
//! last registered caller leaves and a new caller can never register on a
//! slot that is being torn down. The mutex itself is dropped with the last
//! `Arc`, so no delayed disposal is needed.

use std::sync::Arc;
use std::time::Duration;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{trace, warn};

#[derive(Debug)]
struct Slot {
    lock: Arc<Mutex<()>>,
    waiters: usize,
}

/// Per-key exclusion for in-flight resolutions
#[derive(Debug, Default)]
pub(crate) struct ResolutionCoordinator {
    slots: DashMap<String, Slot>,
}

impl ResolutionCoordinator {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Register interest in `key` and wait for its lock.
    ///
    /// With a `timeout`, a caller that cannot get the lock in time proceeds
    /// without it; the returned permit reports [`timed_out`](ResolutionPermit::timed_out).
    /// Dropping the future while it waits releases the registration.
    pub(crate) async fn acquire(
        &self,
        key: &str,
        timeout: Option<Duration>,
    ) -> ResolutionPermit<'_> {
        let lock = self.register(key);
        let mut permit = ResolutionPermit {
            coordinator: self,
            key: key.to_owned(),
            guard: None,
            timed_out: false,
        };

        let wait = lock.lock_owned();
        match timeout {
            Some(limit) => match tokio::time::timeout(limit, wait).await {
                Ok(guard) => permit.guard = Some(guard),
                Err(_) => {
                    warn!(
                        key,
                        timeout_ms = limit.as_millis() as u64,
                        "resolution lock timed out, proceeding without it"
                    );
                    permit.timed_out = true;
                }
            },
            None => permit.guard = Some(wait.await),
        }

        permit
    }

    /// Number of keys with a resolution in flight
    pub(crate) fn in_flight(&self) -> usize {
        self.slots.len()
    }

    /// Number of callers registered on `key`
    #[cfg(test)]
    pub(crate) fn waiters(&self, key: &str) -> usize {
        self.slots.get(key).map_or(0, |slot| slot.waiters)
    }

    fn register(&self, key: &str) -> Arc<Mutex<()>> {
        let mut slot = self
            .slots
            .entry(key.to_owned())
            .or_insert_with(|| Slot { lock: Arc::new(Mutex::new(())), waiters: 0 });
        slot.waiters += 1;
        trace!(key, waiters = slot.waiters, "registered resolution waiter");
        Arc::clone(&slot.lock)
    }

    fn release(&self, key: &str) {
        if let Entry::Occupied(mut occupied) = self.slots.entry(key.to_owned()) {
            let slot = occupied.get_mut();
            slot.waiters = slot.waiters.saturating_sub(1);
            if slot.waiters == 0 {
                occupied.remove();
                trace!(key, "resolution slot removed");
            }
        }
    }
}

/// Registration on a coordinator slot, held for the whole resolution.
///
/// Dropping the permit unlocks the slot and deregisters the caller.
#[derive(Debug)]
pub(crate) struct ResolutionPermit<'a> {
    coordinator: &'a ResolutionCoordinator,
    key: String,
    guard: Option<OwnedMutexGuard<()>>,
    timed_out: bool,
}

impl ResolutionPermit<'_> {
    /// Whether the lock acquisition timed out
    pub(crate) fn timed_out(&self) -> bool {
        self.timed_out
    }

    /// Whether this caller holds the slot's lock
    #[cfg(test)]
    pub(crate) fn is_exclusive(&self) -> bool {
        self.guard.is_some()
    }
}

impl Drop for ResolutionPermit<'_> {
    fn drop(&mut self) {
        // Unlock before deregistering so the next waiter can proceed.
        drop(self.guard.take());
        self.coordinator.release(&self.key);
    }
}
