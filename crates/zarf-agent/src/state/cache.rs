//! Time-bounded single-value cache

use std::time::Duration;

use parking_lot::RwLock;
use tokio::time::Instant;

/// Holds one value for `ttl` after it was stored
///
/// A zero TTL disables the cache: `get` always misses and `put` is ignored.
/// Concurrent misses each load on their own; the last writer wins.
pub(crate) struct TtlCache<T> {
    ttl: Duration,
    slot: RwLock<Option<(Instant, T)>>,
}

impl<T: Clone> TtlCache<T> {
    pub(crate) fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            slot: RwLock::new(None),
        }
    }

    pub(crate) fn get(&self) -> Option<T> {
        if self.ttl.is_zero() {
            return None;
        }
        match &*self.slot.read() {
            Some((stored_at, value)) if stored_at.elapsed() < self.ttl => Some(value.clone()),
            _ => None,
        }
    }

    pub(crate) fn put(&self, value: T) {
        if self.ttl.is_zero() {
            return;
        }
        *self.slot.write() = Some((Instant::now(), value));
    }
}
