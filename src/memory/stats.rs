//! Cache statistics.
//!
//! Each [`ThreadCache`](super::thread_cache::ThreadCache) counts its own
//! traffic in plain integers ([`ThreadStats`]) and only touches shared memory
//! when it flushes them into the cache-wide [`SharedTotals`]. Shared counters
//! use `Relaxed` ordering and are diagnostic only: a thread that has not
//! flushed yet is simply missing from the totals. Do NOT use these values for
//! allocation decisions.

use crate::sync::atomic::{AtomicU64, Ordering};

/// Monotonic diagnostic counter.
pub struct Counter(AtomicU64);

impl Counter {
    #[cfg(not(loom))]
    pub const fn new() -> Self {
        Self(AtomicU64::new(0))
    }

    #[cfg(loom)]
    pub fn new() -> Self {
        Self(AtomicU64::new(0))
    }

    #[inline]
    pub fn add(&self, val: u64) {
        if val != 0 {
            self.0.fetch_add(val, Ordering::Relaxed);
        }
    }

    #[inline]
    pub fn get(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}

impl Default for Counter {
    fn default() -> Self {
        Self::new()
    }
}

/// Per-thread operation counts. Owned by one thread, never synchronized.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ThreadStats {
    /// Allocations served from the loaded magazine without escalating.
    pub fast_allocs: u64,
    /// Frees absorbed by the loaded magazine without escalating.
    pub fast_frees: u64,
    /// Allocations that found the loaded magazine empty.
    pub slow_allocs: u64,
    /// Frees that found the loaded magazine full.
    pub slow_frees: u64,
    /// Slow allocations that had to take the lock (no previous magazine).
    pub depot_allocs: u64,
    /// Full magazines pushed to the depot.
    pub depot_frees: u64,
    /// Magazines minted from the bottom pool.
    pub mints: u64,
    /// Allocations that failed with the pool exhausted.
    pub exhausted: u64,
}

impl ThreadStats {
    #[must_use]
    pub fn allocs(&self) -> u64 {
        self.fast_allocs + self.slow_allocs
    }

    #[must_use]
    pub fn frees(&self) -> u64 {
        self.fast_frees + self.slow_frees
    }
}

/// Cache-wide sums of flushed [`ThreadStats`].
#[derive(Default)]
pub(crate) struct SharedTotals {
    fast_allocs: Counter,
    fast_frees: Counter,
    slow_allocs: Counter,
    slow_frees: Counter,
    depot_allocs: Counter,
    depot_frees: Counter,
    mints: Counter,
    exhausted: Counter,
}

impl SharedTotals {
    pub fn absorb(&self, local: &ThreadStats) {
        self.fast_allocs.add(local.fast_allocs);
        self.fast_frees.add(local.fast_frees);
        self.slow_allocs.add(local.slow_allocs);
        self.slow_frees.add(local.slow_frees);
        self.depot_allocs.add(local.depot_allocs);
        self.depot_frees.add(local.depot_frees);
        self.mints.add(local.mints);
        self.exhausted.add(local.exhausted);
    }

    pub fn snapshot(&self) -> ThreadStats {
        ThreadStats {
            fast_allocs: self.fast_allocs.get(),
            fast_frees: self.fast_frees.get(),
            slow_allocs: self.slow_allocs.get(),
            slow_frees: self.slow_frees.get(),
            depot_allocs: self.depot_allocs.get(),
            depot_frees: self.depot_frees.get(),
            mints: self.mints.get(),
            exhausted: self.exhausted.get(),
        }
    }
}

/// Point-in-time view of a shared cache.
///
/// The lock-protected fields (`pool_allocated`, `depot_magazines`,
/// `magazines_allocated`) come from one critical section and agree with each
/// other. `threads` is whatever has been flushed so far.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CacheStats {
    pub name: String,
    pub item_size: usize,
    pub mag_size: usize,
    /// Items carved out of the backing buffer at construction.
    pub capacity: usize,
    /// Items currently out of the bottom pool.
    pub pool_allocated: usize,
    /// Full magazines parked in the depot.
    pub depot_magazines: usize,
    /// Magazines minted and not yet reclaimed.
    pub magazines_allocated: usize,
    pub threads: ThreadStats,
}

impl CacheStats {
    /// Items sitting in the depot.
    #[must_use]
    pub fn depot_items(&self) -> usize {
        self.depot_magazines * self.mag_size
    }

    /// Items still in the bottom pool.
    #[must_use]
    pub fn pool_available(&self) -> usize {
        self.capacity - self.pool_allocated
    }

    /// Bytes held by live magazines: `mag_size * item_size * magazines`.
    #[must_use]
    pub fn usage_bytes(&self) -> usize {
        self.mag_size * self.item_size * self.magazines_allocated
    }
}
