//! Per-thread magazine cache.
//!
//! A [`ThreadCache`] holds at most two magazines: the loaded one, which every
//! `alloc`/`free` hits first, and an optional full previous one. Only when
//! both are unusable does it take the shared lock, to swap a whole magazine
//! with the depot or mint a new one from the bottom pool. The fast path
//! touches no shared memory at all.

use std::marker::PhantomData;
use std::ptr::NonNull;

use super::error::TcacheError;
use super::magazine::{Link, Magazine, header_of, next_item, set_next_item};
use super::shared::SharedCache;
use super::stats::ThreadStats;

/// One fixed-size item handed out by a [`ThreadCache`].
///
/// Move-only: giving it back to [`ThreadCache::free`] consumes it. Dropping an
/// `Item` without freeing it leaks the slot until the cache itself is gone.
#[must_use = "dropping an Item leaks its slot; give it back with ThreadCache::free"]
pub struct Item<'a> {
    ptr: NonNull<u8>,
    size: usize,
    _cache: PhantomData<&'a ()>,
}

// Safety: an Item is exclusive ownership of `size` plain bytes; moving it to
// another thread (to be freed into that thread's cache) is the whole point.
unsafe impl Send for Item<'_> {}
// Safety: shared access only hands out `&[u8]`.
unsafe impl Sync for Item<'_> {}

impl Item<'_> {
    #[inline]
    pub fn as_ptr(&self) -> NonNull<u8> {
        self.ptr
    }

    /// Usable bytes.
    #[inline]
    pub fn size(&self) -> usize {
        self.size
    }

    #[inline]
    pub fn as_bytes(&self) -> &[u8] {
        // Safety: the item is `size` bytes exclusively owned by self.
        unsafe { std::slice::from_raw_parts(self.ptr.as_ptr(), self.size) }
    }

    #[inline]
    pub fn as_bytes_mut(&mut self) -> &mut [u8] {
        // Safety: as above, and `&mut self` makes the borrow unique.
        unsafe { std::slice::from_raw_parts_mut(self.ptr.as_ptr(), self.size) }
    }

    /// Give up the handle, keeping the slot allocated.
    #[inline]
    pub fn into_raw(self) -> NonNull<u8> {
        self.ptr
    }

    /// Rebuild an item from [`into_raw`](Self::into_raw).
    ///
    /// # Safety
    /// `ptr` must come from `into_raw` on an item of a cache that is still
    /// alive, `size` must be that cache's item size, and no other `Item` for
    /// the same slot may exist.
    #[inline]
    pub unsafe fn from_raw(ptr: NonNull<u8>, size: usize) -> Self {
        Self {
            ptr,
            size,
            _cache: PhantomData,
        }
    }
}

impl std::fmt::Debug for Item<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Item")
            .field("ptr", &self.ptr)
            .field("size", &self.size)
            .finish()
    }
}

/// Per-thread front end of a [`SharedCache`].
///
/// Obtained from [`SharedCache::attach`]. Each worker owns one; it is `Send`
/// (it can be handed to a worker thread) but not `Sync`.
///
/// Dropping a `ThreadCache` flushes its counters but does not give its
/// magazines back: items parked in it stay out of circulation until the
/// shared cache is dropped.
pub struct ThreadCache<'a> {
    shared: &'a SharedCache<'a>,
    /// Head of the loaded magazine's list; `None` when `rounds == 0`.
    loaded: Link,
    /// Always full when present.
    previous: Option<Magazine>,
    /// Items currently on the loaded list.
    rounds: usize,
    capacity: usize,
    stats: ThreadStats,
}

// Safety: the cache exclusively owns its loaded list and previous magazine;
// the shared control block it points to is Sync.
unsafe impl Send for ThreadCache<'_> {}

impl<'a> ThreadCache<'a> {
    pub(crate) fn new(shared: &'a SharedCache<'a>) -> Self {
        Self {
            shared,
            loaded: None,
            previous: None,
            rounds: 0,
            capacity: shared.mag_size(),
            stats: ThreadStats::default(),
        }
    }

    /// Allocate one item.
    ///
    /// # Errors
    ///
    /// Returns [`TcacheError::PoolExhausted`] if this thread's magazines are
    /// empty, the depot is empty and the bottom pool has fewer than
    /// `mag_size` items left. The cache is unchanged and the call can be
    /// retried after items have been freed.
    #[inline]
    pub fn alloc(&mut self) -> Result<Item<'a>, TcacheError> {
        if self.rounds == 0 {
            return self.alloc_slow();
        }
        self.stats.fast_allocs += 1;
        Ok(self.take_loaded())
    }

    /// Return an item to this thread's cache.
    ///
    /// The item may have been allocated by any thread attached to the same
    /// shared cache.
    #[inline]
    pub fn free(&mut self, item: Item<'a>) {
        debug_assert!(
            self.shared.owns(item.ptr),
            "item {:p} does not belong to shared cache {:?}",
            item.ptr,
            self.shared.name()
        );
        if self.rounds >= self.capacity {
            return self.free_slow(item);
        }
        self.stats.fast_frees += 1;
        self.push_loaded(item);
    }

    #[cold]
    fn alloc_slow(&mut self) -> Result<Item<'a>, TcacheError> {
        if self.loaded.is_some() {
            accounting_violation("loaded magazine is empty but its list is not");
        }
        self.stats.slow_allocs += 1;

        let mag = match self.previous.take() {
            Some(full) => full,
            None => {
                self.stats.depot_allocs += 1;
                match self.shared.depot_pop() {
                    Some(full) => full,
                    None => match self.shared.mint() {
                        Ok(fresh) => {
                            self.stats.mints += 1;
                            fresh
                        }
                        Err(e) => {
                            self.stats.exhausted += 1;
                            return Err(e);
                        }
                    },
                }
            }
        };

        self.loaded = Some(mag.into_head());
        self.rounds = self.capacity;
        Ok(self.take_loaded())
    }

    #[cold]
    fn free_slow(&mut self, item: Item<'a>) {
        if self.rounds != self.capacity {
            accounting_violation("loaded magazine holds more than mag_size items");
        }
        let Some(head) = self.loaded.take() else {
            accounting_violation("full loaded magazine has no list");
        };
        self.stats.slow_frees += 1;

        // Safety: the loaded list holds exactly `capacity` items, all ours.
        let full = unsafe { Magazine::from_head(head) };
        if let Some(older) = self.previous.replace(full) {
            self.stats.depot_frees += 1;
            self.shared.depot_push(older);
        }

        self.rounds = 0;
        self.push_loaded(item);
    }

    #[inline]
    fn take_loaded(&mut self) -> Item<'a> {
        let Some(hdr) = self.loaded else {
            accounting_violation("rounds > 0 but the loaded list is empty");
        };
        // Safety: every item on the loaded list is free and owned by us.
        self.loaded = unsafe { next_item(hdr) };
        self.rounds -= 1;
        Item {
            ptr: hdr.cast(),
            size: self.shared.item_size(),
            _cache: PhantomData,
        }
    }

    #[inline]
    fn push_loaded(&mut self, item: Item<'a>) {
        let hdr = header_of(item.into_raw());
        // Safety: the caller gave up the item, so its memory is ours to link.
        unsafe { set_next_item(hdr, self.loaded) };
        self.loaded = Some(hdr);
        self.rounds += 1;
    }

    /// Items on the loaded magazine.
    #[must_use]
    pub fn rounds(&self) -> usize {
        self.rounds
    }

    /// Items a full magazine holds (the shared cache's `mag_size`).
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    #[must_use]
    pub fn has_previous(&self) -> bool {
        self.previous.is_some()
    }

    /// Free items parked in this cache. Never more than `2 * capacity`.
    #[must_use]
    pub fn cached_items(&self) -> usize {
        self.rounds + if self.previous.is_some() { self.capacity } else { 0 }
    }

    /// Counters not yet flushed to the shared totals.
    #[must_use]
    pub fn stats(&self) -> &ThreadStats {
        &self.stats
    }

    /// Add this thread's counters to the shared totals and reset them.
    pub fn flush_stats(&mut self) {
        self.shared.totals().absorb(&self.stats);
        self.stats = ThreadStats::default();
    }

    #[must_use]
    pub fn shared(&self) -> &'a SharedCache<'a> {
        self.shared
    }
}

impl Drop for ThreadCache<'_> {
    fn drop(&mut self) {
        self.flush_stats();
        let parked = self.cached_items();
        if parked > 0 {
            tracing::debug!(
                name = %self.shared.name(),
                parked,
                "thread cache dropped with items parked"
            );
        }
    }
}

impl std::fmt::Debug for ThreadCache<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ThreadCache")
            .field("cache", &self.shared.name())
            .field("rounds", &self.rounds)
            .field("capacity", &self.capacity)
            .field("has_previous", &self.previous.is_some())
            .finish()
    }
}

#[cold]
#[inline(never)]
fn accounting_violation(what: &str) -> ! {
    panic!("thread cache accounting violated: {what}")
}
