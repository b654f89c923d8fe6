use std::marker::PhantomData;
use std::ptr::NonNull;

use super::backing::MappedBuffer;
use super::error::TcacheError;
use super::layout::ItemLayout;
use super::magazine::{DEFAULT_MAG_SIZE, Depot, MAX_MAG_SIZE, Magazine};
use super::pool::BottomPool;
use super::stats::{CacheStats, SharedTotals};
use super::thread_cache::ThreadCache;
use crate::sync::{Mutex, MutexGuard};

/// Configuration for a [`SharedCache`]. All fields have sensible defaults.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SharedCacheConfig {
    /// Human-readable name, used in logs and usage reports.
    pub name: String,

    /// Items per magazine. Must be in `1..=MAX_MAG_SIZE`. Default: 8.
    pub mag_size: usize,

    /// Usable bytes per item. Must be at least `MIN_ITEM_SIZE`. Default: 64.
    pub item_size: usize,

    /// Granularity the backing buffer is tiled at. Page 0 holds the address
    /// table, every following page holds `page_size / item_stride` items.
    /// Default: 4096.
    pub page_size: usize,

    /// Distance between consecutive items on a page. Must be at least
    /// `item_size`. Default: 64.
    pub item_stride: usize,
}

impl Default for SharedCacheConfig {
    fn default() -> Self {
        Self {
            name: String::from("tcache"),
            mag_size: DEFAULT_MAG_SIZE,
            item_size: 64,
            page_size: 4096,
            item_stride: 64,
        }
    }
}

impl SharedCacheConfig {
    /// Config for `item_size`-byte items packed back to back.
    #[must_use]
    pub fn new(name: impl Into<String>, item_size: usize) -> Self {
        Self {
            name: name.into(),
            item_size,
            item_stride: item_size,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_mag_size(mut self, mag_size: usize) -> Self {
        self.mag_size = mag_size;
        self
    }

    #[must_use]
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size;
        self
    }

    #[must_use]
    pub fn with_item_stride(mut self, item_stride: usize) -> Self {
        self.item_stride = item_stride;
        self
    }

    fn validate(&self, base_addr: usize, len: usize) -> Result<ItemLayout, TcacheError> {
        if self.mag_size == 0 || self.mag_size > MAX_MAG_SIZE {
            return Err(TcacheError::MagazineSize {
                mag_size: self.mag_size,
                max: MAX_MAG_SIZE,
            });
        }
        ItemLayout::new(
            self.item_size,
            self.item_stride,
            self.page_size,
            base_addr,
            len,
        )
    }
}

/// Everything the shared lock protects.
///
/// Only reachable through [`SharedCache::lock`], so no path can touch the
/// depot, the bottom pool or the magazine count without holding the lock.
pub(crate) struct SharedState {
    pub depot: Depot,
    pub pool: BottomPool,
    /// Magazines minted from the pool and not yet reclaimed.
    pub magazines_allocated: usize,
}

/// The control block shared by every per-thread cache of one item type.
///
/// Owns (or borrows, for `'buf`) the backing buffer, the depot of full
/// magazines and the bottom pool of raw items. Workers call
/// [`attach`](Self::attach) once each and allocate through their
/// [`ThreadCache`].
pub struct SharedCache<'buf> {
    name: String,
    item_size: usize,
    mag_size: usize,
    layout: ItemLayout,
    state: Mutex<SharedState>,
    totals: SharedTotals,
    _region: Option<MappedBuffer>,
    _buf: PhantomData<&'buf mut [u8]>,
}

impl<'buf> SharedCache<'buf> {
    /// Create a cache over `buf`.
    ///
    /// # Panics
    ///
    /// Panics if the configuration or the buffer geometry is invalid. These
    /// are deployment errors; use [`try_create`](Self::try_create) to get them
    /// back as values.
    #[must_use]
    pub fn create(config: SharedCacheConfig, buf: &'buf mut [u8]) -> Self {
        match Self::try_create(config, buf) {
            Ok(cache) => cache,
            Err(e) => panic!("misconfigured shared cache: {e}"),
        }
    }

    /// Create a cache over `buf`, reporting misconfiguration as an error.
    ///
    /// # Errors
    ///
    /// Returns a misconfiguration variant of [`TcacheError`] if the magazine
    /// size, item size, stride, page size or buffer do not fit together.
    pub fn try_create(config: SharedCacheConfig, buf: &'buf mut [u8]) -> Result<Self, TcacheError> {
        let len = buf.len();
        let base = NonNull::from(buf).cast::<u8>();
        // Safety: `buf` is exclusively borrowed for 'buf and never touched
        // through the slice again.
        unsafe { Self::from_raw_parts(config, base, len, None) }
    }

    /// # Safety
    /// `base..base+len` must be writable and exclusively owned by the cache
    /// for as long as it lives.
    unsafe fn from_raw_parts(
        config: SharedCacheConfig,
        base: NonNull<u8>,
        len: usize,
        region: Option<MappedBuffer>,
    ) -> Result<Self, TcacheError> {
        let layout = config.validate(base.as_ptr().addr(), len)?;
        // Safety: layout validated against this buffer; exclusivity upheld by
        // caller.
        let pool = unsafe { BottomPool::carve(base, layout) };

        tracing::info!(
            name = %config.name,
            item_size = config.item_size,
            item_stride = layout.item_stride,
            mag_size = config.mag_size,
            capacity = layout.capacity,
            "shared cache created"
        );

        Ok(Self {
            name: config.name,
            item_size: config.item_size,
            mag_size: config.mag_size,
            layout,
            state: Mutex::new(SharedState {
                depot: Depot::new(),
                pool,
                magazines_allocated: 0,
            }),
            totals: SharedTotals::default(),
            _region: region,
            _buf: PhantomData,
        })
    }
}

impl SharedCache<'static> {
    /// Create a cache over a freshly mapped buffer of at least `len` bytes,
    /// which the cache owns and releases when dropped.
    ///
    /// # Errors
    ///
    /// Returns `TcacheError::Vm` if the mapping fails, or a misconfiguration
    /// variant as for [`try_create`](SharedCache::try_create).
    pub fn mapped(config: SharedCacheConfig, len: usize) -> Result<Self, TcacheError> {
        let mut region = MappedBuffer::new(len)?;
        let bytes = region.as_mut_slice();
        let len = bytes.len();
        let base = NonNull::from(bytes).cast::<u8>();
        // Safety: the mapping is owned by the cache (moved in below) and its
        // address does not change when the `MappedBuffer` handle moves.
        unsafe { Self::from_raw_parts(config, base, len, Some(region)) }
    }
}

impl SharedCache<'_> {
    /// Bind a new per-thread cache to this control block.
    #[must_use]
    pub fn attach(&self) -> ThreadCache<'_> {
        ThreadCache::new(self)
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn item_size(&self) -> usize {
        self.item_size
    }

    #[must_use]
    pub fn mag_size(&self) -> usize {
        self.mag_size
    }

    /// Items carved out of the backing buffer.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.layout.capacity
    }

    /// `true` if `ptr` is the start of an item slot of this cache.
    #[must_use]
    pub fn owns(&self, ptr: NonNull<u8>) -> bool {
        self.layout.contains(ptr.as_ptr().addr())
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, SharedState> {
        self.state
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    pub(crate) fn totals(&self) -> &SharedTotals {
        &self.totals
    }

    /// Pop one full magazine off the depot.
    pub(crate) fn depot_pop(&self) -> Option<Magazine> {
        let mag = self.lock().depot.pop();
        if mag.is_some() {
            tracing::trace!(name = %self.name, "magazine taken from depot");
        }
        mag
    }

    /// Park a full magazine on the depot.
    pub(crate) fn depot_push(&self, mag: Magazine) {
        self.lock().depot.push(mag);
        tracing::trace!(name = %self.name, "magazine returned to depot");
    }

    /// Mint a new magazine from the bottom pool, all or nothing.
    pub(crate) fn mint(&self) -> Result<Magazine, TcacheError> {
        let mut batch = [NonNull::dangling(); MAX_MAG_SIZE];
        let batch = &mut batch[..self.mag_size];
        {
            let mut state = self.lock();
            if !state.pool.reserve(batch) {
                let available = state.pool.available();
                drop(state);
                tracing::debug!(
                    name = %self.name,
                    available,
                    mag_size = self.mag_size,
                    "bottom pool exhausted"
                );
                return Err(TcacheError::PoolExhausted);
            }
            state.magazines_allocated += 1;
        }
        tracing::trace!(name = %self.name, "magazine minted");
        // Safety: the reserved items are distinct, aligned (layout checked)
        // and now exclusively ours.
        Ok(unsafe { Magazine::from_items(batch) })
    }

    /// Return every depot magazine's items to the bottom pool.
    ///
    /// Magazines parked in per-thread caches are out of reach. Safe to call
    /// while other threads allocate and free. Returns the number of magazines
    /// reclaimed.
    ///
    /// # Panics
    ///
    /// Panics if a depot magazine does not hold exactly `mag_size` items.
    pub fn reclaim(&self) -> usize {
        let detached = {
            let mut state = self.lock();
            if state.depot.is_empty() {
                return 0;
            }
            state.depot.take_all()
        };

        let mut reclaimed = 0;
        let mut batch = [NonNull::dangling(); MAX_MAG_SIZE];
        for mag in detached {
            let count = mag.collect_items(&mut batch);
            assert_eq!(
                count, self.mag_size,
                "depot magazine holds {count} items, expected {}",
                self.mag_size
            );
            let mut state = self.lock();
            state.pool.release(&batch[..count]);
            state.magazines_allocated -= 1;
            drop(state);
            reclaimed += 1;
        }

        if reclaimed > 0 {
            tracing::debug!(name = %self.name, magazines = reclaimed, "reclaimed depot magazines");
        }
        reclaimed
    }

    /// Snapshot of the cache's bookkeeping.
    #[must_use]
    pub fn stats(&self) -> CacheStats {
        let (pool_allocated, depot_magazines, magazines_allocated) = {
            let state = self.lock();
            (
                state.pool.allocated(),
                state.depot.len(),
                state.magazines_allocated,
            )
        };
        CacheStats {
            name: self.name.clone(),
            item_size: self.item_size,
            mag_size: self.mag_size,
            capacity: self.layout.capacity,
            pool_allocated,
            depot_magazines,
            magazines_allocated,
            threads: self.totals.snapshot(),
        }
    }

    /// Log how much memory this cache's live magazines hold.
    pub fn log_usage(&self) {
        let stats = self.stats();
        tracing::info!(
            name = %stats.name,
            usage_kb = stats.usage_bytes() / 1024,
            magazines = stats.magazines_allocated,
            depot_magazines = stats.depot_magazines,
            "shared cache usage"
        );
    }
}

impl std::fmt::Debug for SharedCache<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedCache")
            .field("name", &self.name)
            .field("item_size", &self.item_size)
            .field("mag_size", &self.mag_size)
            .field("capacity", &self.layout.capacity)
            .finish_non_exhaustive()
    }
}
