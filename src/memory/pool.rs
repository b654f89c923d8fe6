#[cfg(debug_assertions)]
use fixedbitset::FixedBitSet;
use std::ptr::NonNull;

use super::layout::ItemLayout;

/// Stack of raw item addresses backing brand-new magazines.
///
/// The table lives in the first page of the backing buffer. Entries
/// `[allocated..capacity)` are the items currently in the pool; popping hands
/// out `table[allocated]` and bumps `allocated`, pushing writes to
/// `table[allocated - 1]`. Only ever touched under the shared cache lock.
pub(crate) struct BottomPool {
    table: NonNull<NonNull<u8>>,
    capacity: usize,
    allocated: usize,
    #[cfg(debug_assertions)]
    layout: ItemLayout,
    /// Which item indices are currently in the pool. Catches double frees and
    /// foreign pointers that make it all the way back to the pool.
    #[cfg(debug_assertions)]
    in_pool: FixedBitSet,
}

// Safety: BottomPool exclusively owns the address table and every item whose
// address it holds; it is only reachable through the shared cache mutex.
unsafe impl Send for BottomPool {}

impl BottomPool {
    /// Fill the address table with every item slot of `layout`.
    ///
    /// # Safety
    /// `base` must point to a writable buffer covering `layout`, aligned for
    /// the header, exclusively owned by the returned pool for its lifetime.
    pub unsafe fn carve(base: NonNull<u8>, layout: ItemLayout) -> Self {
        let capacity = layout.capacity;
        // Safety: the table range was bounds-checked by `ItemLayout::new`.
        let table = unsafe { base.add(layout.table_offset()).cast::<NonNull<u8>>() };
        for index in 0..capacity {
            // Safety: both offsets lie inside the buffer (checked by the layout).
            unsafe {
                let item = base.add(layout.item_offset(index));
                table.add(index).write(item);
            }
        }

        #[cfg(debug_assertions)]
        let in_pool = {
            let mut bits = FixedBitSet::with_capacity(capacity);
            bits.insert_range(..);
            bits
        };

        Self {
            table,
            capacity,
            allocated: 0,
            #[cfg(debug_assertions)]
            layout,
            #[cfg(debug_assertions)]
            in_pool,
        }
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Items handed out of the pool (sitting in magazines or with callers).
    #[inline]
    pub fn allocated(&self) -> usize {
        self.allocated
    }

    #[inline]
    pub fn available(&self) -> usize {
        self.capacity() - self.allocated
    }

    pub fn pop(&mut self) -> Option<NonNull<u8>> {
        if self.allocated >= self.capacity {
            return None;
        }
        // Safety: index < capacity, and every entry below capacity was written
        // in `carve` or by `push`.
        let item = unsafe { self.table.add(self.allocated).read() };
        self.allocated += 1;

        #[cfg(debug_assertions)]
        {
            let index = self.index_checked(item);
            assert!(self.in_pool.contains(index), "item {item:p} handed out twice by the pool");
            self.in_pool.set(index, false);
        }

        Some(item)
    }

    /// Return one item to the pool.
    ///
    /// # Panics
    ///
    /// Panics if more items come back than were handed out: `allocated` must
    /// never leave `0..=capacity`.
    pub fn push(&mut self, item: NonNull<u8>) {
        assert!(
            self.allocated > 0,
            "bottom pool overflow: item {item:p} returned but all {} items are already in the pool",
            self.capacity
        );

        #[cfg(debug_assertions)]
        {
            let index = self.index_checked(item);
            assert!(!self.in_pool.contains(index), "double free: item {item:p} is already in the pool");
            self.in_pool.insert(index);
        }

        self.allocated -= 1;
        // Safety: allocated < capacity after the decrement.
        unsafe { self.table.add(self.allocated).write(item) };
        debug_assert!(self.allocated <= self.capacity);
    }

    /// Reserve exactly `out.len()` items, all or nothing.
    ///
    /// On failure every item already taken in this attempt is pushed back, so
    /// `allocated` is unchanged, and `false` is returned.
    pub fn reserve(&mut self, out: &mut [NonNull<u8>]) -> bool {
        for taken in 0..out.len() {
            match self.pop() {
                Some(item) => out[taken] = item,
                None => {
                    // Reverse order restores the table exactly as it was.
                    for &item in out[..taken].iter().rev() {
                        self.push(item);
                    }
                    return false;
                }
            }
        }
        true
    }

    pub fn release(&mut self, items: &[NonNull<u8>]) {
        for &item in items {
            self.push(item);
        }
    }

    #[cfg(debug_assertions)]
    fn index_checked(&self, item: NonNull<u8>) -> usize {
        match self.layout.index_of(item.as_ptr().addr()) {
            Some(index) => index,
            None => panic!("item {item:p} does not belong to this cache's backing buffer"),
        }
    }
}
