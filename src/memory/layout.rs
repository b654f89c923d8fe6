//! Tiling of a backing buffer into fixed-size items.
//!
//! ```text
//! page 0                      page 1                 page 2
//! +--------+---------------+  +----+----+----+--+   +----+----+----+--+
//! | header | address table |  | it | it | it |  |   | it | it | it |  |
//! +--------+---------------+  +----+----+----+--+   +----+----+----+--+
//!   HEADER_RESERVE               item_stride  ^ tail left unused when the
//!                                               stride does not divide the page
//! ```
//!
//! Item index `i` lives on item page `i / items_per_page`, slot
//! `i % items_per_page`. Capacity is
//! `(total_pages - 1) * floor(page_size / item_stride)`; a trailing partial
//! page in the buffer is ignored, as is the tail of every page.

use super::error::TcacheError;
use super::magazine::{HEADER_ALIGN, MIN_ITEM_SIZE};

/// Bytes at the start of the first page kept clear ahead of the address table.
pub(crate) const HEADER_RESERVE: usize = 64;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct ItemLayout {
    base_addr: usize,
    pub page_size: usize,
    pub item_stride: usize,
    pub items_per_page: usize,
    pub item_pages: usize,
    pub capacity: usize,
}

impl ItemLayout {
    /// Validate the geometry and compute the item capacity of a buffer
    /// starting at `base_addr` and spanning `len` bytes.
    pub fn new(
        item_size: usize,
        item_stride: usize,
        page_size: usize,
        base_addr: usize,
        len: usize,
    ) -> Result<Self, TcacheError> {
        if item_size < MIN_ITEM_SIZE {
            return Err(TcacheError::ItemTooSmall {
                item_size,
                min: MIN_ITEM_SIZE,
            });
        }
        if item_stride < item_size {
            return Err(TcacheError::StrideTooSmall {
                item_stride,
                item_size,
            });
        }
        check_aligned("item stride", item_stride)?;
        if page_size < item_stride || page_size < HEADER_RESERVE {
            return Err(TcacheError::PageTooSmall {
                page_size,
                item_stride,
                reserve: HEADER_RESERVE,
            });
        }
        check_aligned("page size", page_size)?;
        check_aligned("buffer base", base_addr)?;
        if len < page_size {
            return Err(TcacheError::BufferTooSmall { len, page_size });
        }

        let items_per_page = page_size / item_stride;
        let item_pages = len / page_size - 1;
        let capacity = item_pages * items_per_page;

        let available = page_size - HEADER_RESERVE;
        let needed = capacity.saturating_mul(size_of::<usize>());
        if needed > available {
            return Err(TcacheError::AddressTableOverflow { needed, available });
        }

        Ok(Self {
            base_addr,
            page_size,
            item_stride,
            items_per_page,
            item_pages,
            capacity,
        })
    }

    /// Byte offset of the address table from the buffer base.
    #[inline]
    pub fn table_offset(&self) -> usize {
        HEADER_RESERVE
    }

    /// Byte offset of item `index` from the buffer base.
    #[inline]
    pub fn item_offset(&self, index: usize) -> usize {
        debug_assert!(index < self.capacity);
        let page = 1 + index / self.items_per_page;
        let slot = index % self.items_per_page;
        page * self.page_size + slot * self.item_stride
    }

    /// Map an address back to its item index, or `None` if the address is not
    /// the start of an item slot in this buffer.
    pub fn index_of(&self, addr: usize) -> Option<usize> {
        let offset = addr.checked_sub(self.base_addr)?.checked_sub(self.page_size)?;
        let page = offset / self.page_size;
        let in_page = offset % self.page_size;
        if page >= self.item_pages || !in_page.is_multiple_of(self.item_stride) {
            return None;
        }
        let slot = in_page / self.item_stride;
        if slot >= self.items_per_page {
            return None;
        }
        Some(page * self.items_per_page + slot)
    }

    #[inline]
    pub fn contains(&self, addr: usize) -> bool {
        self.index_of(addr).is_some()
    }
}

fn check_aligned(what: &'static str, value: usize) -> Result<(), TcacheError> {
    if value.is_multiple_of(HEADER_ALIGN) {
        Ok(())
    } else {
        Err(TcacheError::Misaligned {
            what,
            value,
            align: HEADER_ALIGN,
        })
    }
}

#[cfg(all(test, not(loom)))]
mod tests {
    use super::*;

    const BASE: usize = 0x10_0000;

    #[test]
    fn test_capacity_formula() {
        // 3 pages: page 0 is the header, 2 item pages of 64 slots each.
        let layout = ItemLayout::new(64, 64, 4096, BASE, 3 * 4096).unwrap();
        assert_eq!(layout.items_per_page, 64);
        assert_eq!(layout.item_pages, 2);
        assert_eq!(layout.capacity, 128);
    }

    #[test]
    fn test_capacity_rounds_down_when_stride_does_not_divide_page() {
        // 4096 / 96 = 42.67 -> 42 slots per page, 64 bytes wasted per page.
        let layout = ItemLayout::new(80, 96, 4096, BASE, 2 * 4096).unwrap();
        assert_eq!(layout.items_per_page, 42);
        assert_eq!(layout.capacity, 42);
    }

    #[test]
    fn test_trailing_partial_page_ignored() {
        let layout = ItemLayout::new(64, 64, 4096, BASE, 2 * 4096 + 4000).unwrap();
        assert_eq!(layout.item_pages, 1);
        assert_eq!(layout.capacity, 64);
    }

    #[test]
    fn test_header_page_only_yields_zero_capacity() {
        let layout = ItemLayout::new(64, 64, 4096, BASE, 4096).unwrap();
        assert_eq!(layout.capacity, 0);
    }

    #[test]
    fn test_item_offsets_skip_header_page() {
        let layout = ItemLayout::new(64, 64, 4096, BASE, 3 * 4096).unwrap();
        assert_eq!(layout.item_offset(0), 4096);
        assert_eq!(layout.item_offset(1), 4096 + 64);
        assert_eq!(layout.item_offset(63), 4096 + 63 * 64);
        assert_eq!(layout.item_offset(64), 2 * 4096);
    }

    #[test]
    fn test_index_of_inverts_item_offset() {
        let layout = ItemLayout::new(80, 96, 4096, BASE, 4 * 4096).unwrap();
        for index in [0, 1, 41, 42, 83, layout.capacity - 1] {
            let addr = BASE + layout.item_offset(index);
            assert_eq!(layout.index_of(addr), Some(index));
        }
    }

    #[test]
    fn test_index_of_rejects_foreign_addresses() {
        let layout = ItemLayout::new(80, 96, 4096, BASE, 3 * 4096).unwrap();
        // Header page.
        assert_eq!(layout.index_of(BASE + 128), None);
        // Before the buffer.
        assert_eq!(layout.index_of(BASE - 4096), None);
        // Interior of an item.
        assert_eq!(layout.index_of(BASE + 4096 + 8), None);
        // Unused page tail (slot 42 does not exist).
        assert_eq!(layout.index_of(BASE + 4096 + 42 * 96), None);
        // Past the last item page.
        assert_eq!(layout.index_of(BASE + 3 * 4096), None);
        assert!(!layout.contains(BASE));
        assert!(layout.contains(BASE + 4096));
    }

    #[test]
    fn test_rejects_small_items() {
        let err = ItemLayout::new(MIN_ITEM_SIZE - 8, 64, 4096, BASE, 8192).unwrap_err();
        assert!(matches!(err, TcacheError::ItemTooSmall { .. }));
    }

    #[test]
    fn test_rejects_short_stride() {
        let err = ItemLayout::new(64, 32, 4096, BASE, 8192).unwrap_err();
        assert!(matches!(err, TcacheError::StrideTooSmall { .. }));
    }

    #[test]
    fn test_rejects_misalignment() {
        let err = ItemLayout::new(20, 20, 4096, BASE, 8192).unwrap_err();
        assert!(matches!(err, TcacheError::Misaligned { what: "item stride", .. }));

        let err = ItemLayout::new(64, 64, 4100, BASE, 8200).unwrap_err();
        assert!(matches!(err, TcacheError::Misaligned { what: "page size", .. }));

        let err = ItemLayout::new(64, 64, 4096, BASE + 1, 8192).unwrap_err();
        assert!(matches!(err, TcacheError::Misaligned { what: "buffer base", .. }));
    }

    #[test]
    fn test_rejects_tiny_pages_and_buffers() {
        let err = ItemLayout::new(64, 128, 64, BASE, 8192).unwrap_err();
        assert!(matches!(err, TcacheError::PageTooSmall { .. }));

        let err = ItemLayout::new(64, 64, 4096, BASE, 4095).unwrap_err();
        assert!(matches!(err, TcacheError::BufferTooSmall { .. }));
    }

    #[test]
    fn test_rejects_table_overflow() {
        // 4032 bytes of table room hold 504 addresses; 8 item pages of 64 need 512.
        let err = ItemLayout::new(64, 64, 4096, BASE, 9 * 4096).unwrap_err();
        match err {
            TcacheError::AddressTableOverflow { needed, available } => {
                assert_eq!(needed, 512 * 8);
                assert_eq!(available, 4096 - HEADER_RESERVE);
            }
            other => panic!("unexpected error: {other:?}"),
        }
        // 7 item pages (448 addresses) still fit.
        assert!(ItemLayout::new(64, 64, 4096, BASE, 8 * 4096).is_ok());
    }
}
