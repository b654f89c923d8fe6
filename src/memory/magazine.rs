//! Magazines and the depot.
//!
//! A free item's own storage is reinterpreted as a [`MagazineHeader`]:
//! `next_item` chains the items of one magazine, `next_mag` chains whole
//! magazines on the depot (only the first item of a magazine uses it). The
//! overlay is valid strictly between the item being returned to the cache and
//! being handed to a caller; nothing outside this module dereferences it.

use std::ptr::{self, NonNull};

#[repr(C)]
pub(crate) struct MagazineHeader {
    next_item: Link,
    next_mag: Link,
}

pub(crate) type Link = Option<NonNull<MagazineHeader>>;

/// Smallest item that can carry the header while free.
pub const MIN_ITEM_SIZE: usize = size_of::<MagazineHeader>();

/// Alignment every item address must satisfy.
pub(crate) const HEADER_ALIGN: usize = align_of::<MagazineHeader>();

/// Largest number of items a magazine may hold.
pub const MAX_MAG_SIZE: usize = 64;

/// Magazine size used by `SharedCacheConfig::default()`.
pub const DEFAULT_MAG_SIZE: usize = 8;

#[inline]
pub(crate) fn header_of(item: NonNull<u8>) -> NonNull<MagazineHeader> {
    debug_assert!(item.as_ptr().addr().is_multiple_of(HEADER_ALIGN));
    item.cast()
}

/// Read the in-magazine link of a free item.
///
/// # Safety
/// `hdr` must be a free item owned by the caller (thread cache or pool lock
/// holder) whose `next_item` has been written.
#[inline]
pub(crate) unsafe fn next_item(hdr: NonNull<MagazineHeader>) -> Link {
    // Safety: upheld by caller.
    unsafe { ptr::addr_of!((*hdr.as_ptr()).next_item).read() }
}

/// Write the in-magazine link of a free item.
///
/// # Safety
/// `hdr` must be a free item exclusively owned by the caller.
#[inline]
pub(crate) unsafe fn set_next_item(hdr: NonNull<MagazineHeader>, next: Link) {
    // Safety: upheld by caller.
    unsafe { ptr::addr_of_mut!((*hdr.as_ptr()).next_item).write(next) }
}

/// A full magazine: a null-terminated list of exactly `mag_size` free items.
///
/// Owning a `Magazine` means owning every item on its list.
#[derive(Debug)]
pub(crate) struct Magazine {
    head: NonNull<MagazineHeader>,
}

impl Magazine {
    /// Link `items` (in order) into a magazine.
    ///
    /// # Safety
    /// Every address must be a distinct free item, aligned for the header and
    /// exclusively owned by the caller. `items` must be non-empty.
    pub unsafe fn from_items(items: &[NonNull<u8>]) -> Self {
        assert!(!items.is_empty(), "a magazine holds at least one item");
        let mut next: Link = None;
        for &item in items.iter().rev() {
            let hdr = header_of(item);
            // Safety: upheld by caller.
            unsafe { set_next_item(hdr, next) };
            next = Some(hdr);
        }
        Self {
            head: header_of(items[0]),
        }
    }

    /// Adopt an already linked list as a magazine.
    ///
    /// # Safety
    /// `head` must start a null-terminated `next_item` list of free items
    /// owned by the caller.
    #[inline]
    pub unsafe fn from_head(head: NonNull<MagazineHeader>) -> Self {
        Self { head }
    }

    #[inline]
    pub fn into_head(self) -> NonNull<MagazineHeader> {
        self.head
    }

    /// Walk the list, copying each item address into `out`. Returns the
    /// number of items, which is checked against `out.len()` as the walk goes.
    ///
    /// # Panics
    ///
    /// Panics if the list is longer than `out`.
    pub fn collect_items(&self, out: &mut [NonNull<u8>]) -> usize {
        let mut count = 0;
        let mut cursor = Some(self.head);
        while let Some(hdr) = cursor {
            assert!(
                count < out.len(),
                "magazine holds more than {} items; list corrupted",
                out.len()
            );
            out[count] = hdr.cast();
            count += 1;
            // Safety: the magazine owns every item on its list.
            cursor = unsafe { next_item(hdr) };
        }
        count
    }

    #[cfg(test)]
    pub fn head_addr(&self) -> usize {
        self.head.as_ptr().addr()
    }

    /// Number of items on the list. Walks it.
    #[cfg(test)]
    pub fn len(&self) -> usize {
        let mut count = 0;
        let mut cursor = Some(self.head);
        while let Some(hdr) = cursor {
            count += 1;
            // Safety: the magazine owns every item on its list.
            cursor = unsafe { next_item(hdr) };
        }
        count
    }
}

/// LIFO stack of full magazines, linked through `next_mag` of each head item.
pub(crate) struct Depot {
    head: Link,
    depth: usize,
}

impl Depot {
    pub const fn new() -> Self {
        Self {
            head: None,
            depth: 0,
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.depth
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.head.is_none()
    }

    pub fn push(&mut self, mag: Magazine) {
        let hdr = mag.into_head();
        // Safety: the depot now owns the magazine and its head item.
        unsafe { ptr::addr_of_mut!((*hdr.as_ptr()).next_mag).write(self.head) };
        self.head = Some(hdr);
        self.depth += 1;
    }

    pub fn pop(&mut self) -> Option<Magazine> {
        let hdr = self.head?;
        // Safety: `hdr` heads a magazine owned by the depot; its `next_mag` was
        // written by `push`.
        self.head = unsafe { ptr::addr_of!((*hdr.as_ptr()).next_mag).read() };
        self.depth -= 1;
        // Safety: ownership of the whole list moves to the caller.
        Some(unsafe { Magazine::from_head(hdr) })
    }

    /// Detach every magazine at once, leaving the depot empty.
    pub fn take_all(&mut self) -> DetachedMagazines {
        self.depth = 0;
        DetachedMagazines {
            next: self.head.take(),
        }
    }
}

// Safety: the depot owns the magazines it links; all access happens through
// `&mut Depot` under the shared cache lock.
unsafe impl Send for Depot {}

/// Magazines detached from the depot, yielded most recently pushed first.
pub(crate) struct DetachedMagazines {
    next: Link,
}

impl Iterator for DetachedMagazines {
    type Item = Magazine;

    fn next(&mut self) -> Option<Magazine> {
        let hdr = self.next?;
        // The link must be read before the magazine is handed out: once its
        // items go back to the pool another thread may overwrite them.
        // Safety: the detached chain is exclusively owned by this iterator.
        self.next = unsafe { ptr::addr_of!((*hdr.as_ptr()).next_mag).read() };
        // Safety: ownership of the list moves to the caller.
        Some(unsafe { Magazine::from_head(hdr) })
    }
}

#[cfg(all(test, not(loom)))]
mod tests {
    use super::*;

    #[repr(C, align(16))]
    struct Slot([u8; 32]);

    fn slots(n: usize) -> Vec<Slot> {
        (0..n).map(|_| Slot([0; 32])).collect()
    }

    fn addrs(slots: &mut [Slot]) -> Vec<NonNull<u8>> {
        slots
            .iter_mut()
            .map(|s| NonNull::from(&mut s.0).cast::<u8>())
            .collect()
    }

    #[test]
    fn test_header_fits_two_links() {
        assert_eq!(MIN_ITEM_SIZE, 2 * size_of::<usize>());
        assert_eq!(HEADER_ALIGN, align_of::<usize>());
    }

    #[test]
    fn test_from_items_links_in_order() {
        let mut backing = slots(4);
        let items = addrs(&mut backing);
        // Safety: Test code; items are distinct, aligned and unused.
        let mag = unsafe { Magazine::from_items(&items) };
        assert_eq!(mag.len(), 4);

        let mut out = [NonNull::dangling(); 4];
        assert_eq!(mag.collect_items(&mut out), 4);
        assert_eq!(out.as_slice(), items.as_slice());
    }

    #[test]
    #[should_panic(expected = "list corrupted")]
    fn test_collect_items_detects_overlong_list() {
        let mut backing = slots(3);
        let items = addrs(&mut backing);
        // Safety: Test code.
        let mag = unsafe { Magazine::from_items(&items) };
        let mut out = [NonNull::dangling(); 2];
        mag.collect_items(&mut out);
    }

    #[test]
    fn test_depot_is_lifo() {
        let mut backing = slots(6);
        let items = addrs(&mut backing);
        let mut depot = Depot::new();
        assert!(depot.is_empty());

        // Safety: Test code; the three magazines use disjoint items.
        let (a, b, c) = unsafe {
            (
                Magazine::from_items(&items[0..2]),
                Magazine::from_items(&items[2..4]),
                Magazine::from_items(&items[4..6]),
            )
        };
        let (ha, hb, hc) = (a.head, b.head, c.head);
        depot.push(a);
        depot.push(b);
        assert_eq!(depot.len(), 2);
        assert_eq!(depot.pop().unwrap().into_head(), hb);
        depot.push(c);
        assert_eq!(depot.pop().unwrap().into_head(), hc);
        assert_eq!(depot.pop().unwrap().into_head(), ha);
        assert!(depot.pop().is_none());
        assert_eq!(depot.len(), 0);
    }

    #[test]
    fn test_depot_push_keeps_item_links() {
        let mut backing = slots(3);
        let items = addrs(&mut backing);
        let mut depot = Depot::new();
        // Safety: Test code.
        depot.push(unsafe { Magazine::from_items(&items) });
        let mag = depot.pop().unwrap();
        assert_eq!(mag.len(), 3);
    }

    #[test]
    fn test_take_all_detaches_everything() {
        let mut backing = slots(6);
        let items = addrs(&mut backing);
        let mut depot = Depot::new();
        for chunk in items.chunks(2) {
            // Safety: Test code; chunks are disjoint.
            depot.push(unsafe { Magazine::from_items(chunk) });
        }
        let detached: Vec<_> = depot.take_all().collect();
        assert!(depot.is_empty());
        assert_eq!(depot.len(), 0);
        assert_eq!(detached.len(), 3);
        // Most recently pushed first.
        assert_eq!(detached[0].head.cast::<u8>(), items[4]);
        assert_eq!(detached[2].head.cast::<u8>(), items[0]);
        assert!(detached.iter().all(|m| m.len() == 2));
        assert_eq!(depot.take_all().count(), 0);
    }
}
