//! Helpers shared by the unit tests.

/// One 4 KiB page, aligned like a real one.
#[repr(C, align(4096))]
pub(crate) struct Page(pub [u8; 4096]);

pub(crate) const PAGE: usize = 4096;

/// Heap buffer of whole 4 KiB pages with a deterministic size, unlike a
/// `MappedBuffer`, whose length depends on the OS page size.
pub(crate) struct PageBuf {
    pages: Vec<Page>,
}

impl PageBuf {
    pub fn new(pages: usize) -> Self {
        Self {
            pages: (0..pages).map(|_| Page([0; PAGE])).collect(),
        }
    }

    pub fn base_addr(&self) -> usize {
        self.pages.as_ptr() as usize
    }

    pub fn bytes(&mut self) -> &mut [u8] {
        let len = self.pages.len() * PAGE;
        // Safety: Test code; Page is plain bytes and the slice borrows self.
        unsafe { std::slice::from_raw_parts_mut(self.pages.as_mut_ptr().cast::<u8>(), len) }
    }
}
