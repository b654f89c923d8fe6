use std::ptr::NonNull;

use super::vm::{PlatformVmOps, VmError, VmOps};

/// A page-aligned, zero-filled region mapped straight from the OS.
///
/// Used as the backing buffer of a [`SharedCache`](super::shared::SharedCache)
/// when the caller has no buffer of its own. The mapping is released on drop.
pub struct MappedBuffer {
    ptr: NonNull<u8>,
    len: usize,
}

// Safety: MappedBuffer exclusively owns its mapping; the raw pointer is never
// shared outside a borrow of `self`.
unsafe impl Send for MappedBuffer {}
// Safety: `&MappedBuffer` only exposes the length and a const pointer.
unsafe impl Sync for MappedBuffer {}

impl MappedBuffer {
    /// Map at least `len` bytes, rounded up to the OS page size.
    ///
    /// # Errors
    ///
    /// Returns `VmError` if the mapping fails, including the zero-length case.
    pub fn new(len: usize) -> Result<Self, VmError> {
        let len = len.next_multiple_of(PlatformVmOps::page_size());
        // Safety: FFI call to map fresh anonymous memory.
        let ptr = unsafe { PlatformVmOps::map(len)? };
        Ok(Self { ptr, len })
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.len
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[must_use]
    pub fn as_ptr(&self) -> *const u8 {
        self.ptr.as_ptr().cast_const()
    }

    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        // Safety: the whole range is mapped read-write, zero-initialized and owned by
        // self; the returned borrow keeps self exclusively borrowed.
        unsafe { std::slice::from_raw_parts_mut(self.ptr.as_ptr(), self.len) }
    }
}

impl Drop for MappedBuffer {
    fn drop(&mut self) {
        // Safety: the mapping was created in `new` with exactly this length.
        if let Err(e) = unsafe { PlatformVmOps::unmap(self.ptr, self.len) } {
            tracing::warn!(error = %e, len = self.len, "failed to unmap buffer");
        }
    }
}
