use std::ptr::NonNull;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum VmError {
    #[error("VM mapping failed: {0}")]
    MapFailed(#[source] std::io::Error),
    #[error("VM unmapping failed: {0}")]
    UnmapFailed(#[source] std::io::Error),
}

/// Virtual memory operations behind a mapped backing buffer.
///
/// A backing buffer is mapped once, read-write, and stays fully accessible
/// until it is unmapped; nothing is ever decommitted in between.
pub(crate) trait VmOps {
    /// Map `size` bytes of zeroed, page-aligned, read-write memory.
    unsafe fn map(size: usize) -> Result<NonNull<u8>, VmError>;

    /// Unmap a range returned by `map` (after which pointers are invalid).
    unsafe fn unmap(ptr: NonNull<u8>, size: usize) -> Result<(), VmError>;

    /// OS page size.
    fn page_size() -> usize;
}

pub(crate) struct PlatformVmOps;

#[cfg(all(unix, not(any(loom, miri))))]
mod unix {
    use super::{NonNull, PlatformVmOps, VmError, VmOps};
    use std::io;

    impl VmOps for PlatformVmOps {
        unsafe fn map(size: usize) -> Result<NonNull<u8>, VmError> {
            // Safety: anonymous private mapping, no existing memory touched.
            let ptr = unsafe {
                libc::mmap(
                    std::ptr::null_mut(),
                    size,
                    libc::PROT_READ | libc::PROT_WRITE,
                    libc::MAP_PRIVATE | libc::MAP_ANON,
                    -1,
                    0,
                )
            };
            if ptr == libc::MAP_FAILED {
                return Err(VmError::MapFailed(io::Error::last_os_error()));
            }

            #[cfg(target_os = "linux")]
            {
                // Safety: FFI call to madvise on the range just mapped.
                unsafe {
                    // The whole buffer gets carved into items up front, so
                    // back it now instead of taking minor faults on first use.
                    libc::madvise(ptr, size, libc::MADV_WILLNEED)
                };
            }

            NonNull::new(ptr.cast::<u8>())
                .ok_or_else(|| VmError::MapFailed(io::Error::other("mmap returned null")))
        }

        unsafe fn unmap(ptr: NonNull<u8>, size: usize) -> Result<(), VmError> {
            // Safety: upheld by caller; the range came from `map`.
            if unsafe { libc::munmap(ptr.as_ptr().cast::<libc::c_void>(), size) } != 0 {
                return Err(VmError::UnmapFailed(io::Error::last_os_error()));
            }
            Ok(())
        }

        fn page_size() -> usize {
            use crate::sync::OnceLock;
            static CACHED: OnceLock<usize> = OnceLock::new();
            *CACHED.get_or_init(|| {
                // Safety: FFI call to sysconf.
                let raw = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
                assert!(
                    raw > 0,
                    "sysconf(_SC_PAGESIZE) failed: {}",
                    io::Error::last_os_error()
                );
                #[allow(clippy::cast_sign_loss, clippy::cast_possible_truncation)]
                {
                    raw as usize
                }
            })
        }
    }
}

// ---------------------------------------------------------------------------
// Heap-backed mock (no real mmap)
//
// loom runs every model inside one process with its own scheduler and Miri
// cannot execute mmap, so both get plain zeroed heap blocks.
// ---------------------------------------------------------------------------
#[cfg(any(loom, miri))]
impl VmOps for PlatformVmOps {
    unsafe fn map(size: usize) -> Result<NonNull<u8>, VmError> {
        if size == 0 {
            return Err(VmError::MapFailed(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "zero-size mapping",
            )));
        }
        let layout = std::alloc::Layout::from_size_align(size, Self::page_size())
            .map_err(|e| VmError::MapFailed(std::io::Error::other(e)))?;
        // Safety: layout has non-zero size.
        let ptr = unsafe { std::alloc::alloc_zeroed(layout) };
        NonNull::new(ptr).ok_or_else(|| {
            VmError::MapFailed(std::io::Error::new(
                std::io::ErrorKind::OutOfMemory,
                "alloc returned null",
            ))
        })
    }

    unsafe fn unmap(ptr: NonNull<u8>, size: usize) -> Result<(), VmError> {
        let layout = std::alloc::Layout::from_size_align(size, Self::page_size())
            .map_err(|e| VmError::UnmapFailed(std::io::Error::other(e)))?;
        // Safety: ptr was allocated with the same layout via `map`.
        unsafe { std::alloc::dealloc(ptr.as_ptr(), layout) };
        Ok(())
    }

    fn page_size() -> usize {
        4096
    }
}
