use thiserror::Error;

use super::vm::VmError;

/// Errors reported by shared caches and their per-thread handles.
///
/// Only [`TcacheError::PoolExhausted`] is a runtime condition. Every other
/// variant describes a cache that was misconfigured at construction time;
/// [`SharedCache::create`](super::shared::SharedCache::create) treats those as
/// fatal, [`SharedCache::try_create`](super::shared::SharedCache::try_create)
/// hands them back.
#[derive(Debug, Error)]
pub enum TcacheError {
    /// The depot is empty and the bottom pool cannot mint another magazine.
    #[error("shared cache exhausted: no full magazine in the depot and too few items left to mint one")]
    PoolExhausted,

    #[error("magazine size {mag_size} out of range (must be 1..={max})")]
    MagazineSize { mag_size: usize, max: usize },

    #[error("item size {item_size} is smaller than the magazine header ({min} bytes)")]
    ItemTooSmall { item_size: usize, min: usize },

    #[error("item stride {item_stride} is smaller than item size {item_size}")]
    StrideTooSmall { item_stride: usize, item_size: usize },

    #[error("page size {page_size} cannot hold one item of stride {item_stride} (or the {reserve}-byte header area)")]
    PageTooSmall {
        page_size: usize,
        item_stride: usize,
        reserve: usize,
    },

    #[error("{what} ({value:#x}) is not aligned to {align} bytes")]
    Misaligned {
        what: &'static str,
        value: usize,
        align: usize,
    },

    #[error("backing buffer of {len} bytes is shorter than one {page_size}-byte page")]
    BufferTooSmall { len: usize, page_size: usize },

    #[error("address table needs {needed} bytes but only {available} are left on the first page")]
    AddressTableOverflow { needed: usize, available: usize },

    #[error(transparent)]
    Vm(#[from] VmError),
}

impl TcacheError {
    /// `true` for every variant that describes a bad configuration rather than
    /// a runtime condition.
    #[must_use]
    pub fn is_misconfiguration(&self) -> bool {
        !matches!(self, TcacheError::PoolExhausted | TcacheError::Vm(_))
    }
}

#[cfg(all(test, not(loom)))]
mod tests {
    use super::*;

    #[test]
    fn test_exhaustion_is_not_misconfiguration() {
        assert!(!TcacheError::PoolExhausted.is_misconfiguration());
        let vm = TcacheError::from(VmError::UnmapFailed(std::io::Error::other("denied")));
        assert!(!vm.is_misconfiguration());
    }

    #[test]
    fn test_geometry_errors_are_misconfiguration() {
        let errors = [
            TcacheError::MagazineSize { mag_size: 0, max: 64 },
            TcacheError::ItemTooSmall { item_size: 8, min: 16 },
            TcacheError::BufferTooSmall {
                len: 100,
                page_size: 4096,
            },
            TcacheError::AddressTableOverflow {
                needed: 4096,
                available: 4032,
            },
        ];
        assert!(errors.iter().all(TcacheError::is_misconfiguration));
    }

    #[test]
    fn test_messages_carry_values() {
        let err = TcacheError::Misaligned {
            what: "item stride",
            value: 0x2a,
            align: 8,
        };
        assert_eq!(err.to_string(), "item stride (0x2a) is not aligned to 8 bytes");

        let vm = TcacheError::from(VmError::MapFailed(std::io::Error::other("no space")));
        assert_eq!(vm.to_string(), "VM mapping failed: no space");
    }
}
