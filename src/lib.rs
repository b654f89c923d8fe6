#[cfg(not(target_pointer_width = "64"))]
compile_error!("magpool supports only 64-bit targets.");

pub(crate) mod sync;

// public module: implementation details stay pub(crate) inside it
pub mod memory;

// caches
pub use memory::backing::MappedBuffer;
pub use memory::magazine::{DEFAULT_MAG_SIZE, MAX_MAG_SIZE, MIN_ITEM_SIZE};
pub use memory::shared::{SharedCache, SharedCacheConfig};
pub use memory::thread_cache::{Item, ThreadCache};

// stats/reporting
pub use memory::stats::{CacheStats, ThreadStats};
pub use memory::usage::UsageReport;

// errors
pub use memory::error::TcacheError;
pub use memory::vm::VmError;
