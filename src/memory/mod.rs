pub(crate) mod backing;
pub(crate) mod error;
pub(crate) mod layout;
pub(crate) mod magazine;
pub(crate) mod pool;
pub(crate) mod shared;
pub(crate) mod stats;
pub(crate) mod thread_cache;
pub(crate) mod usage;
pub(crate) mod vm;

#[cfg(test)]
pub(crate) mod test_util;
