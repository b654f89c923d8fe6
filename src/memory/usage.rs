//! Memory usage reporting across several shared caches.

use super::shared::SharedCache;
use super::stats::CacheStats;

/// Usage of a set of shared caches, captured at one point in time.
#[derive(Clone, Debug, Default)]
pub struct UsageReport {
    caches: Vec<CacheStats>,
}

impl UsageReport {
    /// Snapshot every cache in `caches`, in order.
    #[must_use]
    pub fn collect(caches: &[&SharedCache<'_>]) -> Self {
        Self {
            caches: caches.iter().map(|cache| cache.stats()).collect(),
        }
    }

    #[must_use]
    pub fn caches(&self) -> &[CacheStats] {
        &self.caches
    }

    /// Bytes held by live magazines across all caches.
    #[must_use]
    pub fn total_bytes(&self) -> usize {
        self.caches.iter().map(CacheStats::usage_bytes).sum()
    }

    /// One info line per cache, then the total, all in KiB.
    pub fn log(&self) {
        for stats in &self.caches {
            tracing::info!(
                name = %stats.name,
                usage_kb = stats.usage_bytes() / 1024,
                "cache usage"
            );
        }
        tracing::info!(
            caches = self.caches.len(),
            total_kb = self.total_bytes() / 1024,
            "total cache usage"
        );
    }
}
