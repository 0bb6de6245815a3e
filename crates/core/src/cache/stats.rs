use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Which tier an entry or counter belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheTier {
    Intern,
    Memo,
    External,
}

#[derive(Debug, Default)]
pub(crate) struct TierCounters {
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
    inconsistencies: AtomicU64,
}

impl TierCounters {
    pub(crate) fn hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn evicted(&self, n: usize) {
        self.evictions.fetch_add(n as u64, Ordering::Relaxed);
    }

    pub(crate) fn inconsistent(&self) {
        self.inconsistencies.fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot(&self) -> TierStats {
        TierStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            inconsistencies: self.inconsistencies.load(Ordering::Relaxed),
        }
    }
}

/// Counters for one tier at a point in time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TierStats {
    pub hits: u64,
    pub misses: u64,
    /// Entries removed by invalidation or expiry (not LRU capacity pressure).
    pub evictions: u64,
    pub inconsistencies: u64,
}

#[derive(Debug, Default)]
pub(crate) struct CacheCounters {
    pub(crate) intern: TierCounters,
    pub(crate) memo: TierCounters,
    pub(crate) external: TierCounters,
}

impl CacheCounters {
    pub(crate) fn snapshot(&self) -> CacheStats {
        CacheStats {
            intern: self.intern.snapshot(),
            memo: self.memo.snapshot(),
            external: self.external.snapshot(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub intern: TierStats,
    pub memo: TierStats,
    pub external: TierStats,
}

impl CacheStats {
    pub fn tier(&self, tier: CacheTier) -> TierStats {
        match tier {
            CacheTier::Intern => self.intern,
            CacheTier::Memo => self.memo,
            CacheTier::External => self.external,
        }
    }
}
