//! Engine-wide counters.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

use crate::cache::CacheStats;

/// Lock-free counters shared by the engine and the update bus.
#[derive(Debug, Default)]
pub struct EngineMetrics {
    provider_calls: AtomicU64,
    provider_retries: AtomicU64,
    passes: AtomicU64,
    cascades_started: AtomicU64,
    cascades_cancelled: AtomicU64,
    cascades_committed: AtomicU64,
}

impl EngineMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn provider_call(&self) {
        self.provider_calls.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn provider_retry(&self) {
        self.provider_retries.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn pass(&self) {
        self.passes.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn cascade_started(&self) {
        self.cascades_started.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn cascade_cancelled(&self) {
        self.cascades_cancelled.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn cascade_committed(&self) {
        self.cascades_committed.fetch_add(1, Ordering::Relaxed);
    }

    /// Point-in-time copy, combined with the cache tier counters.
    pub fn snapshot(&self, cache: CacheStats) -> MetricsSnapshot {
        MetricsSnapshot {
            provider_calls: self.provider_calls.load(Ordering::Relaxed),
            provider_retries: self.provider_retries.load(Ordering::Relaxed),
            passes: self.passes.load(Ordering::Relaxed),
            cascades_started: self.cascades_started.load(Ordering::Relaxed),
            cascades_cancelled: self.cascades_cancelled.load(Ordering::Relaxed),
            cascades_committed: self.cascades_committed.load(Ordering::Relaxed),
            cache,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub provider_calls: u64,
    pub provider_retries: u64,
    pub passes: u64,
    pub cascades_started: u64,
    pub cascades_cancelled: u64,
    pub cascades_committed: u64,
    pub cache: CacheStats,
}
