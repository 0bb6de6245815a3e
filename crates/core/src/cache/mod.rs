//! Three-tier performance cache.
//!
//! Tiers are consulted in order: interned literals, memoized template
//! results, then provider responses. Correctness comes from invalidation
//! driven by the dependency graph; LRU bounds only cap memory.

mod external;
mod intern;
mod memo;
mod stats;

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use serde_json::Value;
use thiserror::Error;
use tracing::{debug, warn};

use crate::config::CacheConfig;
use crate::graph::{DependencyTracker, var_node};
use crate::vars::VariableSnapshot;

use external::{ExternalLookup, ExternalResponseCache};
use intern::StringInterner;
pub use memo::MemoKey;
use stats::CacheCounters;
pub use stats::{CacheStats, CacheTier, TierStats};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CacheError {
    /// A cached value was built from a variable version that is no longer
    /// current. The entry has been evicted.
    #[error("{tier:?} cache entry read '{variable}' at version {cached_version}, current is {current_version:?}")]
    Inconsistent {
        tier: CacheTier,
        variable: String,
        cached_version: u64,
        current_version: Option<u64>,
    },
}

pub struct PerformanceCache {
    interner: StringInterner,
    memo: memo::MemoCache,
    external: ExternalResponseCache,
    counters: CacheCounters,
}

impl PerformanceCache {
    pub fn new(config: &CacheConfig) -> Self {
        Self {
            interner: StringInterner::new(config.intern_capacity),
            memo: memo::MemoCache::new(config.memo_capacity),
            external: ExternalResponseCache::new(config.external_capacity, config.external_ttl()),
            counters: CacheCounters::default(),
        }
    }

    /// Shared copy of a literal string.
    pub fn intern(&self, text: &str) -> Arc<str> {
        let (shared, hit) = self.interner.intern(text);
        if hit {
            self.counters.intern.hit();
        } else {
            self.counters.intern.miss();
        }
        shared
    }

    /// Memoized result for `key`, or `None`. An inconsistent entry is logged,
    /// evicted and reported as a miss.
    pub fn memo_get(&self, key: &MemoKey, snapshot: &VariableSnapshot) -> Option<Value> {
        match self.memo.get(key, snapshot) {
            Ok(Some(value)) => {
                self.counters.memo.hit();
                debug!(ast_hash = key.ast_hash, "memo hit");
                Some(value)
            }
            Ok(None) => {
                self.counters.memo.miss();
                None
            }
            Err(err) => {
                warn!(error = %err, "forced cache miss");
                self.counters.memo.inconsistent();
                self.counters.memo.evicted(1);
                self.counters.memo.miss();
                None
            }
        }
    }

    /// Store a computed value with the versions it read and the graph nodes
    /// whose change must evict it.
    pub fn memo_put(&self, key: MemoKey, value: Value, versions: BTreeMap<String, u64>, tags: BTreeSet<String>) {
        self.memo.insert(key, value, versions, tags);
    }

    pub fn external_get(&self, prompt: &str, fields: &[String]) -> Option<BTreeMap<String, Value>> {
        match self.external.get(prompt, fields) {
            ExternalLookup::Hit(output) => {
                self.counters.external.hit();
                debug!("provider response served from cache");
                Some(output)
            }
            ExternalLookup::Miss => {
                self.counters.external.miss();
                None
            }
            ExternalLookup::Expired => {
                self.counters.external.evicted(1);
                self.counters.external.miss();
                debug!("cached provider response expired");
                None
            }
        }
    }

    pub fn external_put(&self, prompt: &str, fields: &[String], output: BTreeMap<String, Value>, tags: BTreeSet<String>) {
        self.external.insert(prompt, fields, output, tags);
    }

    /// Evict every memo and response entry tagged with one of `nodes`.
    pub fn invalidate(&self, nodes: &BTreeSet<String>) -> usize {
        let memo = self.memo.invalidate(nodes);
        let external = self.external.invalidate(nodes);
        self.counters.memo.evicted(memo);
        self.counters.external.evicted(external);
        if memo + external > 0 {
            debug!(memo, external, "cache entries invalidated");
        }
        memo + external
    }

    /// Evict everything derived from `variable`: entries tagged with its node
    /// or with any of its transitive dependents.
    pub fn invalidate_variable(&self, variable: &str, tracker: &DependencyTracker) -> usize {
        let node = var_node(variable);
        let mut affected = tracker.transitive_dependents(&node);
        affected.insert(node);
        self.invalidate(&affected)
    }

    pub fn stats(&self) -> CacheStats {
        self.counters.snapshot()
    }

    /// Entry counts per tier: `(intern, memo, external)`.
    pub fn sizes(&self) -> (usize, usize, usize) {
        (self.interner.len(), self.memo.len(), self.external.len())
    }

    pub fn clear(&self) {
        self.interner.clear();
        self.memo.clear();
        self.external.clear();
    }
}

impl std::fmt::Debug for PerformanceCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PerformanceCache").field("sizes", &self.sizes()).finish()
    }
}
