use std::collections::{BTreeMap, BTreeSet};
use std::num::NonZeroUsize;
use std::sync::Mutex;

use lru::LruCache;
use serde_json::Value;

use super::{CacheError, CacheTier};
use crate::hasher::snapshot_hash;
use crate::sync::lock;
use crate::vars::VariableSnapshot;

/// `(template hash, hash of the referenced values)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MemoKey {
    pub ast_hash: u64,
    pub snapshot_hash: u64,
}

impl MemoKey {
    /// Key a template by the values of exactly the variables it references.
    /// Unset variables hash as `null`.
    pub fn new<'a, I>(ast_hash: u64, dependencies: I, snapshot: &VariableSnapshot) -> Self
    where
        I: IntoIterator<Item = &'a String>,
    {
        let null = Value::Null;
        let pairs: Vec<(&str, &Value)> = dependencies
            .into_iter()
            .map(|name| (name.as_str(), snapshot.value(name).unwrap_or(&null)))
            .collect();
        Self { ast_hash, snapshot_hash: snapshot_hash(pairs) }
    }
}

#[derive(Debug, Clone)]
struct MemoEntry {
    value: Value,
    /// Version of every variable read when the value was computed.
    versions: BTreeMap<String, u64>,
    /// Graph nodes whose change must evict this entry.
    tags: BTreeSet<String>,
}

pub(crate) struct MemoCache {
    entries: Mutex<LruCache<MemoKey, MemoEntry>>,
}

impl MemoCache {
    pub(crate) fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self { entries: Mutex::new(LruCache::new(capacity)) }
    }

    /// Look up a computed value, checking it against current versions.
    ///
    /// An entry built from a version the snapshot no longer holds should have
    /// been invalidated already; it is evicted and reported instead of served.
    pub(crate) fn get(&self, key: &MemoKey, snapshot: &VariableSnapshot) -> Result<Option<Value>, CacheError> {
        let mut entries = lock(&self.entries);
        let Some(entry) = entries.get(key) else {
            return Ok(None);
        };
        let stale = entry
            .versions
            .iter()
            .map(|(name, cached)| (name, *cached, snapshot.version(name)))
            .find(|(_, cached, current)| *current != Some(*cached))
            .map(|(name, cached, current)| (name.clone(), cached, current));

        if let Some((variable, cached_version, current_version)) = stale {
            entries.pop(key);
            return Err(CacheError::Inconsistent {
                tier: CacheTier::Memo,
                variable,
                cached_version,
                current_version,
            });
        }
        Ok(Some(entry.value.clone()))
    }

    pub(crate) fn insert(&self, key: MemoKey, value: Value, versions: BTreeMap<String, u64>, tags: BTreeSet<String>) {
        lock(&self.entries).put(key, MemoEntry { value, versions, tags });
    }

    /// Evict every entry tagged with any of `nodes`. Returns how many went.
    pub(crate) fn invalidate(&self, nodes: &BTreeSet<String>) -> usize {
        let mut entries = lock(&self.entries);
        let doomed: Vec<MemoKey> = entries
            .iter()
            .filter(|(_, entry)| !entry.tags.is_disjoint(nodes))
            .map(|(key, _)| *key)
            .collect();
        for key in &doomed {
            entries.pop(key);
        }
        doomed.len()
    }

    pub(crate) fn len(&self) -> usize {
        lock(&self.entries).len()
    }

    pub(crate) fn clear(&self) {
        lock(&self.entries).clear();
    }
}
