use std::collections::{BTreeMap, BTreeSet};
use std::num::NonZeroUsize;
use std::sync::Mutex;
use std::time::Duration;

use lru::LruCache;
use serde_json::Value;
use tokio::time::Instant;

use crate::hasher::content_hash;
use crate::sync::lock;

#[derive(Debug, Clone)]
struct ExternalEntry {
    prompt: String,
    fields: Vec<String>,
    output: BTreeMap<String, Value>,
    tags: BTreeSet<String>,
    inserted_at: Instant,
}

/// Lookup outcome for the response tier.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum ExternalLookup {
    Hit(BTreeMap<String, Value>),
    Miss,
    Expired,
}

/// Provider responses keyed by the fully resolved prompt and requested
/// fields. Entries expire after `ttl` even if nothing they depend on changed.
pub(crate) struct ExternalResponseCache {
    entries: Mutex<LruCache<u64, ExternalEntry>>,
    ttl: Duration,
}

fn request_key(prompt: &str, fields: &[String]) -> u64 {
    content_hash(&format!("{prompt}\u{1f}{}", fields.join("\u{1f}")))
}

impl ExternalResponseCache {
    pub(crate) fn new(capacity: usize, ttl: Duration) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self { entries: Mutex::new(LruCache::new(capacity)), ttl }
    }

    pub(crate) fn get(&self, prompt: &str, fields: &[String]) -> ExternalLookup {
        let key = request_key(prompt, fields);
        let mut entries = lock(&self.entries);
        let Some(entry) = entries.get(&key) else {
            return ExternalLookup::Miss;
        };
        if entry.prompt != prompt || entry.fields != fields {
            return ExternalLookup::Miss;
        }
        if entry.inserted_at.elapsed() >= self.ttl {
            entries.pop(&key);
            return ExternalLookup::Expired;
        }
        ExternalLookup::Hit(entry.output.clone())
    }

    pub(crate) fn insert(
        &self,
        prompt: &str,
        fields: &[String],
        output: BTreeMap<String, Value>,
        tags: BTreeSet<String>,
    ) {
        let entry = ExternalEntry {
            prompt: prompt.to_string(),
            fields: fields.to_vec(),
            output,
            tags,
            inserted_at: Instant::now(),
        };
        lock(&self.entries).put(request_key(prompt, fields), entry);
    }

    pub(crate) fn invalidate(&self, nodes: &BTreeSet<String>) -> usize {
        let mut entries = lock(&self.entries);
        let doomed: Vec<u64> = entries
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
