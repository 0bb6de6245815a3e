use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex};

use lru::LruCache;

use crate::hasher::content_hash;
use crate::sync::lock;

/// Bounded pool of shared literal strings.
pub(crate) struct StringInterner {
    pool: Mutex<LruCache<u64, Arc<str>>>,
}

impl StringInterner {
    pub(crate) fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self { pool: Mutex::new(LruCache::new(capacity)) }
    }

    /// Returns the pooled copy and whether it was already present.
    pub(crate) fn intern(&self, text: &str) -> (Arc<str>, bool) {
        let key = content_hash(text);
        let mut pool = lock(&self.pool);
        if let Some(existing) = pool.get(&key)
            && &**existing == text
        {
            return (Arc::clone(existing), true);
        }
        let shared: Arc<str> = Arc::from(text);
        pool.put(key, Arc::clone(&shared));
        (shared, false)
    }

    pub(crate) fn len(&self) -> usize {
        lock(&self.pool).len()
    }

    pub(crate) fn clear(&self) {
        lock(&self.pool).clear();
    }
}
