//! Bounded memo of query embeddings, backed by moka.
//!
//! Hit and miss counts are kept beside the cache since moka does not track
//! them.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use moka::policy::EvictionPolicy;
use moka::sync::Cache;

/// Snapshot of cache counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub len: u64,
    pub capacity: u64,
}

pub struct QueryCache {
    inner: Cache<String, Arc<Vec<f32>>>,
    capacity: u64,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl QueryCache {
    /// At most `capacity` entries; the least recently used go first.
    pub fn new(capacity: u64) -> Self {
        let inner = Cache::builder()
            .max_capacity(capacity)
            .eviction_policy(EvictionPolicy::lru())
            .build();
        Self {
            inner,
            capacity,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    pub fn get(&self, query: &str) -> Option<Arc<Vec<f32>>> {
        match self.inner.get(query) {
            Some(vector) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                Some(vector)
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    pub fn insert(&self, query: &str, vector: Arc<Vec<f32>>) {
        self.inner.insert(query.to_string(), vector);
    }

    /// The cached vector for `query`, or the result of `embed`, which is
    /// then cached. Errors are not cached.
    pub fn get_or_try_embed<E>(
        &self,
        query: &str,
        embed: impl FnOnce() -> Result<Vec<f32>, E>,
    ) -> Result<Arc<Vec<f32>>, E> {
        if let Some(hit) = self.get(query) {
            return Ok(hit);
        }
        let vector = Arc::new(embed()?);
        self.insert(query, vector.clone());
        Ok(vector)
    }

    pub fn stats(&self) -> CacheStats {
        self.inner.run_pending_tasks();
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            len: self.inner.entry_count(),
            capacity: self.capacity,
        }
    }
}
