//! Memoizing layer over the enrichment engine.
//!
//! One cache (and the engine inside it) is meant to live for the whole
//! process so that database handles and the DNS resolver are reused. The
//! lock is never held while an address is being resolved: two callers
//! racing on the same cold address both resolve it and the cache keeps
//! whichever result lands last.

use std::num::NonZeroUsize;
use std::sync::Mutex;

use lru::LruCache;
use tracing::trace;

use crate::enrichment::EnrichmentEngine;
use crate::models::EnrichedAddress;

/// Bounded LRU cache of resolved addresses
pub struct ResolutionCache {
    engine: EnrichmentEngine,
    entries: Mutex<LruCache<String, EnrichedAddress>>,
}

impl ResolutionCache {
    /// Wrap `engine`, keeping at most `capacity` addresses (minimum 1)
    pub fn new(engine: EnrichmentEngine, capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            engine,
            entries: Mutex::new(LruCache::new(capacity)),
        }
    }

    /// Cached result for `address`, resolving it on a miss
    pub async fn get_or_resolve(&self, address: &str) -> EnrichedAddress {
        if let Some(hit) = self.get(address) {
            trace!(address, "Cache hit");
            metrics::counter!("flowscope_cache_hits_total").increment(1);
            return hit;
        }

        trace!(address, "Cache miss");
        metrics::counter!("flowscope_cache_misses_total").increment(1);

        let resolved = self.engine.resolve(address).await;
        self.insert(resolved.clone());
        resolved
    }

    /// Cached value, marking it most recently used
    fn get(&self, address: &str) -> Option<EnrichedAddress> {
        let mut entries = self.entries.lock().ok()?;
        entries.get(address).cloned()
    }

    fn insert(&self, enriched: EnrichedAddress) {
        let mut entries = match self.entries.lock() {
            Ok(guard) => guard,
            Err(_) => return, // Lock poisoned, skip caching
        };

        let address = enriched.address.clone();
        if let Some((evicted, _)) = entries.push(address.clone(), enriched) {
            if evicted != address {
                trace!(address = %evicted, "Evicted least recently used entry");
            }
        }
    }

    /// Whether `address` is cached, without touching its recency
    #[cfg(test)]
    pub fn contains(&self, address: &str) -> bool {
        self.entries
            .lock()
            .map(|entries| entries.contains(address))
            .unwrap_or(false)
    }

    pub fn len(&self) -> usize {
        self.entries.lock().map(|entries| entries.len()).unwrap_or(0)
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[cfg(test)]
    pub fn capacity(&self) -> usize {
        self.entries
            .lock()
            .map(|entries| entries.cap().get())
            .unwrap_or(0)
    }

    /// Drop the cached entries and hand back the engine
    pub fn into_engine(self) -> EnrichmentEngine {
        self.engine
    }
}
