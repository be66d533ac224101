//! Bounded key caches for partial aggregation.

use crate::tuple::Tuple;
use lru::LruCache;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::num::NonZeroUsize;

/// One cached key with one accumulator per aggregated part.
pub type CacheEntry = (Tuple, Vec<Tuple>);

/// A bounded map from key to accumulators.
///
/// Inserting a key that is not cached may evict another entry, which is handed back
/// so its accumulators can be completed. A key is never evicted by its own insert.
pub trait PartialCache: Send {
    fn get_mut(&mut self, key: &Tuple) -> Option<&mut Vec<Tuple>>;

    /// Inserts a key that is not cached yet; returns the entry evicted to make room.
    fn insert(&mut self, key: Tuple, accumulators: Vec<Tuple>) -> Option<CacheEntry>;

    /// Removes and returns every entry.
    fn drain(&mut self) -> Vec<CacheEntry>;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn capacity(&self) -> usize;
}

/// Creates one cache per run of a partial aggregation.
pub trait CacheFactory: Send + Sync {
    fn create(&self, capacity: usize) -> Box<dyn PartialCache>;
}

/// Least-recently-used eviction.
#[derive(Clone, Copy, Debug, Default)]
pub struct LruCacheFactory;

impl CacheFactory for LruCacheFactory {
    fn create(&self, capacity: usize) -> Box<dyn PartialCache> {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Box::new(LruPartialCache(LruCache::new(capacity)))
    }
}

struct LruPartialCache(LruCache<Tuple, Vec<Tuple>>);

impl PartialCache for LruPartialCache {
    fn get_mut(&mut self, key: &Tuple) -> Option<&mut Vec<Tuple>> {
        self.0.get_mut(key)
    }

    fn insert(&mut self, key: Tuple, accumulators: Vec<Tuple>) -> Option<CacheEntry> {
        debug_assert!(!self.0.contains(&key), "key {key} inserted twice");
        self.0.push(key, accumulators)
    }

    fn drain(&mut self) -> Vec<CacheEntry> {
        let mut entries = Vec::with_capacity(self.0.len());
        while let Some(entry) = self.0.pop_lru() {
            entries.push(entry);
        }
        entries
    }

    fn len(&self) -> usize {
        self.0.len()
    }

    fn capacity(&self) -> usize {
        self.0.cap().get()
    }
}

/// One slot per key hash: a colliding insert evicts the slot's occupant.
///
/// Cheaper than LRU bookkeeping; worse hit rates on skewed keys.
#[derive(Clone, Copy, Debug, Default)]
pub struct DirectMappedCacheFactory;

impl CacheFactory for DirectMappedCacheFactory {
    fn create(&self, capacity: usize) -> Box<dyn PartialCache> {
        let capacity = capacity.max(1);
        Box::new(DirectMappedCache {
            slots: (0..capacity).map(|_| None).collect(),
            len: 0,
        })
    }
}

struct DirectMappedCache {
    slots: Vec<Option<CacheEntry>>,
    len: usize,
}

impl DirectMappedCache {
    fn slot(&self, key: &Tuple) -> usize {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        (hasher.finish() % self.slots.len() as u64) as usize
    }
}

impl PartialCache for DirectMappedCache {
    fn get_mut(&mut self, key: &Tuple) -> Option<&mut Vec<Tuple>> {
        let slot = self.slot(key);
        match &mut self.slots[slot] {
            Some((cached, accumulators)) if cached == key => Some(accumulators),
            _ => None,
        }
    }

    fn insert(&mut self, key: Tuple, accumulators: Vec<Tuple>) -> Option<CacheEntry> {
        let slot = self.slot(&key);
        debug_assert!(
            self.slots[slot].as_ref().is_none_or(|(old, _)| *old != key),
            "key {key} inserted twice"
        );
        let evicted = self.slots[slot].replace((key, accumulators));
        if evicted.is_none() {
            self.len += 1;
        }
        evicted
    }

    fn drain(&mut self) -> Vec<CacheEntry> {
        self.len = 0;
        self.slots.iter_mut().filter_map(Option::take).collect()
    }

    fn len(&self) -> usize {
        self.len
    }

    fn capacity(&self) -> usize {
        self.slots.len()
    }
}
