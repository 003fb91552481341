//! Fingerprinted simulation result cache.
//!
//! Two windows hit the same entry iff they would feed the simulator
//! bit-identical input: same topology fingerprint, same cumulative task
//! count. A topology generation tag guards against in-flight results of a
//! superseded topology landing in the cache after a clear.

use std::collections::HashMap;
use std::sync::Mutex;

use opendt_types::SimulationResult;

pub const DEFAULT_MAX_ENTRIES: usize = 1024;

/// Cache discriminator: `(topology fingerprint, cumulative task count)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub fingerprint: String,
    pub cumulative_tasks: u64,
}

struct Entry {
    result: SimulationResult,
    stamp: u64,
}

struct Inner {
    entries: HashMap<CacheKey, Entry>,
    generation: u64,
    tick: u64,
}

/// Single-writer / multi-reader result cache with a bounded LRU.
pub struct ResultCache {
    max_entries: usize,
    inner: Mutex<Inner>,
}

impl ResultCache {
    pub fn new(max_entries: usize) -> Self {
        Self {
            max_entries: max_entries.max(1),
            inner: Mutex::new(Inner {
                entries: HashMap::new(),
                generation: 0,
                tick: 0,
            }),
        }
    }

    pub fn lookup(&self, key: &CacheKey) -> Option<SimulationResult> {
        let mut inner = self.inner.lock().ok()?;
        inner.tick += 1;
        let tick = inner.tick;
        let entry = inner.entries.get_mut(key)?;
        entry.stamp = tick;
        Some(entry.result.clone())
    }

    /// Insert under a generation tag; a stale tag is a no-op and returns
    /// `false` (the invocation was launched under a superseded topology).
    pub fn put(&self, key: CacheKey, result: SimulationResult, generation: u64) -> bool {
        let Ok(mut inner) = self.inner.lock() else {
            return false;
        };
        if generation != inner.generation {
            tracing::debug!(
                generation,
                current = inner.generation,
                "Discarding cache write from stale topology generation"
            );
            return false;
        }
        inner.tick += 1;
        let stamp = inner.tick;
        inner.entries.insert(key, Entry { result, stamp });

        if inner.entries.len() > self.max_entries {
            if let Some(oldest) = inner
                .entries
                .iter()
                .min_by_key(|(_, e)| e.stamp)
                .map(|(k, _)| k.clone())
            {
                inner.entries.remove(&oldest);
            }
        }
        true
    }

    /// Drop every entry and advance to a new topology generation.
    pub fn clear(&self, generation: u64) {
        if let Ok(mut inner) = self.inner.lock() {
            inner.entries.clear();
            inner.generation = generation;
        }
    }

    pub fn generation(&self) -> u64 {
        self.inner.lock().map(|i| i.generation).unwrap_or(0)
    }

    pub fn len(&self) -> usize {
        self.inner.lock().map(|i| i.entries.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for ResultCache {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_ENTRIES)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(fp: &str, count: u64) -> CacheKey {
        CacheKey {
            fingerprint: fp.into(),
            cumulative_tasks: count,
        }
    }

    #[test]
    fn lookup_returns_stored_result() {
        let cache = ResultCache::default();
        let result = SimulationResult::empty_ok();
        assert!(cache.put(key("fp", 3), result.clone(), 0));
        assert_eq!(cache.lookup(&key("fp", 3)), Some(result));
        assert_eq!(cache.lookup(&key("fp", 4)), None);
        assert_eq!(cache.lookup(&key("other", 3)), None);
    }

    #[test]
    fn stale_generation_write_is_discarded() {
        let cache = ResultCache::default();
        cache.clear(2);
        assert!(!cache.put(key("fp", 1), SimulationResult::empty_ok(), 1));
        assert_eq!(cache.lookup(&key("fp", 1)), None);
        assert!(cache.put(key("fp", 1), SimulationResult::empty_ok(), 2));
    }

    #[test]
    fn clear_empties_and_advances_generation() {
        let cache = ResultCache::default();
        cache.put(key("fp", 1), SimulationResult::empty_ok(), 0);
        cache.clear(1);
        assert!(cache.is_empty());
        assert_eq!(cache.generation(), 1);
        assert_eq!(cache.lookup(&key("fp", 1)), None);
    }

    #[test]
    fn lru_evicts_least_recently_used() {
        let cache = ResultCache::new(2);
        cache.put(key("a", 1), SimulationResult::empty_ok(), 0);
        cache.put(key("b", 2), SimulationResult::empty_ok(), 0);
        // Touch "a" so "b" is the eviction candidate.
        cache.lookup(&key("a", 1));
        cache.put(key("c", 3), SimulationResult::empty_ok(), 0);

        assert!(cache.lookup(&key("a", 1)).is_some());
        assert!(cache.lookup(&key("b", 2)).is_none());
        assert!(cache.lookup(&key("c", 3)).is_some());
    }
}
