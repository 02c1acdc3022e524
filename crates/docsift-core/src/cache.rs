//! Bounded cache of loaded predictor handles.
//!
//! Least-recently-used eviction driven by a logical access counter. The map
//! sits behind one `std::sync::Mutex` that is only held for bookkeeping; no
//! load or inference ever runs while it is locked.
//!
//! Handles are `Arc`s: eviction drops the cache's reference only, so a
//! request that already fetched a handle keeps using it until it finishes.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};

use docsift_state::ModelId;
use serde::{Deserialize, Serialize};

use crate::obs;
use crate::predictor::Predictor;

struct CacheEntry {
    handle: Arc<dyn Predictor>,
    last_access: u64,
}

#[derive(Default)]
struct CacheState {
    entries: HashMap<ModelId, CacheEntry>,
    tick: u64,
    hits: u64,
    misses: u64,
    evictions: u64,
}

impl CacheState {
    fn next_tick(&mut self) -> u64 {
        self.tick += 1;
        self.tick
    }

    fn least_recent(&self) -> Option<ModelId> {
        self.entries
            .iter()
            .min_by_key(|(_, entry)| entry.last_access)
            .map(|(id, _)| *id)
    }
}

/// Cache fill level and hit statistics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheOccupancy {
    pub cached: usize,
    pub capacity: usize,
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
}

pub struct ModelCache {
    capacity: usize,
    state: Mutex<CacheState>,
}

impl ModelCache {
    /// Capacities below 1 are raised to 1.
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            state: Mutex::new(CacheState::default()),
        }
    }

    fn state(&self) -> MutexGuard<'_, CacheState> {
        // Bookkeeping never panics mid-update, so a poisoned map is still consistent.
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Fetch a handle and mark it most recently used.
    pub fn get(&self, id: &ModelId) -> Option<Arc<dyn Predictor>> {
        let mut guard = self.state();
        let state = &mut *guard;
        let tick = state.next_tick();
        match state.entries.get_mut(id) {
            Some(entry) => {
                entry.last_access = tick;
                state.hits += 1;
                Some(Arc::clone(&entry.handle))
            }
            None => {
                state.misses += 1;
                None
            }
        }
    }

    /// Insert or replace a handle, evicting the least recently used entry
    /// when a new key would exceed capacity. Returns the evicted id.
    pub fn put(&self, id: ModelId, handle: Arc<dyn Predictor>) -> Option<ModelId> {
        let mut state = self.state();
        let tick = state.next_tick();

        let mut evicted = None;
        if !state.entries.contains_key(&id) && state.entries.len() >= self.capacity {
            if let Some(victim) = state.least_recent() {
                state.entries.remove(&victim);
                state.evictions += 1;
                evicted = Some(victim);
            }
        }

        state.entries.insert(
            id,
            CacheEntry {
                handle,
                last_access: tick,
            },
        );
        drop(state);

        if let Some(victim) = &evicted {
            obs::emit_model_evicted(victim);
        }
        evicted
    }

    pub fn contains(&self, id: &ModelId) -> bool {
        self.state().entries.contains_key(id)
    }

    /// Drop one entry; returns whether it was cached.
    pub fn invalidate(&self, id: &ModelId) -> bool {
        self.state().entries.remove(id).is_some()
    }

    /// Drop every entry; returns how many were removed.
    pub fn clear(&self) -> usize {
        let mut state = self.state();
        let removed = state.entries.len();
        state.entries.clear();
        removed
    }

    pub fn len(&self) -> usize {
        self.state().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn occupancy(&self) -> CacheOccupancy {
        let state = self.state();
        CacheOccupancy {
            cached: state.entries.len(),
            capacity: self.capacity,
            hits: state.hits,
            misses: state.misses,
            evictions: state.evictions,
        }
    }
}

impl fmt::Debug for ModelCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let occupancy = self.occupancy();
        f.debug_struct("ModelCache")
            .field("capacity", &occupancy.capacity)
            .field("cached", &occupancy.cached)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fakes::EchoPredictor;

    fn handle() -> Arc<dyn Predictor> {
        Arc::new(EchoPredictor::new(serde_json::json!({})))
    }

    #[test]
    fn insertion_order_decides_first_eviction() {
        let cache = ModelCache::new(3);
        let ids: Vec<ModelId> = (0..4).map(|_| ModelId::new()).collect();
        for id in &ids[..3] {
            assert_eq!(cache.put(*id, handle()), None);
        }

        assert_eq!(cache.put(ids[3], handle()), Some(ids[0]));
        assert!(!cache.contains(&ids[0]));
        for id in &ids[1..] {
            assert!(cache.contains(id));
        }
        assert_eq!(cache.len(), 3);
    }

    #[test]
    fn get_refreshes_recency() {
        let cache = ModelCache::new(2);
        let (a, b, c) = (ModelId::new(), ModelId::new(), ModelId::new());
        cache.put(a, handle());
        cache.put(b, handle());
        assert!(cache.get(&a).is_some());

        assert_eq!(cache.put(c, handle()), Some(b));
        assert!(cache.contains(&a));
    }

    #[test]
    fn replacing_existing_key_never_evicts() {
        let cache = ModelCache::new(1);
        let id = ModelId::new();
        cache.put(id, handle());
        assert_eq!(cache.put(id, handle()), None);
        assert_eq!(cache.occupancy().evictions, 0);
    }

    #[test]
    fn evicted_handle_outlives_cache_entry() {
        let cache = ModelCache::new(1);
        let (a, b) = (ModelId::new(), ModelId::new());
        cache.put(a, handle());
        let in_flight = cache.get(&a).expect("cached");

        cache.put(b, handle());
        assert!(!cache.contains(&a));
        assert_eq!(Arc::strong_count(&in_flight), 1);
    }

    #[test]
    fn occupancy_tracks_hits_misses_and_clear() {
        let cache = ModelCache::new(0);
        assert_eq!(cache.capacity(), 1);

        let id = ModelId::new();
        assert!(cache.get(&id).is_none());
        cache.put(id, handle());
        assert!(cache.get(&id).is_some());

        let occupancy = cache.occupancy();
        assert_eq!((occupancy.hits, occupancy.misses, occupancy.cached), (1, 1, 1));

        assert_eq!(cache.clear(), 1);
        assert!(cache.is_empty());
        assert!(!cache.invalidate(&id));
    }
}
