use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use crate::core::lock;
use crate::core::plan::Plan;

/// LRU cache of compiled plans keyed by the exact raw query text.
///
/// Capacity is measured in [`Plan::size`] units. All access is serialized
/// through one mutex.
#[derive(Debug)]
pub struct PlanCache {
    inner: Mutex<CacheState>,
}

#[derive(Debug)]
struct CacheState {
    entries: HashMap<String, Arc<Plan>>,
    lru: VecDeque<String>,
    capacity: usize,
    weight: usize,
    hits: u64,
    misses: u64,
    evictions: u64,
}

/// Counters since the cache was created.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub len: usize,
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
}

impl CacheState {
    fn touch(&mut self, key: &str) {
        if let Some(pos) = self.lru.iter().position(|k| k == key) {
            self.lru.remove(pos);
        }
        self.lru.push_back(key.to_string());
    }

    fn remove(&mut self, key: &str) -> Option<Arc<Plan>> {
        let plan = self.entries.remove(key)?;
        self.weight -= plan.size();
        if let Some(pos) = self.lru.iter().position(|k| k == key) {
            self.lru.remove(pos);
        }
        Some(plan)
    }
}

impl PlanCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(CacheState {
                entries: HashMap::new(),
                lru: VecDeque::new(),
                capacity: capacity.max(1),
                weight: 0,
                hits: 0,
                misses: 0,
                evictions: 0,
            }),
        }
    }

    pub fn get(&self, key: &str) -> Option<Arc<Plan>> {
        let mut state = lock(&self.inner);
        match state.entries.get(key).cloned() {
            Some(plan) => {
                state.hits += 1;
                state.touch(key);
                Some(plan)
            }
            None => {
                state.misses += 1;
                None
            }
        }
    }

    pub fn set(&self, key: impl Into<String>, plan: Arc<Plan>) {
        let key = key.into();
        let mut state = lock(&self.inner);
        state.remove(&key);
        state.weight += plan.size();
        state.entries.insert(key.clone(), plan);
        state.touch(&key);

        while state.weight > state.capacity {
            let Some(oldest) = state.lru.front().cloned() else {
                break;
            };
            state.remove(&oldest);
            state.evictions += 1;
            log::debug!("plan cache: evicted '{oldest}'");
        }
    }

    pub fn contains(&self, key: &str) -> bool {
        lock(&self.inner).entries.contains_key(key)
    }

    pub fn len(&self) -> usize {
        lock(&self.inner).entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        lock(&self.inner).capacity
    }

    pub fn clear(&self) {
        let mut state = lock(&self.inner);
        state.entries.clear();
        state.lru.clear();
        state.weight = 0;
    }

    pub fn stats(&self) -> CacheStats {
        let state = lock(&self.inner);
        CacheStats {
            len: state.entries.len(),
            hits: state.hits,
            misses: state.misses,
            evictions: state.evictions,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::graph::TaskGraph;

    fn plan(text: &str) -> Arc<Plan> {
        Arc::new(Plan::new(text, TaskGraph::default()))
    }

    #[test]
    fn test_least_recently_used_is_evicted() {
        let cache = PlanCache::new(2);
        cache.set("a", plan("a"));
        cache.set("b", plan("b"));
        assert!(cache.get("a").is_some());
        cache.set("c", plan("c"));

        assert!(cache.contains("a"));
        assert!(!cache.contains("b"));
        assert!(cache.contains("c"));
        assert_eq!(cache.stats().evictions, 1);
    }

    #[test]
    fn test_keys_are_not_normalized() {
        let cache = PlanCache::new(10);
        cache.set("SELECT 1", plan("SELECT 1"));
        assert!(cache.get("select 1").is_none());
        assert!(cache.get("SELECT  1").is_none());
        assert!(cache.get("SELECT 1").is_some());
        let stats = cache.stats();
        assert_eq!((stats.hits, stats.misses), (1, 2));
    }

    #[test]
    fn test_overwrite_keeps_single_entry() {
        let cache = PlanCache::new(2);
        let first = plan("q");
        cache.set("q", first.clone());
        cache.set("q", plan("q"));
        assert_eq!(cache.len(), 1);
        assert!(!Arc::ptr_eq(&cache.get("q").unwrap(), &first));
        cache.clear();
        assert!(cache.is_empty());
    }
}
