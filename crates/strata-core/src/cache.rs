//! Bounded LRU cache of raw per-scope snapshots.

use std::sync::Arc;

use indexmap::IndexMap;
use parking_lot::Mutex;
use tracing::debug;

use crate::node::ConfigNode;
use crate::scope::ScopePath;

pub const DEFAULT_CACHE_CAPACITY: usize = 200;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
}

#[derive(Debug)]
struct CacheState {
    enabled: bool,
    // Least recently used first.
    entries: IndexMap<ScopePath, Arc<ConfigNode>>,
    stats: CacheStats,
}

/// Scope path to snapshot, least-recently-used eviction.
///
/// Every operation takes one coarse lock. Entries are immutable once
/// inserted; reads only reorder the index.
#[derive(Debug)]
pub struct ScopeCache {
    capacity: usize,
    state: Mutex<CacheState>,
}

impl Default for ScopeCache {
    fn default() -> Self {
        Self::new(DEFAULT_CACHE_CAPACITY)
    }
}

impl ScopeCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            state: Mutex::new(CacheState {
                enabled: true,
                entries: IndexMap::new(),
                stats: CacheStats::default(),
            }),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn get(&self, path: &ScopePath) -> Option<Arc<ConfigNode>> {
        let mut state = self.state.lock();
        if !state.enabled {
            return None;
        }
        // Move to end for LRU
        match state.entries.shift_remove(path) {
            Some(node) => {
                state.entries.insert(path.clone(), Arc::clone(&node));
                state.stats.hits += 1;
                Some(node)
            }
            None => {
                state.stats.misses += 1;
                None
            }
        }
    }

    /// Insert or replace; no effect while disabled.
    pub fn put(&self, path: ScopePath, node: Arc<ConfigNode>) {
        let mut state = self.state.lock();
        if !state.enabled {
            return;
        }
        state.entries.shift_remove(&path);
        state.entries.insert(path, node);
        while state.entries.len() > self.capacity {
            if let Some((evicted, _)) = state.entries.shift_remove_index(0) {
                debug!(scope = %evicted, "Evicted scope snapshot from cache");
                state.stats.evictions += 1;
            }
        }
    }

    pub fn remove(&self, path: &ScopePath) -> Option<Arc<ConfigNode>> {
        self.state.lock().entries.shift_remove(path)
    }

    /// Remove `path` and every cached path extending it.
    pub fn remove_subtree(&self, path: &ScopePath) -> usize {
        let mut state = self.state.lock();
        let before = state.entries.len();
        state.entries.retain(|cached, _| !cached.starts_with(path));
        before - state.entries.len()
    }

    pub fn clear(&self) {
        self.state.lock().entries.clear();
    }

    /// Disabling also empties the cache.
    pub fn set_enabled(&self, enabled: bool) {
        let mut state = self.state.lock();
        state.enabled = enabled;
        if !enabled {
            state.entries.clear();
        }
        debug!(enabled, "Scope cache toggled");
    }

    pub fn is_enabled(&self) -> bool {
        self.state.lock().enabled
    }

    pub fn len(&self) -> usize {
        self.state.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> CacheStats {
        self.state.lock().stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn path(user: &str) -> ScopePath {
        format!("class[name=App]/default/user[name={user}]")
            .parse()
            .unwrap()
    }

    fn node(path: &ScopePath) -> Arc<ConfigNode> {
        Arc::new(ConfigNode::complex(path, "App"))
    }

    #[test]
    fn test_put_then_get() {
        let cache = ScopeCache::default();
        let p = path("a");
        let n = node(&p);
        cache.put(p.clone(), Arc::clone(&n));
        assert_eq!(cache.get(&p), Some(n));
        assert_eq!(cache.stats().hits, 1);
    }

    #[test]
    fn test_evicts_least_recently_used() {
        let cache = ScopeCache::new(2);
        let (a, b, c) = (path("a"), path("b"), path("c"));
        cache.put(a.clone(), node(&a));
        cache.put(b.clone(), node(&b));
        assert!(cache.get(&a).is_some());
        cache.put(c.clone(), node(&c));

        assert!(cache.get(&b).is_none());
        assert!(cache.get(&a).is_some());
        assert!(cache.get(&c).is_some());
        assert_eq!(cache.stats().evictions, 1);
    }

    #[test]
    fn test_disable_clears_and_blocks_puts() {
        let cache = ScopeCache::default();
        let p = path("a");
        cache.put(p.clone(), node(&p));
        cache.set_enabled(false);
        assert!(cache.get(&p).is_none());
        cache.put(p.clone(), node(&p));
        assert!(cache.is_empty());

        cache.set_enabled(true);
        assert!(cache.get(&p).is_none());
    }

    #[test]
    fn test_remove_subtree() {
        let cache = ScopeCache::default();
        let base: ScopePath = "class[name=App]/default".parse().unwrap();
        let (a, b) = (path("a"), path("b"));
        let other: ScopePath = "class[name=Db]/default".parse().unwrap();
        for p in [&base, &a, &b, &other] {
            cache.put(p.clone(), node(p));
        }
        assert_eq!(cache.remove_subtree(&base), 3);
        assert_eq!(cache.len(), 1);
        assert!(cache.get(&other).is_some());
    }
}
