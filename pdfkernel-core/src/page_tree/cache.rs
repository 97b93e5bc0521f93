//! Per-node caches used while walking the page tree
//!
//! Both caches are keyed by reference. The kids-count cache memoizes the
//! number of leaves below an intermediate node; the kids-parent cache maps an
//! indirect Kids array to the node that owns it.

use crate::objects::ObjectId;
use std::collections::HashMap;

/// Map from node reference to a derived value, with hit statistics.
#[derive(Debug, Clone)]
pub struct NodeCache<V> {
    entries: HashMap<ObjectId, V>,
    hits: usize,
    misses: usize,
}

impl<V> Default for NodeCache<V> {
    fn default() -> Self {
        Self {
            entries: HashMap::new(),
            hits: 0,
            misses: 0,
        }
    }
}

impl<V: Copy> NodeCache<V> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&mut self, id: ObjectId) -> Option<V> {
        match self.entries.get(&id) {
            Some(value) => {
                self.hits += 1;
                Some(*value)
            }
            None => {
                self.misses += 1;
                None
            }
        }
    }

    /// Reads without touching the statistics.
    pub fn peek(&self, id: ObjectId) -> Option<V> {
        self.entries.get(&id).copied()
    }

    pub fn update(&mut self, id: ObjectId, value: V) {
        self.entries.insert(id, value);
    }

    pub fn discard(&mut self, id: ObjectId) -> Option<V> {
        self.entries.remove(&id)
    }

    pub fn contains(&self, id: ObjectId) -> bool {
        self.entries.contains_key(&id)
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            size: self.entries.len(),
            hits: self.hits,
            misses: self.misses,
        }
    }
}

/// Cache statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Current number of cached entries
    pub size: usize,
    pub hits: usize,
    pub misses: usize,
}

/// Leaf count below an intermediate node.
pub type KidsCountCache = NodeCache<usize>;

/// Indirect Kids array to its owning intermediate node.
pub type KidsParentCache = NodeCache<ObjectId>;
