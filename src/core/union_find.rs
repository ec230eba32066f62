use crate::core::filename::PostKey;
use std::collections::HashMap;

/// Disjoint set over dense indices with path compression.
pub struct DisjointSet {
    parent: Vec<usize>,
}

impl DisjointSet {
    pub fn new(size: usize) -> Self {
        Self {
            parent: (0..size).collect(),
        }
    }

    pub fn find(&mut self, x: usize) -> usize {
        let mut root = x;
        while self.parent[root] != root {
            root = self.parent[root];
        }
        let mut node = x;
        while self.parent[node] != root {
            let next = self.parent[node];
            self.parent[node] = root;
            node = next;
        }
        root
    }

    /// Attaches the root of `b` under the root of `a`. Returns false if already joined.
    pub fn union(&mut self, a: usize, b: usize) -> bool {
        let ra = self.find(a);
        let rb = self.find(b);
        if ra == rb {
            return false;
        }
        self.parent[rb] = ra;
        true
    }

    pub fn len(&self) -> usize {
        self.parent.len()
    }

    pub fn is_empty(&self) -> bool {
        self.parent.is_empty()
    }
}

/// Stable PostKey <-> index mapping. Indices follow the order keys were registered.
#[derive(Default)]
pub struct PostRegistry {
    keys: Vec<PostKey>,
    index: HashMap<PostKey, usize>,
}

impl PostRegistry {
    pub fn register(&mut self, key: &PostKey) -> usize {
        if let Some(&idx) = self.index.get(key) {
            return idx;
        }
        let idx = self.keys.len();
        self.keys.push(key.clone());
        self.index.insert(key.clone(), idx);
        idx
    }

    pub fn index_of(&self, key: &PostKey) -> Option<usize> {
        self.index.get(key).copied()
    }

    pub fn key(&self, idx: usize) -> &PostKey {
        &self.keys[idx]
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_union_find() {
        let mut set = DisjointSet::new(6);
        assert!(set.union(0, 1));
        assert!(set.union(2, 3));
        assert!(set.union(1, 3));
        assert!(!set.union(0, 2));

        let root = set.find(0);
        for i in 1..4 {
            assert_eq!(set.find(i), root);
        }
        assert_ne!(set.find(4), root);
        assert_ne!(set.find(4), set.find(5));
    }

    #[test]
    fn test_long_chain_compresses() {
        let n = 10_000;
        let mut set = DisjointSet::new(n);
        for i in 1..n {
            set.union(i, i - 1);
        }
        let root = set.find(0);
        assert_eq!(set.find(n - 1), root);
        assert_eq!(set.parent[0], root);
    }

    #[test]
    fn test_registry_is_stable() {
        let mut registry = PostRegistry::default();
        let a = registry.register(&PostKey::new("1", "1"));
        let b = registry.register(&PostKey::new("1", "2"));
        assert_eq!(registry.register(&PostKey::new("1", "1")), a);
        assert_eq!(registry.index_of(&PostKey::new("1", "2")), Some(b));
        assert_eq!(registry.key(b), &PostKey::new("1", "2"));
        assert_eq!(registry.len(), 2);
    }
}
