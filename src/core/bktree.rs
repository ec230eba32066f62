use crate::core::hash::Fingerprint;
use std::collections::BTreeMap;

struct Node<T> {
    fingerprint: Fingerprint,
    items: Vec<T>,
    children: BTreeMap<u32, usize>,
}

/// Burkhard-Keller tree over Hamming distance. Each distinct fingerprint is
/// one node carrying every item inserted with it.
pub struct BkTree<T> {
    nodes: Vec<Node<T>>,
}

pub struct Match<'a, T> {
    pub fingerprint: &'a Fingerprint,
    pub items: &'a [T],
    pub distance: u32,
}

impl<T> BkTree<T> {
    pub fn new() -> Self {
        Self { nodes: Vec::new() }
    }

    pub fn insert(&mut self, fingerprint: Fingerprint, item: T) {
        if self.nodes.is_empty() {
            self.push(fingerprint, item);
            return;
        }

        let mut current = 0;
        loop {
            let distance = self.nodes[current].fingerprint.distance(&fingerprint);
            if distance == 0 {
                self.nodes[current].items.push(item);
                return;
            }
            match self.nodes[current].children.get(&distance) {
                Some(&child) => current = child,
                None => {
                    let id = self.push(fingerprint, item);
                    self.nodes[current].children.insert(distance, id);
                    return;
                }
            }
        }
    }

    fn push(&mut self, fingerprint: Fingerprint, item: T) -> usize {
        self.nodes.push(Node {
            fingerprint,
            items: vec![item],
            children: BTreeMap::new(),
        });
        self.nodes.len() - 1
    }

    /// Every node within `max_distance` of `query`, itself included.
    pub fn find_within(&self, query: &Fingerprint, max_distance: u32) -> Vec<Match<'_, T>> {
        let mut found = Vec::new();
        if self.nodes.is_empty() {
            return found;
        }

        let mut stack = vec![0usize];
        while let Some(id) = stack.pop() {
            let node = &self.nodes[id];
            let distance = node.fingerprint.distance(query);
            if distance <= max_distance {
                found.push(Match {
                    fingerprint: &node.fingerprint,
                    items: &node.items,
                    distance,
                });
            }
            let low = distance.saturating_sub(max_distance);
            let high = distance.saturating_add(max_distance);
            stack.extend(node.children.range(low..=high).map(|(_, &child)| child));
        }
        found
    }

    pub fn any_within(&self, query: &Fingerprint, max_distance: u32) -> bool {
        !self.find_within(query, max_distance).is_empty()
    }

    /// Distinct fingerprints with their items, in insertion order.
    pub fn entries(&self) -> impl Iterator<Item = (&Fingerprint, &[T])> {
        self.nodes
            .iter()
            .map(|node| (&node.fingerprint, node.items.as_slice()))
    }

    /// Number of distinct fingerprints.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

impl<T> Default for BkTree<T> {
    fn default() -> Self {
        Self::new()
    }
}
