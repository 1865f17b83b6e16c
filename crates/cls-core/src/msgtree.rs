//! `MsgTree`: trie-like output aggregation keyed by producer (spec §3,
//! §4.3).
//!
//! Every key walks its own path down a shared trie, one edge per line
//! appended. Two keys whose entire line sequence is identical land on the
//! same node and share every edge along the way, so the tree's size is
//! bounded by the number of *distinct* outputs rather than the number of
//! keys or the total byte volume — this is what keeps `walk()` sub-linear
//! in bytes and linear in distinct outputs (spec §4.3).

use std::collections::BTreeMap;

type NodeId = usize;

struct Node {
    /// `None` only for the root.
    line: Option<Vec<u8>>,
    parent: Option<NodeId>,
    children: BTreeMap<Vec<u8>, NodeId>,
}

/// Append-only, deduplicating aggregation of per-key line sequences.
///
/// `K` is the producer key (typically a node name). Keys are ordered so
/// that `walk()` and `keys()` have a deterministic iteration order.
#[derive(Debug)]
pub struct MsgTree<K: Ord + Clone> {
    nodes: Vec<Node>,
    /// Current position of each key in the trie; `None` until the key's
    /// first `add`.
    cursors: BTreeMap<K, NodeId>,
}

const ROOT: NodeId = 0;

impl<K: Ord + Clone> Default for MsgTree<K> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: Ord + Clone> MsgTree<K> {
    pub fn new() -> Self {
        Self {
            nodes: vec![Node {
                line: None,
                parent: None,
                children: BTreeMap::new(),
            }],
            cursors: BTreeMap::new(),
        }
    }

    /// Append `line` to `key`'s logical output, creating or following a
    /// shared edge as needed.
    pub fn add(&mut self, key: K, line: impl Into<Vec<u8>>) {
        let line = line.into();
        let cur = *self.cursors.get(&key).unwrap_or(&ROOT);
        let next = match self.nodes[cur].children.get(&line) {
            Some(&id) => id,
            None => {
                let id = self.nodes.len();
                self.nodes.push(Node {
                    line: Some(line.clone()),
                    parent: Some(cur),
                    children: BTreeMap::new(),
                });
                self.nodes[cur].children.insert(line, id);
                id
            }
        };
        self.cursors.insert(key, next);
    }

    /// Whether any key has ever been added.
    pub fn is_empty(&self) -> bool {
        self.cursors.is_empty()
    }

    /// The keys that have produced at least one line, in sorted order.
    pub fn keys(&self) -> impl Iterator<Item = &K> {
        self.cursors.keys()
    }

    /// `key`'s full output so far, lines joined with `\n`, or `None` if the
    /// key has never produced a line.
    pub fn get(&self, key: &K) -> Option<Vec<u8>> {
        let node = *self.cursors.get(key)?;
        Some(self.reconstruct(node))
    }

    /// One `(aggregated-bytes, keys)` tuple per maximal equivalence class —
    /// every key sharing a class has produced byte-for-byte the same line
    /// sequence. Reconstruction happens once per class, not once per key,
    /// which is what keeps this sub-linear in total byte volume.
    pub fn walk(&self) -> Vec<(Vec<u8>, Vec<K>)> {
        let mut by_node: BTreeMap<NodeId, Vec<K>> = BTreeMap::new();
        for (key, &node) in &self.cursors {
            by_node.entry(node).or_default().push(key.clone());
        }
        by_node
            .into_iter()
            .map(|(node, keys)| (self.reconstruct(node), keys))
            .collect()
    }

    fn reconstruct(&self, mut node: NodeId) -> Vec<u8> {
        let mut lines = Vec::new();
        while let Some(line) = &self.nodes[node].line {
            lines.push(line.clone());
            node = self.nodes[node].parent.expect("non-root node has a parent");
        }
        lines.reverse();
        lines.join(&b'\n')
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_sharing_output_share_storage_and_split_on_divergence() {
        let mut t = MsgTree::new();
        t.add("node1", "hello");
        t.add("node2", "hello");
        t.add("node3", "hello");
        t.add("node1", "world");
        t.add("node2", "world");
        t.add("node3", "different");

        let classes = t.walk();
        assert_eq!(classes.len(), 2);
        let mut by_keys: Vec<(Vec<&str>, &[u8])> = classes
            .iter()
            .map(|(bytes, keys)| (keys.clone(), bytes.as_slice()))
            .collect();
        by_keys.sort_by_key(|(keys, _)| keys.clone());
        assert_eq!(by_keys[0].0, vec!["node1", "node2"]);
        assert_eq!(by_keys[0].1, b"hello\nworld");
        assert_eq!(by_keys[1].0, vec!["node3"]);
        assert_eq!(by_keys[1].1, b"hello\ndifferent");
    }

    #[test]
    fn every_key_fully_reconstructible_in_arrival_order() {
        let mut t = MsgTree::new();
        for line in ["one", "two", "three"] {
            t.add("n", line);
        }
        assert_eq!(t.get(&"n").unwrap(), b"one\ntwo\nthree");
    }

    #[test]
    fn unknown_key_has_no_output() {
        let t: MsgTree<&str> = MsgTree::new();
        assert!(t.get(&"missing").is_none());
        assert!(t.is_empty());
    }
}
