//! Shared fixtures for the sync end-to-end tests.

use merklemap::{decode_node, InnerNode, LeafNode, Node, SerialFormat};
use merklemap_store::{MemoryDatabase, SyncFilter};
use merklemap_types::{Hash, Item, Key, NodeId, NodeKind};
use parking_lot::Mutex;
use rand::{RngCore, SeedableRng};
use rand_chacha::ChaCha8Rng;
use std::collections::HashMap;
use std::sync::Arc;

/// Deterministic random items for reproducible trees.
pub fn random_items(seed: u64, count: usize) -> Vec<Arc<Item>> {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    (0..count)
        .map(|_| {
            let mut key = [0u8; 32];
            rng.fill_bytes(&mut key);
            let mut payload = vec![0u8; (rng.next_u32() % 48 + 1) as usize];
            rng.fill_bytes(&mut payload);
            Arc::new(Item::new(Key::from_raw(key), payload))
        })
        .collect()
}

/// Build a fully resident radix tree over the items. An item becomes a leaf
/// as soon as its key prefix is unique.
pub fn build_tree(items: &[Arc<Item>]) -> Arc<Node> {
    assert!(!items.is_empty(), "a tree needs at least one item");
    build_node(items.to_vec(), 0)
}

fn build_node(items: Vec<Arc<Item>>, depth: usize) -> Arc<Node> {
    if items.len() == 1 {
        let item = items.into_iter().next().expect("one item");
        return Arc::new(Node::Leaf(LeafNode::new(item)));
    }
    let mut groups: Vec<Vec<Arc<Item>>> = (0..16).map(|_| Vec::new()).collect();
    for item in items {
        groups[item.key().nibble(depth) as usize].push(item);
    }
    let branches: Vec<(usize, Arc<Node>)> = groups
        .into_iter()
        .enumerate()
        .filter(|(_, group)| !group.is_empty())
        .map(|(branch, group)| (branch, build_node(group, depth + 1)))
        .collect();
    Arc::new(Node::Inner(InnerNode::from_branches(branches)))
}

/// Pre-order `(position, node)` listing of a fully resident tree. Parents
/// come before children, so the order is also a valid grafting order.
pub fn collect_nodes(root: &Arc<Node>) -> Vec<(NodeId, Arc<Node>)> {
    let mut out = Vec::new();
    let mut stack = vec![(NodeId::ROOT, Arc::clone(root))];
    while let Some((id, node)) = stack.pop() {
        out.push((id, Arc::clone(&node)));
        if let Some(inner) = node.as_inner() {
            for branch in (0..16).rev() {
                if !inner.is_empty_branch(branch) {
                    let child = inner
                        .cached_child(branch)
                        .expect("fixture trees are fully resident");
                    stack.push((id.child(branch), child));
                }
            }
        }
    }
    out
}

/// Install every node of the tree into a backing store.
pub fn store_tree(db: &MemoryDatabase<Node>, root: &Arc<Node>) {
    for (_, node) in collect_nodes(root) {
        db.insert(node.hash(), node);
    }
}

/// A sync filter fronting a fetch pack: canonical node bytes keyed by hash,
/// plus a record of every graft notification.
#[derive(Default)]
pub struct PackFilter {
    nodes: Mutex<HashMap<Hash, (Vec<u8>, Arc<Node>)>>,
    notified: Mutex<Vec<(Hash, NodeKind)>>,
}

impl PackFilter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load one fetch-pack entry.
    pub fn load(&self, hash: Hash, bytes: Vec<u8>) {
        let node = decode_node(&bytes, SerialFormat::Prefix).expect("fetch pack entries decode");
        assert_eq!(node.hash(), hash, "fetch pack entry hash mismatch");
        let _ = self.nodes.lock().insert(hash, (bytes, Arc::new(node)));
    }

    pub fn loaded_count(&self) -> usize {
        self.nodes.lock().len()
    }

    pub fn notified_count(&self) -> usize {
        self.notified.lock().len()
    }
}

impl SyncFilter for PackFilter {
    type Node = Node;

    fn try_fetch(&self, hash: &Hash) -> Option<(Vec<u8>, Arc<Node>)> {
        self.nodes.lock().get(hash).cloned()
    }

    fn got_node(&self, _from_ack: bool, hash: &Hash, _bytes: Vec<u8>, kind: NodeKind) {
        self.notified.lock().push((*hash, kind));
    }
}
