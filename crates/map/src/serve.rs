//! Serving nodes to peers.
//!
//! The counterpart of the scanner: peers ask for a node (plus some of its
//! descendants) by position, or for a fetch pack holding the nodes they
//! lack relative to a snapshot they already hold. These walks fetch
//! synchronously; latency is acceptable on the serving side.

use crate::codec::{encode_node, SerialFormat};
use crate::error::MapError;
use crate::map::Map;
use crate::node::Node;
use merklemap_types::{Hash, Key, NodeId};
use std::sync::Arc;
use tracing::{info, warn};

impl Map {
    /// Fetch the node at `wanted` plus a depth-bounded bundle of its
    /// descendants, encoded for the wire.
    ///
    /// Chains of single-child inner nodes are followed without consuming
    /// `depth`, so a request always reaches the next fan-out. Leaves are
    /// bundled only when `fat_leaves` is set or a chain ends in one.
    /// Returns `Ok(None)` when the position is not part of this map;
    /// missing backing data surfaces as an error.
    pub fn get_node_fat(
        &self,
        wanted: &NodeId,
        fat_leaves: bool,
        depth: u32,
    ) -> Result<Option<(Vec<NodeId>, Vec<Vec<u8>>)>, MapError> {
        let mut node = Arc::clone(self.root());
        let mut id = NodeId::ROOT;

        loop {
            let next = {
                let inner = match node.as_inner() {
                    Some(inner) if id.depth() < wanted.depth() => inner,
                    _ => break,
                };
                let branch = id.select_branch(wanted.key());
                if inner.is_empty_branch(branch) {
                    warn!(%wanted, "peer requested node not in the map");
                    return Ok(None);
                }
                let child = self.descend_or_missing(inner, &id, branch)?;
                let child_id = child.position(id.child(branch));
                (child, child_id)
            };
            node = next.0;
            id = next.1;
        }

        if !node.position_matches(&id, wanted) {
            warn!(%wanted, found = %id, "peer requested node not in the map");
            return Ok(None);
        }
        if let Some(inner) = node.as_inner() {
            if inner.is_empty() {
                warn!(%wanted, "peer requested empty node");
                return Ok(None);
            }
        }

        let mut node_ids = Vec::new();
        let mut raw_nodes = Vec::new();
        let mut stack: Vec<(Arc<Node>, NodeId, u32)> = vec![(node, id, depth)];

        while let Some((node, id, depth)) = stack.pop() {
            node_ids.push(id);
            raw_nodes.push(encode_node(&node, SerialFormat::Wire)?);

            let inner = match node.as_inner() {
                Some(inner) => inner,
                None => continue,
            };
            let branch_count = inner.branch_count();
            if depth == 0 && branch_count != 1 {
                continue;
            }
            for branch in 0..16 {
                if inner.is_empty_branch(branch) {
                    continue;
                }
                let child = self.descend_or_missing(inner, &id, branch)?;
                let child_id = child.position(id.child(branch));
                if child.is_inner() && (depth > 1 || branch_count == 1) {
                    // A single child continues the chain at full depth;
                    // a fan-out spends one level of budget.
                    let child_depth = if branch_count > 1 { depth - 1 } else { depth };
                    stack.push((child, child_id, child_depth));
                } else if child.is_inner() || fat_leaves {
                    node_ids.push(child_id);
                    raw_nodes.push(encode_node(&child, SerialFormat::Wire)?);
                }
            }
        }

        Ok(Some((node_ids, raw_nodes)))
    }

    /// Whether this map holds an inner node with the given position and
    /// hash.
    pub fn has_inner_node(&self, target: &NodeId, target_hash: &Hash) -> Result<bool, MapError> {
        let mut node = Arc::clone(self.root());
        let mut id = NodeId::ROOT;

        loop {
            let (next, branch) = {
                let inner = match node.as_inner() {
                    Some(inner) if id.depth() < target.depth() => inner,
                    _ => break,
                };
                let branch = id.select_branch(target.key());
                if inner.is_empty_branch(branch) {
                    return Ok(false);
                }
                (self.descend_or_missing(inner, &id, branch)?, branch)
            };
            id = id.child(branch);
            node = next;
        }

        Ok(node.is_inner() && node.hash() == *target_hash)
    }

    /// Whether this map holds a leaf with the given key and hash. Walks the
    /// key's path and short-circuits as soon as a branch hash matches, so a
    /// positive answer never fetches the leaf itself.
    pub fn has_leaf_node(&self, key: &Key, target_hash: &Hash) -> Result<bool, MapError> {
        let mut node = Arc::clone(self.root());
        let mut id = NodeId::ROOT;

        if node.is_leaf() {
            // Only one leaf in the tree.
            return Ok(node.hash() == *target_hash);
        }

        loop {
            let next = {
                let inner = match node.as_inner() {
                    Some(inner) => inner,
                    None => break,
                };
                let branch = id.select_branch(key);
                if inner.is_empty_branch(branch) {
                    // Dead end; the leaf cannot be here.
                    return Ok(false);
                }
                if inner.child_hash(branch) == *target_hash {
                    // Matching branch hash; no need to fetch the node.
                    return Ok(true);
                }
                (self.descend_or_missing(inner, &id, branch)?, id.child(branch))
            };
            node = next.0;
            id = next.1;
        }

        // A matching leaf would have been caught on its branch hash.
        Ok(false)
    }

    /// Walk every node of this map that `have` lacks, in pre-order. The
    /// visitor returns `true` to stop. `have` may be `None` (a peer with
    /// nothing), in which case every resident node is visited.
    pub fn visit_differences<F>(&self, have: Option<&Map>, mut visitor: F) -> Result<(), MapError>
    where
        F: FnMut(&Node) -> bool,
    {
        if self.root_hash().is_zero() {
            return Ok(());
        }
        if let Some(have) = have {
            if have.root_hash() == self.root_hash() {
                return Ok(());
            }
        }

        let root = Arc::clone(self.root());
        if let Node::Leaf(leaf) = root.as_ref() {
            let covered = match have {
                Some(have) => have.has_leaf_node(leaf.item().key(), &root.hash())?,
                None => false,
            };
            if !covered {
                let _ = visitor(&root);
            }
            return Ok(());
        }

        // Unexplored inner nodes that `have` does not share.
        let mut stack: Vec<(Arc<Node>, NodeId)> = vec![(root, NodeId::ROOT)];

        while let Some((node, id)) = stack.pop() {
            if visitor(&node) {
                return Ok(());
            }
            let inner = match node.as_inner() {
                Some(inner) => inner,
                None => continue,
            };
            for branch in 0..16 {
                if inner.is_empty_branch(branch) {
                    continue;
                }
                let child_hash = inner.child_hash(branch);
                let child_id = id.child(branch);
                let child = self.descend_or_missing(inner, &id, branch)?;

                if child.is_inner() {
                    let covered = match have {
                        Some(have) => have.has_inner_node(&child_id, &child_hash)?,
                        None => false,
                    };
                    if !covered {
                        stack.push((child, child_id));
                    }
                } else if let Node::Leaf(leaf) = child.as_ref() {
                    let covered = match have {
                        Some(have) => have.has_leaf_node(leaf.item().key(), &child_hash)?,
                        None => false,
                    };
                    if !covered && visitor(&child) {
                        return Ok(());
                    }
                }
            }
        }
        Ok(())
    }

    /// Stream up to `max` canonically encoded nodes that `have` lacks into
    /// `sink`. Leaves are included only when `include_leaves` is set (a
    /// caller syncing a transaction tree has no use for them). Maps of
    /// different format families yield nothing.
    pub fn get_fetch_pack<F>(
        &self,
        have: Option<&Map>,
        include_leaves: bool,
        max: usize,
        mut sink: F,
    ) -> Result<(), MapError>
    where
        F: FnMut(Hash, Vec<u8>),
    {
        if let Some(have) = have {
            if have.format() != self.format() {
                info!("cannot build a fetch pack across map formats");
                return Ok(());
            }
        }

        let mut budget = max;
        let mut encode_err: Option<MapError> = None;
        self.visit_differences(have, |node| {
            if budget == 0 {
                return true;
            }
            if include_leaves || node.is_inner() {
                match encode_node(node, SerialFormat::Prefix) {
                    Ok(bytes) => {
                        sink(node.hash(), bytes);
                        budget -= 1;
                        if budget == 0 {
                            return true;
                        }
                    }
                    Err(err) => {
                        encode_err = Some(err.into());
                        return true;
                    }
                }
            }
            false
        })?;

        match encode_err {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}
