//! Tree traversal.
//!
//! All walks use an explicit frame stack; the tree can be 64 levels deep
//! and recursion depth is not a budget we spend. Visitors return `true` to
//! stop the walk early.

use crate::error::MapError;
use crate::map::Map;
use crate::node::Node;
use merklemap_types::{Item, NodeId};
use std::sync::Arc;
use tracing::{info, warn};

impl Map {
    /// Pre-order walk over every resident node, root included.
    ///
    /// Inner nodes are visited before their children; leaves are visited
    /// without descent. The visitor returns `true` to stop. Returns an
    /// error if the walk reaches a branch whose node is resident nowhere.
    pub fn visit_nodes<F>(&self, mut visitor: F) -> Result<(), MapError>
    where
        F: FnMut(&Node) -> bool,
    {
        let root = Arc::clone(self.root());
        if visitor(&root) {
            return Ok(());
        }
        if root.is_leaf() {
            return Ok(());
        }

        // (resume position, node, position) frames; a frame is only pushed
        // when a later branch actually remains to be visited.
        let mut stack: Vec<(usize, Arc<Node>, NodeId)> = Vec::new();
        let mut node = root;
        let mut id = NodeId::ROOT;
        let mut pos = 0;

        'frames: loop {
            while pos < 16 {
                let inner = match node.as_inner() {
                    Some(inner) => inner,
                    None => break,
                };
                if inner.is_empty_branch(pos) {
                    pos += 1;
                    continue;
                }
                let child = self
                    .descend_no_store(inner, pos)
                    .ok_or_else(|| MapError::NodeMissing {
                        id: id.child(pos),
                        hash: inner.child_hash(pos),
                    })?;
                if visitor(&child) {
                    return Ok(());
                }
                if child.is_leaf() {
                    pos += 1;
                    continue;
                }

                // Skip trailing empty branches; only push a resume frame if
                // something is left at this level.
                let mut resume = pos + 1;
                while resume < 16 && inner.is_empty_branch(resume) {
                    resume += 1;
                }
                if resume < 16 {
                    stack.push((resume, Arc::clone(&node), id));
                }
                let child_id = child.position(id.child(pos));
                node = child;
                id = child_id;
                pos = 0;
                continue 'frames;
            }

            match stack.pop() {
                Some((resume, parent, parent_id)) => {
                    pos = resume;
                    node = parent;
                    id = parent_id;
                }
                None => break,
            }
        }
        Ok(())
    }

    /// Walk every resident leaf's item.
    pub fn visit_leaves<F>(&self, mut visitor: F) -> Result<(), MapError>
    where
        F: FnMut(&Arc<Item>),
    {
        self.visit_nodes(|node| {
            if let Node::Leaf(leaf) = node {
                visitor(leaf.item());
            }
            false
        })
    }

    /// Structural equality of two resident trees. Debug/test helper: any
    /// hole in either tree compares unequal rather than erroring.
    pub fn deep_compare(&self, other: &Map) -> bool {
        let mut stack: Vec<(Arc<Node>, Arc<Node>)> =
            vec![(Arc::clone(self.root()), Arc::clone(other.root()))];

        while let Some((ours, theirs)) = stack.pop() {
            if ours.hash() != theirs.hash() {
                warn!(ours = %ours.hash(), theirs = %theirs.hash(), "node hash mismatch");
                return false;
            }
            match (ours.as_ref(), theirs.as_ref()) {
                (Node::Leaf(a), Node::Leaf(b)) => {
                    if a.item().key() != b.item().key() || a.item().payload() != b.item().payload()
                    {
                        return false;
                    }
                }
                (Node::Inner(a), Node::Inner(b)) => {
                    for branch in 0..16 {
                        if a.is_empty_branch(branch) != b.is_empty_branch(branch) {
                            return false;
                        }
                        if a.is_empty_branch(branch) {
                            continue;
                        }
                        let next = self.descend(a, branch);
                        let other_next = other.descend(b, branch);
                        match (next, other_next) {
                            (Some(n), Some(o)) => stack.push((n, o)),
                            _ => {
                                info!("unable to fetch node");
                                return false;
                            }
                        }
                    }
                }
                _ => return false,
            }
        }
        true
    }
}
