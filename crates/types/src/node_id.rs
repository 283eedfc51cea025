//! Tree positions.

use crate::{Key, KEY_NIBBLES};
use sbor::prelude::*;
use std::fmt;

/// A position in the tree: a depth and the key prefix that leads to it.
///
/// Depth counts 4-bit nibbles consumed from the root, so it ranges over
/// 0..=64. Only the top `depth` nibbles of the key are significant; the
/// constructor masks the rest to zero so equal positions compare equal.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default, BasicSbor)]
pub struct NodeId {
    depth: u8,
    key: Key,
}

impl NodeId {
    /// The root position (depth 0).
    pub const ROOT: NodeId = NodeId {
        depth: 0,
        key: Key::ZERO,
    };

    /// Build a position from a depth and key, masking insignificant nibbles.
    ///
    /// Depths beyond 64 are representable on purpose: a peer can claim one,
    /// and the grafting layer rejects it via its bounds check rather than at
    /// construction.
    pub fn new(depth: u8, key: Key) -> Self {
        let mut masked = key;
        let start = (depth as usize).min(KEY_NIBBLES);
        for i in start..KEY_NIBBLES {
            masked = masked.with_nibble(i, 0);
        }
        NodeId { depth, key: masked }
    }

    /// The depth of this position, in nibbles from the root.
    pub fn depth(&self) -> u8 {
        self.depth
    }

    /// The (masked) key prefix.
    pub fn key(&self) -> &Key {
        &self.key
    }

    /// Whether this is the root position.
    pub fn is_root(&self) -> bool {
        self.depth == 0
    }

    /// The branch a full key takes when leaving a node at this position.
    pub fn select_branch(&self, key: &Key) -> usize {
        key.nibble(self.depth as usize) as usize
    }

    /// The position of the child reached through `branch`.
    pub fn child(&self, branch: usize) -> NodeId {
        debug_assert!(branch < 16);
        debug_assert!((self.depth as usize) < KEY_NIBBLES);
        NodeId {
            depth: self.depth + 1,
            key: self.key.with_nibble(self.depth as usize, branch as u8),
        }
    }

    /// Whether the shallower of the two positions is a prefix of the deeper.
    pub fn has_common_prefix(&self, other: &NodeId) -> bool {
        let shared = self.depth.min(other.depth) as usize;
        if shared > KEY_NIBBLES {
            return false;
        }
        self.key.shares_prefix(&other.key, shared)
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_root() {
            return write!(f, "root");
        }
        write!(f, "{}:", self.depth)?;
        for i in 0..(self.depth as usize).min(KEY_NIBBLES) {
            write!(f, "{:x}", self.key.nibble(i))?;
        }
        Ok(())
    }
}

impl fmt::Debug for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NodeId({self})")
    }
}
