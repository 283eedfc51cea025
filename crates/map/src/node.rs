//! Tree nodes.
//!
//! A node is either an inner node (16 branch slots, one per key nibble) or a
//! leaf holding an [`Item`]. Every node carries a content hash committing to
//! its entire subtree; the hash is fixed at construction. The only mutable
//! state is the child-pointer cache of an inner node and its full-below
//! generation tag, both safe to touch from multiple maps sharing the node.

use merklemap_types::{Hash, Item, NodeId, NodeKind, BRANCH_COUNT, KEY_NIBBLES};
use parking_lot::RwLock;
use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

/// Domain tag for inner-node hashing.
const DOMAIN_INNER: &[u8] = b"merklemap.inner.v1";
/// Domain tag for keyed (position-carrying) inner-node hashing.
const DOMAIN_INNER_KEYED: &[u8] = b"merklemap.inner.keyed.v1";

/// A node of the authenticated tree.
#[derive(Debug)]
pub enum Node {
    /// Inner node with up to 16 children.
    Inner(InnerNode),
    /// Leaf node holding one item.
    Leaf(LeafNode),
}

impl Node {
    /// The content hash of this node's subtree.
    pub fn hash(&self) -> Hash {
        match self {
            Node::Inner(inner) => inner.hash(),
            Node::Leaf(leaf) => leaf.hash(),
        }
    }

    /// Inner/leaf discriminant.
    pub fn kind(&self) -> NodeKind {
        match self {
            Node::Inner(_) => NodeKind::Inner,
            Node::Leaf(_) => NodeKind::Leaf,
        }
    }

    /// Whether this is an inner node.
    pub fn is_inner(&self) -> bool {
        matches!(self, Node::Inner(_))
    }

    /// Whether this is a leaf.
    pub fn is_leaf(&self) -> bool {
        matches!(self, Node::Leaf(_))
    }

    /// View as an inner node.
    pub fn as_inner(&self) -> Option<&InnerNode> {
        match self {
            Node::Inner(inner) => Some(inner),
            Node::Leaf(_) => None,
        }
    }

    /// View as a leaf.
    pub fn as_leaf(&self) -> Option<&LeafNode> {
        match self {
            Node::Leaf(leaf) => Some(leaf),
            Node::Inner(_) => None,
        }
    }

    /// Local structural validity. Decoded inner nodes must populate at
    /// least one branch; the empty placeholder root never passes through
    /// here.
    pub fn is_valid(&self) -> bool {
        match self {
            Node::Inner(inner) => inner.branch_count() > 0,
            Node::Leaf(_) => true,
        }
    }

    /// The position this node occupies, preferring a keyed node's own
    /// position over the parent-derived `fallback`.
    pub fn position(&self, fallback: NodeId) -> NodeId {
        match self {
            Node::Inner(inner) => inner.own_id().copied().unwrap_or(fallback),
            Node::Leaf(_) => fallback,
        }
    }

    /// Whether this node's claimed position is consistent with the
    /// parent-derived `walked` id. A keyed inner node must sit on the walked
    /// path within key bounds; positionless nodes are trivially consistent.
    pub fn is_in_bounds(&self, walked: &NodeId) -> bool {
        match self {
            Node::Leaf(_) => true,
            Node::Inner(inner) => match inner.own_id() {
                None => (walked.depth() as usize) < KEY_NIBBLES,
                Some(own) => {
                    (own.depth() as usize) < KEY_NIBBLES
                        && own.depth() >= walked.depth()
                        && own.has_common_prefix(walked)
                }
            },
        }
    }

    /// The single position-match predicate used by grafting and serving:
    /// keyed nodes match on common prefix, fixed-depth nodes on equality.
    pub fn position_matches(&self, walked: &NodeId, claimed: &NodeId) -> bool {
        let keyed = matches!(self, Node::Inner(inner) if inner.own_id().is_some());
        if keyed {
            walked.has_common_prefix(claimed)
        } else {
            walked == claimed
        }
    }
}

/// A leaf node: one item, hashed with its key.
pub struct LeafNode {
    item: Arc<Item>,
    hash: Hash,
}

impl LeafNode {
    /// Create a leaf over `item`.
    pub fn new(item: Arc<Item>) -> Self {
        let hash = item.hash();
        Self { item, hash }
    }

    /// The item held by this leaf.
    pub fn item(&self) -> &Arc<Item> {
        &self.item
    }

    /// The leaf's content hash.
    pub fn hash(&self) -> Hash {
        self.hash
    }
}

impl fmt::Debug for LeafNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LeafNode")
            .field("key", self.item.key())
            .field("hash", &self.hash)
            .finish()
    }
}

/// An inner node: 16 branch-hash slots plus a lazily populated cache of
/// child pointers.
///
/// The branch hashes are authoritative; a missing pointer only means the
/// child has not been materialized here yet. Keyed nodes additionally carry
/// their own `(depth, key)` position.
pub struct InnerNode {
    branch_hashes: [Hash; BRANCH_COUNT],
    children: RwLock<[Option<Arc<Node>>; BRANCH_COUNT]>,
    hash: Hash,
    full_below_gen: AtomicU32,
    own_id: Option<NodeId>,
}

impl InnerNode {
    /// The empty placeholder (zero hash, no branches) installed as the root
    /// of a map that has not been seeded yet.
    pub fn empty() -> Self {
        Self::from_hashes([Hash::ZERO; BRANCH_COUNT])
    }

    /// Build from branch hashes alone (no resident children).
    pub fn from_hashes(branch_hashes: [Hash; BRANCH_COUNT]) -> Self {
        let hash = compute_inner_hash(None, &branch_hashes);
        Self {
            branch_hashes,
            children: RwLock::new(std::array::from_fn(|_| None)),
            hash,
            full_below_gen: AtomicU32::new(0),
            own_id: None,
        }
    }

    /// Build a keyed node from its own position and branch hashes.
    pub fn keyed_from_hashes(own_id: NodeId, branch_hashes: [Hash; BRANCH_COUNT]) -> Self {
        let hash = compute_inner_hash(Some(&own_id), &branch_hashes);
        Self {
            branch_hashes,
            children: RwLock::new(std::array::from_fn(|_| None)),
            hash,
            full_below_gen: AtomicU32::new(0),
            own_id: Some(own_id),
        }
    }

    /// Build from resident children, installing both hashes and pointers.
    pub fn from_branches<I>(branches: I) -> Self
    where
        I: IntoIterator<Item = (usize, Arc<Node>)>,
    {
        Self::build(None, branches)
    }

    /// Keyed variant of [`InnerNode::from_branches`].
    pub fn keyed_from_branches<I>(own_id: NodeId, branches: I) -> Self
    where
        I: IntoIterator<Item = (usize, Arc<Node>)>,
    {
        Self::build(Some(own_id), branches)
    }

    fn build<I>(own_id: Option<NodeId>, branches: I) -> Self
    where
        I: IntoIterator<Item = (usize, Arc<Node>)>,
    {
        let mut branch_hashes = [Hash::ZERO; BRANCH_COUNT];
        let mut children: [Option<Arc<Node>>; BRANCH_COUNT] = std::array::from_fn(|_| None);
        for (branch, child) in branches {
            branch_hashes[branch] = child.hash();
            children[branch] = Some(child);
        }
        let hash = compute_inner_hash(own_id.as_ref(), &branch_hashes);
        Self {
            branch_hashes,
            children: RwLock::new(children),
            hash,
            full_below_gen: AtomicU32::new(0),
            own_id,
        }
    }

    /// The node's content hash.
    pub fn hash(&self) -> Hash {
        self.hash
    }

    /// The keyed node's own position, if it carries one.
    pub fn own_id(&self) -> Option<&NodeId> {
        self.own_id.as_ref()
    }

    /// Whether branch slot `branch` is empty.
    pub fn is_empty_branch(&self, branch: usize) -> bool {
        self.branch_hashes[branch].is_zero()
    }

    /// The child hash in slot `branch` (zero when empty).
    pub fn child_hash(&self, branch: usize) -> Hash {
        self.branch_hashes[branch]
    }

    /// Number of populated branches.
    pub fn branch_count(&self) -> usize {
        self.branch_hashes.iter().filter(|h| !h.is_zero()).count()
    }

    /// Whether no branch is populated.
    pub fn is_empty(&self) -> bool {
        self.branch_hashes.iter().all(Hash::is_zero)
    }

    /// The cached child pointer in slot `branch`, if materialized.
    pub fn cached_child(&self, branch: usize) -> Option<Arc<Node>> {
        self.children.read()[branch].clone()
    }

    /// Install a child pointer, keeping whichever instance arrived first.
    /// Returns the retained pointer; callers must continue with it so that
    /// racing materializations agree on one instance.
    pub fn canonicalize_child(&self, branch: usize, node: Arc<Node>) -> Arc<Node> {
        debug_assert_eq!(node.hash(), self.branch_hashes[branch]);
        let mut children = self.children.write();
        match &children[branch] {
            Some(existing) => Arc::clone(existing),
            None => {
                children[branch] = Some(Arc::clone(&node));
                node
            }
        }
    }

    /// Whether this subtree was proven fully resident in `generation`.
    pub fn is_full_below(&self, generation: u32) -> bool {
        self.full_below_gen.load(Ordering::Acquire) == generation
    }

    /// Record that every descendant was resident at `generation`.
    pub fn set_full_below_gen(&self, generation: u32) {
        self.full_below_gen.store(generation, Ordering::Release);
    }
}

impl fmt::Debug for InnerNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InnerNode")
            .field("hash", &self.hash)
            .field("branches", &self.branch_count())
            .field("own_id", &self.own_id)
            .finish()
    }
}

fn compute_inner_hash(own_id: Option<&NodeId>, branch_hashes: &[Hash; BRANCH_COUNT]) -> Hash {
    if branch_hashes.iter().all(Hash::is_zero) {
        return Hash::ZERO;
    }
    let mut hasher = blake3::Hasher::new();
    match own_id {
        None => {
            hasher.update(DOMAIN_INNER);
        }
        Some(id) => {
            hasher.update(DOMAIN_INNER_KEYED);
            hasher.update(&[id.depth()]);
            hasher.update(id.key().as_bytes());
        }
    }
    for hash in branch_hashes {
        hasher.update(hash.as_bytes());
    }
    Hash::from_raw(*hasher.finalize().as_bytes())
}
