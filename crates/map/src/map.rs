//! The map: a hash-authenticated 16-ary prefix tree handle.
//!
//! A `Map` owns a root node and the shared handles it needs to materialize
//! the rest of the tree on demand: the backing store and the process-wide
//! full-below cache. Structure is shared between maps through `Arc` child
//! pointers; children never reference parents, so no cycles arise.
//!
//! The map itself performs no I/O beyond the [`Database`] trait. The only
//! blocking point in the sync path is `Database::wait_reads`, invoked once
//! per scanner outer iteration.

use crate::codec::{encode_node, SerialFormat};
use crate::error::MapError;
use crate::node::{InnerNode, Node};
use merklemap_store::{Database, FullBelowCache, Prefetch, SyncFilter};
use merklemap_types::{Hash, NodeId};
use std::fmt;
use std::sync::Arc;
use tracing::warn;

/// Shared handle to the node storage backend.
pub type SharedDatabase = Arc<dyn Database<Node = Node>>;

/// Per-call alternate node source.
pub type MapSyncFilter<'a> = &'a dyn SyncFilter<Node = Node>;

/// Lifecycle state of a map.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MapState {
    /// Acquiring nodes from peers; the tree may have holes.
    Synching,
    /// Fully resident and hash-consistent. Terminal.
    Valid,
    /// Proven corrupt by an incoming node. Sticky; discard the map.
    Invalid,
}

/// Wire-format family of a map's inner nodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MapFormat {
    /// Inner nodes are positioned implicitly by the path walked to them.
    Flat,
    /// Inner nodes carry their own `(depth, key)` position.
    Keyed,
}

/// Outcome of a non-blocking descent, mirroring [`Prefetch`] one level up.
pub(crate) enum DescendAsync {
    Hit(Arc<Node>),
    Pending,
    Miss,
}

/// A partially or fully materialized authenticated tree.
pub struct Map {
    root: Arc<Node>,
    seq: u64,
    state: MapState,
    backed: bool,
    format: MapFormat,
    db: SharedDatabase,
    full_below: Arc<FullBelowCache>,
}

impl Map {
    /// Create an unseeded synching map. The root starts as the empty
    /// placeholder with the zero hash; seed it with
    /// [`Map::add_root_node`](crate::Map::add_root_node).
    pub fn new(db: SharedDatabase, full_below: Arc<FullBelowCache>, seq: u64) -> Self {
        Self {
            root: Arc::new(Node::Inner(InnerNode::empty())),
            seq,
            state: MapState::Synching,
            backed: true,
            format: MapFormat::Flat,
            db,
            full_below,
        }
    }

    /// Adopt an existing node tree as a valid snapshot.
    pub fn from_root(
        db: SharedDatabase,
        full_below: Arc<FullBelowCache>,
        seq: u64,
        root: Arc<Node>,
    ) -> Self {
        let format = match root.as_inner().and_then(InnerNode::own_id) {
            Some(_) => MapFormat::Keyed,
            None => MapFormat::Flat,
        };
        Self {
            root,
            seq,
            state: MapState::Valid,
            backed: true,
            format,
            db,
            full_below,
        }
    }

    /// Select the wire-format family. Only meaningful before nodes arrive.
    pub fn with_format(mut self, format: MapFormat) -> Self {
        self.format = format;
        self
    }

    /// Detach the map from store canonicalization: nodes live only in
    /// memory and the full-below cache is not consulted or written.
    pub fn unbacked(mut self) -> Self {
        self.backed = false;
        self
    }

    /// The root node's content hash (zero when unseeded).
    pub fn root_hash(&self) -> Hash {
        self.root.hash()
    }

    /// The root node.
    pub fn root(&self) -> &Arc<Node> {
        &self.root
    }

    /// The map's sequence number.
    pub fn seq(&self) -> u64 {
        self.seq
    }

    /// Current lifecycle state.
    pub fn state(&self) -> MapState {
        self.state
    }

    /// Whether the map is still acquiring nodes.
    pub fn is_synching(&self) -> bool {
        self.state == MapState::Synching
    }

    /// Whether the map is fully resident and hash-consistent.
    pub fn is_valid(&self) -> bool {
        self.state == MapState::Valid
    }

    /// Whether writes are canonicalized through the backing store.
    pub fn backed(&self) -> bool {
        self.backed
    }

    /// The map's wire-format family.
    pub fn format(&self) -> MapFormat {
        self.format
    }

    /// Handle to the shared full-below cache.
    pub fn full_below_cache(&self) -> &Arc<FullBelowCache> {
        &self.full_below
    }

    /// Encode the root node.
    pub fn get_root_node(&self, format: SerialFormat) -> Result<Vec<u8>, MapError> {
        Ok(encode_node(&self.root, format)?)
    }

    pub(crate) fn db(&self) -> &SharedDatabase {
        &self.db
    }

    pub(crate) fn set_root(&mut self, root: Arc<Node>) {
        self.root = root;
    }

    pub(crate) fn clear_synching(&mut self) {
        if self.state == MapState::Synching {
            self.state = MapState::Valid;
        }
    }

    pub(crate) fn mark_invalid(&mut self) {
        self.state = MapState::Invalid;
    }

    // ------------------------------------------------------------------
    // Descent helpers
    // ------------------------------------------------------------------

    /// Resident child via cache or store, installing the pointer.
    pub(crate) fn descend(&self, inner: &InnerNode, branch: usize) -> Option<Arc<Node>> {
        if let Some(child) = inner.cached_child(branch) {
            return Some(child);
        }
        if !self.backed {
            return None;
        }
        let node = self.db.fetch(&inner.child_hash(branch))?;
        Some(inner.canonicalize_child(branch, node))
    }

    /// Like [`Map::descend`] but without installing the pointer; used by
    /// read-only traversal.
    pub(crate) fn descend_no_store(&self, inner: &InnerNode, branch: usize) -> Option<Arc<Node>> {
        if let Some(child) = inner.cached_child(branch) {
            return Some(child);
        }
        if !self.backed {
            return None;
        }
        self.db.fetch(&inner.child_hash(branch))
    }

    /// Descend or report the hole as an error value.
    pub(crate) fn descend_or_missing(
        &self,
        inner: &InnerNode,
        id: &NodeId,
        branch: usize,
    ) -> Result<Arc<Node>, MapError> {
        self.descend(inner, branch).ok_or_else(|| MapError::NodeMissing {
            id: id.child(branch),
            hash: inner.child_hash(branch),
        })
    }

    /// Descent for the grafting walk: consults cache, store, and the
    /// per-call filter, and reports the position of whatever it stepped to
    /// (a keyed child's own position wins over the derived one).
    pub(crate) fn descend_tracked(
        &self,
        inner: &InnerNode,
        walked: &NodeId,
        branch: usize,
        filter: Option<MapSyncFilter<'_>>,
    ) -> (Option<Arc<Node>>, NodeId) {
        let derived = walked.child(branch);
        let found = self
            .descend(inner, branch)
            .or_else(|| self.descend_filter(inner, branch, filter));
        match found {
            Some(node) => {
                let id = node.position(derived);
                (Some(node), id)
            }
            None => (None, derived),
        }
    }

    /// Non-blocking descent used by the missing-node scanner.
    pub(crate) fn descend_async(
        &self,
        inner: &InnerNode,
        branch: usize,
        filter: Option<MapSyncFilter<'_>>,
    ) -> DescendAsync {
        if let Some(child) = inner.cached_child(branch) {
            return DescendAsync::Hit(child);
        }
        if let Some(node) = self.descend_filter(inner, branch, filter) {
            return DescendAsync::Hit(node);
        }
        if !self.backed {
            return DescendAsync::Miss;
        }
        match self.db.prefetch(&inner.child_hash(branch)) {
            Prefetch::Hit(node) => DescendAsync::Hit(inner.canonicalize_child(branch, node)),
            Prefetch::Pending => DescendAsync::Pending,
            Prefetch::Miss => DescendAsync::Miss,
        }
    }

    /// Try the per-call filter for a child, installing on success.
    fn descend_filter(
        &self,
        inner: &InnerNode,
        branch: usize,
        filter: Option<MapSyncFilter<'_>>,
    ) -> Option<Arc<Node>> {
        let filter = filter?;
        let hash = inner.child_hash(branch);
        let node = self.check_filter(&hash, filter)?;
        Some(inner.canonicalize_child(branch, node))
    }

    /// Fetch a node by hash from the store or the filter, without touching
    /// any parent. Used when draining deferred reads.
    pub(crate) fn fetch_node(
        &self,
        hash: &Hash,
        filter: Option<MapSyncFilter<'_>>,
    ) -> Option<Arc<Node>> {
        if self.backed {
            if let Some(node) = self.db.fetch(hash) {
                return Some(node);
            }
        }
        self.check_filter(hash, filter?)
    }

    fn check_filter(&self, hash: &Hash, filter: MapSyncFilter<'_>) -> Option<Arc<Node>> {
        let (_bytes, node) = filter.try_fetch(hash)?;
        if node.hash() != *hash {
            warn!(expected = %hash, got = %node.hash(), "filter returned mishashed node");
            return None;
        }
        let node = if self.backed {
            self.db.canonicalize(hash, node)
        } else {
            node
        };
        Some(node)
    }

    /// Canonicalize through the store when backed; identity otherwise.
    pub(crate) fn canonicalize(&self, hash: &Hash, node: Arc<Node>) -> Arc<Node> {
        if self.backed {
            self.db.canonicalize(hash, node)
        } else {
            node
        }
    }
}

impl fmt::Debug for Map {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Map")
            .field("root", &self.root.hash())
            .field("seq", &self.seq)
            .field("state", &self.state)
            .field("format", &self.format)
            .field("backed", &self.backed)
            .finish()
    }
}
