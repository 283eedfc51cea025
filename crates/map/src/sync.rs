//! Missing-node scanning and node grafting.
//!
//! [`Map::get_missing_nodes`] walks the partially materialized tree and
//! reports which `(position, hash)` pairs must be requested from peers.
//! [`Map::add_root_node`] and [`Map::add_known_node`] validate and install
//! what the peers send back. Together with the peer-serving side they form
//! the full replication loop.

use crate::codec::{decode_node, encode_node, SerialFormat};
use crate::map::{DescendAsync, Map, MapFormat, MapSyncFilter};
use crate::node::Node;
use merklemap_types::{Hash, NodeId};
use rand::Rng;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, trace, warn};

/// Batches above this size, or drains slower than this, get a debug line.
const DRAIN_LOG_THRESHOLD: usize = 50;
const DRAIN_LOG_MILLIS: u128 = 50;

/// Outcome of offering a node to the map.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddResult {
    /// Already present (or arrived while not synching); harmless.
    Duplicate,
    /// Rejected: the bytes are corrupt or do not match the expected hash.
    Invalid,
    /// The offer advanced our knowledge. This includes the case where it
    /// proved the whole map corrupt; the caller learns that from the map
    /// state, not the result.
    Useful,
}

/// A suspended DFS position in the scanner.
struct ScanFrame {
    node: Arc<Node>,
    id: NodeId,
    first_child: usize,
    current_child: usize,
    full_below: bool,
}

impl Map {
    /// Find up to `max` nodes that are part of this map but not resident
    /// locally, returning their positions and hashes for peer requests.
    ///
    /// Branch order within each inner node is randomized per call so that
    /// concurrent scanners on shared trees request mostly disjoint sets.
    /// Reads the store asynchronously: prefetches are batched up to the
    /// store's desired batch size, then drained with one `wait_reads` per
    /// outer iteration. A node resolved by a drain is installed but not
    /// re-descended until the next iteration.
    ///
    /// On discovering the tree fully resident, transitions
    /// `Synching → Valid`.
    pub fn get_missing_nodes(
        &mut self,
        max: usize,
        filter: Option<MapSyncFilter<'_>>,
    ) -> Vec<(NodeId, Hash)> {
        if self.root_hash().is_zero() {
            warn!("scanning a map with no root");
            return Vec::new();
        }
        let generation = self.full_below_cache().generation();
        if self.root().is_leaf() {
            // A lone leaf is its own complete tree.
            self.clear_synching();
            return Vec::new();
        }
        {
            let root_inner = match self.root().as_inner() {
                Some(inner) => inner,
                None => return Vec::new(),
            };
            if root_inner.is_full_below(generation) {
                self.clear_synching();
                return Vec::new();
            }
        }
        if max == 0 {
            return Vec::new();
        }

        let max_defer = self.db().desired_async_batch();
        let mut rng = rand::thread_rng();

        // Hashes already recorded as missing in this call; a hash shared by
        // several branches yields one request.
        let mut missing_hashes: HashSet<Hash> = HashSet::new();
        let mut ret: Vec<(NodeId, Hash)> = Vec::with_capacity(max);
        let mut budget = max;

        loop {
            let mut deferred: Vec<(Arc<Node>, usize, NodeId)> =
                Vec::with_capacity(max_defer + 16);
            let mut stack: Vec<ScanFrame> = Vec::new();

            let mut node = Arc::clone(self.root());
            let mut id = NodeId::ROOT;
            let mut first_child = rng.gen_range(0..256usize);
            let mut current_child = 0;
            let mut full_below = true;

            'frames: loop {
                let inner = match node.as_inner() {
                    Some(inner) => inner,
                    None => break 'frames,
                };

                while current_child < 16 {
                    let branch = (first_child + current_child) % 16;
                    current_child += 1;
                    if inner.is_empty_branch(branch) {
                        continue;
                    }
                    let child_hash = inner.child_hash(branch);

                    if missing_hashes.contains(&child_hash) {
                        full_below = false;
                        continue;
                    }
                    if self.backed() && self.full_below_cache().touch_if_exists(&child_hash) {
                        // Proven complete; no need to look below.
                        continue;
                    }

                    let child_id = id.child(branch);
                    match self.descend_async(inner, branch, filter) {
                        DescendAsync::Miss => {
                            let _ = missing_hashes.insert(child_hash);
                            ret.push((child_id, child_hash));
                            budget -= 1;
                            if budget == 0 {
                                return ret;
                            }
                            full_below = false;
                        }
                        DescendAsync::Pending => {
                            deferred.push((Arc::clone(&node), branch, child_id));
                            full_below = false;
                        }
                        DescendAsync::Hit(child) => match child.as_ref() {
                            // Leaves are their own full-below.
                            Node::Leaf(_) => {}
                            Node::Inner(child_inner)
                                if child_inner.is_full_below(generation) => {}
                            Node::Inner(_) => {
                                stack.push(ScanFrame {
                                    node: Arc::clone(&node),
                                    id,
                                    first_child,
                                    current_child,
                                    full_below,
                                });
                                id = child.position(child_id);
                                node = child;
                                first_child = rng.gen_range(0..256usize);
                                current_child = 0;
                                full_below = true;
                                continue 'frames;
                            }
                        },
                    }
                }

                // Every branch of this node has been examined.
                if full_below {
                    inner.set_full_below_gen(generation);
                    if self.backed() {
                        self.full_below_cache().insert(node.hash());
                    }
                }

                match stack.pop() {
                    None => break 'frames,
                    Some(frame) => {
                        let child_full = full_below;
                        node = frame.node;
                        id = frame.id;
                        first_child = frame.first_child;
                        current_child = frame.current_child;
                        // Was full below, and still is.
                        full_below = frame.full_below && child_full;
                    }
                }
                if deferred.len() > max_defer {
                    break 'frames;
                }
            }

            // One clean pass with nothing deferred has seen everything.
            if deferred.is_empty() {
                break;
            }

            let before = Instant::now();
            self.db().wait_reads();
            let waited = before.elapsed();
            let count = deferred.len();
            let mut hits = 0usize;

            for (parent, branch, child_id) in deferred {
                let parent_inner = match parent.as_inner() {
                    Some(inner) => inner,
                    None => continue,
                };
                let hash = parent_inner.child_hash(branch);
                match self.fetch_node(&hash, filter) {
                    Some(found) => {
                        hits += 1;
                        let found = self.canonicalize(&hash, found);
                        // Installed for the next iteration; no re-descent
                        // within this batch.
                        let _ = parent_inner.canonicalize_child(branch, found);
                    }
                    None => {
                        if budget > 0 && missing_hashes.insert(hash) {
                            ret.push((child_id, hash));
                            budget -= 1;
                        }
                    }
                }
            }

            if count > DRAIN_LOG_THRESHOLD || waited.as_millis() > DRAIN_LOG_MILLIS {
                debug!(
                    count,
                    hits,
                    waited_ms = waited.as_millis() as u64,
                    "drained deferred reads"
                );
            }
            if budget == 0 {
                return ret;
            }
        }

        if ret.is_empty() {
            self.clear_synching();
        }
        ret
    }

    /// Hashes-only projection of [`Map::get_missing_nodes`].
    pub fn get_needed_hashes(
        &mut self,
        max: usize,
        filter: Option<MapSyncFilter<'_>>,
    ) -> Vec<Hash> {
        self.get_missing_nodes(max, filter)
            .into_iter()
            .map(|(_, hash)| hash)
            .collect()
    }

    /// Seed the map's root from encoded bytes.
    pub fn add_root_node(
        &mut self,
        expected: &Hash,
        bytes: &[u8],
        format: SerialFormat,
        filter: Option<MapSyncFilter<'_>>,
    ) -> AddResult {
        if !self.root_hash().is_zero() {
            if self.root_hash() == *expected {
                trace!("got root node, already have one");
                return AddResult::Duplicate;
            }
            warn!(have = %self.root_hash(), got = %expected, "conflicting root node");
            return AddResult::Invalid;
        }

        let node = match decode_node(bytes, format) {
            Ok(node) => Arc::new(node),
            Err(err) => {
                warn!(%err, "unparseable root node");
                return AddResult::Invalid;
            }
        };
        if !node.is_valid() || node.hash() != *expected {
            warn!(expected = %expected, "corrupt root node");
            return AddResult::Invalid;
        }

        let node = self.canonicalize(expected, node);
        self.set_root(Arc::clone(&node));
        if node.is_leaf() {
            self.clear_synching();
        }

        if let Some(filter) = filter {
            if let Ok(canonical) = encode_node(&node, SerialFormat::Prefix) {
                filter.got_node(false, expected, canonical, node.kind());
            }
        }
        AddResult::Useful
    }

    /// Graft a non-root node received from a peer at `target`.
    ///
    /// Walks toward `target` along branch hashes until the first missing
    /// link, then validates the offered node in a fixed order: corrupt
    /// bytes → `Invalid`; impossible position or structural inconsistency →
    /// the map itself is proven corrupt (state `Invalid`, result `Useful`);
    /// hash fine but hooked at the wrong place → `Useful` with the map left
    /// intact, since the peer may simply be answering a stale request.
    pub fn add_known_node(
        &mut self,
        target: &NodeId,
        bytes: &[u8],
        filter: Option<MapSyncFilter<'_>>,
    ) -> AddResult {
        if target.is_root() {
            warn!("add_known_node with root position");
            return AddResult::Invalid;
        }
        if !self.is_synching() {
            trace!("add_known_node while not synching");
            return AddResult::Duplicate;
        }

        let generation = self.full_below_cache().generation();
        let new_node = decode_node(bytes, SerialFormat::Wire).ok().map(Arc::new);

        let mut node = Arc::clone(self.root());
        let mut walked = NodeId::ROOT;

        loop {
            enum Step {
                Descend(Arc<Node>, NodeId),
                Graft(usize, NodeId, Hash),
                Stop(AddResult),
            }

            let step = {
                let inner = match node.as_inner() {
                    Some(inner) => inner,
                    None => break,
                };
                if inner.is_full_below(generation) || walked.depth() >= target.depth() {
                    break;
                }
                let branch = walked.select_branch(target.key());
                if inner.is_empty_branch(branch) {
                    warn!(%target, "add known node for empty branch");
                    Step::Stop(AddResult::Invalid)
                } else {
                    let child_hash = inner.child_hash(branch);
                    if self.full_below_cache().touch_if_exists(&child_hash) {
                        Step::Stop(AddResult::Duplicate)
                    } else {
                        match self.descend_tracked(inner, &walked, branch, filter) {
                            (Some(child), child_id) => Step::Descend(child, child_id),
                            (None, child_id) => Step::Graft(branch, child_id, child_hash),
                        }
                    }
                }
            };

            match step {
                Step::Stop(result) => return result,
                Step::Descend(child, child_id) => {
                    node = child;
                    walked = child_id;
                }
                Step::Graft(branch, child_id, child_hash) => {
                    return self.graft(
                        &node, branch, child_id, child_hash, target, new_node, filter,
                    );
                }
            }
        }

        trace!(%target, "got node, already had it (late)");
        AddResult::Duplicate
    }

    /// Validate and install an offered node at the first missing link.
    /// The check order is deliberate: a provably corrupt map must be
    /// detected in preference to recoverable misrouting.
    #[allow(clippy::too_many_arguments)]
    fn graft(
        &mut self,
        parent: &Arc<Node>,
        branch: usize,
        walked: NodeId,
        expected: Hash,
        target: &NodeId,
        new_node: Option<Arc<Node>>,
        filter: Option<MapSyncFilter<'_>>,
    ) -> AddResult {
        let new_node = match new_node {
            Some(node) if node.is_valid() && node.hash() == expected => node,
            _ => {
                warn!(%target, expected = %expected, "corrupt node received");
                return AddResult::Invalid;
            }
        };

        if !new_node.is_in_bounds(&walked) {
            // The hashes check out but the node cannot exist at the
            // position the tree demands: the map is provably corrupt.
            self.mark_invalid();
            return AddResult::Useful;
        }
        if self.is_inconsistent(&new_node) {
            self.mark_invalid();
            return AddResult::Useful;
        }
        if !new_node.position_matches(&walked, target) {
            // Either the node is broken or we did not request it (yet).
            warn!(%target, stuck_at = %walked, "unable to hook node");
            debug!(
                got_depth = target.depth(),
                walked_to = walked.depth(),
                "graft position mismatch"
            );
            return AddResult::Useful;
        }

        let new_node = self.canonicalize(&expected, new_node);
        let installed = match parent.as_inner() {
            Some(inner) => inner.canonicalize_child(branch, new_node),
            None => return AddResult::Invalid,
        };

        if let Some(filter) = filter {
            if let Ok(canonical) = encode_node(&installed, SerialFormat::Prefix) {
                filter.got_node(false, &expected, canonical, installed.kind());
            }
        }
        AddResult::Useful
    }

    /// A node that hashes correctly but cannot belong to this map: wrong
    /// format family, or an inner node with no branches.
    fn is_inconsistent(&self, node: &Node) -> bool {
        match node {
            Node::Leaf(_) => false,
            Node::Inner(inner) => {
                if inner.is_empty() {
                    return true;
                }
                match self.format() {
                    MapFormat::Flat => inner.own_id().is_some(),
                    MapFormat::Keyed => inner.own_id().is_none(),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::map::MapState;
    use crate::node::{InnerNode, LeafNode};
    use merklemap_store::{FullBelowCache, MemoryDatabase};
    use merklemap_types::{Item, Key};

    /// Leaf whose key starts with the given nibbles, so it hangs off the
    /// matching branches when walked by key.
    fn make_leaf(nibbles: &[u8]) -> Arc<Node> {
        let mut key = Key::from_raw([0xee; 32]);
        for (i, nibble) in nibbles.iter().enumerate() {
            key = key.with_nibble(i, *nibble);
        }
        let payload = nibbles.to_vec();
        Arc::new(Node::Leaf(LeafNode::new(Arc::new(Item::new(key, payload)))))
    }

    /// Three-level source tree:
    /// root ── 0 ── inner ── 2 ── leaf(0,2)
    ///      │             └ 9 ── leaf(0,9)
    ///      └ 5 ── leaf(5,...)
    fn make_source() -> (Arc<Node>, Vec<(NodeId, Arc<Node>)>) {
        let leaf_a = make_leaf(&[0, 2]);
        let leaf_b = make_leaf(&[0, 9]);
        let leaf_c = make_leaf(&[5, 1]);
        let inner = Arc::new(Node::Inner(InnerNode::from_branches([
            (2, Arc::clone(&leaf_a)),
            (9, Arc::clone(&leaf_b)),
        ])));
        let root = Arc::new(Node::Inner(InnerNode::from_branches([
            (0, Arc::clone(&inner)),
            (5, Arc::clone(&leaf_c)),
        ])));

        let inner_id = NodeId::ROOT.child(0);
        let nodes = vec![
            (NodeId::ROOT, Arc::clone(&root)),
            (inner_id, inner),
            (inner_id.child(2), leaf_a),
            (inner_id.child(9), leaf_b),
            (NodeId::ROOT.child(5), leaf_c),
        ];
        (root, nodes)
    }

    fn store_all(db: &MemoryDatabase<Node>, nodes: &[(NodeId, Arc<Node>)]) {
        for (_, node) in nodes {
            db.insert(node.hash(), Arc::clone(node));
        }
    }

    /// A synching map whose backing store already holds the whole tree.
    fn make_synching_map(db: Arc<MemoryDatabase<Node>>, root: &Arc<Node>) -> Map {
        let cache = Arc::new(FullBelowCache::new());
        let mut map = Map::new(db, cache, 1);
        let bytes = encode_node(root, SerialFormat::Wire).unwrap();
        assert_eq!(
            map.add_root_node(&root.hash(), &bytes, SerialFormat::Wire, None),
            AddResult::Useful
        );
        map
    }

    #[test]
    fn test_scan_of_resident_tree_turns_valid() {
        let (root, nodes) = make_source();
        let db = Arc::new(MemoryDatabase::new());
        store_all(&db, &nodes);
        let mut map = make_synching_map(db, &root);

        let missing = map.get_missing_nodes(100, None);
        assert!(missing.is_empty());
        assert_eq!(map.state(), MapState::Valid);

        // The root was proven complete at the current generation.
        let generation = map.full_below_cache().generation();
        assert!(map.root().as_inner().unwrap().is_full_below(generation));
    }

    #[test]
    fn test_scan_reports_single_missing_leaf() {
        let (root, nodes) = make_source();
        let db = Arc::new(MemoryDatabase::new());
        store_all(&db, &nodes);
        let (missing_id, missing_node) = nodes[3].clone();
        let _ = db.remove(&missing_node.hash());

        let mut map = make_synching_map(db, &root);
        let missing = map.get_missing_nodes(100, None);
        assert_eq!(missing, vec![(missing_id, missing_node.hash())]);
        assert_eq!(map.state(), MapState::Synching);
        let generation = map.full_below_cache().generation();
        assert!(!map.root().as_inner().unwrap().is_full_below(generation));
    }

    #[test]
    fn test_scan_respects_max() {
        let (root, nodes) = make_source();
        let db = Arc::new(MemoryDatabase::new());
        store_all(&db, &nodes);
        let _ = db.remove(&nodes[2].1.hash());
        let _ = db.remove(&nodes[3].1.hash());

        let mut map = make_synching_map(db, &root);
        assert_eq!(map.get_missing_nodes(1, None).len(), 1);
        assert_eq!(map.state(), MapState::Synching);
    }

    #[test]
    fn test_scan_with_zero_max_is_inert() {
        let (root, nodes) = make_source();
        let db = Arc::new(MemoryDatabase::new());
        store_all(&db, &nodes);
        let mut map = make_synching_map(db, &root);

        assert!(map.get_missing_nodes(0, None).is_empty());
        assert_eq!(map.state(), MapState::Synching);
    }

    #[test]
    fn test_scan_of_unseeded_map_is_inert() {
        let db: Arc<MemoryDatabase<Node>> = Arc::new(MemoryDatabase::new());
        let cache = Arc::new(FullBelowCache::new());
        let mut map = Map::new(db, cache, 1);

        assert!(map.get_missing_nodes(100, None).is_empty());
        assert_eq!(map.state(), MapState::Synching);
    }

    #[test]
    fn test_leaf_root_is_trivially_complete() {
        let db: Arc<MemoryDatabase<Node>> = Arc::new(MemoryDatabase::new());
        let cache = Arc::new(FullBelowCache::new());
        let mut map = Map::new(db, cache, 1);

        let leaf = make_leaf(&[3]);
        let bytes = encode_node(&leaf, SerialFormat::Wire).unwrap();
        assert_eq!(
            map.add_root_node(&leaf.hash(), &bytes, SerialFormat::Wire, None),
            AddResult::Useful
        );
        // Seeding with a leaf already cleared synching.
        assert_eq!(map.state(), MapState::Valid);

        assert!(map.get_missing_nodes(100, None).is_empty());
        assert_eq!(map.state(), MapState::Valid);
    }

    #[test]
    fn test_deferred_reads_drain_in_bounded_waits() {
        // Sixteen leaves under the root, half of them slow.
        let leaves: Vec<Arc<Node>> = (0..16).map(|i| make_leaf(&[i as u8])).collect();
        let root = Arc::new(Node::Inner(InnerNode::from_branches(
            leaves.iter().map(Arc::clone).enumerate(),
        )));

        let db = Arc::new(MemoryDatabase::with_async_batch(4));
        db.insert(root.hash(), Arc::clone(&root));
        for leaf in &leaves {
            db.insert(leaf.hash(), Arc::clone(leaf));
        }
        for leaf in leaves.iter().take(8) {
            db.mark_slow(leaf.hash());
        }

        let mut map = make_synching_map(Arc::clone(&db), &root);
        let missing = map.get_missing_nodes(100, None);
        assert!(missing.is_empty());
        assert_eq!(map.state(), MapState::Valid);
        // ceil(8 / 4) + 1 drains at most.
        assert!(db.wait_call_count() >= 1);
        assert!(db.wait_call_count() <= 3);
    }

    #[test]
    fn test_deferred_miss_is_reported_after_drain() {
        let (root, nodes) = make_source();
        let db = Arc::new(MemoryDatabase::new());
        store_all(&db, &nodes);
        let (missing_id, missing_node) = nodes[4].clone();
        let _ = db.remove(&missing_node.hash());
        // The hole answers Pending first, then resolves to a miss.
        db.mark_slow(missing_node.hash());

        let mut map = make_synching_map(Arc::clone(&db), &root);
        let missing = map.get_missing_nodes(100, None);
        assert_eq!(missing, vec![(missing_id, missing_node.hash())]);
        assert_eq!(db.wait_call_count(), 1);
        assert_eq!(map.state(), MapState::Synching);
    }

    #[test]
    fn test_graft_in_scan_order_then_duplicate() {
        let (root, nodes) = make_source();
        let db: Arc<MemoryDatabase<Node>> = Arc::new(MemoryDatabase::new());
        let mut map = make_synching_map(db, &root);

        for (id, node) in nodes.iter().skip(1) {
            let bytes = encode_node(node, SerialFormat::Wire).unwrap();
            assert_eq!(map.add_known_node(id, &bytes, None), AddResult::Useful);
        }

        // Feeding any of them again is harmless.
        let (id, node) = &nodes[2];
        let bytes = encode_node(node, SerialFormat::Wire).unwrap();
        assert_eq!(map.add_known_node(id, &bytes, None), AddResult::Duplicate);

        assert!(map.get_missing_nodes(100, None).is_empty());
        assert_eq!(map.state(), MapState::Valid);
    }

    #[test]
    fn test_needed_hashes_projects_missing_nodes() {
        let (root, nodes) = make_source();
        let db = Arc::new(MemoryDatabase::new());
        store_all(&db, &nodes);
        let _ = db.remove(&nodes[3].1.hash());

        let mut map = make_synching_map(db, &root);
        assert_eq!(map.get_needed_hashes(100, None), vec![nodes[3].1.hash()]);
    }

    #[test]
    fn test_root_node_duplicate_and_conflict() {
        let (root, _) = make_source();
        let db: Arc<MemoryDatabase<Node>> = Arc::new(MemoryDatabase::new());
        let mut map = make_synching_map(db, &root);

        let bytes = encode_node(&root, SerialFormat::Wire).unwrap();
        assert_eq!(
            map.add_root_node(&root.hash(), &bytes, SerialFormat::Wire, None),
            AddResult::Duplicate
        );

        let other = Hash::from_bytes(b"some other root");
        assert_eq!(
            map.add_root_node(&other, &bytes, SerialFormat::Wire, None),
            AddResult::Invalid
        );
    }

    #[test]
    fn test_root_node_rejects_wrong_hash() {
        let (root, _) = make_source();
        let db: Arc<MemoryDatabase<Node>> = Arc::new(MemoryDatabase::new());
        let cache = Arc::new(FullBelowCache::new());
        let mut map = Map::new(db, cache, 1);

        let bytes = encode_node(&root, SerialFormat::Wire).unwrap();
        let wrong = Hash::from_bytes(b"expected something else");
        assert_eq!(
            map.add_root_node(&wrong, &bytes, SerialFormat::Wire, None),
            AddResult::Invalid
        );
        assert!(map.root_hash().is_zero());
    }

    #[test]
    fn test_corrupt_node_is_rejected_without_poisoning() {
        let (root, nodes) = make_source();
        let db: Arc<MemoryDatabase<Node>> = Arc::new(MemoryDatabase::new());
        let mut map = make_synching_map(db, &root);

        // Bytes decode fine but hash to something other than the branch
        // demands.
        let (inner_id, _) = &nodes[1];
        let imposter = encode_node(&nodes[4].1, SerialFormat::Wire).unwrap();
        assert_eq!(
            map.add_known_node(inner_id, &imposter, None),
            AddResult::Invalid
        );
        assert_eq!(map.state(), MapState::Synching);

        // Garbage bytes are likewise rejected.
        assert_eq!(
            map.add_known_node(inner_id, b"garbage", None),
            AddResult::Invalid
        );
        assert_eq!(map.state(), MapState::Synching);
    }

    #[test]
    fn test_out_of_bounds_node_proves_map_invalid() {
        // Keyed tree whose child claims an impossible depth; the hashes all
        // agree, so only the bounds check can catch it.
        let leaf = make_leaf(&[0, 0]);
        let bogus = Arc::new(Node::Inner(InnerNode::keyed_from_hashes(
            NodeId::new(200, Key::ZERO),
            {
                let mut hashes = [Hash::ZERO; 16];
                hashes[0] = leaf.hash();
                hashes
            },
        )));
        let root = Arc::new(Node::Inner(InnerNode::keyed_from_branches(
            NodeId::ROOT,
            [(0, Arc::clone(&bogus))],
        )));

        let db: Arc<MemoryDatabase<Node>> = Arc::new(MemoryDatabase::new());
        let cache = Arc::new(FullBelowCache::new());
        let mut map = Map::new(db, cache, 1).with_format(MapFormat::Keyed);
        let root_bytes = encode_node(&root, SerialFormat::Wire).unwrap();
        assert_eq!(
            map.add_root_node(&root.hash(), &root_bytes, SerialFormat::Wire, None),
            AddResult::Useful
        );

        let target = NodeId::ROOT.child(0);
        let bytes = encode_node(&bogus, SerialFormat::Wire).unwrap();
        assert_eq!(map.add_known_node(&target, &bytes, None), AddResult::Useful);
        assert_eq!(map.state(), MapState::Invalid);

        // Invalid is sticky; later offers bounce off as duplicates.
        assert_eq!(
            map.add_known_node(&target, &bytes, None),
            AddResult::Duplicate
        );
        assert_eq!(map.state(), MapState::Invalid);
    }

    #[test]
    fn test_misrouted_node_is_discarded_but_useful() {
        let (root, nodes) = make_source();
        let db: Arc<MemoryDatabase<Node>> = Arc::new(MemoryDatabase::new());
        let mut map = make_synching_map(db, &root);

        // Correct bytes for the depth-1 inner node, claimed two levels
        // down. The walk stops at depth 1, so the position cannot match.
        let (inner_id, inner_node) = &nodes[1];
        let bytes = encode_node(inner_node, SerialFormat::Wire).unwrap();
        let misrouted = inner_id.child(2);
        assert_eq!(
            map.add_known_node(&misrouted, &bytes, None),
            AddResult::Useful
        );
        // The peer may just be out of sync; the map survives.
        assert_eq!(map.state(), MapState::Synching);
    }

    #[test]
    fn test_add_known_node_when_not_synching() {
        let (root, nodes) = make_source();
        let db = Arc::new(MemoryDatabase::new());
        store_all(&db, &nodes);
        let cache = Arc::new(FullBelowCache::new());
        let mut map = Map::from_root(db, cache, 1, root);
        assert!(!map.is_synching());

        let (id, node) = &nodes[1];
        let bytes = encode_node(node, SerialFormat::Wire).unwrap();
        assert_eq!(map.add_known_node(id, &bytes, None), AddResult::Duplicate);
    }
}
