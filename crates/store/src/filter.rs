//! Alternate node sources for sync operations.

use merklemap_types::{Hash, NodeKind};
use std::sync::Arc;

/// Per-call hook offering alternate node sources and observing every
/// successful graft.
///
/// A filter typically fronts a short-lived cache of nodes received from
/// peers but not yet written to the permanent store.
pub trait SyncFilter: Send + Sync {
    /// The decoded node type, matching the map's `Database::Node`.
    type Node: Send + Sync;

    /// Try to produce a node from an alternate source. Returns the canonical
    /// encoded bytes alongside the decoded node.
    fn try_fetch(&self, hash: &Hash) -> Option<(Vec<u8>, Arc<Self::Node>)>;

    /// Called once for every node successfully installed into the map.
    /// `from_ack` distinguishes nodes that arrived in response to our own
    /// requests from unsolicited ones.
    fn got_node(&self, from_ack: bool, hash: &Hash, bytes: Vec<u8>, kind: NodeKind);
}
