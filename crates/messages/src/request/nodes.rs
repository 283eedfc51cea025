//! Node fetch request.

use crate::response::GetNodesResponse;
use merklemap_types::{Hash, NetworkMessage, NodeId, Request};
use sbor::prelude::BasicSbor;

/// Request to fetch tree nodes by position from a peer.
///
/// Built from the output of a missing-node scan: each wanted position is
/// one the requester knows it lacks. The responder expands each position
/// into a depth-bounded bundle so one round trip fills several levels.
#[derive(Debug, Clone, PartialEq, Eq, BasicSbor)]
pub struct GetNodesRequest {
    /// Root hash of the tree being synchronized. Used by the responder to
    /// pick the right snapshot and reject stale requests.
    pub root_hash: Hash,

    /// Positions being requested.
    pub wanted: Vec<NodeId>,

    /// Whether bundles should include leaf nodes.
    pub fat_leaves: bool,

    /// Fan-out depth budget for each bundle.
    pub depth: u32,
}

impl GetNodesRequest {
    /// Create a new node fetch request.
    pub fn new(root_hash: Hash, wanted: Vec<NodeId>, fat_leaves: bool, depth: u32) -> Self {
        Self {
            root_hash,
            wanted,
            fat_leaves,
            depth,
        }
    }

    /// Build a request from a missing-node scan, discarding the hashes
    /// (the responder re-derives them; the requester revalidates on graft).
    pub fn from_missing(
        root_hash: Hash,
        missing: impl IntoIterator<Item = (NodeId, Hash)>,
        fat_leaves: bool,
        depth: u32,
    ) -> Self {
        Self::new(
            root_hash,
            missing.into_iter().map(|(id, _)| id).collect(),
            fat_leaves,
            depth,
        )
    }

    /// Get the number of positions being requested.
    pub fn count(&self) -> usize {
        self.wanted.len()
    }
}

impl NetworkMessage for GetNodesRequest {
    fn message_type_id() -> &'static str {
        "nodes.request"
    }
}

/// Type-safe request/response pairing.
impl Request for GetNodesRequest {
    type Response = GetNodesResponse;
}

#[cfg(test)]
mod tests {
    use super::*;
    use merklemap_types::Key;

    #[test]
    fn test_get_nodes_request() {
        let root_hash = Hash::from_bytes(b"root");
        let wanted = vec![NodeId::ROOT.child(2), NodeId::ROOT.child(7)];

        let request = GetNodesRequest::new(root_hash, wanted.clone(), true, 2);
        assert_eq!(request.root_hash, root_hash);
        assert_eq!(request.wanted, wanted);
        assert_eq!(request.count(), 2);
    }

    #[test]
    fn test_from_missing_drops_hashes() {
        let root_hash = Hash::from_bytes(b"root");
        let missing = vec![
            (NodeId::ROOT.child(1), Hash::from_bytes(b"a")),
            (NodeId::new(2, Key::ZERO), Hash::from_bytes(b"b")),
        ];

        let request = GetNodesRequest::from_missing(root_hash, missing, false, 1);
        assert_eq!(request.count(), 2);
        assert!(!request.fat_leaves);
    }
}
