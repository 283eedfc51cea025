//! Node fetch response.

use merklemap_types::{Hash, NetworkMessage, NodeId};
use sbor::prelude::BasicSbor;

/// One encoded node positioned in the tree.
#[derive(Debug, Clone, PartialEq, Eq, BasicSbor)]
pub struct NodeEnvelope {
    /// The node's position.
    pub id: NodeId,

    /// Wire-encoded node bytes.
    pub bytes: Vec<u8>,
}

impl NodeEnvelope {
    /// Create a new envelope.
    pub fn new(id: NodeId, bytes: Vec<u8>) -> Self {
        Self { id, bytes }
    }
}

/// Response carrying the bundles for a [`GetNodesRequest`].
///
/// Envelopes arrive in bundle order (each wanted node followed by its
/// descendants), which is also a valid grafting order for the requester.
///
/// [`GetNodesRequest`]: crate::request::GetNodesRequest
#[derive(Debug, Clone, PartialEq, Eq, BasicSbor)]
pub struct GetNodesResponse {
    /// Root hash of the tree these nodes belong to.
    pub root_hash: Hash,

    /// The encoded nodes.
    pub nodes: Vec<NodeEnvelope>,
}

impl GetNodesResponse {
    /// Create a new response.
    pub fn new(root_hash: Hash, nodes: Vec<NodeEnvelope>) -> Self {
        Self { root_hash, nodes }
    }

    /// Build a response from parallel id/bytes lists, as produced by the
    /// map's fat-node bundler.
    pub fn from_bundle(root_hash: Hash, ids: Vec<NodeId>, raw_nodes: Vec<Vec<u8>>) -> Self {
        let nodes = ids
            .into_iter()
            .zip(raw_nodes)
            .map(|(id, bytes)| NodeEnvelope::new(id, bytes))
            .collect();
        Self { root_hash, nodes }
    }

    /// Get the number of nodes carried.
    pub fn count(&self) -> usize {
        self.nodes.len()
    }
}

impl NetworkMessage for GetNodesResponse {
    fn message_type_id() -> &'static str {
        "nodes.response"
    }
}
