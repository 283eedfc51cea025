//! Fetch pack request.

use crate::response::FetchPackResponse;
use merklemap_types::{Hash, NetworkMessage, Request};
use sbor::prelude::BasicSbor;

/// Request for the set of nodes the requester lacks relative to a snapshot
/// it already holds.
#[derive(Debug, Clone, PartialEq, Eq, BasicSbor)]
pub struct GetFetchPackRequest {
    /// Root hash of the tree the requester wants.
    pub root_hash: Hash,

    /// Root hash of the snapshot the requester already has, if any. The
    /// responder diffs against this to avoid resending shared structure.
    pub have_root: Option<Hash>,

    /// Whether leaf nodes should be included.
    pub include_leaves: bool,

    /// Maximum number of nodes to return.
    pub max: u32,
}

impl GetFetchPackRequest {
    /// Create a new fetch pack request.
    pub fn new(root_hash: Hash, have_root: Option<Hash>, include_leaves: bool, max: u32) -> Self {
        Self {
            root_hash,
            have_root,
            include_leaves,
            max,
        }
    }
}

impl NetworkMessage for GetFetchPackRequest {
    fn message_type_id() -> &'static str {
        "fetch_pack.request"
    }
}

/// Type-safe request/response pairing.
impl Request for GetFetchPackRequest {
    type Response = FetchPackResponse;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_fetch_pack_request() {
        let request = GetFetchPackRequest::new(
            Hash::from_bytes(b"root"),
            Some(Hash::from_bytes(b"have")),
            true,
            512,
        );
        assert_eq!(request.max, 512);
        assert!(request.have_root.is_some());
    }
}
