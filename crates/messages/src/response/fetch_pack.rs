//! Fetch pack response.

use merklemap_types::{Hash, NetworkMessage};
use sbor::prelude::BasicSbor;

/// One canonically encoded node in a fetch pack.
#[derive(Debug, Clone, PartialEq, Eq, BasicSbor)]
pub struct FetchPackEntry {
    /// The node's content hash.
    pub hash: Hash,

    /// Canonical (storage-form) node bytes.
    pub bytes: Vec<u8>,
}

impl FetchPackEntry {
    /// Create a new entry.
    pub fn new(hash: Hash, bytes: Vec<u8>) -> Self {
        Self { hash, bytes }
    }
}

/// Response carrying the difference set for a [`GetFetchPackRequest`].
///
/// An empty response is valid: the requester's snapshot already covered
/// everything, or the responder could not serve the request (for example
/// across map formats).
///
/// [`GetFetchPackRequest`]: crate::request::GetFetchPackRequest
#[derive(Debug, Clone, PartialEq, Eq, BasicSbor)]
pub struct FetchPackResponse {
    /// The encoded difference nodes.
    pub entries: Vec<FetchPackEntry>,
}

impl FetchPackResponse {
    /// Create a new response.
    pub fn new(entries: Vec<FetchPackEntry>) -> Self {
        Self { entries }
    }

    /// Get the number of entries carried.
    pub fn count(&self) -> usize {
        self.entries.len()
    }
}

impl NetworkMessage for FetchPackResponse {
    fn message_type_id() -> &'static str {
        "fetch_pack.response"
    }
}
