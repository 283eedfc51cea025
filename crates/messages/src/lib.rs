//! Peer messages for tree synchronization.
//!
//! These are the wire shapes the sync core's inputs and outputs travel in:
//! a synching peer turns its missing-node list into [`GetNodesRequest`]s,
//! and a serving peer answers with the bundles produced by the map's
//! fat-node and fetch-pack operations. Transport is out of scope; any
//! host can carry these envelopes.

pub mod request;
pub mod response;

// Re-export commonly used types
pub use request::{GetFetchPackRequest, GetNodesRequest};
pub use response::{FetchPackEntry, FetchPackResponse, GetNodesResponse, NodeEnvelope};
