//! Map errors.

use crate::codec::CodecError;
use merklemap_types::{Hash, NodeId};
use thiserror::Error;

/// Failures surfaced by synchronous map operations.
///
/// The scanner never raises `NodeMissing`: absence is its output, not an
/// error. Serving and comparison paths, which walk the tree synchronously,
/// report a hole in the backing store through this type instead.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum MapError {
    /// A node referenced by the tree is resident nowhere.
    #[error("node {hash} missing from the backing store at {id}")]
    NodeMissing { id: NodeId, hash: Hash },

    /// A node failed to encode or decode.
    #[error(transparent)]
    Codec(#[from] CodecError),
}
