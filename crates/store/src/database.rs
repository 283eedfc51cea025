//! The node-storage contract.

use merklemap_types::Hash;
use std::sync::Arc;

/// Outcome of a non-blocking prefetch.
#[derive(Debug)]
pub enum Prefetch<N> {
    /// The node was already available.
    Hit(Arc<N>),
    /// An asynchronous read is now outstanding; call
    /// [`Database::wait_reads`] before retrying.
    Pending,
    /// The store does not have this node.
    Miss,
}

/// Storage backend for tree nodes, keyed by content hash.
///
/// Implementations are shared process-wide and must be thread-safe; every
/// method is atomic from the caller's perspective. The associated `Node`
/// type keeps this crate independent of the node model that sits above it.
pub trait Database: Send + Sync {
    /// The decoded node type stored by this backend.
    type Node: Send + Sync;

    /// Synchronous load. Blocks on backend latency.
    fn fetch(&self, hash: &Hash) -> Option<Arc<Self::Node>>;

    /// Non-blocking load. A [`Prefetch::Pending`] result registers an
    /// outstanding read that [`Database::wait_reads`] completes.
    fn prefetch(&self, hash: &Hash) -> Prefetch<Self::Node>;

    /// Block until every outstanding prefetch has finished.
    fn wait_reads(&self);

    /// Recommended number of in-flight prefetches before draining.
    fn desired_async_batch(&self) -> usize;

    /// Register `node` as the canonical instance for `hash`, returning the
    /// canonical instance (which may be a pre-existing one). Linearizable
    /// per hash: racing callers agree on the winner.
    fn canonicalize(&self, hash: &Hash, node: Arc<Self::Node>) -> Arc<Self::Node>;
}
