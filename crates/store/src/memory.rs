//! In-process backend for tests and simulations.

use crate::{Database, Prefetch};
use merklemap_types::Hash;
use parking_lot::{Mutex, RwLock};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::trace;

/// An in-memory [`Database`] with deterministic asynchrony.
///
/// Nodes live in a hash map; [`MemoryDatabase::mark_slow`] designates hashes
/// whose prefetch reports [`Prefetch::Pending`] until the next
/// [`Database::wait_reads`], mimicking a backend whose reads complete in
/// batches. This makes the scanner's deferred-read path reproducible in
/// tests without threads or timers.
#[derive(Debug)]
pub struct MemoryDatabase<N> {
    nodes: RwLock<HashMap<Hash, Arc<N>>>,
    slow: Mutex<HashSet<Hash>>,
    outstanding: Mutex<HashSet<Hash>>,
    async_batch: usize,
    wait_calls: AtomicUsize,
}

impl<N> MemoryDatabase<N> {
    /// Default recommended in-flight prefetch count.
    pub const DEFAULT_ASYNC_BATCH: usize = 4;

    /// Create an empty backend with the default async batch size.
    pub fn new() -> Self {
        Self::with_async_batch(Self::DEFAULT_ASYNC_BATCH)
    }

    /// Create an empty backend with a specific async batch size.
    pub fn with_async_batch(async_batch: usize) -> Self {
        Self {
            nodes: RwLock::new(HashMap::new()),
            slow: Mutex::new(HashSet::new()),
            outstanding: Mutex::new(HashSet::new()),
            async_batch,
            wait_calls: AtomicUsize::new(0),
        }
    }

    /// Store a node directly, bypassing canonicalization.
    pub fn insert(&self, hash: Hash, node: Arc<N>) {
        let _ = self.nodes.write().insert(hash, node);
    }

    /// Drop a node, simulating data missing from the backend.
    pub fn remove(&self, hash: &Hash) -> Option<Arc<N>> {
        self.nodes.write().remove(hash)
    }

    /// Make `hash` answer prefetches with `Pending` until the next
    /// `wait_reads`.
    pub fn mark_slow(&self, hash: Hash) {
        let _ = self.slow.lock().insert(hash);
    }

    /// Whether a node for `hash` is resident.
    pub fn contains(&self, hash: &Hash) -> bool {
        self.nodes.read().contains_key(hash)
    }

    /// Number of stored nodes.
    pub fn len(&self) -> usize {
        self.nodes.read().len()
    }

    /// Whether the backend holds no nodes.
    pub fn is_empty(&self) -> bool {
        self.nodes.read().is_empty()
    }

    /// How many times `wait_reads` has been called.
    pub fn wait_call_count(&self) -> usize {
        self.wait_calls.load(Ordering::Relaxed)
    }
}

impl<N> Default for MemoryDatabase<N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<N: Send + Sync> Database for MemoryDatabase<N> {
    type Node = N;

    fn fetch(&self, hash: &Hash) -> Option<Arc<N>> {
        self.nodes.read().get(hash).cloned()
    }

    fn prefetch(&self, hash: &Hash) -> Prefetch<N> {
        if self.slow.lock().contains(hash) {
            let _ = self.outstanding.lock().insert(*hash);
            trace!(%hash, "prefetch deferred");
            return Prefetch::Pending;
        }
        match self.nodes.read().get(hash) {
            Some(node) => Prefetch::Hit(Arc::clone(node)),
            None => Prefetch::Miss,
        }
    }

    fn wait_reads(&self) {
        let _ = self.wait_calls.fetch_add(1, Ordering::Relaxed);
        let mut outstanding = self.outstanding.lock();
        let mut slow = self.slow.lock();
        for hash in outstanding.drain() {
            let _ = slow.remove(&hash);
        }
    }

    fn desired_async_batch(&self) -> usize {
        self.async_batch
    }

    fn canonicalize(&self, hash: &Hash, node: Arc<N>) -> Arc<N> {
        let mut nodes = self.nodes.write();
        Arc::clone(nodes.entry(*hash).or_insert(node))
    }
}
