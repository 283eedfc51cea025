//! Generation-tagged memo of fully resident subtrees.

use merklemap_types::Hash;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};

/// Process-wide set of node hashes whose entire subtree is known to be
/// resident locally.
///
/// Entries are tagged with the generation current at insert time. Bumping
/// the generation invalidates every prior entry without touching the map:
/// [`FullBelowCache::touch_if_exists`] only honors entries from the current
/// generation. Stale entries are dropped lazily when touched.
///
/// A false miss costs a redundant descent; a false hit would skip truly
/// missing data, so membership is only reported for the current generation.
#[derive(Debug)]
pub struct FullBelowCache {
    generation: AtomicU32,
    entries: Mutex<HashMap<Hash, u32>>,
}

impl Default for FullBelowCache {
    fn default() -> Self {
        Self::new()
    }
}

impl FullBelowCache {
    /// Create an empty cache. Generations start at 1: a node's zero tag
    /// always reads as "not proven".
    pub fn new() -> Self {
        Self {
            generation: AtomicU32::new(1),
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// The current generation.
    pub fn generation(&self) -> u32 {
        self.generation.load(Ordering::Acquire)
    }

    /// Invalidate every existing entry. Called on external events such as
    /// ledger close; never from inside the sync core.
    pub fn bump_generation(&self) -> u32 {
        self.generation.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// Record `hash` as fully resident in the current generation.
    pub fn insert(&self, hash: Hash) {
        let generation = self.generation();
        self.entries.lock().insert(hash, generation);
    }

    /// Whether `hash` is a current-generation member. Entries from older
    /// generations are evicted on the way out.
    pub fn touch_if_exists(&self, hash: &Hash) -> bool {
        let generation = self.generation();
        let mut entries = self.entries.lock();
        match entries.get(hash) {
            Some(&tagged) if tagged == generation => true,
            Some(_) => {
                let _ = entries.remove(hash);
                false
            }
            None => false,
        }
    }

    /// Number of tracked entries, current generation or not.
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Whether the cache tracks no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}
