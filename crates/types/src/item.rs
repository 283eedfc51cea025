//! Leaf items.

use crate::{Hash, Key};
use sbor::prelude::*;

/// Domain tag for leaf hashing.
const DOMAIN_LEAF: &[u8] = b"merklemap.leaf.v1";

/// A leaf entry: a ledger key and its opaque payload.
///
/// Items are immutable once built and shared by reference between maps that
/// hold the same leaf.
#[derive(Debug, Clone, PartialEq, Eq, BasicSbor)]
pub struct Item {
    key: Key,
    payload: Vec<u8>,
}

impl Item {
    /// Create a new item.
    pub fn new(key: Key, payload: Vec<u8>) -> Self {
        Self { key, payload }
    }

    /// The ledger key.
    pub fn key(&self) -> &Key {
        &self.key
    }

    /// The opaque payload bytes.
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Content hash committing to both key and payload.
    pub fn hash(&self) -> Hash {
        let mut hasher = blake3::Hasher::new();
        hasher.update(DOMAIN_LEAF);
        hasher.update(self.key.as_bytes());
        hasher.update(&self.payload);
        Hash::from_raw(*hasher.finalize().as_bytes())
    }
}
