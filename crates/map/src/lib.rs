//! Sync core of the merklemap authenticated state tree.
//!
//! A [`Map`] is a hash-authenticated 16-ary prefix tree keyed by 256-bit
//! identifiers: every node commits to its subtree, so the root hash is a
//! succinct digest of the full mapping. This crate implements the
//! replication loop that keeps such trees identical across peers:
//!
//! - **Discover**: [`Map::get_missing_nodes`] walks a partially
//!   materialized tree and reports which nodes must be requested.
//! - **Graft**: [`Map::add_root_node`] / [`Map::add_known_node`] validate
//!   incoming nodes and install them without ever breaking the hash
//!   invariants.
//! - **Serve**: [`Map::get_node_fat`] and [`Map::get_fetch_pack`] answer
//!   the same requests for peers, individually or as differences against a
//!   snapshot the peer already holds.
//! - **Traverse**: [`Map::visit_nodes`] / [`Map::visit_leaves`] /
//!   [`Map::deep_compare`] for introspection and comparison.
//!
//! # Architecture
//!
//! ```text
//! Peer A (complete)                         Peer B (synching)
//!      │                                          │
//!      │◄── GetNodes(get_missing_nodes output) ───┤
//!      ├── get_node_fat bundles ──────────────────►│
//!      │                              add_known_node
//!      │                                          │ …repeat until
//!      │                                          │ get_missing_nodes = []
//!      │                                          ▼
//!      │                                  state: Valid
//! ```
//!
//! The map performs no network I/O and no blocking reads except the single
//! `wait_reads` barrier per scanner iteration; storage and alternate node
//! sources are abstracted behind `merklemap_store`'s [`Database`] and
//! [`SyncFilter`] traits.
//!
//! [`Database`]: merklemap_store::Database
//! [`SyncFilter`]: merklemap_store::SyncFilter

mod codec;
mod error;
mod map;
mod node;
mod serve;
mod sync;
mod traverse;

pub use codec::{decode_node, encode_node, CodecError, SerialFormat};
pub use error::MapError;
pub use map::{Map, MapFormat, MapState, MapSyncFilter, SharedDatabase};
pub use node::{InnerNode, LeafNode, Node};
pub use sync::AddResult;
