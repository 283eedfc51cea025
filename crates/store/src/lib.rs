//! Backing-store adapter for the merklemap state tree.
//!
//! The sync core never talks to a database directly; it goes through the
//! [`Database`] trait, which covers synchronous fetch, non-blocking prefetch
//! with a single bulk [`Database::wait_reads`] barrier, and per-hash
//! canonicalization of node instances. [`FullBelowCache`] is the shared,
//! generation-tagged memo of subtree roots proven fully resident.
//!
//! [`MemoryDatabase`] is an in-process backend used by tests and
//! simulations; it can mark individual hashes as slow so the deferred-read
//! path is exercisable deterministically.

mod database;
mod filter;
mod fullbelow;
mod memory;

pub use database::{Database, Prefetch};
pub use filter::SyncFilter;
pub use fullbelow::FullBelowCache;
pub use memory::MemoryDatabase;
