//! # Storage Module
//!
//! Blocks, the hash-linked chain, and sled persistence.
//!
//! ## Architecture
//!
//! ```text
//! block.rs — Operation, BlockHeader, Block, canonical signing bytes
//! chain.rs — BlockLog: build/apply/validate/replace, block: persistence
//! db.rs    — StoreDb: one ordered byte map per database path
//! ```
//!
//! ## Data Flow
//!
//! ```text
//! Operation → Block → BlockLog → StoreDb (block:{height})
//!                └── VersionStore → StoreDb (ver:{key}:{from})
//! ```
//!
//! The block log owns the version store: building a block *is* applying
//! its operation, because the header must commit the post-state root.
//!
//! ## Design Decisions
//!
//! 1. **SHA-256 for everything.** The roots and digests here are
//!    recomputed by verifiers outside this codebase; exotic hashes would
//!    buy speed nobody needs at the cost of interop everybody needs.
//!
//! 2. **JSON on disk.** Records are small, the format doubles as the
//!    interop/debug format, and `sled` doesn't care either way.
//!
//! 3. **Reload-on-read for the chain.** The store is the single source
//!    of truth; the predictable latency of a prefix scan is cheaper than
//!    a cache-coherence bug in a consensus system.

pub mod block;
pub mod chain;
pub mod db;

pub use block::{Block, BlockHeader, Operation};
pub use chain::{BlockError, BlockLog};
pub use db::{DbError, StoreDb};
