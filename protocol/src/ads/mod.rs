//! # Authenticated Data Structure
//!
//! The versioned key/value store and the Merkle engine that commits it.
//! This is the half of VERA that makes reads *provable*: every block
//! height has a deterministic root over the live snapshot, and any stored
//! pair can be accompanied by a compact inclusion proof against it.
//!
//! ## Architecture
//!
//! ```text
//! version.rs — one value with its [valid_from, valid_to) activity window
//! store.rs   — multi-version map, height cursor, sled persistence
//! merkle.rs  — transient level-array tree, proofs, independent verifier
//! ```
//!
//! The tree is rebuilt on demand for the height being queried; only the
//! root is durable (inside block headers). Rebuilding sounds wasteful
//! until you notice it is also the committing step — the rebuild under
//! the store lock is what serializes concurrent writers.

pub mod merkle;
pub mod store;
pub mod version;

pub use merkle::{verify_proof, MerkleTree, ProofNode};
pub use store::{AdsError, VersionStore};
pub use version::Version;
