//! # Cryptographic Primitives
//!
//! Hashing and validator identities. VERA deliberately uses a minimal
//! toolbox: SHA-256 for every digest in the proof and chain formats, and
//! Ed25519 for validator signatures.
//!
//! ## Why SHA-256 and nothing faster?
//!
//! The Merkle roots and header digests produced here must be recomputable
//! by independent verifiers in any language — a light client in a browser,
//! an auditor's script, a test harness. SHA-256 is the one hash function
//! with a battle-tested implementation everywhere, and the framing rules
//! (byte-level concatenation, no delimiters) are trivial to port. Speed
//! on the replica is not the bottleneck; agreement is.

pub mod hash;
pub mod keys;

pub use hash::{leaf_hash, node_hash, sha256, sha256_hex};
pub use keys::{KeyError, VeraKeypair, VeraPublicKey, VeraSignature};
