// Copyright (c) 2026 ALAS Technology. MIT License.
// See LICENSE for details.

//! # VERA Protocol — Core Library
//!
//! VERA is a replicated key/value store where every read comes back with a
//! receipt: a Merkle inclusion proof that binds the returned value to a
//! digest a quorum of validators signed into a block header. A client that
//! holds nothing but headers can verify a read without trusting the replica
//! that served it.
//!
//! ## Architecture
//!
//! The crate is split into modules that mirror the actual layers of the
//! system:
//!
//! - **crypto** — SHA-256 framing and Ed25519 validator identities.
//! - **ads** — The authenticated data structure: a multi-version key/value
//!   map and the Merkle engine that commits it at every block height.
//! - **storage** — Blocks, the hash-linked chain, and sled persistence.
//! - **network** — The three-phase consensus engine, the node aggregate,
//!   peer transport, and the chain sync loop.
//! - **light** — A header-only client that verifies reads end to end.
//! - **config** — Protocol constants. All of them.
//!
//! ## Design Philosophy
//!
//! 1. The proof format is the contract. Anything a verifier recomputes
//!    (leaf framing, canonical header bytes) is byte-exact and tested
//!    against pinned vectors.
//! 2. The protocol crate never touches a socket. Transport lives behind
//!    the [`network::rpc::PeerTransport`] trait; the node binary decides
//!    what HTTP looks like.
//! 3. If it can be re-delivered, it must be idempotent. Consensus messages,
//!    committed blocks, and operation replay all tolerate duplicates.

pub mod ads;
pub mod config;
pub mod crypto;
pub mod light;
pub mod network;
pub mod storage;
