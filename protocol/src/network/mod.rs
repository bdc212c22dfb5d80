//! # Network Module
//!
//! The replication layer: Byzantine agreement over block proposals, the
//! replica aggregate that drives it, the outbound transport seam, and
//! the catch-up sync loop.
//!
//! ## Architecture
//!
//! ```text
//! consensus.rs — three-phase agreement state machine, view changes
//! node.rs      — replica aggregate: log + engine + peers + hooks
//! rpc.rs       — PeerTransport trait, reqwest implementation
//! sync.rs      — periodic chain pull (liveness backstop)
//! ```
//!
//! ## Design Decisions
//!
//! - The consensus engine is a pure state machine; the node owns all
//!   I/O. Agreement logic gets unit tests with zero sockets, and the
//!   same node code runs over HTTP in production and over an in-process
//!   loopback in the integration suite.
//! - Outbound messages are fire-and-forget spawned tasks with per-call
//!   timeouts. The inbound handler path never blocks on a peer; the sync
//!   loop repairs anything a lost message left behind.
//! - Votes are identified by validator id and checked against registered
//!   public keys. Transport addresses authenticate nothing.

pub mod consensus;
pub mod node;
pub mod rpc;
pub mod sync;

pub use consensus::{
    verify_committed_header, ConsensusEngine, ConsensusError, NewView, PhaseVote, PrePrepare,
    ValidatorSet, ViewChange,
};
pub use node::{FreeService, HookError, Node, NodeConfig, NodeError, ServiceHook};
pub use rpc::{HttpTransport, PeerTransport, QueryResponse, TransportError};
pub use sync::run_sync_loop;
