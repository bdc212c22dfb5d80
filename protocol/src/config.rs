//! # Protocol Configuration & Constants
//!
//! Every magic number in VERA lives here. If you're hardcoding a constant
//! somewhere else, you're doing it wrong and you owe the team coffee.
//!
//! Several of these values are load-bearing for interoperability: the key
//! schemas and the height padding width are part of the on-disk contract,
//! and the genesis preimage is part of every chain's identity. Changing
//! them invalidates existing deployments.

use std::time::Duration;

// ---------------------------------------------------------------------------
// Persistence Schema
// ---------------------------------------------------------------------------

/// Key prefix for version records in the ADS database:
/// `ver:{user_key}:{valid_from_20digit}`.
pub const VERSION_KEY_PREFIX: &str = "ver:";

/// Key prefix for block records in the chain database:
/// `block:{height_20digit}`.
pub const BLOCK_KEY_PREFIX: &str = "block:";

/// Width of the zero-padded decimal height in persisted keys. 20 digits
/// covers the full i64 range, so lexical order always matches numeric order.
pub const HEIGHT_PAD_WIDTH: usize = 20;

/// Reserved key that seeds an otherwise-empty ADS database. Never appears
/// in the Merkle tree and is skipped when rebuilding the in-memory map.
pub const GENESIS_MARKER_KEY: &str = "__genesis__";

// ---------------------------------------------------------------------------
// Chain Identity
// ---------------------------------------------------------------------------

/// Preimage of the genesis block's content/data/rw hashes.
pub const GENESIS_CONTENT: &[u8] = b"genesis";

/// Initiator id recorded in the genesis header. Not a validator; genesis
/// carries no signatures.
pub const GENESIS_INITIATOR: &[u8] = b"system";

/// Height of the genesis block. Heights are 1-origin.
pub const GENESIS_HEIGHT: i64 = 1;

// ---------------------------------------------------------------------------
// Version Intervals
// ---------------------------------------------------------------------------

/// Sentinel `valid_to` for the still-current version of a key: `2^63 - 1`.
pub const OPEN_INTERVAL: i64 = i64::MAX;

// ---------------------------------------------------------------------------
// Consensus Timing
// ---------------------------------------------------------------------------

/// How long a replica waits in pre-prepare before starting a view change.
pub const VIEW_CHANGE_TIMEOUT: Duration = Duration::from_secs(2);

/// Per-request timeout for outbound peer RPC. Failures are logged and
/// retried on the next sync tick, never awaited on the inbound path.
pub const PEER_RPC_TIMEOUT: Duration = Duration::from_secs(2);

/// Interval of the background chain-pull loop.
pub const SYNC_INTERVAL: Duration = Duration::from_secs(2);

// ---------------------------------------------------------------------------
// Signing Domains
// ---------------------------------------------------------------------------

/// Domain tag mixed into view-change vote signatures so they can never be
/// confused with header signatures over the same bytes.
pub const VIEW_CHANGE_DOMAIN: &[u8] = b"vera:view_change:";

/// Domain tag for new-view announcement signatures.
pub const NEW_VIEW_DOMAIN: &[u8] = b"vera:new_view:";

// ---------------------------------------------------------------------------
// Defaults for the node binary
// ---------------------------------------------------------------------------

/// Default HTTP port for a node when `--port` is not given.
pub const DEFAULT_PORT: u16 = 7851;

/// Default Prometheus metrics port.
pub const DEFAULT_METRICS_PORT: u16 = 7852;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn padded_heights_sort_lexically() {
        let a = format!("{:0>width$}", 9, width = HEIGHT_PAD_WIDTH);
        let b = format!("{:0>width$}", 10, width = HEIGHT_PAD_WIDTH);
        let c = format!("{:0>width$}", 100, width = HEIGHT_PAD_WIDTH);
        assert!(a < b);
        assert!(b < c);
    }

    #[test]
    fn open_interval_is_i64_max() {
        assert_eq!(OPEN_INTERVAL, (1i64 << 62) - 1 + (1i64 << 62));
    }
}
