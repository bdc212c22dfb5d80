//! # Chain Sync Loop
//!
//! The liveness backstop. Consensus multicasts are best-effort, so a
//! replica that missed a commit — it was down, a send timed out, it sat
//! out a view change — catches up here: a periodic tick pulls the full
//! chain from every peer and adopts the longest one that validates and
//! re-executes cleanly. Shorter or invalid chains are never accepted, so
//! the loop can only move a replica forward.
//!
//! Failures are logged at debug level and retried on the next tick;
//! a flaky peer costs nothing but noise.

use std::sync::Arc;

use tokio::sync::watch;
use tracing::{debug, info};

use crate::config::SYNC_INTERVAL;
use crate::network::node::Node;

/// Run the periodic chain pull until the shutdown signal flips.
///
/// Spawned once per replica by the node binary:
///
/// ```ignore
/// tokio::spawn(run_sync_loop(Arc::clone(&node), shutdown_rx));
/// ```
pub async fn run_sync_loop(node: Arc<Node>, mut shutdown: watch::Receiver<bool>) {
    let mut ticker = tokio::time::interval(SYNC_INTERVAL);
    // A missed tick (slow peer round) should not cause a burst of
    // catch-up rounds afterwards.
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    info!(id = %node.id, interval = ?SYNC_INTERVAL, "sync loop started");
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                node.sync_round().await;
            }
            result = shutdown.changed() => {
                if result.is_err() || *shutdown.borrow() {
                    break;
                }
            }
        }
    }
    debug!(id = %node.id, "sync loop stopped");
}
