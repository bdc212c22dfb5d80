// Copyright (c) 2026 ALAS Technology. MIT License.
// See LICENSE for details.

//! # VERA Replica Node
//!
//! Entry point for the `vera-node` binary. Parses CLI arguments,
//! initializes logging and metrics, opens the persistent stores, wires
//! the replica to the ledger and HTTP transport, and serves the API.
//!
//! Subcommands:
//!
//! - `run`     — start the replica
//! - `keygen`  — generate a validator keypair
//! - `version` — print build version information
//!
//! Startup failures — missing environment, bad key material, a store
//! that will not open — exit nonzero before the listener binds. Once
//! serving, the process runs until killed and only logs.

mod api;
mod cli;
mod logging;
mod metrics;

use anyhow::{Context, Result};
use clap::Parser;
use std::sync::Arc;
use tokio::signal;

use vera_ledger::ServiceLedger;
use vera_protocol::ads::store::VersionStore;
use vera_protocol::crypto::keys::VeraKeypair;
use vera_protocol::network::node::{Node, NodeConfig};
use vera_protocol::network::rpc::HttpTransport;
use vera_protocol::network::sync::run_sync_loop;
use vera_protocol::storage::chain::BlockLog;
use vera_protocol::storage::db::StoreDb;

use cli::{Commands, VeraNodeCli};
use logging::LogFormat;
use metrics::NodeMetrics;

/// Fee credited to a replica per served read / accepted write.
const SERVICE_FEE: u64 = 1;

/// Fee credited for a successfully answered audit challenge.
const AUDIT_FEE: u64 = 5;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = VeraNodeCli::parse();

    match cli.command {
        Commands::Run(args) => run_node(args).await,
        Commands::Keygen => {
            keygen();
            Ok(())
        }
        Commands::Version => {
            println!("vera-node {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}

// ---------------------------------------------------------------------------
// run — Replica startup sequence
// ---------------------------------------------------------------------------

/// Starts the replica: persistent stores, ledger, node aggregate, sync
/// loop, API server, metrics server.
///
/// Startup sequence:
/// 1. Initialize logging
/// 2. Load key material
/// 3. Parse peer table and validator set
/// 4. Open the stores (skipped in client mode)
/// 5. Create the ledger
/// 6. Create the node aggregate
/// 7. Spawn the sync loop
/// 8. Bind and serve API + metrics
/// 9. Await shutdown, then stop the sync loop
async fn run_node(args: cli::RunArgs) -> Result<()> {
    // --- 1. Logging ---
    let log_filter = format!(
        "vera_node={level},vera_protocol={level},vera_ledger={level},tower_http=warn",
        level = args.log_level
    );
    logging::init_logging(&log_filter, LogFormat::from_str_lossy(&args.log_format));

    tracing::info!(
        id = %args.id,
        port = args.port,
        metrics_port = args.metrics_port,
        client_mode = args.is_client_mode(),
        "starting vera-node"
    );

    // --- 2. Key material ---
    let keypair = VeraKeypair::from_hex(&args.key).context("invalid VERA_KEY material")?;
    tracing::info!(public_key = %keypair.public_key_hex(), "keypair loaded");

    // --- 3. Topology ---
    let peers = cli::parse_peer_specs(&args.peers)?;
    let validators = cli::parse_validator_specs(&args.validators)?;
    if validators.contains(&args.id) {
        let registered = validators
            .key_of(&args.id)
            .expect("contains() checked")
            .to_hex();
        anyhow::ensure!(
            registered == keypair.public_key_hex(),
            "validator entry for {} does not match our public key",
            args.id
        );
    }

    // --- 4. Stores ---
    let log = if args.is_client_mode() {
        tracing::info!("client mode: persistent stores not opened");
        BlockLog::in_memory(VersionStore::in_memory())
    } else {
        let ads_path = args
            .ads_path
            .clone()
            .context("ADS_PATH is required unless MODE=client")?;
        let blk_path = args
            .blk_path
            .clone()
            .context("BLK_PATH is required unless MODE=client")?;

        let ads_db = StoreDb::open(&ads_path)
            .with_context(|| format!("cannot open ADS store at {}", ads_path.display()))?;
        let store = VersionStore::open(ads_db).context("cannot load version store")?;

        let blk_db = StoreDb::open(&blk_path)
            .with_context(|| format!("cannot open chain store at {}", blk_path.display()))?;
        BlockLog::open(blk_db, store).context("cannot load block log")?
    };
    tracing::info!(chain_len = log.len()?, "stores ready");

    // --- 5. Ledger ---
    let ledger = Arc::new(ServiceLedger::new(SERVICE_FEE, AUDIT_FEE));

    // --- 6. Node aggregate ---
    let node = Node::new(NodeConfig {
        id: args.id.clone(),
        keypair,
        peers,
        validators,
        log,
        transport: Arc::new(HttpTransport::new()),
        hook: ledger.clone(),
    });

    // --- 7. Sync loop ---
    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    let sync_handle = tokio::spawn(run_sync_loop(Arc::clone(&node), shutdown_rx));

    // --- 8. Servers ---
    let node_metrics = Arc::new(NodeMetrics::new());
    let app_state = api::AppState {
        node: Arc::clone(&node),
        ledger,
        metrics: Arc::clone(&node_metrics),
        version: env!("CARGO_PKG_VERSION").to_string(),
    };

    let api_router = api::create_router(app_state);
    let api_addr = format!("0.0.0.0:{}", args.port);
    let api_listener = tokio::net::TcpListener::bind(&api_addr)
        .await
        .with_context(|| format!("failed to bind API listener on {api_addr}"))?;
    tracing::info!("API server listening on {api_addr}");

    let metrics_router = axum::Router::new()
        .route("/metrics", axum::routing::get(metrics::metrics_handler))
        .with_state(node_metrics);
    let metrics_addr = format!("0.0.0.0:{}", args.metrics_port);
    let metrics_listener = tokio::net::TcpListener::bind(&metrics_addr)
        .await
        .with_context(|| format!("failed to bind metrics listener on {metrics_addr}"))?;
    tracing::info!("metrics server listening on {metrics_addr}");

    tracing::info!(
        id = %node.id,
        validator = node.is_validator(),
        peers = node.peers().len(),
        "replica up"
    );

    // --- 9. Serve until shutdown ---
    tokio::select! {
        res = axum::serve(api_listener, api_router) => {
            if let Err(e) = res {
                tracing::error!("API server error: {e}");
            }
        }
        res = axum::serve(metrics_listener, metrics_router) => {
            if let Err(e) = res {
                tracing::error!("metrics server error: {e}");
            }
        }
        _ = shutdown_signal() => {
            tracing::info!("shutdown signal received");
        }
    }

    let _ = shutdown_tx.send(true);
    let _ = sync_handle.await;
    tracing::info!("vera-node stopped");
    Ok(())
}

// ---------------------------------------------------------------------------
// keygen
// ---------------------------------------------------------------------------

/// Generate a fresh keypair and print both halves as hex. The secret
/// line is what goes into `VERA_KEY`; the public line is what the other
/// operators put in their `--validator` flags.
fn keygen() {
    let keypair = VeraKeypair::generate();
    println!("secret: {}", hex::encode(keypair.to_bytes()));
    println!("public: {}", keypair.public_key_hex());
}

// ---------------------------------------------------------------------------
// Shutdown
// ---------------------------------------------------------------------------

/// Resolves when SIGINT (or SIGTERM on Unix) arrives.
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install ctrl-c handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
