//! # CLI Interface
//!
//! Command-line argument structure for `vera-node`, via `clap` derive.
//! Three subcommands: `run`, `keygen`, and `version`.
//!
//! The persistence paths and the client-mode switch deliberately come
//! from the environment (`ADS_PATH`, `BLK_PATH`, `MODE`) — they describe
//! the deployment, not the invocation — while identity and topology are
//! flags.

use clap::{Parser, Subcommand};
use std::collections::BTreeMap;
use std::path::PathBuf;

use vera_protocol::config::{DEFAULT_METRICS_PORT, DEFAULT_PORT};
use vera_protocol::crypto::keys::VeraPublicKey;
use vera_protocol::network::consensus::ValidatorSet;

/// VERA replica node.
///
/// Serves proof-carrying reads, participates in block consensus when a
/// validator, and exposes Prometheus metrics.
#[derive(Parser, Debug)]
#[command(
    name = "vera-node",
    about = "VERA replica node",
    version,
    propagate_version = true
)]
pub struct VeraNodeCli {
    #[command(subcommand)]
    pub command: Commands,
}

/// Top-level subcommands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start the replica.
    Run(RunArgs),
    /// Generate a fresh validator keypair and print it as hex.
    Keygen,
    /// Print version information and exit.
    Version,
}

/// Arguments for the `run` subcommand.
#[derive(Parser, Debug)]
pub struct RunArgs {
    /// Node id. Must match this node's entry in the validator set when
    /// it is a validator.
    #[arg(long)]
    pub id: String,

    /// HTTP port for the node API.
    #[arg(long, default_value_t = DEFAULT_PORT)]
    pub port: u16,

    /// Port for the Prometheus metrics endpoint.
    #[arg(long, default_value_t = DEFAULT_METRICS_PORT)]
    pub metrics_port: u16,

    /// Hex-encoded Ed25519 secret key for this node.
    ///
    /// Prefer the environment variable over the flag — flags leak into
    /// process listings.
    #[arg(long, env = "VERA_KEY", hide_env_values = true)]
    pub key: String,

    /// Peer, as `id=host:port`. Repeatable.
    #[arg(long = "peer", value_name = "ID=ADDR")]
    pub peers: Vec<String>,

    /// Validator membership entry, as `id=hex_pubkey`. Repeatable; the
    /// full set must be identical on every replica.
    #[arg(long = "validator", value_name = "ID=PUBKEY")]
    pub validators: Vec<String>,

    /// Directory for the version-store database.
    #[arg(long, env = "ADS_PATH")]
    pub ads_path: Option<PathBuf>,

    /// Directory for the chain database.
    #[arg(long, env = "BLK_PATH")]
    pub blk_path: Option<PathBuf>,

    /// Process mode. `client` runs without opening the persistent
    /// stores.
    #[arg(long, env = "MODE")]
    pub mode: Option<String>,

    /// Default log level when RUST_LOG is unset.
    #[arg(long, default_value = "info")]
    pub log_level: String,

    /// Log output format: "pretty" or "json".
    #[arg(long, default_value = "pretty")]
    pub log_format: String,
}

impl RunArgs {
    /// Whether the process should skip opening the persistent stores.
    pub fn is_client_mode(&self) -> bool {
        self.mode.as_deref() == Some("client")
    }
}

/// Parse repeated `--peer id=host:port` flags into the peer table.
pub fn parse_peer_specs(specs: &[String]) -> anyhow::Result<BTreeMap<String, String>> {
    let mut peers = BTreeMap::new();
    for spec in specs {
        let (id, addr) = spec
            .split_once('=')
            .ok_or_else(|| anyhow::anyhow!("bad --peer {spec:?}: expected id=host:port"))?;
        if id.is_empty() || addr.is_empty() {
            anyhow::bail!("bad --peer {spec:?}: empty id or address");
        }
        peers.insert(id.to_string(), addr.to_string());
    }
    Ok(peers)
}

/// Parse repeated `--validator id=hex_pubkey` flags into the validator
/// set.
pub fn parse_validator_specs(specs: &[String]) -> anyhow::Result<ValidatorSet> {
    let mut members = Vec::with_capacity(specs.len());
    for spec in specs {
        let (id, hex_key) = spec
            .split_once('=')
            .ok_or_else(|| anyhow::anyhow!("bad --validator {spec:?}: expected id=hex_pubkey"))?;
        let key = VeraPublicKey::from_hex(hex_key)
            .map_err(|e| anyhow::anyhow!("bad --validator {spec:?}: {e}"))?;
        members.push((id.to_string(), key));
    }
    Ok(ValidatorSet::new(members))
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;
    use vera_protocol::crypto::keys::VeraKeypair;

    #[test]
    fn verify_cli_structure() {
        // Ensures the derive macros produce a valid CLI definition.
        VeraNodeCli::command().debug_assert();
    }

    #[test]
    fn peer_specs_parse() {
        let peers = parse_peer_specs(&[
            "replica-2=127.0.0.1:7861".to_string(),
            "replica-3=127.0.0.1:7871".to_string(),
        ])
        .unwrap();
        assert_eq!(peers["replica-2"], "127.0.0.1:7861");
        assert_eq!(peers.len(), 2);

        assert!(parse_peer_specs(&["nonsense".to_string()]).is_err());
        assert!(parse_peer_specs(&["=addr".to_string()]).is_err());
    }

    #[test]
    fn validator_specs_parse() {
        let kp = VeraKeypair::generate();
        let spec = format!("replica-1={}", kp.public_key_hex());
        let set = parse_validator_specs(&[spec]).unwrap();
        assert!(set.contains("replica-1"));
        assert_eq!(set.len(), 1);

        assert!(parse_validator_specs(&["replica-1=nothex".to_string()]).is_err());
    }
}
