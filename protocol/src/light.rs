//! # Light Client
//!
//! A client that holds block headers and nothing else. It trusts no
//! replica: headers are accepted only when they chain correctly and
//! carry a verifiable validator quorum, and reads are accepted only when
//! the returned proof recomputes to the ADS root a trusted header
//! committed.
//!
//! ## Trust bootstrap
//!
//! On connect the client fetches the validator table and the full chain
//! from one server, then verifies every header locally. From that point
//! the server can lie about anything it wants — a fabricated value, a
//! stale root, a truncated history — and verification fails closed.
//! The one residual assumption is the standard light-client one: the
//! validator quorum itself is honest.

use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::{debug, info};

use crate::ads::merkle::verify_proof;
use crate::crypto::keys::VeraPublicKey;
use crate::network::consensus::{verify_committed_header, ConsensusError, ValidatorSet};
use crate::network::rpc::{PeerTransport, TransportError};
use crate::storage::block::BlockHeader;

/// Failures of light-client verification. Each one means "do not trust
/// this response", not "retry".
#[derive(Debug, thiserror::Error)]
pub enum LightClientError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("bad validator key for {id}: {reason}")]
    BadValidatorKey { id: String, reason: String },

    #[error("height mismatch: expected {expected}, got {got}")]
    HeightMismatch { expected: i64, got: i64 },

    #[error("prev_hash mismatch at height {0}")]
    PrevHashMismatch(i64),

    #[error("header rejected: {0}")]
    Header(#[from] ConsensusError),

    #[error("server root {got} does not match the trusted root {trusted}")]
    RootMismatch { trusted: String, got: String },

    #[error("inclusion proof failed verification for key {0:?}")]
    ProofInvalid(String),

    #[error("undecodable value encoding in query response")]
    BadValueEncoding,

    #[error("server returned an empty chain")]
    EmptyChain,
}

/// A header-only client bound to one server address.
pub struct LightClient {
    transport: Arc<dyn PeerTransport>,
    server: String,
    validators: ValidatorSet,
    headers: Vec<BlockHeader>,
    /// ADS root at the trusted tip, lowercase hex.
    trusted_root: String,
}

impl LightClient {
    /// Connect: fetch validators and the chain, verify every header, and
    /// pin the tip's ADS root as the read anchor.
    pub async fn connect(
        transport: Arc<dyn PeerTransport>,
        server: impl Into<String>,
    ) -> Result<Self, LightClientError> {
        let server = server.into();

        let raw_validators = transport.get_validators(&server).await?;
        let validators = parse_validators(raw_validators)?;

        let chain = transport.get_chain(&server).await?;
        if chain.is_empty() {
            return Err(LightClientError::EmptyChain);
        }

        let mut client = Self {
            transport,
            server,
            validators,
            headers: Vec::new(),
            trusted_root: String::new(),
        };
        for block in chain {
            client.process_header(block.header)?;
        }
        client.trusted_root = client
            .headers
            .last()
            .expect("chain verified non-empty")
            .data_hash_hex();

        info!(
            server = %client.server,
            headers = client.headers.len(),
            "light client synced"
        );
        Ok(client)
    }

    /// Number of verified headers held.
    pub fn header_count(&self) -> usize {
        self.headers.len()
    }

    /// The trusted tip height.
    pub fn tip_height(&self) -> i64 {
        self.headers.last().map(|h| h.height).unwrap_or(0)
    }

    /// The ADS root reads are verified against.
    pub fn trusted_root(&self) -> &str {
        &self.trusted_root
    }

    /// Verify one header against the local tip and the validator set,
    /// then append it.
    fn process_header(&mut self, header: BlockHeader) -> Result<(), LightClientError> {
        if let Some(prev) = self.headers.last() {
            if header.height != prev.height + 1 {
                return Err(LightClientError::HeightMismatch {
                    expected: prev.height + 1,
                    got: header.height,
                });
            }
            if header.prev_hash != prev.hash().to_vec() {
                return Err(LightClientError::PrevHashMismatch(header.height));
            }
        }

        // Genesis is self-certifying (deterministic bytes); every other
        // header must carry a verifiable quorum.
        if header.height > 1 {
            verify_committed_header(&header, &self.validators)?;
        }

        debug!(height = header.height, "header accepted");
        self.headers.push(header);
        Ok(())
    }

    /// Pull the chain and verify exactly the next header, if the server
    /// has one. Returns whether a header was appended.
    pub async fn sync_one(&mut self) -> Result<bool, LightClientError> {
        let next_height = self.tip_height() + 1;
        let chain = self.transport.get_chain(&self.server).await?;

        let Some(block) = chain.into_iter().find(|b| b.height() == next_height) else {
            return Ok(false);
        };
        self.process_header(block.header)?;
        self.trusted_root = self
            .headers
            .last()
            .expect("just appended")
            .data_hash_hex();
        Ok(true)
    }

    /// Verified read at the trusted tip.
    ///
    /// The server's answer is accepted only if (a) the root it claims is
    /// the root our tip header committed, and (b) the proof recomputes
    /// to that root from the claimed `(key, value)`.
    pub async fn query(&self, key: &str) -> Result<Vec<u8>, LightClientError> {
        let height = self.tip_height();
        let response = self
            .transport
            .query(&self.server, key, Some(height))
            .await?;

        if response.root != self.trusted_root {
            return Err(LightClientError::RootMismatch {
                trusted: self.trusted_root.clone(),
                got: response.root,
            });
        }

        let value =
            hex::decode(&response.value).map_err(|_| LightClientError::BadValueEncoding)?;
        if !verify_proof(&response.root, key, &value, &response.proof) {
            return Err(LightClientError::ProofInvalid(key.to_string()));
        }
        Ok(value)
    }
}

fn parse_validators(
    raw: BTreeMap<String, String>,
) -> Result<ValidatorSet, LightClientError> {
    let mut members = Vec::with_capacity(raw.len());
    for (id, hex_key) in raw {
        let key =
            VeraPublicKey::from_hex(&hex_key).map_err(|e| LightClientError::BadValidatorKey {
                id: id.clone(),
                reason: e.to_string(),
            })?;
        members.push((id, key));
    }
    Ok(ValidatorSet::new(members))
}
