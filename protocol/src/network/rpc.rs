//! # Peer Transport
//!
//! The protocol crate never opens a socket. Everything a replica says to
//! a peer goes through the [`PeerTransport`] trait; the production
//! implementation speaks HTTP/JSON with `reqwest`, and tests substitute
//! an in-process loopback. The endpoints mirror the node's axum routes
//! one to one.
//!
//! Consensus multicasts are best-effort: each send is a spawned task with
//! a short timeout, failures are logged and forgotten, and the sync loop
//! repairs whatever the multicast missed. Nothing on the inbound request
//! path ever awaits a peer.

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::ads::merkle::ProofNode;
use crate::config::PEER_RPC_TIMEOUT;
use crate::storage::block::Block;

/// Errors from talking to a peer. All of them are survivable; the caller
/// logs and moves on.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("request to {addr} failed: {reason}")]
    Request { addr: String, reason: String },

    #[error("peer {addr} answered {status}")]
    BadStatus { addr: String, status: u16 },

    #[error("undecodable response from {addr}: {reason}")]
    Decode { addr: String, reason: String },
}

/// Body of a successful `query` response, shared by the node's API and
/// the light client.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct QueryResponse {
    /// Value bytes, lowercase hex.
    pub value: String,
    /// Inclusion proof, leaf to root.
    pub proof: Vec<ProofNode>,
    /// ADS root at the queried height, lowercase hex.
    pub root: String,
}

/// Outbound messaging surface toward one peer address.
#[async_trait]
pub trait PeerTransport: Send + Sync {
    /// POST a JSON body to an endpoint (e.g. `consensus/prepare`,
    /// `broadcast`). Only the status matters; bodies are ignored.
    async fn post_json(
        &self,
        addr: &str,
        endpoint: &str,
        body: serde_json::Value,
    ) -> Result<(), TransportError>;

    /// Fetch a peer's full chain.
    async fn get_chain(&self, addr: &str) -> Result<Vec<Block>, TransportError>;

    /// Fetch a peer's validator table: id → hex public key.
    async fn get_validators(&self, addr: &str)
        -> Result<BTreeMap<String, String>, TransportError>;

    /// Proof-carrying read from a peer.
    async fn query(
        &self,
        addr: &str,
        key: &str,
        height: Option<i64>,
    ) -> Result<QueryResponse, TransportError>;
}

/// The production transport: HTTP/JSON with a per-request timeout.
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    pub fn new() -> Self {
        let client = reqwest::Client::builder()
            .timeout(PEER_RPC_TIMEOUT)
            .build()
            .expect("reqwest client construction cannot fail with static config");
        Self { client }
    }

    fn url(addr: &str, path: &str) -> String {
        format!("http://{addr}/{path}")
    }
}

impl Default for HttpTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PeerTransport for HttpTransport {
    async fn post_json(
        &self,
        addr: &str,
        endpoint: &str,
        body: serde_json::Value,
    ) -> Result<(), TransportError> {
        let response = self
            .client
            .post(Self::url(addr, endpoint))
            .json(&body)
            .send()
            .await
            .map_err(|e| TransportError::Request {
                addr: addr.to_string(),
                reason: e.to_string(),
            })?;
        if !response.status().is_success() {
            return Err(TransportError::BadStatus {
                addr: addr.to_string(),
                status: response.status().as_u16(),
            });
        }
        Ok(())
    }

    async fn get_chain(&self, addr: &str) -> Result<Vec<Block>, TransportError> {
        let response = self
            .client
            .get(Self::url(addr, "chain"))
            .send()
            .await
            .map_err(|e| TransportError::Request {
                addr: addr.to_string(),
                reason: e.to_string(),
            })?;
        if !response.status().is_success() {
            return Err(TransportError::BadStatus {
                addr: addr.to_string(),
                status: response.status().as_u16(),
            });
        }
        response.json().await.map_err(|e| TransportError::Decode {
            addr: addr.to_string(),
            reason: e.to_string(),
        })
    }

    async fn get_validators(
        &self,
        addr: &str,
    ) -> Result<BTreeMap<String, String>, TransportError> {
        let response = self
            .client
            .get(Self::url(addr, "validators"))
            .send()
            .await
            .map_err(|e| TransportError::Request {
                addr: addr.to_string(),
                reason: e.to_string(),
            })?;
        if !response.status().is_success() {
            return Err(TransportError::BadStatus {
                addr: addr.to_string(),
                status: response.status().as_u16(),
            });
        }
        response.json().await.map_err(|e| TransportError::Decode {
            addr: addr.to_string(),
            reason: e.to_string(),
        })
    }

    async fn query(
        &self,
        addr: &str,
        key: &str,
        height: Option<i64>,
    ) -> Result<QueryResponse, TransportError> {
        let mut request = self
            .client
            .get(Self::url(addr, "query"))
            .query(&[("key", key)]);
        if let Some(h) = height {
            request = request.query(&[("height", h.to_string())]);
        }
        let response = request.send().await.map_err(|e| TransportError::Request {
            addr: addr.to_string(),
            reason: e.to_string(),
        })?;
        if !response.status().is_success() {
            return Err(TransportError::BadStatus {
                addr: addr.to_string(),
                status: response.status().as_u16(),
            });
        }
        response.json().await.map_err(|e| TransportError::Decode {
            addr: addr.to_string(),
            reason: e.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn urls_are_addr_plus_path() {
        assert_eq!(
            HttpTransport::url("127.0.0.1:7851", "consensus/prepare"),
            "http://127.0.0.1:7851/consensus/prepare"
        );
    }

    #[test]
    fn query_response_roundtrips() {
        let resp = QueryResponse {
            value: "626172".into(),
            proof: vec![ProofNode {
                hash: "00".repeat(32),
                left: true,
            }],
            root: "ab".repeat(32),
        };
        let json = serde_json::to_string(&resp).unwrap();
        let back: QueryResponse = serde_json::from_str(&json).unwrap();
        assert_eq!(back.value, resp.value);
        assert_eq!(back.proof, resp.proof);
        assert_eq!(back.root, resp.root);
    }
}
