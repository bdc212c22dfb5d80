//! # Block Structure
//!
//! A block is the atomic unit of agreement in VERA. Each block carries one
//! key/value operation, a link to the previous header, and — the point of
//! the whole exercise — the ADS root after applying that operation, so
//! that header-holding clients can verify reads at this height.
//!
//! ## Header Layout
//!
//! ```text
//! ┌──────────────────────────────────────────────────┐
//! │  BlockHeader                                     │
//! │  ├── height: i64            (1-origin)           │
//! │  ├── prev_hash: bytes       (empty for genesis)  │
//! │  ├── content_hash: bytes    (SHA-256 of content) │
//! │  ├── data_hash: bytes       (ADS root)           │
//! │  ├── rw_hash: bytes         (== content_hash)    │
//! │  ├── initiator: bytes       (proposer pubkey)    │
//! │  ├── signature: bytes       (proposer, canonical)│
//! │  ├── validators: [String]                        │
//! │  └── signatures: [bytes]    (same order)         │
//! ├──────────────────────────────────────────────────┤
//! │  content: bytes             (JSON Operation)     │
//! └──────────────────────────────────────────────────┘
//! ```
//!
//! ## Canonical Bytes
//!
//! Signatures — the proposer's and every quorum vote — cover a fixed
//! byte framing of the first six fields, never the signature fields
//! themselves. The framing is explicit (big-endian height, then each
//! byte field length-prefixed) rather than "whatever the serializer
//! emits", because two implementations must produce identical bytes for
//! the same header. The header *hash* is SHA-256 of the same canonical
//! bytes, which keeps chain linkage independent of which quorum
//! signatures a particular replica collected.

use serde::{Deserialize, Serialize};

use crate::config::{GENESIS_CONTENT, GENESIS_HEIGHT, GENESIS_INITIATOR};
use crate::crypto::hash::sha256;
use crate::crypto::keys::{VeraKeypair, VeraPublicKey, VeraSignature};

/// Serde adapter: `Vec<u8>` as lowercase hex. Applied to every byte field
/// that crosses the wire or lands on disk, so JSON stays diffable and
/// other languages don't need to guess an array encoding.
pub mod hex_bytes {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(deserializer)?;
        hex::decode(&s).map_err(serde::de::Error::custom)
    }
}

/// Serde adapter: `Vec<Vec<u8>>` as a list of lowercase-hex strings.
pub mod hex_bytes_vec {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(
        items: &[Vec<u8>],
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(items.iter().map(hex::encode))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Vec<Vec<u8>>, D::Error> {
        let strings = Vec::<String>::deserialize(deserializer)?;
        strings
            .into_iter()
            .map(|s| hex::decode(&s).map_err(serde::de::Error::custom))
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Operation
// ---------------------------------------------------------------------------

/// The payload of a block: one write to the version store.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Operation {
    /// User key being written.
    pub key: String,
    /// Opaque value bytes, hex on the wire.
    #[serde(with = "hex_bytes")]
    pub value: Vec<u8>,
}

impl Operation {
    /// Serialize to the canonical content bytes embedded in a block.
    pub fn to_content(&self) -> Vec<u8> {
        serde_json::to_vec(self).expect("operation serialization is infallible")
    }

    /// Parse an operation back out of block content.
    pub fn from_content(content: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(content)
    }
}

// ---------------------------------------------------------------------------
// BlockHeader
// ---------------------------------------------------------------------------

/// Block metadata, chain linkage, and the quorum's signatures.
///
/// Light clients sync headers alone: `data_hash` is the ADS root they
/// verify reads against, and `signatures` is the finality proof.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockHeader {
    /// Block height, 1-origin (genesis is height 1).
    pub height: i64,
    /// Header hash of the previous block; empty for genesis.
    #[serde(with = "hex_bytes")]
    pub prev_hash: Vec<u8>,
    /// SHA-256 of the block content.
    #[serde(with = "hex_bytes")]
    pub content_hash: Vec<u8>,
    /// ADS root after applying this block's operation.
    #[serde(with = "hex_bytes")]
    pub data_hash: Vec<u8>,
    /// Hash of the read/write log. Currently equal to `content_hash`;
    /// kept as a distinct field so deriving it from a real RW log later
    /// does not change the header shape.
    #[serde(with = "hex_bytes")]
    pub rw_hash: Vec<u8>,
    /// Public key of the proposer ("system" for genesis).
    #[serde(with = "hex_bytes")]
    pub initiator: Vec<u8>,
    /// Proposer's signature over the canonical bytes.
    #[serde(with = "hex_bytes")]
    pub signature: Vec<u8>,
    /// Ids of the validators whose commit votes finalized this block.
    pub validators: Vec<String>,
    /// Signatures by `validators`, same order, over the same canonical
    /// bytes.
    #[serde(with = "hex_bytes_vec")]
    pub signatures: Vec<Vec<u8>>,
}

impl BlockHeader {
    /// The canonical byte framing covered by every signature:
    ///
    /// ```text
    /// height        — 8 bytes, big-endian two's-complement i64
    /// prev_hash     — 4-byte big-endian length, then the bytes
    /// content_hash  — likewise
    /// data_hash     — likewise
    /// rw_hash       — likewise
    /// initiator     — likewise
    /// ```
    ///
    /// The signature fields are never included. Any change here is a
    /// hard fork; the pinned-vector test below is the tripwire.
    pub fn canonical_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(8 + 5 * 4 + 4 * 32 + self.initiator.len());
        out.extend_from_slice(&self.height.to_be_bytes());
        for field in [
            &self.prev_hash,
            &self.content_hash,
            &self.data_hash,
            &self.rw_hash,
            &self.initiator,
        ] {
            out.extend_from_slice(&(field.len() as u32).to_be_bytes());
            out.extend_from_slice(field);
        }
        out
    }

    /// Header hash: SHA-256 of the canonical bytes. Used for `prev_hash`
    /// linkage, broadcast de-duplication, and light-client verification.
    pub fn hash(&self) -> [u8; 32] {
        sha256(&self.canonical_bytes())
    }

    /// Header hash as lowercase hex.
    pub fn hash_hex(&self) -> String {
        hex::encode(self.hash())
    }

    /// Sign the canonical bytes with a validator key.
    pub fn sign_with(&self, keypair: &VeraKeypair) -> VeraSignature {
        keypair.sign(&self.canonical_bytes())
    }

    /// Verify a signature over the canonical bytes.
    pub fn verify_signature(&self, public_key: &VeraPublicKey, signature: &[u8]) -> bool {
        public_key.verify(
            &self.canonical_bytes(),
            &VeraSignature::from_bytes(signature.to_vec()),
        )
    }

    /// ADS root as lowercase hex — what `get_root` and query responses
    /// report for this height.
    pub fn data_hash_hex(&self) -> String {
        hex::encode(&self.data_hash)
    }
}

// ---------------------------------------------------------------------------
// Block
// ---------------------------------------------------------------------------

/// A full block: header plus the serialized operation it agreed on.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    pub header: BlockHeader,
    /// Serialized [`Operation`]; `header.content_hash` is its SHA-256.
    #[serde(with = "hex_bytes")]
    pub content: Vec<u8>,
}

impl Block {
    /// The deterministic genesis block.
    ///
    /// Height 1, empty `prev_hash`, and all three payload hashes equal to
    /// `SHA256("genesis")`. Unsigned — its authority is that every
    /// replica derives the identical bytes.
    pub fn genesis() -> Self {
        let content = GENESIS_CONTENT.to_vec();
        let content_hash = sha256(&content).to_vec();

        Self {
            header: BlockHeader {
                height: GENESIS_HEIGHT,
                prev_hash: Vec::new(),
                content_hash: content_hash.clone(),
                data_hash: content_hash.clone(),
                rw_hash: content_hash,
                initiator: GENESIS_INITIATOR.to_vec(),
                signature: Vec::new(),
                validators: Vec::new(),
                signatures: Vec::new(),
            },
            content,
        }
    }

    /// Block height.
    pub fn height(&self) -> i64 {
        self.header.height
    }

    /// Parse the embedded operation.
    pub fn operation(&self) -> Result<Operation, serde_json::Error> {
        Operation::from_content(&self.content)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn genesis_is_deterministic() {
        let a = Block::genesis();
        let b = Block::genesis();
        assert_eq!(a, b);
        assert_eq!(a.header.hash(), b.header.hash());
    }

    #[test]
    fn genesis_shape() {
        let genesis = Block::genesis();
        assert_eq!(genesis.height(), 1);
        assert!(genesis.header.prev_hash.is_empty());
        let expected = sha256(b"genesis").to_vec();
        assert_eq!(genesis.header.content_hash, expected);
        assert_eq!(genesis.header.data_hash, expected);
        assert_eq!(genesis.header.rw_hash, expected);
        assert!(genesis.header.signature.is_empty());
        assert!(genesis.header.validators.is_empty());
    }

    #[test]
    fn canonical_bytes_pinned_vector() {
        // Frozen framing: i64 height big-endian, then five length-prefixed
        // fields. If this test breaks, the wire format broke.
        let header = BlockHeader {
            height: 2,
            prev_hash: vec![0xaa, 0xbb],
            content_hash: vec![0x01],
            data_hash: vec![0x02, 0x03],
            rw_hash: vec![0x01],
            initiator: b"pk".to_vec(),
            signature: vec![0xff; 64],     // must not appear
            validators: vec!["v1".into()], // must not appear
            signatures: vec![vec![0xee]],  // must not appear
        };
        let expected: Vec<u8> = [
            &[0, 0, 0, 0, 0, 0, 0, 2][..],  // height
            &[0, 0, 0, 2, 0xaa, 0xbb][..],  // prev_hash
            &[0, 0, 0, 1, 0x01][..],        // content_hash
            &[0, 0, 0, 2, 0x02, 0x03][..],  // data_hash
            &[0, 0, 0, 1, 0x01][..],        // rw_hash
            &[0, 0, 0, 2, b'p', b'k'][..],  // initiator
        ]
        .concat();
        assert_eq!(header.canonical_bytes(), expected);
    }

    #[test]
    fn signature_fields_do_not_change_the_hash() {
        let mut header = Block::genesis().header;
        let before = header.hash();
        header.signature = vec![1; 64];
        header.validators = vec!["v1".into(), "v2".into()];
        header.signatures = vec![vec![2; 64], vec![3; 64]];
        assert_eq!(header.hash(), before);
    }

    #[test]
    fn sign_verify_over_canonical_bytes() {
        let kp = VeraKeypair::generate();
        let header = Block::genesis().header;
        let sig = header.sign_with(&kp);
        assert!(header.verify_signature(&kp.public_key(), sig.as_bytes()));

        let mut tampered = header.clone();
        tampered.height = 2;
        assert!(!tampered.verify_signature(&kp.public_key(), sig.as_bytes()));
    }

    #[test]
    fn operation_roundtrips_through_content() {
        let op = Operation {
            key: "hey".to_string(),
            value: b"bar".to_vec(),
        };
        let content = op.to_content();
        assert_eq!(Operation::from_content(&content).unwrap(), op);

        // Content is JSON with a hex value — language-neutral on purpose.
        let text = String::from_utf8(content).unwrap();
        assert!(text.contains("\"626172\""), "content: {text}");
    }

    #[test]
    fn block_json_uses_hex_for_byte_fields() {
        let block = Block::genesis();
        let json = serde_json::to_string(&block).unwrap();
        assert!(json.contains(&hex::encode(sha256(b"genesis"))));
        let back: Block = serde_json::from_str(&json).unwrap();
        assert_eq!(back, block);
    }
}
