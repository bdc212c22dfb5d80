//! # Hashing Utilities
//!
//! SHA-256 helpers with the exact byte framings the rest of the system
//! depends on. Every digest that crosses a trust boundary — leaf hashes,
//! internal tree nodes, header digests — is built from the functions in
//! this module, so the framing is defined in exactly one place.
//!
//! ## Framing rules
//!
//! - Leaf hash: `SHA256(key_bytes || value_bytes)`. No separator between
//!   key and value. Yes, that means `("ab", "c")` and `("a", "bc")`
//!   collide as leaves; the store keys are the authority on boundaries,
//!   and the proof binds a *claimed* (key, value) pair, which is what the
//!   verifier checks.
//! - Internal node: `SHA256(left || right)`, left first, always.
//! - Hex output is lowercase, no prefix.
//!
//! Independent verifiers recompute these framings from their own
//! documentation; the pinned-vector tests below are the tripwire against
//! drift.

use sha2::{Digest, Sha256};

/// Compute the SHA-256 hash of the input data.
///
/// Returns a fixed 32-byte digest. This is the only hash function in the
/// protocol; everything else in this module is a framing convention on
/// top of it.
pub fn sha256(data: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hasher.finalize().into()
}

/// SHA-256 of the input, returned as a lowercase hex string.
pub fn sha256_hex(data: &[u8]) -> String {
    hex::encode(sha256(data))
}

/// Hash of a Merkle leaf: `SHA256(key_bytes || value_bytes)`.
///
/// Concatenation is byte-level with no delimiter — this exact framing is
/// what light clients recompute, so it must never change.
pub fn leaf_hash(key: &str, value: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(key.as_bytes());
    hasher.update(value);
    hasher.finalize().into()
}

/// Hash of an internal Merkle node: `SHA256(left || right)`.
pub fn node_hash(left: &[u8; 32], right: &[u8; 32]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(left);
    hasher.update(right);
    hasher.finalize().into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sha256_known_vector() {
        // SHA-256 of the empty string — the canonical test vector.
        let hash = sha256(b"");
        let expected =
            hex::decode("e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855")
                .unwrap();
        assert_eq!(hash.as_slice(), expected.as_slice());
    }

    #[test]
    fn sha256_deterministic() {
        assert_eq!(sha256(b"vera"), sha256(b"vera"));
        assert_ne!(sha256(b"vera"), sha256(b"Vera"));
    }

    #[test]
    fn leaf_hash_is_concatenation() {
        // Leaf framing must equal SHA256 of the concatenated bytes.
        let direct = sha256(b"heybar");
        assert_eq!(leaf_hash("hey", b"bar"), direct);
    }

    #[test]
    fn node_hash_is_order_sensitive() {
        let l = sha256(b"left");
        let r = sha256(b"right");
        assert_ne!(node_hash(&l, &r), node_hash(&r, &l));
    }

    #[test]
    fn node_hash_matches_concatenation() {
        let l = sha256(b"left");
        let r = sha256(b"right");
        let mut cat = Vec::with_capacity(64);
        cat.extend_from_slice(&l);
        cat.extend_from_slice(&r);
        assert_eq!(node_hash(&l, &r), sha256(&cat));
    }

    #[test]
    fn hex_is_lowercase() {
        let h = sha256_hex(b"genesis");
        assert_eq!(h, h.to_lowercase());
        assert_eq!(h.len(), 64);
    }
}
