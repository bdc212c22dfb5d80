//! # Validator Keys
//!
//! Ed25519 keypair handling for validator identities.
//!
//! Every validator in a VERA deployment is an Ed25519 keypair. Public keys
//! are published as lowercase hex through the `get_validators` endpoint;
//! the validator *id* (a short operator-chosen string) is only a handle —
//! the public key is the identity everything verifies against.
//!
//! ## Why Ed25519?
//!
//! - Deterministic signatures (no k-value footguns like ECDSA).
//! - 128-bit security level in 32+32 bytes. Compact and sufficient.
//! - Fast verification — a replica checks a full quorum of header
//!   signatures on every broadcast block.
//!
//! ## Security considerations
//!
//! - We use OS-level RNG (`OsRng`) for key generation.
//! - Secret key bytes are never logged and `VeraKeypair` has no serde
//!   impls. Exporting a secret is a deliberate call to `to_bytes()`,
//!   not a side effect of serialization.

use ed25519_dalek::{
    Signature as DalekSignature, Signer, SigningKey, Verifier, VerifyingKey, SECRET_KEY_LENGTH,
};
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Errors that can occur during key operations.
///
/// Intentionally vague about *why* something failed — error messages that
/// describe key material are a classic leak.
#[derive(Debug, Error)]
pub enum KeyError {
    #[error("invalid secret key bytes: wrong length or not valid hex")]
    InvalidSecretKey,

    #[error("invalid public key bytes: not a valid Ed25519 point")]
    InvalidPublicKey,

    #[error("invalid signature encoding")]
    InvalidSignature,
}

/// A validator keypair wrapping an Ed25519 signing key.
///
/// # Examples
///
/// ```
/// use vera_protocol::crypto::keys::VeraKeypair;
///
/// let kp = VeraKeypair::generate();
/// let sig = kp.sign(b"header bytes");
/// assert!(kp.public_key().verify(b"header bytes", &sig));
/// ```
pub struct VeraKeypair {
    signing_key: SigningKey,
}

/// The public half of a validator identity, safe to share with the world.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VeraPublicKey {
    bytes: [u8; 32],
}

/// An Ed25519 signature over a message. Always exactly 64 bytes; anything
/// else fails verification with a boolean `false`, never a panic.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VeraSignature {
    bytes: Vec<u8>,
}

impl VeraKeypair {
    /// Generate a fresh keypair using the OS cryptographic RNG.
    pub fn generate() -> Self {
        let signing_key = SigningKey::generate(&mut OsRng);
        Self { signing_key }
    }

    /// Construct a keypair deterministically from a 32-byte seed.
    ///
    /// In Ed25519 the 32-byte secret key *is* the seed. Useful for test
    /// fixtures and for loading operator-provisioned key material.
    pub fn from_seed(seed: &[u8; 32]) -> Self {
        Self {
            signing_key: SigningKey::from_bytes(seed),
        }
    }

    /// Reconstruct a keypair from a hex-encoded secret key.
    ///
    /// This is how the node binary loads `VERA_KEY`. Don't put raw hex
    /// keys in shell history in production; for devnet we're not going to
    /// pretend you won't.
    pub fn from_hex(hex_str: &str) -> Result<Self, KeyError> {
        let bytes = hex::decode(hex_str.trim()).map_err(|_| KeyError::InvalidSecretKey)?;
        if bytes.len() != SECRET_KEY_LENGTH {
            return Err(KeyError::InvalidSecretKey);
        }
        let mut arr = [0u8; SECRET_KEY_LENGTH];
        arr.copy_from_slice(&bytes);
        Ok(Self::from_seed(&arr))
    }

    /// Returns the public key associated with this keypair.
    pub fn public_key(&self) -> VeraPublicKey {
        VeraPublicKey {
            bytes: self.signing_key.verifying_key().to_bytes(),
        }
    }

    /// Public key as lowercase hex — the form published to peers.
    pub fn public_key_hex(&self) -> String {
        hex::encode(self.signing_key.verifying_key().to_bytes())
    }

    /// Sign a message. Ed25519 is deterministic: the same (key, message)
    /// pair always produces the same signature.
    pub fn sign(&self, message: &[u8]) -> VeraSignature {
        let sig = self.signing_key.sign(message);
        VeraSignature {
            bytes: sig.to_bytes().to_vec(),
        }
    }

    /// Export the raw 32-byte secret key material. Handle with care.
    pub fn to_bytes(&self) -> [u8; 32] {
        self.signing_key.to_bytes()
    }
}

impl Clone for VeraKeypair {
    fn clone(&self) -> Self {
        Self {
            signing_key: SigningKey::from_bytes(&self.signing_key.to_bytes()),
        }
    }
}

impl fmt::Debug for VeraKeypair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Never print secret key material, not even partially.
        write!(f, "VeraKeypair(pub={})", self.public_key().to_hex())
    }
}

impl VeraPublicKey {
    /// Construct from raw bytes, validating that they form a valid
    /// Ed25519 point.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, KeyError> {
        let arr: [u8; 32] = bytes.try_into().map_err(|_| KeyError::InvalidPublicKey)?;
        VerifyingKey::from_bytes(&arr).map_err(|_| KeyError::InvalidPublicKey)?;
        Ok(Self { bytes: arr })
    }

    /// Construct from a lowercase-hex string (the `get_validators` wire
    /// format).
    pub fn from_hex(hex_str: &str) -> Result<Self, KeyError> {
        let bytes = hex::decode(hex_str).map_err(|_| KeyError::InvalidPublicKey)?;
        Self::from_bytes(&bytes)
    }

    /// Raw 32-byte key.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.bytes
    }

    /// Lowercase hex encoding.
    pub fn to_hex(&self) -> String {
        hex::encode(self.bytes)
    }

    /// Verify a signature over `message`. Malformed signatures or key
    /// bytes simply return `false`.
    pub fn verify(&self, message: &[u8], signature: &VeraSignature) -> bool {
        let Ok(vk) = VerifyingKey::from_bytes(&self.bytes) else {
            return false;
        };
        let sig_bytes: [u8; 64] = match signature.bytes.as_slice().try_into() {
            Ok(b) => b,
            Err(_) => return false,
        };
        let sig = DalekSignature::from_bytes(&sig_bytes);
        vk.verify(message, &sig).is_ok()
    }
}

impl fmt::Debug for VeraPublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl VeraSignature {
    /// Wrap raw signature bytes. No validation happens here; a wrong
    /// length surfaces as a failed verification.
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self { bytes }
    }

    /// Decode a hex-encoded signature.
    pub fn from_hex(hex_str: &str) -> Result<Self, KeyError> {
        let bytes = hex::decode(hex_str).map_err(|_| KeyError::InvalidSignature)?;
        Ok(Self { bytes })
    }

    /// Raw signature bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Lowercase hex encoding.
    pub fn to_hex(&self) -> String {
        hex::encode(&self.bytes)
    }
}

impl fmt::Debug for VeraSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "VeraSignature({})", self.to_hex())
    }
}
