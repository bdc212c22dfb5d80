//! A single stored version of a key, with the block-height window in
//! which it is the live value.

use serde::{Deserialize, Serialize};

use crate::config::OPEN_INTERVAL;
use crate::storage::block::hex_bytes;

/// One version of a key's value.
///
/// For a given key, versions form a contiguous, non-overlapping sequence
/// of half-open intervals `[valid_from, valid_to)`; at most one version —
/// the tail — has the open sentinel `valid_to = i64::MAX`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Version {
    /// Opaque value bytes. Hex-encoded in the JSON form so persisted
    /// records stay readable and language-neutral.
    #[serde(with = "hex_bytes")]
    pub value: Vec<u8>,
    /// Block height at which this version becomes active.
    pub valid_from: i64,
    /// Block height at which this version was superseded;
    /// [`OPEN_INTERVAL`] while still current.
    pub valid_to: i64,
}

impl Version {
    /// A still-current version starting at `height`.
    pub fn open(value: Vec<u8>, height: i64) -> Self {
        Self {
            value,
            valid_from: height,
            valid_to: OPEN_INTERVAL,
        }
    }

    /// Whether this version is the live value at `height`.
    pub fn is_active_at(&self, height: i64) -> bool {
        self.valid_from <= height && height < self.valid_to
    }

    /// Whether this version is the open tail of its key's history.
    pub fn is_open(&self) -> bool {
        self.valid_to == OPEN_INTERVAL
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn activity_window_is_half_open() {
        let v = Version {
            value: b"x".to_vec(),
            valid_from: 2,
            valid_to: 5,
        };
        assert!(!v.is_active_at(1));
        assert!(v.is_active_at(2));
        assert!(v.is_active_at(4));
        assert!(!v.is_active_at(5));
    }

    #[test]
    fn open_tail_is_active_forever() {
        let v = Version::open(b"x".to_vec(), 3);
        assert!(v.is_open());
        assert!(v.is_active_at(3));
        assert!(v.is_active_at(i64::MAX - 1));
        assert!(!v.is_active_at(2));
    }

    #[test]
    fn json_value_is_hex() {
        let v = Version::open(b"bar".to_vec(), 2);
        let json = serde_json::to_string(&v).unwrap();
        assert!(json.contains("\"626172\""), "value should be hex: {json}");
        let back: Version = serde_json::from_str(&json).unwrap();
        assert_eq!(back, v);
    }
}
