//! # Version Store
//!
//! The append-only multi-version map at the heart of the ADS. Every key
//! maps to an ordered run of [`Version`]s whose `[valid_from, valid_to)`
//! windows tile the heights since the key first appeared — no gaps, no
//! overlaps, one open tail.
//!
//! The store carries a `current_height` cursor: queries move the cursor,
//! rebuild the Merkle tree for that height, and answer from the snapshot
//! the tree was built over. Nothing is ever deleted; history is the
//! product.
//!
//! ## Persistence
//!
//! Records live in a [`StoreDb`] under `ver:{key}:{valid_from:020}` with
//! JSON values. On startup the in-memory map is rebuilt by scanning the
//! prefix, grouping by user key, and sorting by `valid_from`; interior
//! versions are re-stitched so each closes exactly where its successor
//! opens, and the tail keeps whatever `valid_to` was persisted. An empty
//! database is seeded with one record under the reserved `__genesis__`
//! key, which never participates in the tree.

use std::collections::BTreeMap;

use tracing::debug;

use crate::ads::merkle::{MerkleTree, ProofNode};
use crate::ads::version::Version;
use crate::config::{GENESIS_CONTENT, GENESIS_MARKER_KEY, HEIGHT_PAD_WIDTH, VERSION_KEY_PREFIX};
use crate::crypto::hash::{leaf_hash, sha256};
use crate::storage::db::{DbError, StoreDb};

/// Errors raised by version-store operations.
#[derive(Debug, thiserror::Error)]
pub enum AdsError {
    /// The key is absent, or has no version active at the queried height.
    #[error("key {key:?} not found at height {height}")]
    NotFound { key: String, height: i64 },

    #[error("persistence error: {0}")]
    Persistence(#[from] DbError),

    #[error("corrupt version record under {0}")]
    CorruptRecord(String),
}

/// The multi-version key/value store with its height cursor and the
/// transient tree for the cursor's snapshot.
#[derive(Debug)]
pub struct VersionStore {
    /// Optional persistence handle; `None` in client mode and pure
    /// in-memory tests.
    db: Option<StoreDb>,
    /// Per-key version history, ascending by `valid_from`.
    data: BTreeMap<String, Vec<Version>>,
    /// The height the current tree was built for.
    current_height: i64,
    /// Tree over the snapshot at `current_height`. Rebuilt on demand.
    tree: MerkleTree,
}

impl VersionStore {
    /// Open a persistent store, seeding the genesis marker on first open
    /// and rebuilding the in-memory map from disk.
    pub fn open(db: StoreDb) -> Result<Self, AdsError> {
        if db.prefix_is_empty(VERSION_KEY_PREFIX)? {
            let seed = Version::open(sha256(GENESIS_CONTENT).to_vec(), 0);
            let record = serde_json::to_vec(&seed)
                .map_err(|e| DbError::Serialization(e.to_string()))?;
            db.put(&record_key(GENESIS_MARKER_KEY, 0), &record)?;
            debug!("seeded genesis version record");
        }

        let data = load_from_db(&db)?;
        Ok(Self {
            db: Some(db),
            data,
            current_height: 0,
            tree: MerkleTree::default(),
        })
    }

    /// A store with no persistence. Used in client mode and tests.
    pub fn in_memory() -> Self {
        Self {
            db: None,
            data: BTreeMap::new(),
            current_height: 0,
            tree: MerkleTree::default(),
        }
    }

    /// The height the last rebuild was performed for.
    pub fn current_height(&self) -> i64 {
        self.current_height
    }

    /// Apply a write at height `h`: close the previous tail, append the
    /// new open version, move the cursor, rebuild, and return the new
    /// root as lowercase hex.
    ///
    /// Re-executing the same write at the same height — which consensus
    /// replay does on every replica, proposer included — replaces the
    /// tail in place instead of appending, so replay is idempotent.
    pub fn update(&mut self, key: &str, value: &[u8], height: i64) -> Result<String, AdsError> {
        let versions = self.data.entry(key.to_string()).or_default();

        let tail_starts_here = versions
            .last()
            .map(|tail| tail.valid_from == height)
            .unwrap_or(false);
        if tail_starts_here {
            versions.last_mut().expect("tail checked above").value = value.to_vec();
        } else {
            if let Some(tail) = versions.last_mut() {
                tail.valid_to = height;
            }
            versions.push(Version::open(value.to_vec(), height));
        }

        if let Some(db) = &self.db {
            // The closed tail (when any) and the new version both go back
            // to disk; each record keys on its own valid_from.
            let n = versions.len();
            for version in &versions[n.saturating_sub(2)..] {
                let record = serde_json::to_vec(version)
                    .map_err(|e| DbError::Serialization(e.to_string()))?;
                db.put(&record_key(key, version.valid_from), &record)?;
            }
        }

        self.current_height = height;
        self.rebuild();
        Ok(self.tree.root_hex())
    }

    /// Point read at height `h` with an inclusion proof against the root
    /// at that height.
    pub fn query(&mut self, key: &str, height: i64) -> Result<(Vec<u8>, Vec<ProofNode>), AdsError> {
        self.current_height = height;
        self.rebuild();

        let not_found = || AdsError::NotFound {
            key: key.to_string(),
            height,
        };

        let versions = self.data.get(key).ok_or_else(not_found)?;
        let version = versions
            .iter()
            .rev()
            .find(|v| v.is_active_at(height))
            .ok_or_else(not_found)?;

        let leaf = leaf_hash(key, &version.value);
        let proof = self.tree.proof_for(&leaf).ok_or_else(not_found)?;
        Ok((version.value.clone(), proof))
    }

    /// Root at height `h`, rebuilding for that height. Empty string when
    /// no key is live.
    pub fn root_at(&mut self, height: i64) -> String {
        self.current_height = height;
        self.rebuild();
        self.tree.root_hex()
    }

    /// Active `(key, value)` pairs whose key starts with `prefix`, as of
    /// height `h`.
    pub fn scan(&mut self, prefix: &str, height: i64) -> Vec<(String, Vec<u8>)> {
        self.current_height = height;
        self.rebuild();

        self.data
            .range(prefix.to_string()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .filter(|(k, _)| k.as_str() != GENESIS_MARKER_KEY)
            .filter_map(|(k, versions)| {
                versions
                    .iter()
                    .rev()
                    .find(|v| v.is_active_at(height))
                    .map(|v| (k.clone(), v.value.clone()))
            })
            .collect()
    }

    /// Rebuild the tree for the current cursor height.
    fn rebuild(&mut self) {
        let height = self.current_height;
        let leaves: Vec<[u8; 32]> = self
            .data
            .iter()
            .filter(|(key, _)| key.as_str() != GENESIS_MARKER_KEY)
            .flat_map(|(key, versions)| {
                versions
                    .iter()
                    .filter(move |v| v.is_active_at(height))
                    .map(move |v| leaf_hash(key, &v.value))
            })
            .collect();
        self.tree = MerkleTree::build(leaves);
    }

    /// Per-key version history, for tests and diagnostics.
    pub fn versions_of(&self, key: &str) -> Option<&[Version]> {
        self.data.get(key).map(Vec::as_slice)
    }
}

/// Persisted record key: `ver:{key}:{valid_from:020}`.
fn record_key(key: &str, valid_from: i64) -> String {
    format!(
        "{VERSION_KEY_PREFIX}{key}:{valid_from:0>width$}",
        width = HEIGHT_PAD_WIDTH
    )
}

/// Rebuild the in-memory map from a prefix scan.
///
/// The `valid_from` is taken from the record key (authoritative — it is
/// what the key schema orders by), the rest from the JSON value. Interior
/// versions are stitched so each closes at its successor's `valid_from`;
/// the tail keeps its persisted `valid_to`.
fn load_from_db(db: &StoreDb) -> Result<BTreeMap<String, Vec<Version>>, AdsError> {
    let mut data: BTreeMap<String, Vec<Version>> = BTreeMap::new();

    for (record_key, raw) in db.scan_prefix(VERSION_KEY_PREFIX)? {
        let rest = &record_key[VERSION_KEY_PREFIX.len()..];
        // User keys may contain ':'; the height suffix never does, so
        // split at the last separator.
        let (user_key, vf_digits) = rest
            .rsplit_once(':')
            .ok_or_else(|| AdsError::CorruptRecord(record_key.clone()))?;
        if user_key == GENESIS_MARKER_KEY {
            continue;
        }
        let valid_from: i64 = vf_digits
            .parse()
            .map_err(|_| AdsError::CorruptRecord(record_key.clone()))?;

        let mut version: Version = serde_json::from_slice(&raw)
            .map_err(|_| AdsError::CorruptRecord(record_key.clone()))?;
        version.valid_from = valid_from;
        data.entry(user_key.to_string()).or_default().push(version);
    }

    for versions in data.values_mut() {
        versions.sort_by_key(|v| v.valid_from);
        for i in 0..versions.len().saturating_sub(1) {
            let next_from = versions[i + 1].valid_from;
            versions[i].valid_to = next_from;
        }
    }

    Ok(data)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ads::merkle::verify_proof;
    use crate::config::OPEN_INTERVAL;

    #[test]
    fn update_then_query_roundtrip() {
        let mut store = VersionStore::in_memory();
        let root = store.update("hey", b"bar", 2).unwrap();
        assert!(!root.is_empty());

        let (value, proof) = store.query("hey", 2).unwrap();
        assert_eq!(value, b"bar");
        assert!(verify_proof(&store.root_at(2), "hey", b"bar", &proof));
    }

    #[test]
    fn version_history_is_height_addressable() {
        let mut store = VersionStore::in_memory();
        store.update("hey", b"v1", 2).unwrap();
        store.update("hey", b"v2", 3).unwrap();

        let (v_at_2, proof_2) = store.query("hey", 2).unwrap();
        assert_eq!(v_at_2, b"v1");
        assert!(verify_proof(&store.root_at(2), "hey", b"v1", &proof_2));

        let (v_at_3, proof_3) = store.query("hey", 3).unwrap();
        assert_eq!(v_at_3, b"v2");
        assert!(verify_proof(&store.root_at(3), "hey", b"v2", &proof_3));
    }

    #[test]
    fn query_before_first_update_is_not_found() {
        let mut store = VersionStore::in_memory();
        store.update("hey", b"bar", 5).unwrap();
        assert!(matches!(
            store.query("hey", 4),
            Err(AdsError::NotFound { .. })
        ));
    }

    #[test]
    fn missing_key_is_not_found() {
        let mut store = VersionStore::in_memory();
        store.update("hey", b"bar", 2).unwrap();
        assert!(matches!(
            store.query("missing", 2),
            Err(AdsError::NotFound { .. })
        ));
    }

    #[test]
    fn intervals_tile_without_gaps() {
        let mut store = VersionStore::in_memory();
        store.update("k", b"a", 2).unwrap();
        store.update("k", b"b", 3).unwrap();
        store.update("k", b"c", 7).unwrap();

        let versions = store.versions_of("k").unwrap();
        assert_eq!(versions.len(), 3);
        for pair in versions.windows(2) {
            assert_eq!(pair[0].valid_to, pair[1].valid_from);
        }
        assert_eq!(versions.last().unwrap().valid_to, OPEN_INTERVAL);
        // Every height from the first update onward resolves to a value.
        for h in 2..10 {
            assert!(store.query("k", h).is_ok(), "no active version at {h}");
        }
    }

    #[test]
    fn same_height_replay_is_idempotent() {
        let mut store = VersionStore::in_memory();
        let root_first = store.update("k", b"a", 2).unwrap();
        let root_replay = store.update("k", b"a", 2).unwrap();
        assert_eq!(root_first, root_replay);
        assert_eq!(store.versions_of("k").unwrap().len(), 1);
    }

    #[test]
    fn roots_are_deterministic_across_stores() {
        let mut a = VersionStore::in_memory();
        let mut b = VersionStore::in_memory();
        for store in [&mut a, &mut b] {
            store.update("hey", b"bar", 2).unwrap();
            store.update("foo", b"baz", 3).unwrap();
        }
        assert_eq!(a.root_at(2), b.root_at(2));
        assert_eq!(a.root_at(3), b.root_at(3));
        assert_ne!(a.root_at(2), a.root_at(3));
    }

    #[test]
    fn root_is_empty_before_any_write() {
        let mut store = VersionStore::in_memory();
        assert_eq!(store.root_at(1), "");
    }

    #[test]
    fn scan_returns_active_prefix_matches() {
        let mut store = VersionStore::in_memory();
        store.update("user:alice", b"1", 2).unwrap();
        store.update("user:bob", b"2", 3).unwrap();
        store.update("order:1", b"x", 3).unwrap();

        let users = store.scan("user:", 3);
        assert_eq!(users.len(), 2);
        assert_eq!(users[0].0, "user:alice");
        assert_eq!(users[1].0, "user:bob");

        // At height 2 bob doesn't exist yet.
        assert_eq!(store.scan("user:", 2).len(), 1);
        assert!(store.scan("nothing:", 3).is_empty());
    }

    #[test]
    fn persistence_survives_reopen() {
        let db = StoreDb::open_temporary().unwrap();
        {
            let mut store = VersionStore::open(db.clone()).unwrap();
            store.update("hey", b"v1", 2).unwrap();
            store.update("hey", b"v2", 3).unwrap();
            store.update("other", b"x", 3).unwrap();
        }

        let mut reopened = VersionStore::open(db).unwrap();
        assert_eq!(reopened.query("hey", 2).unwrap().0, b"v1");
        assert_eq!(reopened.query("hey", 3).unwrap().0, b"v2");
        assert_eq!(reopened.query("other", 3).unwrap().0, b"x");

        let versions = reopened.versions_of("hey").unwrap();
        assert_eq!(versions[0].valid_to, 3);
        assert!(versions[1].is_open());
    }

    #[test]
    fn reopened_store_rebuilds_identical_roots() {
        let db = StoreDb::open_temporary().unwrap();
        let root_before = {
            let mut store = VersionStore::open(db.clone()).unwrap();
            store.update("hey", b"bar", 2).unwrap();
            store.root_at(2)
        };
        let mut reopened = VersionStore::open(db).unwrap();
        assert_eq!(reopened.root_at(2), root_before);
    }

    #[test]
    fn genesis_marker_never_enters_the_tree() {
        let db = StoreDb::open_temporary().unwrap();
        let mut store = VersionStore::open(db).unwrap();
        // Only the genesis seed exists; the tree must still be empty.
        assert_eq!(store.root_at(1), "");
        assert!(store.versions_of(GENESIS_MARKER_KEY).is_none());
    }

    #[test]
    fn keys_containing_separators_survive_reload() {
        let db = StoreDb::open_temporary().unwrap();
        {
            let mut store = VersionStore::open(db.clone()).unwrap();
            store.update("ns:sub:key", b"v", 2).unwrap();
        }
        let mut reopened = VersionStore::open(db).unwrap();
        assert_eq!(reopened.query("ns:sub:key", 2).unwrap().0, b"v");
    }
}
