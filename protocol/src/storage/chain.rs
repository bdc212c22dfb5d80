//! # Block Log
//!
//! The ordered, hash-linked sequence of blocks, plus the version store it
//! drives. Producing a block and applying a block are two sides of the
//! same operation: both execute the embedded write against the version
//! store, and `apply` additionally demands that the root it derives
//! matches the root the header committed to. A replica that executes a
//! block is never *trusting* the proposer's root — it recomputes it.
//!
//! ## Persistence
//!
//! Blocks live under `block:{height:020}` with JSON values, so a prefix
//! scan recovers the chain in height order. The canonical chain is
//! whatever the store holds — readers reload it rather than caching,
//! trading a little persistence latency for zero coherence bugs. A
//! fresh database is seeded with the deterministic genesis block.

use tracing::{info, warn};

use crate::ads::merkle::ProofNode;
use crate::ads::store::{AdsError, VersionStore};
use crate::config::{BLOCK_KEY_PREFIX, HEIGHT_PAD_WIDTH};
use crate::crypto::hash::sha256;
use crate::storage::block::{Block, BlockHeader, Operation};
use crate::storage::db::{DbError, StoreDb};

/// Errors raised by block construction, application, and chain
/// validation.
#[derive(Debug, thiserror::Error)]
pub enum BlockError {
    /// Re-executing a block's operation produced a different ADS root
    /// than the header committed to.
    #[error("ADS root mismatch at height {height}: header {expected}, derived {got}")]
    RootMismatch {
        height: i64,
        expected: String,
        got: String,
    },

    /// Adjacent blocks do not increase height by exactly one.
    #[error("height mismatch at index {index}: expected {expected}, got {got}")]
    HeightMismatch {
        index: usize,
        expected: i64,
        got: i64,
    },

    /// A block's `prev_hash` does not equal the previous header's hash.
    #[error("prev_hash mismatch at height {height}")]
    PrevHashMismatch { height: i64 },

    /// Block content failed to parse as an operation.
    #[error("malformed block content at height {height}: {reason}")]
    MalformedContent { height: i64, reason: String },

    #[error("version store error: {0}")]
    Ads(#[from] AdsError),

    #[error("persistence error: {0}")]
    Persistence(#[from] DbError),
}

/// The block log: chain persistence plus the owned version store.
///
/// One lock around a `BlockLog` linearizes everything that matters —
/// chain append and version-store mutation — which is exactly the
/// serialization point the protocol needs anyway: the tree rebuild *is*
/// the committing step.
#[derive(Debug)]
pub struct BlockLog {
    /// Optional chain persistence; `None` in client mode and tests.
    db: Option<StoreDb>,
    /// In-memory chain. Authoritative when `db` is `None`; otherwise a
    /// mirror of the store, refreshed on mutation.
    chain: Vec<Block>,
    /// The ADS this log drives.
    store: VersionStore,
}

impl BlockLog {
    /// Open a persistent block log, seeding genesis on first open.
    pub fn open(db: StoreDb, store: VersionStore) -> Result<Self, BlockError> {
        if db.prefix_is_empty(BLOCK_KEY_PREFIX)? {
            let genesis = Block::genesis();
            persist_block(&db, &genesis)?;
            info!(height = genesis.height(), "seeded genesis block");
        }
        let chain = load_chain(&db)?;
        Ok(Self {
            db: Some(db),
            chain,
            store,
        })
    }

    /// A log with no persistence, seeded with genesis.
    pub fn in_memory(store: VersionStore) -> Self {
        Self {
            db: None,
            chain: vec![Block::genesis()],
            store,
        }
    }

    /// The full chain, in height order. Reloaded from the store when one
    /// is attached.
    pub fn chain(&self) -> Result<Vec<Block>, BlockError> {
        match &self.db {
            Some(db) => load_chain(db),
            None => Ok(self.chain.clone()),
        }
    }

    /// The chain tip.
    pub fn tip(&self) -> Result<Block, BlockError> {
        Ok(self
            .chain()?
            .pop()
            .unwrap_or_else(Block::genesis))
    }

    /// Current chain length.
    pub fn len(&self) -> Result<usize, BlockError> {
        Ok(self.chain()?.len())
    }

    /// Build a candidate block on top of the current tip.
    ///
    /// Applies the operation to the version store at `tip.height + 1`,
    /// which yields the `data_hash` the header commits to, then persists
    /// the block. Signatures are the caller's job — the block is not
    /// externally observable until the proposer signs and consensus runs.
    pub fn new_block(&mut self, op: &Operation, initiator: &[u8]) -> Result<Block, BlockError> {
        let prev = self.tip()?;
        let height = prev.height() + 1;

        let content = op.to_content();
        let content_hash = sha256(&content).to_vec();
        let root_hex = self.store.update(&op.key, &op.value, height)?;
        let data_hash = hex::decode(&root_hex).expect("root is valid hex");

        let header = BlockHeader {
            height,
            prev_hash: prev.header.hash().to_vec(),
            content_hash: content_hash.clone(),
            data_hash,
            rw_hash: content_hash,
            initiator: initiator.to_vec(),
            signature: Vec::new(),
            validators: Vec::new(),
            signatures: Vec::new(),
        };

        let block = Block {
            header,
            content,
        };
        if let Some(db) = &self.db {
            persist_block(db, &block)?;
        }
        info!(height, key = %op.key, "built candidate block");
        Ok(block)
    }

    /// Re-execute a block's operation and check the derived root against
    /// the header's `data_hash`.
    pub fn apply(&mut self, block: &Block) -> Result<(), BlockError> {
        let height = block.height();
        let op = block.operation().map_err(|e| BlockError::MalformedContent {
            height,
            reason: e.to_string(),
        })?;

        let derived = self.store.update(&op.key, &op.value, height)?;
        let expected = block.header.data_hash_hex();
        if derived != expected {
            warn!(height, %expected, %derived, "block rejected: root mismatch");
            return Err(BlockError::RootMismatch {
                height,
                expected,
                got: derived,
            });
        }
        Ok(())
    }

    /// Structural chain validation: heights advance by one and every
    /// `prev_hash` links to the previous header.
    pub fn validate_chain(chain: &[Block]) -> Result<(), BlockError> {
        for (index, pair) in chain.windows(2).enumerate() {
            let (prev, curr) = (&pair[0], &pair[1]);
            if curr.height() != prev.height() + 1 {
                return Err(BlockError::HeightMismatch {
                    index: index + 1,
                    expected: prev.height() + 1,
                    got: curr.height(),
                });
            }
            if curr.header.prev_hash != prev.header.hash().to_vec() {
                return Err(BlockError::PrevHashMismatch {
                    height: curr.height(),
                });
            }
        }
        Ok(())
    }

    /// Boolean form of [`validate_chain`](Self::validate_chain).
    pub fn is_valid_chain(chain: &[Block]) -> bool {
        Self::validate_chain(chain).is_ok()
    }

    /// Append a consensus-committed block at the tip.
    ///
    /// Two legal shapes: the block extends the tip by one (replicas), or
    /// it lands on the tip's height with the *same header hash* — the
    /// proposer finalizing its own unsigned candidate with the quorum's
    /// signatures. The header hash covers only the canonical fields, so
    /// attaching signatures does not change it. Anything else is a
    /// height mismatch.
    pub fn append_committed(&mut self, block: Block) -> Result<(), BlockError> {
        let mut chain = self.chain()?;
        let tip = chain.last().cloned().unwrap_or_else(Block::genesis);

        if block.height() == tip.height() + 1 {
            chain.push(block);
        } else if block.height() == tip.height() && block.header.hash() == tip.header.hash() {
            *chain.last_mut().expect("non-empty") = block;
        } else {
            return Err(BlockError::HeightMismatch {
                index: chain.len(),
                expected: tip.height() + 1,
                got: block.height(),
            });
        }

        Self::validate_chain(&chain)?;
        if let Some(db) = &self.db {
            persist_block(db, chain.last().expect("non-empty"))?;
        }
        self.chain = chain;
        Ok(())
    }

    /// Adopt `new_chain` iff it is strictly longer than the current chain
    /// and structurally valid. Persists every block on success. Returns
    /// whether the chain was replaced.
    pub fn replace_chain(&mut self, new_chain: Vec<Block>) -> Result<bool, BlockError> {
        if new_chain.len() <= self.len()? {
            return Ok(false);
        }
        Self::validate_chain(&new_chain)?;

        if let Some(db) = &self.db {
            for block in &new_chain {
                persist_block(db, block)?;
            }
        }
        info!(len = new_chain.len(), "chain replaced");
        self.chain = new_chain;
        Ok(true)
    }

    /// ADS root at the current chain tip.
    pub fn root_at_tip(&mut self) -> Result<String, BlockError> {
        let height = self.tip()?.height();
        Ok(self.store.root_at(height))
    }

    /// ADS root at an arbitrary height.
    pub fn root_at(&mut self, height: i64) -> String {
        self.store.root_at(height)
    }

    /// Proof-carrying read at a height.
    pub fn query(&mut self, key: &str, height: i64) -> Result<(Vec<u8>, Vec<ProofNode>), AdsError> {
        self.store.query(key, height)
    }

    /// Prefix scan of the live snapshot at a height.
    pub fn scan(&mut self, prefix: &str, height: i64) -> Vec<(String, Vec<u8>)> {
        self.store.scan(prefix, height)
    }

    /// Direct access to the version store, for tests and diagnostics.
    pub fn store_mut(&mut self) -> &mut VersionStore {
        &mut self.store
    }
}

/// Persisted record key: `block:{height:020}`.
fn block_key(height: i64) -> String {
    format!(
        "{BLOCK_KEY_PREFIX}{height:0>width$}",
        width = HEIGHT_PAD_WIDTH
    )
}

fn persist_block(db: &StoreDb, block: &Block) -> Result<(), BlockError> {
    let raw = serde_json::to_vec(block).map_err(|e| DbError::Serialization(e.to_string()))?;
    db.put(&block_key(block.height()), &raw)?;
    Ok(())
}

fn load_chain(db: &StoreDb) -> Result<Vec<Block>, BlockError> {
    let mut chain = Vec::new();
    for (key, raw) in db.scan_prefix(BLOCK_KEY_PREFIX)? {
        match serde_json::from_slice::<Block>(&raw) {
            Ok(block) => chain.push(block),
            Err(e) => warn!(%key, error = %e, "skipping unreadable block record"),
        }
    }
    Ok(chain)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ads::merkle::verify_proof;

    fn mem_log() -> BlockLog {
        BlockLog::in_memory(VersionStore::in_memory())
    }

    fn op(key: &str, value: &[u8]) -> Operation {
        Operation {
            key: key.to_string(),
            value: value.to_vec(),
        }
    }

    #[test]
    fn opens_with_genesis() {
        let log = mem_log();
        let chain = log.chain().unwrap();
        assert_eq!(chain.len(), 1);
        assert_eq!(chain[0], Block::genesis());
    }

    #[test]
    fn new_block_links_and_commits_root() {
        let mut log = mem_log();
        let block = log.new_block(&op("hey", b"bar"), b"pk").unwrap();

        assert_eq!(block.height(), 2);
        assert_eq!(block.header.prev_hash, Block::genesis().header.hash());
        assert_eq!(block.header.content_hash, block.header.rw_hash);

        // The committed data_hash is the root the store now reports.
        assert_eq!(block.header.data_hash_hex(), log.root_at(2));

        // And a query proof verifies against it.
        let (value, proof) = log.query("hey", 2).unwrap();
        assert_eq!(value, b"bar");
        assert!(verify_proof(&block.header.data_hash_hex(), "hey", b"bar", &proof));
    }

    #[test]
    fn apply_accepts_honest_block() {
        let mut proposer = mem_log();
        let block = proposer.new_block(&op("hey", b"bar"), b"pk").unwrap();

        let mut replica = mem_log();
        replica.apply(&block).unwrap();
        assert_eq!(replica.root_at(2), block.header.data_hash_hex());
    }

    #[test]
    fn apply_rejects_tampered_data_hash() {
        let mut proposer = mem_log();
        let mut block = proposer.new_block(&op("hey", b"bar"), b"pk").unwrap();
        block.header.data_hash = sha256(b"lies").to_vec();

        let mut replica = mem_log();
        assert!(matches!(
            replica.apply(&block),
            Err(BlockError::RootMismatch { height: 2, .. })
        ));
    }

    #[test]
    fn apply_is_idempotent() {
        let mut proposer = mem_log();
        let block = proposer.new_block(&op("hey", b"bar"), b"pk").unwrap();

        let mut replica = mem_log();
        replica.apply(&block).unwrap();
        replica.apply(&block).unwrap();
        assert_eq!(replica.root_at(2), block.header.data_hash_hex());
    }

    #[test]
    fn chain_validation_catches_breaks() {
        let mut log = mem_log();
        let b2 = log.new_block(&op("a", b"1"), b"pk").unwrap();
        let b3 = log.new_block(&op("b", b"2"), b"pk").unwrap();
        let genesis = Block::genesis();

        let good = vec![genesis.clone(), b2.clone(), b3.clone()];
        assert!(BlockLog::is_valid_chain(&good));

        // Height gap.
        let gapped = vec![genesis.clone(), b3.clone()];
        assert!(matches!(
            BlockLog::validate_chain(&gapped),
            Err(BlockError::HeightMismatch { .. })
        ));

        // Broken linkage.
        let mut unlinked = b3.clone();
        unlinked.header.prev_hash = vec![0; 32];
        assert!(matches!(
            BlockLog::validate_chain(&[genesis, b2, unlinked]),
            Err(BlockError::PrevHashMismatch { height: 3 })
        ));
    }

    #[test]
    fn replace_chain_requires_strictly_longer() {
        let mut producer = mem_log();
        let b2 = producer.new_block(&op("a", b"1"), b"pk").unwrap();
        let b3 = producer.new_block(&op("b", b"2"), b"pk").unwrap();
        let genesis = Block::genesis();

        let mut log = mem_log();
        // Same length as current (1) — refused.
        assert!(!log.replace_chain(vec![genesis.clone()]).unwrap());

        // Longer and valid — accepted.
        assert!(log
            .replace_chain(vec![genesis.clone(), b2.clone(), b3.clone()])
            .unwrap());
        assert_eq!(log.len().unwrap(), 3);

        // Shorter than current — refused, chain unchanged.
        assert!(!log.replace_chain(vec![genesis, b2]).unwrap());
        assert_eq!(log.len().unwrap(), 3);
    }

    #[test]
    fn replace_chain_rejects_invalid_and_keeps_current() {
        let mut producer = mem_log();
        let b2 = producer.new_block(&op("a", b"1"), b"pk").unwrap();
        let mut b3 = producer.new_block(&op("b", b"2"), b"pk").unwrap();
        b3.header.prev_hash = vec![9; 32];

        let mut log = mem_log();
        assert!(log
            .replace_chain(vec![Block::genesis(), b2, b3])
            .is_err());
        assert_eq!(log.len().unwrap(), 1);
    }

    #[test]
    fn persistent_log_seeds_and_reloads() {
        let db = StoreDb::open_temporary().unwrap();
        let built = {
            let store = VersionStore::in_memory();
            let mut log = BlockLog::open(db.clone(), store).unwrap();
            assert_eq!(log.len().unwrap(), 1); // genesis seeded
            log.new_block(&op("hey", b"bar"), b"pk").unwrap()
        };

        let reopened = BlockLog::open(db, VersionStore::in_memory()).unwrap();
        let chain = reopened.chain().unwrap();
        assert_eq!(chain.len(), 2);
        assert_eq!(chain[1], built);
        assert!(BlockLog::is_valid_chain(&chain));
    }

    #[test]
    fn append_committed_extends_the_tip() {
        let mut producer = mem_log();
        let b2 = producer.new_block(&op("a", b"1"), b"pk").unwrap();

        let mut log = mem_log();
        log.apply(&b2).unwrap();
        log.append_committed(b2.clone()).unwrap();
        assert_eq!(log.tip().unwrap(), b2);

        // A block that skips a height is refused.
        let mut far = b2;
        far.header.height = 9;
        assert!(matches!(
            log.append_committed(far),
            Err(BlockError::HeightMismatch { .. })
        ));
    }

    #[test]
    fn append_committed_finalizes_own_candidate() {
        // A proposer with persistence already holds its unsigned candidate
        // at the tip; committing overwrites it with the signed block.
        let db = StoreDb::open_temporary().unwrap();
        let mut log = BlockLog::open(db, VersionStore::in_memory()).unwrap();
        let candidate = log.new_block(&op("a", b"1"), b"pk").unwrap();
        assert_eq!(log.len().unwrap(), 2); // candidate is visible

        let mut signed = candidate.clone();
        signed.header.signature = vec![7; 64];
        signed.header.validators = vec!["v1".into()];
        signed.header.signatures = vec![vec![7; 64]];

        log.append_committed(signed.clone()).unwrap();
        assert_eq!(log.len().unwrap(), 2);
        assert_eq!(log.tip().unwrap(), signed);
    }
}
