//! # Merkle Engine
//!
//! A binary Merkle tree over sorted leaf hashes, rebuilt transiently for
//! whatever height is being queried. Only the root outlives the call — it
//! is the digest block headers commit to.
//!
//! ## Shape rules
//!
//! - Leaves are deduplicated by hash and sorted ascending by their hex
//!   encoding before the first combine.
//! - Each level pairs adjacent nodes as `SHA256(left || right)`; a lone
//!   trailing node is promoted to the next level *unchanged* — no
//!   duplication. Verifiers depend on this: a promoted node contributes
//!   no proof entry at that level.
//! - The empty tree has no root; callers render that as the empty string.
//!
//! The tree is stored as an array of levels. Proof paths fall out of index
//! arithmetic (`sibling = index ^ 1`, `parent = index / 2`), which is why
//! there are no node structs and no parent pointers here.

use serde::{Deserialize, Serialize};

use crate::crypto::hash::{leaf_hash, node_hash};

/// One step of an inclusion proof: a sibling hash and which side of the
/// path it sits on. `left == true` means the sibling is the left input of
/// the combine at that level.
///
/// The hash travels as lowercase hex so proofs are verifiable from any
/// language without agreeing on a byte-array encoding first.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProofNode {
    /// Lowercase-hex sibling hash.
    pub hash: String,
    /// Whether the sibling is the left operand of `SHA256(l || r)`.
    pub left: bool,
}

/// A fully built tree for one height: `levels[0]` are the sorted leaves,
/// the last level is the root (when any leaves exist).
#[derive(Clone, Debug, Default)]
pub struct MerkleTree {
    levels: Vec<Vec<[u8; 32]>>,
}

impl MerkleTree {
    /// Build a tree from raw leaf hashes. Duplicates are collapsed and
    /// leaves are sorted ascending; sorting the raw bytes is identical to
    /// sorting the hex encodings, since hex is order-preserving.
    pub fn build(mut leaves: Vec<[u8; 32]>) -> Self {
        leaves.sort_unstable();
        leaves.dedup();

        if leaves.is_empty() {
            return Self { levels: Vec::new() };
        }

        let mut levels = vec![leaves];
        while levels.last().map(Vec::len).unwrap_or(0) > 1 {
            let current = levels.last().expect("non-empty by construction");
            let mut next = Vec::with_capacity(current.len().div_ceil(2));
            for pair in current.chunks(2) {
                if pair.len() == 2 {
                    next.push(node_hash(&pair[0], &pair[1]));
                } else {
                    // Lone trailing node: promoted unchanged.
                    next.push(pair[0]);
                }
            }
            levels.push(next);
        }

        Self { levels }
    }

    /// Number of leaves in the tree.
    pub fn leaf_count(&self) -> usize {
        self.levels.first().map(Vec::len).unwrap_or(0)
    }

    /// The root hash, if the tree is non-empty.
    pub fn root(&self) -> Option<[u8; 32]> {
        self.levels.last().and_then(|l| l.first()).copied()
    }

    /// The root as lowercase hex; the empty string for an empty tree.
    pub fn root_hex(&self) -> String {
        self.root().map(hex::encode).unwrap_or_default()
    }

    /// Inclusion proof for the given leaf hash, bottom-up. Returns `None`
    /// when the leaf is not in the tree.
    ///
    /// At each level the sibling is `index ^ 1`; when that index falls off
    /// the end of the level the node was promoted and contributes nothing.
    pub fn proof_for(&self, leaf: &[u8; 32]) -> Option<Vec<ProofNode>> {
        let leaves = self.levels.first()?;
        let mut index = leaves.binary_search(leaf).ok()?;

        let mut proof = Vec::new();
        for level in &self.levels[..self.levels.len() - 1] {
            let sibling = index ^ 1;
            if sibling < level.len() {
                proof.push(ProofNode {
                    hash: hex::encode(level[sibling]),
                    left: sibling < index,
                });
            }
            index /= 2;
        }
        Some(proof)
    }
}

/// Independent proof verifier.
///
/// Recomputes the leaf from the claimed `(key, value)` pair, folds the
/// proof nodes bottom-up, and compares against the expected root. Needs
/// no access to the tree — this is exactly what a light client runs.
pub fn verify_proof(root_hex: &str, key: &str, value: &[u8], proof: &[ProofNode]) -> bool {
    let mut current = leaf_hash(key, value);
    for node in proof {
        let sibling: [u8; 32] = match hex::decode(&node.hash) {
            Ok(bytes) => match bytes.try_into() {
                Ok(arr) => arr,
                Err(_) => return false,
            },
            Err(_) => return false,
        };
        current = if node.left {
            node_hash(&sibling, &current)
        } else {
            node_hash(&current, &sibling)
        };
    }
    hex::encode(current) == root_hex
}

#[cfg(test)]
mod tests {
    use super::*;

    fn leaves_for(pairs: &[(&str, &[u8])]) -> Vec<[u8; 32]> {
        pairs.iter().map(|(k, v)| leaf_hash(k, v)).collect()
    }

    #[test]
    fn empty_tree_has_no_root() {
        let tree = MerkleTree::build(Vec::new());
        assert_eq!(tree.root(), None);
        assert_eq!(tree.root_hex(), "");
        assert_eq!(tree.leaf_count(), 0);
    }

    #[test]
    fn single_leaf_is_its_own_root() {
        let leaf = leaf_hash("hey", b"bar");
        let tree = MerkleTree::build(vec![leaf]);
        assert_eq!(tree.root(), Some(leaf));

        // The proof is empty, and it verifies.
        let proof = tree.proof_for(&leaf).unwrap();
        assert!(proof.is_empty());
        assert!(verify_proof(&tree.root_hex(), "hey", b"bar", &proof));
    }

    #[test]
    fn duplicate_leaves_are_collapsed() {
        let leaf = leaf_hash("hey", b"bar");
        let tree = MerkleTree::build(vec![leaf, leaf, leaf]);
        assert_eq!(tree.leaf_count(), 1);
        assert_eq!(tree.root(), Some(leaf));
    }

    #[test]
    fn leaves_are_sorted_regardless_of_input_order() {
        let a = leaves_for(&[("a", b"1"), ("b", b"2"), ("c", b"3")]);
        let mut b = a.clone();
        b.reverse();
        assert_eq!(
            MerkleTree::build(a).root_hex(),
            MerkleTree::build(b).root_hex()
        );
    }

    #[test]
    fn two_leaves_combine_in_sorted_order() {
        let mut leaves = leaves_for(&[("x", b"1"), ("y", b"2")]);
        let tree = MerkleTree::build(leaves.clone());
        leaves.sort_unstable();
        assert_eq!(tree.root(), Some(node_hash(&leaves[0], &leaves[1])));
    }

    #[test]
    fn lone_trailing_node_is_promoted_unchanged() {
        // Three leaves: level 1 is [H(l0||l1), l2], so the root's right
        // input must be the raw third leaf, not a re-hash of it.
        let mut leaves = leaves_for(&[("a", b"1"), ("b", b"2"), ("c", b"3")]);
        leaves.sort_unstable();
        let tree = MerkleTree::build(leaves.clone());

        let inner = node_hash(&leaves[0], &leaves[1]);
        assert_eq!(tree.root(), Some(node_hash(&inner, &leaves[2])));
    }

    #[test]
    fn proof_roundtrip_across_sizes() {
        for n in 1..=17usize {
            let pairs: Vec<(String, Vec<u8>)> = (0..n)
                .map(|i| (format!("key-{i}"), format!("value-{i}").into_bytes()))
                .collect();
            let leaves = pairs
                .iter()
                .map(|(k, v)| leaf_hash(k, v))
                .collect::<Vec<_>>();
            let tree = MerkleTree::build(leaves);
            let root = tree.root_hex();

            for (k, v) in &pairs {
                let proof = tree
                    .proof_for(&leaf_hash(k, v))
                    .unwrap_or_else(|| panic!("missing proof for {k} with {n} leaves"));
                assert!(
                    verify_proof(&root, k, v, &proof),
                    "proof failed for {k} with {n} leaves"
                );
            }
        }
    }

    #[test]
    fn verifier_rejects_wrong_value() {
        let pairs: Vec<(String, Vec<u8>)> = (0..8)
            .map(|i| (format!("key-{i}"), format!("value-{i}").into_bytes()))
            .collect();
        let tree = MerkleTree::build(pairs.iter().map(|(k, v)| leaf_hash(k, v)).collect());
        let root = tree.root_hex();

        let proof = tree.proof_for(&leaf_hash("key-3", b"value-3")).unwrap();
        assert!(!verify_proof(&root, "key-3", b"tampered", &proof));
        assert!(!verify_proof(&root, "key-4", b"value-3", &proof));
    }

    #[test]
    fn verifier_rejects_wrong_root() {
        let tree = MerkleTree::build(vec![leaf_hash("hey", b"bar")]);
        let proof = tree.proof_for(&leaf_hash("hey", b"bar")).unwrap();
        assert!(!verify_proof(&"00".repeat(32), "hey", b"bar", &proof));
    }

    #[test]
    fn verifier_rejects_malformed_proof_hash() {
        let proof = vec![ProofNode {
            hash: "not-hex".to_string(),
            left: false,
        }];
        assert!(!verify_proof(&"00".repeat(32), "hey", b"bar", &proof));
    }

    #[test]
    fn proof_for_unknown_leaf_is_none() {
        let tree = MerkleTree::build(vec![leaf_hash("hey", b"bar")]);
        assert!(tree.proof_for(&leaf_hash("other", b"x")).is_none());
    }
}
