//! Merkle tree over pending lock hashes.
//!
//! The tree stores every layer, from the leaves (lockhashes, in insertion
//! order) up to the single root. Trees are values: adding or removing a leaf
//! builds a new tree and leaves the old one valid for proofs against older
//! balance proofs.
//!
//! # Combination Rules
//!
//! These must match the on-chain verifier bit for bit:
//!
//! - A pair is hashed as `keccak256(min(a, b) || max(a, b))`, so a proof is a
//!   plain list of siblings with no left/right flags.
//! - A layer of odd length duplicates its last element: the lone node `x`
//!   gets parent `keccak256(x || x)`.
//! - The empty tree has no leaves and the all-zero root.
//! - A single-leaf tree's root is the leaf itself.

use crate::error::{StateError, StateResult};
use crate::types::{pex, Keccak256, EMPTY_MERKLE_ROOT};
use netting_crypto::keccak256_multi;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;

/// Hash two sibling nodes into their parent.
pub fn hash_pair(first: &Keccak256, second: &Keccak256) -> Keccak256 {
    let (low, high) = if first <= second {
        (first, second)
    } else {
        (second, first)
    };
    keccak256_multi(&[&low[..], &high[..]])
}

/// An immutable merkle tree, stored as its full list of layers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MerkleTree {
    layers: Vec<Vec<Keccak256>>,
}

impl MerkleTree {
    /// The canonical empty tree.
    pub fn empty() -> Self {
        Self {
            layers: vec![Vec::new(), vec![EMPTY_MERKLE_ROOT]],
        }
    }

    /// Build a tree from leaf hashes, combining them in the given order.
    ///
    /// # Errors
    /// Returns [`StateError::DuplicateLeaf`] if a leaf appears twice.
    pub fn from_leaves(leaves: &[Keccak256]) -> StateResult<Self> {
        let mut seen = HashSet::with_capacity(leaves.len());
        for leaf in leaves {
            if !seen.insert(leaf) {
                return Err(StateError::DuplicateLeaf(*leaf));
            }
        }

        if leaves.is_empty() {
            return Ok(Self::empty());
        }

        let mut layers = vec![leaves.to_vec()];
        let mut current = leaves.to_vec();

        while current.len() > 1 {
            current = current
                .chunks(2)
                .map(|pair| {
                    let right = pair.get(1).unwrap_or(&pair[0]);
                    hash_pair(&pair[0], right)
                })
                .collect();
            layers.push(current.clone());
        }

        Ok(Self { layers })
    }

    /// The root: the single element of the top layer.
    pub fn root(&self) -> Keccak256 {
        self.layers
            .last()
            .and_then(|layer| layer.first())
            .copied()
            .unwrap_or(EMPTY_MERKLE_ROOT)
    }

    /// All layers, leaves first.
    pub fn layers(&self) -> &[Vec<Keccak256>] {
        &self.layers
    }

    /// Leaf hashes in insertion order.
    pub fn leaves(&self) -> &[Keccak256] {
        self.layers.first().map(Vec::as_slice).unwrap_or(&[])
    }

    /// Number of leaves.
    pub fn len(&self) -> usize {
        self.leaves().len()
    }

    /// Whether the tree has no leaves.
    pub fn is_empty(&self) -> bool {
        self.leaves().is_empty()
    }

    /// Whether `leaf` is part of the tree.
    pub fn contains(&self, leaf: &Keccak256) -> bool {
        self.leaves().contains(leaf)
    }

    /// A new tree with `leaf` appended.
    pub fn with_leaf(&self, leaf: Keccak256) -> StateResult<Self> {
        let mut leaves = self.leaves().to_vec();
        leaves.push(leaf);
        Self::from_leaves(&leaves)
    }

    /// A new tree without `leaf`; the remaining leaves keep their order.
    ///
    /// # Errors
    /// Returns [`StateError::LeafNotFound`] if `leaf` is absent.
    pub fn without_leaf(&self, leaf: &Keccak256) -> StateResult<Self> {
        if !self.contains(leaf) {
            return Err(StateError::LeafNotFound(*leaf));
        }
        let leaves: Vec<Keccak256> = self
            .leaves()
            .iter()
            .filter(|candidate| *candidate != leaf)
            .copied()
            .collect();
        Self::from_leaves(&leaves)
    }

    /// Sibling hashes from `leaf` up to (excluding) the root.
    ///
    /// # Errors
    /// Returns [`StateError::LeafNotFound`] if `leaf` is absent.
    pub fn proof_for(&self, leaf: &Keccak256) -> StateResult<Vec<Keccak256>> {
        let mut index = self
            .leaves()
            .iter()
            .position(|candidate| candidate == leaf)
            .ok_or(StateError::LeafNotFound(*leaf))?;

        let mut proof = Vec::with_capacity(self.layers.len().saturating_sub(1));
        for layer in &self.layers[..self.layers.len() - 1] {
            let sibling = index ^ 1;
            // odd layer: the last node is paired with itself
            let sibling = if sibling < layer.len() { sibling } else { index };
            proof.push(layer[sibling]);
            index /= 2;
        }

        Ok(proof)
    }
}

impl Default for MerkleTree {
    fn default() -> Self {
        Self::empty()
    }
}

impl fmt::Display for MerkleTree {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<MerkleTree root:{}>", pex(&self.root()))
    }
}

/// Build a tree from an ordered sequence of leaf hashes.
pub fn build_tree(leaves: &[Keccak256]) -> StateResult<MerkleTree> {
    MerkleTree::from_leaves(leaves)
}

/// Root of `tree`; the zero root for the empty tree.
pub fn merkle_root(tree: &MerkleTree) -> Keccak256 {
    tree.root()
}

/// Merkle path for `leaf` in `tree`.
pub fn proof_for(tree: &MerkleTree, leaf: &Keccak256) -> StateResult<Vec<Keccak256>> {
    tree.proof_for(leaf)
}

/// Fold a proof into the root it commits to.
pub fn compute_root_from_proof(leaf: &Keccak256, proof: &[Keccak256]) -> Keccak256 {
    proof
        .iter()
        .fold(*leaf, |node, sibling| hash_pair(&node, sibling))
}

/// Check that `proof` links `leaf` to `root`.
///
/// # Errors
/// Returns [`StateError::InvalidMerkleProof`] with the computed root on mismatch.
pub fn verify_merkle_proof(
    root: &Keccak256,
    leaf: &Keccak256,
    proof: &[Keccak256],
) -> StateResult<()> {
    let actual = compute_root_from_proof(leaf, proof);
    if actual != *root {
        return Err(StateError::InvalidMerkleProof {
            expected: *root,
            actual,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use netting_crypto::keccak256;

    fn leaves(n: u8) -> Vec<Keccak256> {
        (0..n).map(|i| keccak256(&[i])).collect()
    }

    #[test]
    fn test_empty_tree() {
        let tree = build_tree(&[]).unwrap();

        assert_eq!(merkle_root(&tree), EMPTY_MERKLE_ROOT);
        assert_eq!(tree.layers(), &[vec![], vec![EMPTY_MERKLE_ROOT]]);
        assert_eq!(tree, MerkleTree::empty());
        assert!(tree.is_empty());
    }

    #[test]
    fn test_single_leaf_root_is_leaf() {
        let leaf = keccak256(b"lock");
        let tree = build_tree(&[leaf]).unwrap();

        assert_eq!(tree.root(), leaf);
        assert_eq!(tree.layers().len(), 1);
        assert!(tree.proof_for(&leaf).unwrap().is_empty());
    }

    #[test]
    fn test_two_leaves_sorted_pair() {
        let l = leaves(2);
        let tree = build_tree(&l).unwrap();
        let reversed = build_tree(&[l[1], l[0]]).unwrap();

        assert_eq!(tree.root(), hash_pair(&l[0], &l[1]));
        assert_eq!(tree.root(), reversed.root());
    }

    #[test]
    fn test_odd_layer_duplicates_last() {
        let l = leaves(3);
        let tree = build_tree(&l).unwrap();

        let left = hash_pair(&l[0], &l[1]);
        let right = hash_pair(&l[2], &l[2]);
        assert_eq!(tree.layers()[1], vec![left, right]);
        assert_eq!(tree.root(), hash_pair(&left, &right));
        assert_eq!(right, keccak256_multi(&[&l[2][..], &l[2][..]]));
    }

    #[test]
    fn test_five_leaves_duplicate_at_each_odd_layer() {
        let l = leaves(5);
        let tree = build_tree(&l).unwrap();

        let a = hash_pair(&l[0], &l[1]);
        let b = hash_pair(&l[2], &l[3]);
        let c = hash_pair(&l[4], &l[4]);
        let ab = hash_pair(&a, &b);
        let cc = hash_pair(&c, &c);
        assert_eq!(tree.root(), hash_pair(&ab, &cc));
        assert_eq!(tree.layers().len(), 4);
    }

    #[test]
    fn test_proofs_recompute_root() {
        for n in 1..=9u8 {
            let l = leaves(n);
            let tree = build_tree(&l).unwrap();
            for leaf in &l {
                let proof = proof_for(&tree, leaf).unwrap();
                assert_eq!(compute_root_from_proof(leaf, &proof), tree.root(), "n={}", n);
                assert!(verify_merkle_proof(&tree.root(), leaf, &proof).is_ok());
            }
        }
    }

    #[test]
    fn test_proof_for_missing_leaf() {
        let tree = build_tree(&leaves(3)).unwrap();
        assert!(matches!(
            tree.proof_for(&[0xEE; 32]),
            Err(StateError::LeafNotFound(_))
        ));
        assert!(build_tree(&[]).unwrap().proof_for(&[0u8; 32]).is_err());
    }

    #[test]
    fn test_tampered_proof_rejected() {
        let l = leaves(4);
        let tree = build_tree(&l).unwrap();
        let mut proof = tree.proof_for(&l[1]).unwrap();
        proof[0][0] ^= 1;

        assert!(matches!(
            verify_merkle_proof(&tree.root(), &l[1], &proof),
            Err(StateError::InvalidMerkleProof { .. })
        ));
    }

    #[test]
    fn test_duplicate_leaf_rejected() {
        let leaf = keccak256(b"x");
        assert!(matches!(
            build_tree(&[leaf, leaf]),
            Err(StateError::DuplicateLeaf(_))
        ));
        let tree = build_tree(&[leaf]).unwrap();
        assert!(tree.with_leaf(leaf).is_err());
    }

    #[test]
    fn test_with_and_without_leaf_are_persistent() {
        let l = leaves(3);
        let base = build_tree(&l[..2]).unwrap();
        let grown = base.with_leaf(l[2]).unwrap();
        let shrunk = grown.without_leaf(&l[2]).unwrap();

        assert_eq!(base.len(), 2);
        assert_eq!(grown.len(), 3);
        assert_eq!(shrunk, base);
        assert!(grown.without_leaf(&[0xAA; 32]).is_err());
    }

    #[test]
    fn test_removing_last_leaf_gives_empty_tree() {
        let leaf = keccak256(b"only");
        let tree = build_tree(&[leaf]).unwrap().without_leaf(&leaf).unwrap();
        assert_eq!(tree, MerkleTree::empty());
    }
}
