//! Incremental Merkle tree over Poseidon.
//!
//! Append-only, fixed depth. Inserts cost O(depth) via cached left-subtree
//! hashes; unfilled right siblings always take the canonical zero hash for
//! their level. A small ring of historical roots lets provers bind a note to
//! a root that has since been superseded.

use tracing::debug;

use super::field::Fr;
use super::poseidon::hash2;
use crate::error::{CoreError, CoreResult};

/// Number of superseded roots kept for async proof generation.
pub const ROOT_HISTORY_SIZE: usize = 30;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MerkleProof {
    pub root: Fr,
    pub leaf_index: u64,
    /// Sibling hash at each level, leaf level first.
    pub siblings: Vec<Fr>,
    /// Little-endian bits of the leaf index; `true` means the current node
    /// is the right child at that level.
    pub path_bits: Vec<bool>,
}

pub struct MerkleTree {
    depth: usize,
    leaves: Vec<Fr>,
    filled_subtrees: Vec<Fr>,
    root: Fr,
    /// zeros[i] is the hash of an empty subtree of height i; zeros[0] = 0.
    zeros: Vec<Fr>,
    root_history: Vec<Fr>,
    root_history_index: usize,
}

impl MerkleTree {
    pub fn new(depth: usize) -> CoreResult<Self> {
        if depth == 0 || depth > 32 {
            return Err(CoreError::MalformedInput(format!(
                "merkle depth must be in 1..=32, got {depth}"
            )));
        }
        let mut zeros = Vec::with_capacity(depth + 1);
        zeros.push(Fr::zero());
        for i in 0..depth {
            let z = hash2(&zeros[i], &zeros[i]);
            zeros.push(z);
        }
        let root = zeros[depth].clone();
        let filled_subtrees = zeros[..depth].to_vec();
        Ok(Self {
            depth,
            leaves: Vec::new(),
            filled_subtrees,
            root,
            zeros,
            root_history: Vec::with_capacity(ROOT_HISTORY_SIZE),
            root_history_index: 0,
        })
    }

    pub fn depth(&self) -> usize {
        self.depth
    }

    pub fn root(&self) -> Fr {
        self.root.clone()
    }

    pub fn next_index(&self) -> u64 {
        self.leaves.len() as u64
    }

    pub fn capacity(&self) -> u64 {
        1u64 << self.depth
    }

    pub fn leaf(&self, index: u64) -> Option<Fr> {
        self.leaves.get(index as usize).cloned()
    }

    /// Zero hash for an empty subtree of the given height.
    pub fn zero_at(&self, level: usize) -> Fr {
        self.zeros[level].clone()
    }

    /// Append a leaf, returning its index.
    pub fn insert(&mut self, leaf: Fr) -> CoreResult<u64> {
        if self.next_index() == self.capacity() {
            return Err(CoreError::TreeFull);
        }
        self.save_root_to_history();

        let index = self.next_index();
        let mut current = leaf.clone();
        let mut position = index;
        for level in 0..self.depth {
            if position & 1 == 0 {
                self.filled_subtrees[level] = current.clone();
                current = hash2(&current, &self.zeros[level]);
            } else {
                current = hash2(&self.filled_subtrees[level], &current);
            }
            position >>= 1;
        }
        self.root = current;
        self.leaves.push(leaf);
        debug!(index, root = %self.root.to_decimal(), "merkle leaf inserted");
        Ok(index)
    }

    /// Membership proof for the leaf at `index` against the current root.
    pub fn proof(&self, index: u64) -> CoreResult<MerkleProof> {
        if index >= self.next_index() {
            return Err(CoreError::MalformedInput(format!(
                "leaf index {index} out of range (have {})",
                self.next_index()
            )));
        }
        let mut siblings = Vec::with_capacity(self.depth);
        let mut path_bits = Vec::with_capacity(self.depth);
        let mut nodes = self.leaves.clone();
        let mut position = index as usize;

        for level in 0..self.depth {
            let sibling_pos = position ^ 1;
            let sibling = nodes
                .get(sibling_pos)
                .cloned()
                .unwrap_or_else(|| self.zeros[level].clone());
            siblings.push(sibling);
            path_bits.push(position & 1 == 1);

            nodes = Self::next_level(&nodes, &self.zeros[level]);
            position >>= 1;
        }

        let root = nodes
            .first()
            .cloned()
            .unwrap_or_else(|| self.zeros[self.depth].clone());
        debug_assert_eq!(root, self.root);
        Ok(MerkleProof {
            root,
            leaf_index: index,
            siblings,
            path_bits,
        })
    }

    /// Recompute the root by folding the proof path; `true` iff it matches
    /// the proof's own root.
    pub fn verify_proof(leaf: &Fr, proof: &MerkleProof) -> bool {
        if proof.siblings.len() != proof.path_bits.len() {
            return false;
        }
        let mut current = leaf.clone();
        for (sibling, is_right) in proof.siblings.iter().zip(&proof.path_bits) {
            current = if *is_right {
                hash2(sibling, &current)
            } else {
                hash2(&current, sibling)
            };
        }
        current == proof.root
    }

    /// The root as it stood after exactly `count` insertions.
    pub fn root_after(&self, count: u64) -> CoreResult<Fr> {
        if count > self.next_index() {
            return Err(CoreError::MalformedInput(format!(
                "prefix {count} exceeds leaf count {}",
                self.next_index()
            )));
        }
        let mut nodes = self.leaves[..count as usize].to_vec();
        for level in 0..self.depth {
            nodes = Self::next_level(&nodes, &self.zeros[level]);
        }
        Ok(nodes
            .into_iter()
            .next()
            .unwrap_or_else(|| self.zeros[self.depth].clone()))
    }

    /// Whether `root` is the current root or one of the recent ones.
    pub fn is_known_root(&self, root: &Fr) -> bool {
        if root.is_zero() {
            return false;
        }
        *root == self.root || self.root_history.contains(root)
    }

    fn save_root_to_history(&mut self) {
        if self.root_history.len() < ROOT_HISTORY_SIZE {
            self.root_history.push(self.root.clone());
        } else {
            self.root_history[self.root_history_index] = self.root.clone();
        }
        self.root_history_index = (self.root_history_index + 1) % ROOT_HISTORY_SIZE;
    }

    fn next_level(nodes: &[Fr], zero: &Fr) -> Vec<Fr> {
        if nodes.is_empty() {
            return Vec::new();
        }
        let mut out = Vec::with_capacity((nodes.len() + 1) / 2);
        for pair in nodes.chunks(2) {
            let left = &pair[0];
            let right = pair.get(1).unwrap_or(zero);
            out.push(hash2(left, right));
        }
        out
    }
}
