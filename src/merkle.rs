// 7.0 merkle.rs: keccak-256 commitment over a netting batch. sorted-pair node
// combination keeps proofs order-free: node(a,b) = keccak(min(a,b) || max(a,b)).
// leaf = keccak(user:20 || amount_unsigned:32).

use crate::types::{Money, RefId, UserKey};
use sha3::{Digest, Keccak256};

pub fn keccak256(chunks: &[&[u8]]) -> [u8; 32] {
    let mut hasher = Keccak256::new();
    for chunk in chunks {
        hasher.update(chunk);
    }
    hasher.finalize().into()
}

/// Leaf hash: 20-byte user key followed by the unsigned amount left-padded to
/// 32 bytes, matching `abi.encodePacked(address, uint256)`.
pub fn leaf_hash(user: &UserKey, amount: Money) -> [u8; 32] {
    let mut amount_word = [0u8; 32];
    amount_word[24..].copy_from_slice(&amount.units().to_be_bytes());
    keccak256(&[user.as_bytes(), &amount_word])
}

fn combine(a: &[u8; 32], b: &[u8; 32]) -> [u8; 32] {
    if a <= b {
        keccak256(&[a, b])
    } else {
        keccak256(&[b, a])
    }
}

#[derive(Debug, Clone)]
pub struct MerkleTree {
    /// levels[0] = leaves, last level = root (single node).
    levels: Vec<Vec<[u8; 32]>>,
}

impl MerkleTree {
    /// Build from pre-hashed leaves. Empty input has no tree.
    pub fn build(leaves: Vec<[u8; 32]>) -> Option<MerkleTree> {
        if leaves.is_empty() {
            return None;
        }
        let mut levels = vec![leaves];
        while levels.last().expect("non-empty by construction").len() > 1 {
            let prev = levels.last().expect("non-empty by construction");
            let mut next = Vec::with_capacity(prev.len().div_ceil(2));
            for pair in prev.chunks(2) {
                match pair {
                    [a, b] => next.push(combine(a, b)),
                    // odd node promoted unchanged
                    [a] => next.push(*a),
                    _ => unreachable!("chunks(2) yields 1 or 2 items"),
                }
            }
            levels.push(next);
        }
        Some(MerkleTree { levels })
    }

    pub fn root(&self) -> [u8; 32] {
        self.levels.last().expect("non-empty by construction")[0]
    }

    pub fn root_ref(&self) -> RefId {
        RefId(self.root())
    }

    pub fn leaf_count(&self) -> usize {
        self.levels[0].len()
    }

    /// Sibling path for the leaf at `index`, bottom-up. Levels where the node
    /// had no sibling (odd promotion) contribute nothing.
    pub fn proof(&self, index: usize) -> Option<Vec<[u8; 32]>> {
        if index >= self.leaf_count() {
            return None;
        }
        let mut proof = Vec::new();
        let mut i = index;
        for level in &self.levels[..self.levels.len() - 1] {
            let sibling = i ^ 1;
            if sibling < level.len() {
                proof.push(level[sibling]);
            }
            i /= 2;
        }
        Some(proof)
    }
}

/// Re-derive the root from a leaf and its sibling path. Sorted-pair combination
/// makes left/right bookkeeping unnecessary.
pub fn verify_proof(root: &[u8; 32], leaf: &[u8; 32], proof: &[[u8; 32]]) -> bool {
    let mut node = *leaf;
    for sibling in proof {
        node = combine(&node, sibling);
    }
    node == *root
}
