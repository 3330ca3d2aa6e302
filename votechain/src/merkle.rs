//! Binary SHA-256 Merkle tree with sorted-pair hashing.
//!
//! Each pair of nodes is sorted before concatenation, so a proof is just the list of siblings
//! with no left/right flags. An unpaired trailing node is promoted to the next layer unchanged.
//! The root of an empty tree is all zeroes.

use crate::util::{decode_hash, sha256, Hash};
use crate::{Error, Result};

pub const EMPTY_ROOT: Hash = [0u8; 32];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MerkleTree {
    // layers[0] holds the leaves, the last layer holds the root
    layers: Vec<Vec<Hash>>,
}

/// Hash two nodes in canonical order
pub fn hash_pair(a: &Hash, b: &Hash) -> Hash {
    if a <= b {
        sha256(&[a, b])
    } else {
        sha256(&[b, a])
    }
}

impl MerkleTree {
    pub fn build(leaves: &[Hash]) -> Self {
        let mut layers = vec![leaves.to_vec()];

        while layers[layers.len() - 1].len() > 1 {
            let next = layers[layers.len() - 1]
                .chunks(2)
                .map(|pair| match pair {
                    [a, b] => hash_pair(a, b),
                    [a, ..] => *a,
                    [] => EMPTY_ROOT,
                })
                .collect();
            layers.push(next);
        }

        MerkleTree { layers }
    }

    /// Build from hex encoded leaves, None if any leaf is not a 32 byte hex digest
    pub fn from_hex_leaves<S: AsRef<str>>(leaves: &[S]) -> Option<Self> {
        let leaves: Option<Vec<Hash>> = leaves.iter().map(|l| decode_hash(l.as_ref())).collect();
        leaves.map(|l| Self::build(&l))
    }

    pub fn leaves(&self) -> &[Hash] {
        &self.layers[0]
    }

    pub fn root(&self) -> Hash {
        match self.layers.last().and_then(|top| top.first()) {
            Some(root) => *root,
            None => EMPTY_ROOT,
        }
    }

    pub fn root_hex(&self) -> String {
        hex::encode(self.root())
    }

    /// Sibling hashes on the path from `leaf` to the root
    pub fn proof(&self, leaf: &Hash) -> Result<Vec<Hash>> {
        let mut position = self.layers[0]
            .iter()
            .position(|l| l == leaf)
            .ok_or(Error::LeafNotFound)?;

        let mut proof = Vec::with_capacity(self.layers.len());
        for layer in &self.layers[..self.layers.len() - 1] {
            let sibling = position ^ 1;
            if let Some(hash) = layer.get(sibling) {
                proof.push(*hash);
            }
            position /= 2;
        }
        Ok(proof)
    }

    /// Proof as lowercase hex strings, as carried in receipts
    pub fn proof_hex(&self, leaf: &Hash) -> Result<Vec<String>> {
        Ok(self.proof(leaf)?.iter().map(hex::encode).collect())
    }
}

pub fn verify_proof(leaf: &Hash, proof: &[Hash], root: &Hash) -> bool {
    let computed = proof
        .iter()
        .fold(*leaf, |node, sibling| hash_pair(&node, sibling));
    &computed == root
}

/// Hex variant of [`verify_proof`]; malformed input never verifies.
pub fn verify_proof_hex<S: AsRef<str>>(leaf: &str, proof: &[S], root: &str) -> bool {
    let (leaf, root) = match (decode_hash(leaf), decode_hash(root)) {
        (Some(leaf), Some(root)) => (leaf, root),
        _ => return false,
    };
    let proof: Option<Vec<Hash>> = proof.iter().map(|p| decode_hash(p.as_ref())).collect();
    match proof {
        Some(proof) => verify_proof(&leaf, &proof, &root),
        None => false,
    }
}
