use rs_merkle::{algorithms::Sha256, MerkleTree};

use super::hash::Hash;

/// Calculates the Merkle root over an ordered list of leaf hashes.
/// An empty list commits to the zero hash.
pub fn calculate_merkle_root(leaves: &[Hash]) -> Hash {
    if leaves.is_empty() {
        return Hash::ZERO;
    }

    let leaves: Vec<[u8; 32]> = leaves.iter().map(|h| h.0).collect();
    let tree = MerkleTree::<Sha256>::from_leaves(&leaves);

    tree.root().map(Hash).unwrap_or(Hash::ZERO)
}
