use serde::{Deserialize, Serialize};

use crate::{
    auth::{PublicKey, Signature},
    crypto::{calculate_merkle_root, digest, Hash},
};

use super::transaction::VoteTransaction;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhaseSignature {
    pub signer: PublicKey,
    pub signature: Signature,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockHeader {
    pub height: u64,
    pub view: u64,
    pub prev_hash: Hash,
    pub merkle_root: Hash,
    pub timestamp: u64,
    pub proposer: PublicKey,
    /// View in which the prepare and commit sets below were collected. Later
    /// than `view` when a locked block was re-proposed.
    #[serde(default)]
    pub commit_view: u64,
    #[serde(default)]
    pub pre_prepare_signatures: Vec<PhaseSignature>,
    #[serde(default)]
    pub prepare_signatures: Vec<PhaseSignature>,
    #[serde(default)]
    pub commit_signatures: Vec<PhaseSignature>,
}

#[derive(Serialize)]
struct HeaderSignView<'a> {
    domain: &'static str,
    height: u64,
    view: u64,
    prev_hash: &'a [u8; 32],
    merkle_root: &'a [u8; 32],
    timestamp: u64,
    proposer: &'a [u8; 32],
}

impl BlockHeader {
    /// Header hash. Signature sets and `commit_view` are excluded, so the
    /// hash is fixed at proposal time and identical on every finalizing node.
    pub fn hash(&self) -> Hash {
        let bytes = bincode::serialize(&HeaderSignView {
            domain: "ballot/header/v1",
            height: self.height,
            view: self.view,
            prev_hash: &self.prev_hash.0,
            merkle_root: &self.merkle_root.0,
            timestamp: self.timestamp,
            proposer: &self.proposer.0,
        })
        .expect("serialize header sign view");
        digest(&bytes)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    pub header: BlockHeader,
    pub transactions: Vec<VoteTransaction>,
}

impl Block {
    pub fn hash(&self) -> Hash {
        self.header.hash()
    }

    pub fn height(&self) -> u64 {
        self.header.height
    }

    pub fn tx_hashes(&self) -> Vec<Hash> {
        self.transactions.iter().map(VoteTransaction::hash).collect()
    }

    /// Merkle root recomputed from the carried transaction list.
    pub fn compute_merkle_root(&self) -> Hash {
        calculate_merkle_root(&self.tx_hashes())
    }

    pub fn commit_signers(&self) -> impl Iterator<Item = &PublicKey> {
        self.header.commit_signatures.iter().map(|s| &s.signer)
    }

    pub fn has_commit_from(&self, key: &PublicKey) -> bool {
        self.commit_signers().any(|s| s == key)
    }
}
