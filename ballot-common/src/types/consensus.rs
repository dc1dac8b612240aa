use std::fmt;

use serde::{Deserialize, Serialize};

use crate::{
    auth::{verify_signature, Authenticator, PublicKey, Signature},
    crypto::Hash,
};

use super::block::{Block, PhaseSignature};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Phase {
    PrePrepare,
    Prepare,
    Commit,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Phase::PrePrepare => "PRE_PREPARE",
            Phase::Prepare => "PREPARE",
            Phase::Commit => "COMMIT",
        };
        f.write_str(name)
    }
}

#[derive(Serialize)]
struct PhaseSignView<'a> {
    domain: &'static str,
    phase: Phase,
    height: u64,
    view: u64,
    block_hash: &'a [u8; 32],
}

/// Bytes signed for a consensus phase. Binds phase, height, view and block
/// hash so a signature cannot be replayed in another round.
pub fn phase_signing_bytes(phase: Phase, height: u64, view: u64, block_hash: &Hash) -> Vec<u8> {
    bincode::serialize(&PhaseSignView {
        domain: "ballot/phase/v1",
        phase,
        height,
        view,
        block_hash: &block_hash.0,
    })
    .expect("serialize phase sign view")
}

/// Prepare signatures from a quorum for one block at `view`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PreparedCertificate {
    pub view: u64,
    pub signatures: Vec<PhaseSignature>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrePrepare {
    pub height: u64,
    pub view: u64,
    pub block: Block,
    /// Present when `block` was prepared in an earlier view and is being
    /// proposed again.
    #[serde(default)]
    pub justification: Option<PreparedCertificate>,
}

/// A prepare or commit signature. The phase is given by the enclosing
/// `ConsensusMessage` variant and is part of the signed bytes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhaseVote {
    pub height: u64,
    pub view: u64,
    pub block_hash: Hash,
    pub signer: PublicKey,
    pub signature: Signature,
}

impl PhaseVote {
    pub fn signed(auth: &dyn Authenticator, phase: Phase, height: u64, view: u64, block_hash: Hash) -> Self {
        let signature = auth.sign(&phase_signing_bytes(phase, height, view, &block_hash));
        Self {
            height,
            view,
            block_hash,
            signer: auth.public_key(),
            signature,
        }
    }

    pub fn verify(&self, phase: Phase) -> bool {
        let bytes = phase_signing_bytes(phase, self.height, self.view, &self.block_hash);
        verify_signature(&self.signer, &bytes, &self.signature)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConsensusMessage {
    PrePrepare(PrePrepare),
    Prepare(PhaseVote),
    Commit(PhaseVote),
}

impl ConsensusMessage {
    pub fn height(&self) -> u64 {
        match self {
            ConsensusMessage::PrePrepare(p) => p.height,
            ConsensusMessage::Prepare(v) | ConsensusMessage::Commit(v) => v.height,
        }
    }

    pub fn view(&self) -> u64 {
        match self {
            ConsensusMessage::PrePrepare(p) => p.view,
            ConsensusMessage::Prepare(v) | ConsensusMessage::Commit(v) => v.view,
        }
    }

    pub fn phase(&self) -> Phase {
        match self {
            ConsensusMessage::PrePrepare(_) => Phase::PrePrepare,
            ConsensusMessage::Prepare(_) => Phase::Prepare,
            ConsensusMessage::Commit(_) => Phase::Commit,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{auth::Ed25519Authenticator, crypto::digest};

    #[test]
    fn test_vote_bound_to_phase_and_round() {
        let auth = Ed25519Authenticator::generate();
        let hash = digest(b"block");
        let vote = PhaseVote::signed(&auth, Phase::Prepare, 3, 0, hash);

        assert!(vote.verify(Phase::Prepare));
        assert!(!vote.verify(Phase::Commit));

        let mut replayed = vote.clone();
        replayed.view = 1;
        assert!(!replayed.verify(Phase::Prepare));

        let mut moved = vote;
        moved.height = 4;
        assert!(!moved.verify(Phase::Prepare));
    }
}
