use std::fmt;
use std::time::Instant;

use ballot_common::{
    crypto::Hash,
    types::{Block, PhaseSignature, PreparedCertificate},
};

use crate::registry::SignatureRegistry;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoundPhase {
    /// Waiting for (or about to send) the pre-prepare.
    New,
    /// A proposal has been accepted but no prepare was signed. Observers
    /// stay here until the prepare quorum forms.
    PrePrepare,
    /// Prepare sent, collecting prepares.
    Prepare,
    /// Prepare quorum reached, collecting commits.
    Commit,
    Finalized,
}

impl fmt::Display for RoundPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RoundPhase::New => "NEW",
            RoundPhase::PrePrepare => "PRE_PREPARE",
            RoundPhase::Prepare => "PREPARE",
            RoundPhase::Commit => "COMMIT",
            RoundPhase::Finalized => "FINALIZED",
        };
        f.write_str(name)
    }
}

/// Transient state for the height being decided.
#[derive(Debug, Clone)]
pub struct ConsensusRound {
    pub height: u64,
    pub view: u64,
    pub phase: RoundPhase,
    pub proposal: Option<Block>,
    pub deadline: Instant,
    pub signatures: SignatureRegistry,
}

impl ConsensusRound {
    pub fn new(height: u64, deadline: Instant) -> Self {
        Self {
            height,
            view: 0,
            phase: RoundPhase::New,
            proposal: None,
            deadline,
            signatures: SignatureRegistry::new(),
        }
    }

    /// Moves to a later view at the same height, discarding the proposal
    /// and signatures of earlier views.
    pub fn advance_view(&mut self, view: u64, deadline: Instant) {
        self.view = view;
        self.phase = RoundPhase::New;
        self.proposal = None;
        self.deadline = deadline;
        self.signatures.prune_below(view);
    }

    pub fn proposal_hash(&self) -> Option<Hash> {
        self.proposal.as_ref().map(Block::hash)
    }

    pub fn is_timed_out(&self, now: Instant) -> bool {
        now >= self.deadline
    }
}

/// A block this node saw a prepare quorum for. Kept across view changes at
/// the same height: only this block, or a proposal carrying a prepare
/// certificate from a later view, may be prepared again.
#[derive(Debug, Clone)]
pub struct LockedBlock {
    pub view: u64,
    pub block: Block,
    pub prepares: Vec<PhaseSignature>,
}

impl LockedBlock {
    pub fn hash(&self) -> Hash {
        self.block.hash()
    }

    pub fn certificate(&self) -> PreparedCertificate {
        PreparedCertificate {
            view: self.view,
            signatures: self.prepares.clone(),
        }
    }
}
