use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, error, info, warn};

use ballot_common::{
    auth::{verify_signature, Authenticator, PublicKey},
    crypto::{calculate_merkle_root, Hash},
    types::{
        phase_signing_bytes, Block, BlockHeader, Committee, ConsensusMessage, NodeStatus, Phase, PhaseSignature,
        PhaseVote, PrePrepare, Validator, VoteTransaction,
    },
    utils::time::current_time,
    BallotError, Result, ValidationError,
};
use ballot_mempool::Mempool;

use crate::{
    chain::Chain,
    config::ConsensusConfig,
    evaluator::bft_quorum,
    registry::{EquivocationEvidence, Registration},
    reputation::ReputationLedger,
    round::{ConsensusRound, LockedBlock, RoundPhase},
    selector::ValidatorSelector,
};

/// Votes are accepted this many views ahead of the current one and held
/// until the round catches up.
pub const MAX_VIEW_LOOKAHEAD: u64 = 8;

/// Cap on messages buffered for the next height.
const MAX_PENDING: usize = 1_024;

/// Per-signer share of the next-height buffer: a pre-prepare, a prepare and
/// a commit for every view within the lookahead.
const MAX_PENDING_PER_SIGNER: usize = 3 * (MAX_VIEW_LOOKAHEAD as usize + 1);

/// Output of one engine transition: messages to broadcast and, when the
/// transition finalized a block, that block.
#[derive(Debug, Default)]
pub struct Step {
    pub outbound: Vec<ConsensusMessage>,
    pub finalized: Vec<Block>,
}

impl Step {
    fn extend(&mut self, other: Step) {
        self.outbound.extend(other.outbound);
        self.finalized.extend(other.finalized);
    }

    pub fn is_empty(&self) -> bool {
        self.outbound.is_empty() && self.finalized.is_empty()
    }
}

/// Per-height pre-prepare / prepare / commit state machine.
///
/// The engine is synchronous and never reads the clock for deadlines;
/// callers pass `now` and broadcast whatever `Step::outbound` contains.
pub struct ConsensusEngine {
    config: ConsensusConfig,
    auth: Arc<dyn Authenticator>,
    local_key: PublicKey,
    mempool: Arc<Mempool>,
    selector: ValidatorSelector,
    ledger: ReputationLedger,
    committee: Committee,
    chain: Chain,
    round: ConsensusRound,
    locked: Option<LockedBlock>,
    pending: Vec<(PublicKey, ConsensusMessage)>,
    evidence: Vec<EquivocationEvidence>,
    halted: Option<(usize, usize)>,
}

impl ConsensusEngine {
    /// Builds an engine at height 1 with the epoch-0 committee selected from
    /// `genesis`.
    pub fn new(
        config: ConsensusConfig,
        auth: Arc<dyn Authenticator>,
        mempool: Arc<Mempool>,
        genesis: Vec<Validator>,
        now: Instant,
    ) -> Result<Self> {
        let ledger = ReputationLedger::from_validators(genesis, config.max_reputation);
        let selector = ValidatorSelector::new(config.committee_size);
        let committee = selector.select_committee(&ledger.snapshot(), 0)?;
        let local_key = auth.public_key();

        if !committee.contains(&local_key) {
            info!("👀 Local key {} is not in the committee, running as observer", local_key);
        }

        let round = ConsensusRound::new(1, now + config.round_timeout());
        Ok(Self {
            config,
            auth,
            local_key,
            mempool,
            selector,
            ledger,
            committee,
            chain: Chain::new(),
            round,
            locked: None,
            pending: Vec::new(),
            evidence: Vec::new(),
            halted: None,
        })
    }

    pub fn local_key(&self) -> PublicKey {
        self.local_key
    }

    /// Height of the last finalized block.
    pub fn height(&self) -> u64 {
        self.chain.height()
    }

    /// Height currently being decided.
    pub fn current_height(&self) -> u64 {
        self.round.height
    }

    pub fn view(&self) -> u64 {
        self.round.view
    }

    pub fn phase(&self) -> RoundPhase {
        self.round.phase
    }

    pub fn round(&self) -> &ConsensusRound {
        &self.round
    }

    pub fn deadline(&self) -> Instant {
        self.round.deadline
    }

    pub fn locked(&self) -> Option<&LockedBlock> {
        self.locked.as_ref()
    }

    /// Messages held for the next height.
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn committee(&self) -> &Committee {
        &self.committee
    }

    pub fn chain(&self) -> &Chain {
        &self.chain
    }

    pub fn ledger(&self) -> &ReputationLedger {
        &self.ledger
    }

    pub fn config(&self) -> &ConsensusConfig {
        &self.config
    }

    pub fn evidence(&self) -> &[EquivocationEvidence] {
        &self.evidence
    }

    pub fn is_halted(&self) -> bool {
        self.halted.is_some()
    }

    pub fn quorum(&self) -> usize {
        bft_quorum(self.committee.len())
    }

    pub fn proposer_for(&self, height: u64, view: u64) -> Option<PublicKey> {
        if self.committee.is_empty() {
            return None;
        }
        let index = (height.wrapping_add(view) % self.committee.len() as u64) as usize;
        self.committee.get(index).map(|v| v.public_key)
    }

    pub fn is_proposer(&self) -> bool {
        self.proposer_for(self.round.height, self.round.view) == Some(self.local_key)
    }

    pub fn status(&self) -> NodeStatus {
        NodeStatus {
            height: self.chain.height(),
            latest_block_hash: self.chain.tip_hash(),
            tally: self.chain.tally().clone(),
            total_votes: self.chain.total_votes(),
            active_validator_count: self.committee.len(),
            view: self.round.view,
            phase: self.round.phase.to_string(),
            epoch: self.committee.epoch,
        }
    }

    /// Round timeout for `view`, doubling per view up to 8x.
    pub fn view_timeout(&self, view: u64) -> Duration {
        self.config.round_timeout() * (1u32 << view.min(3))
    }

    fn ensure_running(&self) -> Result<()> {
        match self.halted {
            Some((available, required)) => Err(BallotError::InsufficientValidators { available, required }),
            None => Ok(()),
        }
    }

    /// Builds, signs and self-accepts a block for the current height and view.
    /// A locked block is proposed again, unchanged, with its prepare
    /// certificate.
    pub fn propose(&mut self, now: Instant) -> Result<Step> {
        self.ensure_running()?;

        if !self.is_proposer() {
            debug!(
                "Not the proposer for height {} view {}",
                self.round.height, self.round.view
            );
            return Ok(Step::default());
        }
        if self.round.phase != RoundPhase::New {
            return Ok(Step::default());
        }

        let height = self.round.height;
        let view = self.round.view;
        let (mut block, justification) = match &self.locked {
            Some(lock) => (lock.block.clone(), Some(lock.certificate())),
            None => (self.build_block(height, view), None),
        };
        let hash = block.hash();
        block.header.pre_prepare_signatures.push(PhaseSignature {
            signer: self.local_key,
            signature: self
                .auth
                .sign(&phase_signing_bytes(Phase::PrePrepare, height, view, &hash)),
        });

        info!(
            target: "consensus",
            "EVENT:PROPOSE height={} view={} hash={} txs={} proposer={} reproposal={}",
            height,
            view,
            hash,
            block.transactions.len(),
            self.local_key,
            justification.is_some()
        );

        let mut step = Step::default();
        step.outbound.push(ConsensusMessage::PrePrepare(PrePrepare {
            height,
            view,
            block: block.clone(),
            justification,
        }));
        step.extend(self.accept_proposal(block, now));
        step.extend(self.progress(now)?);
        Ok(step)
    }

    fn build_block(&self, height: u64, view: u64) -> Block {
        let transactions = self.select_batch();
        let tx_hashes: Vec<Hash> = transactions.iter().map(VoteTransaction::hash).collect();
        let header = BlockHeader {
            height,
            view,
            prev_hash: self.chain.tip_hash(),
            merkle_root: calculate_merkle_root(&tx_hashes),
            timestamp: current_time(),
            proposer: self.local_key,
            commit_view: view,
            pre_prepare_signatures: vec![],
            prepare_signatures: vec![],
            commit_signatures: vec![],
        };
        Block { header, transactions }
    }

    /// Up to `max_batch` pooled ballots in arrival order, skipping any that
    /// would make the block invalid.
    fn select_batch(&self) -> Vec<VoteTransaction> {
        let mut hashes = HashSet::new();
        let mut ballots = HashSet::new();
        self.mempool
            .drain(self.config.max_batch)
            .into_iter()
            .filter(|tx| {
                let hash = tx.hash();
                tx.validate_stateless().is_ok()
                    && !self.chain.contains_tx(&hash)
                    && !self.chain.has_voted(&tx.voter_public_key, &tx.election_id)
                    && hashes.insert(hash)
                    && ballots.insert((tx.voter_public_key, tx.election_id.clone()))
            })
            .collect()
    }

    /// Applies a message from the network (or from this node's own outbound
    /// queue looped back).
    pub fn handle_message(&mut self, message: ConsensusMessage, now: Instant) -> Result<Step> {
        self.ensure_running()?;

        if message.height() == self.round.height + 1 {
            self.buffer_next_height(message)?;
            return Ok(Step::default());
        }

        let mut step = match message {
            ConsensusMessage::PrePrepare(pre_prepare) => self.handle_pre_prepare(pre_prepare, now)?,
            ConsensusMessage::Prepare(vote) => self.handle_vote(Phase::Prepare, vote, now)?,
            ConsensusMessage::Commit(vote) => self.handle_vote(Phase::Commit, vote, now)?,
        };
        step.extend(self.replay_pending(now));
        Ok(step)
    }

    /// Holds a verified message for the next height. Signers are checked
    /// against the current committee unless this height closes an epoch,
    /// in which case only the signature is checked.
    fn buffer_next_height(&mut self, message: ConsensusMessage) -> std::result::Result<(), ValidationError> {
        let view = message.view();
        if view > MAX_VIEW_LOOKAHEAD {
            return Err(ValidationError::Stale(format!("view {} too far ahead for the next height", view)));
        }
        let closes_epoch = self.config.epoch_length > 0 && self.round.height % self.config.epoch_length == 0;

        let signer = match &message {
            ConsensusMessage::PrePrepare(pre_prepare) => {
                let header = &pre_prepare.block.header;
                let bytes = phase_signing_bytes(Phase::PrePrepare, pre_prepare.height, view, &header.hash());
                let expected = if closes_epoch {
                    None
                } else {
                    Some(
                        self.proposer_for(pre_prepare.height, view)
                            .ok_or(ValidationError::NotInCommittee(header.proposer))?,
                    )
                };
                header
                    .pre_prepare_signatures
                    .iter()
                    .find(|s| {
                        expected.map_or(true, |key| key == s.signer)
                            && verify_signature(&s.signer, &bytes, &s.signature)
                    })
                    .map(|s| s.signer)
                    .ok_or_else(|| {
                        ValidationError::InvalidSignature(format!(
                            "pre-prepare for height {} view {} is not signed by its proposer",
                            pre_prepare.height, view
                        ))
                    })?
            }
            ConsensusMessage::Prepare(vote) | ConsensusMessage::Commit(vote) => {
                if !closes_epoch && !self.committee.contains(&vote.signer) {
                    return Err(ValidationError::NotInCommittee(vote.signer));
                }
                let phase = message.phase();
                if !vote.verify(phase) {
                    return Err(ValidationError::InvalidSignature(format!("{} vote from {}", phase, vote.signer)));
                }
                vote.signer
            }
        };

        if self.pending.iter().any(|(_, held)| *held == message) {
            return Ok(());
        }
        let from_signer = self.pending.iter().filter(|(key, _)| *key == signer).count();
        if from_signer >= MAX_PENDING_PER_SIGNER {
            warn!(
                "⚠️ Dropping {} for height {} from {}: {} already held",
                message.phase(),
                message.height(),
                signer,
                from_signer
            );
            return Ok(());
        }
        if self.pending.len() >= MAX_PENDING {
            warn!(
                "⚠️ Dropping {} for height {} from {}: next-height buffer full",
                message.phase(),
                message.height(),
                signer
            );
            return Ok(());
        }

        debug!("Buffering {} from {} for next height {}", message.phase(), signer, message.height());
        self.pending.push((signer, message));
        Ok(())
    }

    fn check_round(&self, height: u64, view: u64) -> std::result::Result<(), ValidationError> {
        if height != self.round.height {
            return Err(ValidationError::Stale(format!(
                "height {} while deciding {}",
                height, self.round.height
            )));
        }
        if view < self.round.view {
            return Err(ValidationError::Stale(format!("view {} below current {}", view, self.round.view)));
        }
        if view > self.round.view + MAX_VIEW_LOOKAHEAD {
            return Err(ValidationError::Stale(format!(
                "view {} too far ahead of {}",
                view, self.round.view
            )));
        }
        Ok(())
    }

    fn handle_pre_prepare(&mut self, pre_prepare: PrePrepare, now: Instant) -> Result<Step> {
        self.check_round(pre_prepare.height, pre_prepare.view)?;

        let hash = pre_prepare.block.hash();
        if pre_prepare.view == self.round.view {
            if let Some(current) = self.round.proposal_hash() {
                if current != hash {
                    warn!(
                        "🚨 Conflicting proposal {} at height {} view {} (accepted {})",
                        hash, pre_prepare.height, pre_prepare.view, current
                    );
                }
                return Ok(Step::default());
            }
        }

        info!(
            target: "consensus",
            "EVENT:RECEIVE_PROPOSAL height={} view={} hash={} proposer={}",
            pre_prepare.height,
            pre_prepare.view,
            hash,
            pre_prepare.block.header.proposer
        );

        if let Err(e) = self.validate_proposal(&pre_prepare) {
            warn!(target: "consensus", "EVENT:VERIFY_PROPOSAL_FAIL hash={} reason={}", hash, e);
            return Err(e.into());
        }

        if self.locked.as_ref().is_some_and(|lock| lock.hash() != hash) {
            if let Some(lock) = self.locked.take() {
                info!(
                    "🔓 Released lock on {} (view {}) for {} prepared at a later view",
                    lock.hash(),
                    lock.view,
                    hash
                );
            }
        }

        if pre_prepare.view > self.round.view {
            let deadline = now + self.view_timeout(pre_prepare.view);
            self.round.advance_view(pre_prepare.view, deadline);
            info!(
                target: "consensus",
                "EVENT:VIEW_CHANGE height={} view={} reason=proposal",
                self.round.height,
                self.round.view
            );
        }

        let mut step = self.accept_proposal(pre_prepare.block, now);
        step.extend(self.progress(now)?);
        Ok(step)
    }

    /// Full check of a proposed block against the current chain tip and
    /// this node's lock.
    fn validate_proposal(&self, pre_prepare: &PrePrepare) -> std::result::Result<(), ValidationError> {
        let block = &pre_prepare.block;
        let header = &block.header;
        let hash = header.hash();

        if header.height != pre_prepare.height || header.view > pre_prepare.view {
            return Err(ValidationError::BadLinkage(format!(
                "header round ({}, {}) does not fit message round ({}, {})",
                header.height, header.view, pre_prepare.height, pre_prepare.view
            )));
        }

        // 1. Proposer identity. A block from an earlier view must carry a
        // prepare certificate no older than the block.
        let expected = self
            .proposer_for(pre_prepare.height, pre_prepare.view)
            .ok_or(ValidationError::NotInCommittee(header.proposer))?;
        if header.view == pre_prepare.view {
            if header.proposer != expected {
                return Err(ValidationError::WrongProposer {
                    expected,
                    actual: header.proposer,
                });
            }
        } else {
            let certificate = pre_prepare.justification.as_ref().ok_or_else(|| {
                ValidationError::InvalidCertificate(format!(
                    "block from view {} proposed at view {} without a prepare certificate",
                    header.view, pre_prepare.view
                ))
            })?;
            if certificate.view < header.view || certificate.view >= pre_prepare.view {
                return Err(ValidationError::InvalidCertificate(format!(
                    "certificate view {} outside [{}, {})",
                    certificate.view, header.view, pre_prepare.view
                )));
            }
            self.verify_certificate(Phase::Prepare, header.height, certificate.view, &hash, &certificate.signatures)?;
        }

        // 2. Proposer signature for this view
        let bytes = phase_signing_bytes(Phase::PrePrepare, pre_prepare.height, pre_prepare.view, &hash);
        let signed = header
            .pre_prepare_signatures
            .iter()
            .any(|s| s.signer == expected && verify_signature(&s.signer, &bytes, &s.signature));
        if !signed {
            return Err(ValidationError::InvalidSignature(format!(
                "missing or bad pre-prepare signature from {}",
                expected
            )));
        }

        // 3. Lock. A different block needs a certificate newer than the lock.
        if let Some(lock) = &self.locked {
            let newer = pre_prepare
                .justification
                .as_ref()
                .is_some_and(|certificate| certificate.view > lock.view);
            if lock.hash() != hash && !newer {
                return Err(ValidationError::ConflictsWithLock {
                    locked: lock.hash(),
                    proposed: hash,
                });
            }
        }

        self.validate_contents(block)
    }

    /// Linkage, merkle root and per-ballot checks shared by proposals and
    /// blocks finalized elsewhere.
    fn validate_contents(&self, block: &Block) -> std::result::Result<(), ValidationError> {
        let header = &block.header;

        if header.height != self.chain.height() + 1 || header.prev_hash != self.chain.tip_hash() {
            return Err(ValidationError::BadLinkage(format!(
                "block {} at height {} does not extend tip {} at height {}",
                header.hash(),
                header.height,
                self.chain.tip_hash(),
                self.chain.height()
            )));
        }

        // Merkle root over the carried list
        let computed = block.compute_merkle_root();
        if computed != header.merkle_root {
            return Err(ValidationError::MerkleMismatch {
                header: header.merkle_root,
                computed,
            });
        }

        let mut hashes = HashSet::new();
        let mut ballots = HashSet::new();
        for tx in &block.transactions {
            tx.validate_stateless()?;
            let tx_hash = tx.hash();
            if !hashes.insert(tx_hash) {
                return Err(ValidationError::DuplicateInBlock(tx_hash));
            }
            if self.chain.contains_tx(&tx_hash) {
                return Err(ValidationError::AlreadyFinalized(tx_hash));
            }
            let fresh = ballots.insert((tx.voter_public_key, tx.election_id.clone()));
            if !fresh || self.chain.has_voted(&tx.voter_public_key, &tx.election_id) {
                return Err(ValidationError::DoubleVote {
                    voter: tx.voter_public_key,
                    election: tx.election_id.clone(),
                });
            }
        }

        Ok(())
    }

    /// Requires valid `phase` signatures over `block_hash` from a quorum of
    /// distinct committee members.
    fn verify_certificate(
        &self,
        phase: Phase,
        height: u64,
        view: u64,
        block_hash: &Hash,
        signatures: &[PhaseSignature],
    ) -> std::result::Result<(), ValidationError> {
        let bytes = phase_signing_bytes(phase, height, view, block_hash);
        let signers: HashSet<PublicKey> = signatures
            .iter()
            .filter(|s| self.committee.contains(&s.signer) && verify_signature(&s.signer, &bytes, &s.signature))
            .map(|s| s.signer)
            .collect();

        let quorum = self.quorum();
        if signers.len() < quorum {
            return Err(ValidationError::InvalidCertificate(format!(
                "{} valid {} signatures at view {}, quorum {}",
                signers.len(),
                phase,
                view,
                quorum
            )));
        }
        Ok(())
    }

    /// Stores the proposal and, for committee members, signs a prepare.
    /// The round timer restarts from acceptance.
    fn accept_proposal(&mut self, block: Block, now: Instant) -> Step {
        let hash = block.hash();
        let height = self.round.height;
        let view = self.round.view;
        self.round.proposal = Some(block);
        self.round.phase = RoundPhase::PrePrepare;
        self.round.deadline = now + self.view_timeout(view);

        let mut step = Step::default();
        if self.committee.contains(&self.local_key) {
            self.round.phase = RoundPhase::Prepare;
            let vote = PhaseVote::signed(self.auth.as_ref(), Phase::Prepare, height, view, hash);
            self.round
                .signatures
                .register(Phase::Prepare, view, hash, vote.signer, vote.signature);
            info!(
                target: "consensus",
                "EVENT:PREPARE height={} view={} hash={} signer={}",
                height,
                view,
                hash,
                self.local_key
            );
            step.outbound.push(ConsensusMessage::Prepare(vote));
        }
        step
    }

    fn handle_vote(&mut self, phase: Phase, vote: PhaseVote, now: Instant) -> Result<Step> {
        self.check_round(vote.height, vote.view)?;

        if !self.committee.contains(&vote.signer) {
            return Err(ValidationError::NotInCommittee(vote.signer).into());
        }
        if !vote.verify(phase) {
            return Err(ValidationError::InvalidSignature(format!("{} vote from {}", phase, vote.signer)).into());
        }

        match self
            .round
            .signatures
            .register(phase, vote.view, vote.block_hash, vote.signer, vote.signature)
        {
            Registration::Added => {
                debug!(
                    "📥 {} from {} for {} (height {}, view {})",
                    phase,
                    vote.signer,
                    vote.block_hash,
                    vote.height,
                    vote.view
                );
            }
            Registration::Duplicate => return Ok(Step::default()),
            Registration::Equivocation(evidence) => {
                warn!(
                    "🚨 Validator {} equivocated in {} at view {}: {} vs {}",
                    evidence.offender, evidence.phase, evidence.view, evidence.first, evidence.second
                );
                self.evidence.push(evidence);
                return Ok(Step::default());
            }
        }

        self.progress(now)
    }

    /// Advances Prepare -> Commit -> Finalized as far as collected
    /// signatures allow.
    fn progress(&mut self, now: Instant) -> Result<Step> {
        let mut step = Step::default();
        let Some(hash) = self.round.proposal_hash() else {
            return Ok(step);
        };
        let height = self.round.height;
        let view = self.round.view;
        let quorum = self.quorum();

        let collecting = matches!(self.round.phase, RoundPhase::PrePrepare | RoundPhase::Prepare);
        if collecting && self.round.signatures.count(Phase::Prepare, view, &hash) >= quorum {
            if let Some(block) = self.round.proposal.clone() {
                debug!("🔒 Locked on {} at height {} view {}", hash, height, view);
                self.locked = Some(LockedBlock {
                    view,
                    block,
                    prepares: self.round.signatures.signatures(Phase::Prepare, view, &hash),
                });
            }
            self.round.phase = RoundPhase::Commit;
            if self.committee.contains(&self.local_key) {
                let vote = PhaseVote::signed(self.auth.as_ref(), Phase::Commit, height, view, hash);
                self.round
                    .signatures
                    .register(Phase::Commit, view, hash, vote.signer, vote.signature);
                info!(
                    target: "consensus",
                    "EVENT:COMMIT height={} view={} hash={} signer={}",
                    height,
                    view,
                    hash,
                    self.local_key
                );
                step.outbound.push(ConsensusMessage::Commit(vote));
            }
        }

        if self.round.phase == RoundPhase::Commit && self.round.signatures.count(Phase::Commit, view, &hash) >= quorum {
            let block = self.finalize(now)?;
            step.finalized.push(block);
        }

        Ok(step)
    }

    /// Finalizes the current proposal.
    ///
    /// Fails with `QuorumTimeout` and changes nothing unless both the
    /// prepare and commit sets have reached quorum.
    pub fn finalize(&mut self, now: Instant) -> Result<Block> {
        self.ensure_running()?;

        let height = self.round.height;
        let view = self.round.view;
        let quorum = self.quorum();
        let (prepares, commits) = match self.round.proposal_hash() {
            Some(hash) => (
                self.round.signatures.count(Phase::Prepare, view, &hash),
                self.round.signatures.count(Phase::Commit, view, &hash),
            ),
            None => (0, 0),
        };
        let Some(mut block) = self.round.proposal.clone().filter(|_| prepares >= quorum && commits >= quorum) else {
            return Err(BallotError::QuorumTimeout {
                height,
                view,
                prepares,
                commits,
                quorum,
            });
        };

        let hash = block.hash();
        block.header.commit_view = view;
        block.header.prepare_signatures = self.round.signatures.signatures(Phase::Prepare, view, &hash);
        block.header.commit_signatures = self.round.signatures.signatures(Phase::Commit, view, &hash);

        self.commit_block(block, now)
    }

    /// Applies a block finalized by the rest of the committee, checked
    /// against its commit certificate. Used by catch-up and block gossip.
    pub fn apply_finalized(&mut self, block: Block, now: Instant) -> Result<Step> {
        self.ensure_running()?;

        let height = block.height();
        if height <= self.chain.height() {
            return Err(ValidationError::Stale(format!("block {} already finalized", height)).into());
        }
        self.validate_contents(&block)?;

        let hash = block.hash();
        self.verify_certificate(
            Phase::Commit,
            height,
            block.header.commit_view,
            &hash,
            &block.header.commit_signatures,
        )?;
        info!(
            target: "consensus",
            "EVENT:SYNC_BLOCK height={} view={} hash={} commits={}",
            height,
            block.header.commit_view,
            hash,
            block.header.commit_signatures.len()
        );

        let mut step = Step::default();
        step.finalized.push(self.commit_block(block, now)?);
        step.extend(self.replay_pending(now));
        Ok(step)
    }

    /// Appends a decided block and starts the next height.
    fn commit_block(&mut self, block: Block, now: Instant) -> Result<Block> {
        let height = block.height();
        self.chain.append(block.clone())?;
        self.round.phase = RoundPhase::Finalized;
        self.mempool.record_finalized(&block.transactions);
        self.ledger.update(&self.committee, &block);

        info!(
            target: "consensus",
            "EVENT:FINALIZE height={} view={} hash={} txs={} prepares={} commits={}",
            height,
            block.header.commit_view,
            block.hash(),
            block.transactions.len(),
            block.header.prepare_signatures.len(),
            block.header.commit_signatures.len()
        );

        if self.config.epoch_length > 0 && height % self.config.epoch_length == 0 {
            if let Err(e) = self.reconfigure() {
                error!("🛑 Committee reconfiguration failed at height {}: {}", height, e);
            }
        }

        self.locked = None;
        self.round = ConsensusRound::new(height + 1, now + self.view_timeout(0));
        Ok(block)
    }

    fn replay_pending(&mut self, now: Instant) -> Step {
        let mut step = Step::default();
        if self.pending.is_empty() || self.halted.is_some() {
            return step;
        }
        if !self.pending.iter().any(|(_, m)| m.height() == self.round.height) {
            return step;
        }

        let pending = std::mem::take(&mut self.pending);
        for (_, message) in pending {
            if message.height() < self.round.height {
                continue;
            }
            match self.handle_message(message, now) {
                Ok(next) => step.extend(next),
                Err(e) => debug!("Dropped buffered message: {}", e),
            }
        }
        step
    }

    /// Abandons the current view and rotates to the next proposer at the
    /// same height. The lock survives. Returns the new view.
    pub fn view_change(&mut self, now: Instant) -> u64 {
        let quorum = self.quorum();
        let view = self.round.view;
        let (prepares, commits) = self
            .round
            .proposal_hash()
            .map(|hash| {
                (
                    self.round.signatures.count(Phase::Prepare, view, &hash),
                    self.round.signatures.count(Phase::Commit, view, &hash),
                )
            })
            .unwrap_or((0, 0));
        let timeout = BallotError::QuorumTimeout {
            height: self.round.height,
            view,
            prepares,
            commits,
            quorum,
        };
        warn!("⏰ {}", timeout);

        let next = view + 1;
        let deadline = now + self.view_timeout(next);
        self.round.advance_view(next, deadline);

        info!(
            target: "consensus",
            "EVENT:VIEW_CHANGE height={} view={} proposer={} locked={}",
            self.round.height,
            next,
            self.proposer_for(self.round.height, next)
                .map(|k| k.to_string())
                .unwrap_or_default(),
            self.locked.as_ref().map(|l| l.hash().to_string()).unwrap_or_default()
        );
        next
    }

    /// Drives timeouts and proposing. Call after every deadline and whenever
    /// new ballots arrive.
    pub fn tick(&mut self, now: Instant) -> Result<Step> {
        if self.halted.is_some() {
            return Ok(Step::default());
        }

        let has_work = self.locked.is_some() || !self.mempool.is_empty();
        let idle = self.round.phase == RoundPhase::New && !has_work;
        if self.round.is_timed_out(now) {
            if idle {
                self.round.deadline = now + self.view_timeout(self.round.view);
            } else {
                self.view_change(now);
            }
        }

        let mut step = Step::default();
        if self.round.phase == RoundPhase::New && self.is_proposer() && has_work {
            step.extend(self.propose(now)?);
        }
        step.extend(self.replay_pending(now));
        Ok(step)
    }

    /// Recomputes the committee from the ledger snapshot.
    ///
    /// On `InsufficientValidators` the engine halts until a later call
    /// succeeds.
    pub fn reconfigure(&mut self) -> Result<()> {
        let epoch = match self.config.epoch_length {
            0 => 0,
            length => self.chain.height() / length,
        };

        match self.selector.select_committee(&self.ledger.snapshot(), epoch) {
            Ok(committee) => {
                if self.halted.take().is_some() {
                    info!("✅ Committee restored for epoch {}, resuming", epoch);
                }
                self.committee = committee;
                Ok(())
            }
            Err(e) => {
                if let BallotError::InsufficientValidators { available, required } = e {
                    self.halted = Some((available, required));
                }
                Err(e)
            }
        }
    }

    /// Adds or replaces a validator in the ledger. Takes effect at the next
    /// reconfiguration.
    pub fn register_validator(&mut self, validator: Validator) {
        self.ledger.register(validator);
    }

    /// Removes a validator from the ledger. Takes effect at the next
    /// reconfiguration.
    pub fn remove_validator(&mut self, key: &PublicKey) -> Option<Validator> {
        self.ledger.remove(key)
    }
}
