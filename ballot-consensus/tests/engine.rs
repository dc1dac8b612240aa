use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

use ballot_common::{
    auth::{Authenticator, Ed25519Authenticator, PublicKey},
    crypto::{calculate_merkle_root, Hash},
    types::{
        phase_signing_bytes, Block, BlockHeader, ConsensusMessage, Phase, PhaseSignature, PhaseVote, PrePrepare,
        PreparedCertificate, Validator, VoteTransaction, Zone,
    },
    BallotError, ValidationError,
};
use ballot_consensus::{ConsensusConfig, ConsensusEngine, RoundPhase, MAX_VIEW_LOOKAHEAD};
use ballot_mempool::Mempool;

struct Fixture {
    keys: Vec<Arc<Ed25519Authenticator>>,
    validators: Vec<Validator>,
}

impl Fixture {
    /// `n` validators whose committee order equals their index: stake
    /// strictly decreasing, equal reputation.
    fn new(n: usize) -> Self {
        let keys: Vec<_> = (0..n).map(|_| Arc::new(Ed25519Authenticator::generate())).collect();
        let validators = keys
            .iter()
            .enumerate()
            .map(|(i, k)| {
                Validator::new(
                    k.public_key(),
                    10_000 - i as u64 * 10,
                    50,
                    Zone::ALL[i % Zone::ALL.len()],
                )
            })
            .collect();
        Self { keys, validators }
    }

    fn engine(&self, index: usize, config: ConsensusConfig, mempool: Arc<Mempool>, now: Instant) -> ConsensusEngine {
        ConsensusEngine::new(config, self.keys[index].clone(), mempool, self.validators.clone(), now).unwrap()
    }

    fn key(&self, index: usize) -> PublicKey {
        self.keys[index].public_key()
    }

    fn vote(&self, index: usize, phase: Phase, height: u64, view: u64, hash: Hash) -> ConsensusMessage {
        let vote = PhaseVote::signed(self.keys[index].as_ref(), phase, height, view, hash);
        match phase {
            Phase::Commit => ConsensusMessage::Commit(vote),
            _ => ConsensusMessage::Prepare(vote),
        }
    }
}

fn small_config() -> ConsensusConfig {
    ConsensusConfig {
        committee_size: 4,
        ..ConsensusConfig::default()
    }
}

fn ballot(candidate: &str) -> VoteTransaction {
    let voter = Ed25519Authenticator::generate();
    VoteTransaction::new_signed(&voter, "VOTETOKEN_engine", "presidential-2027", candidate, 1_700_000_000)
}

fn signed_pre_prepare(
    auth: &Ed25519Authenticator,
    height: u64,
    view: u64,
    prev_hash: Hash,
    transactions: Vec<VoteTransaction>,
) -> PrePrepare {
    let hashes: Vec<Hash> = transactions.iter().map(VoteTransaction::hash).collect();
    let mut header = BlockHeader {
        height,
        view,
        prev_hash,
        merkle_root: calculate_merkle_root(&hashes),
        timestamp: 1_700_000_000,
        proposer: auth.public_key(),
        commit_view: 0,
        pre_prepare_signatures: vec![],
        prepare_signatures: vec![],
        commit_signatures: vec![],
    };
    let hash = header.hash();
    header.pre_prepare_signatures.push(PhaseSignature {
        signer: auth.public_key(),
        signature: auth.sign(&phase_signing_bytes(Phase::PrePrepare, height, view, &hash)),
    });
    PrePrepare {
        height,
        view,
        block: Block { header, transactions },
        justification: None,
    }
}

fn signatures(fx: &Fixture, signers: &[usize], phase: Phase, height: u64, view: u64, hash: Hash) -> Vec<PhaseSignature> {
    signers
        .iter()
        .map(|i| PhaseSignature {
            signer: fx.key(*i),
            signature: fx.keys[*i].sign(&phase_signing_bytes(phase, height, view, &hash)),
        })
        .collect()
}

/// Re-proposes `block` at `view` on behalf of `proposer`, justified by a
/// prepare certificate from `certificate_view`.
fn reproposal(fx: &Fixture, proposer: usize, view: u64, mut block: Block, certificate_view: u64, signers: &[usize]) -> PrePrepare {
    let height = block.height();
    let hash = block.hash();
    block.header.pre_prepare_signatures.push(PhaseSignature {
        signer: fx.key(proposer),
        signature: fx.keys[proposer].sign(&phase_signing_bytes(Phase::PrePrepare, height, view, &hash)),
    });
    PrePrepare {
        height,
        view,
        block,
        justification: Some(PreparedCertificate {
            view: certificate_view,
            signatures: signatures(fx, signers, Phase::Prepare, height, certificate_view, hash),
        }),
    }
}

fn proposed_hash(message: &ConsensusMessage) -> Hash {
    match message {
        ConsensusMessage::PrePrepare(p) => p.block.hash(),
        other => panic!("expected pre-prepare, got {other:?}"),
    }
}

#[test]
fn test_finalize_with_full_quorum() {
    let fx = Fixture::new(21);
    let mempool = Arc::new(Mempool::with_capacity(100));
    let now = Instant::now();
    let mut engine = fx.engine(1, ConsensusConfig::default(), mempool.clone(), now);

    assert_eq!(engine.quorum(), 15);
    assert!(engine.is_proposer());

    let tx = ballot("candidate-a");
    mempool.submit(tx.clone()).unwrap();

    let step = engine.propose(now).unwrap();
    assert_eq!(step.outbound.len(), 2);
    let hash = proposed_hash(&step.outbound[0]);
    assert!(matches!(step.outbound[1], ConsensusMessage::Prepare(_)));

    let others: Vec<usize> = (0..21).filter(|i| *i != 1).take(14).collect();
    for i in &others {
        engine.handle_message(fx.vote(*i, Phase::Prepare, 1, 0, hash), now).unwrap();
    }
    assert_eq!(engine.phase(), RoundPhase::Commit);

    let mut finalized = Vec::new();
    for i in &others {
        let step = engine.handle_message(fx.vote(*i, Phase::Commit, 1, 0, hash), now).unwrap();
        finalized.extend(step.finalized);
    }

    assert_eq!(finalized.len(), 1);
    let block = &finalized[0];
    assert_eq!(block.hash(), hash);
    assert_eq!(block.header.commit_signatures.len(), 15);
    assert_eq!(block.header.prepare_signatures.len(), 15);
    let signers: Vec<_> = block.commit_signers().copied().collect();
    let mut sorted = signers.clone();
    sorted.sort();
    assert_eq!(signers, sorted);

    assert_eq!(engine.height(), 1);
    assert_eq!(engine.chain().tip_hash(), hash);
    assert_eq!(engine.current_height(), 2);
    assert_eq!(engine.view(), 0);
    assert!(mempool.is_empty());
    assert!(mempool.is_finalized(&tx.hash()));

    // 15 signers rewarded, 6 absentees penalized
    let rewarded: Vec<usize> = std::iter::once(1).chain(others.iter().copied()).collect();
    for i in 0..21 {
        let expected = if rewarded.contains(&i) { 51 } else { 45 };
        assert_eq!(engine.ledger().reputation(&fx.key(i)), Some(expected), "validator {i}");
    }

    let status = engine.status();
    assert_eq!(status.height, 1);
    assert_eq!(status.total_votes, 1);
    assert_eq!(status.tally.get("candidate-a"), Some(&1));
    assert_eq!(status.active_validator_count, 21);
}

#[test]
fn test_finalize_below_quorum_changes_nothing() {
    let fx = Fixture::new(21);
    let mempool = Arc::new(Mempool::with_capacity(100));
    let now = Instant::now();
    let mut engine = fx.engine(1, ConsensusConfig::default(), mempool.clone(), now);

    mempool.submit(ballot("candidate-a")).unwrap();
    let step = engine.propose(now).unwrap();
    let hash = proposed_hash(&step.outbound[0]);

    let others: Vec<usize> = (0..21).filter(|i| *i != 1).collect();
    for i in others.iter().take(14) {
        engine.handle_message(fx.vote(*i, Phase::Prepare, 1, 0, hash), now).unwrap();
    }
    // Own commit plus nine others
    for i in others.iter().take(9) {
        engine.handle_message(fx.vote(*i, Phase::Commit, 1, 0, hash), now).unwrap();
    }

    let err = engine.finalize(now).unwrap_err();
    assert!(matches!(
        err,
        BallotError::QuorumTimeout {
            height: 1,
            view: 0,
            prepares: 15,
            commits: 10,
            quorum: 15
        }
    ));
    assert!(!err.is_fatal());
    assert_eq!(engine.height(), 0);
    assert_eq!(engine.phase(), RoundPhase::Commit);
    assert_eq!(mempool.len(), 1);
}

#[test]
fn test_view_change_rotates_proposer() {
    let fx = Fixture::new(4);
    let now = Instant::now();
    let mempool = Arc::new(Mempool::with_capacity(10));
    let mut engine = fx.engine(2, small_config(), mempool.clone(), now);

    assert_eq!(engine.proposer_for(1, 0), Some(fx.key(1)));
    assert!(!engine.is_proposer());

    // Idle rounds re-arm instead of rotating
    let later = now + Duration::from_secs(5);
    assert!(engine.tick(later).unwrap().is_empty());
    assert_eq!(engine.view(), 0);

    mempool.submit(ballot("candidate-b")).unwrap();
    let later = later + Duration::from_secs(5);
    let step = engine.tick(later).unwrap();

    assert_eq!(engine.view(), 1);
    assert_eq!(engine.current_height(), 1);
    assert!(engine.is_proposer());
    match &step.outbound[0] {
        ConsensusMessage::PrePrepare(p) => {
            assert_eq!(p.view, 1);
            assert_eq!(p.block.header.proposer, fx.key(2));
        }
        other => panic!("expected pre-prepare, got {other:?}"),
    }
    assert_eq!(engine.deadline(), later + engine.view_timeout(1));
}

#[test]
fn test_higher_view_proposal_is_adopted() {
    let fx = Fixture::new(4);
    let now = Instant::now();
    let mut engine = fx.engine(3, small_config(), Arc::new(Mempool::with_capacity(10)), now);

    let pre_prepare = signed_pre_prepare(&fx.keys[2], 1, 1, Hash::ZERO, vec![ballot("candidate-c")]);
    let step = engine
        .handle_message(ConsensusMessage::PrePrepare(pre_prepare.clone()), now)
        .unwrap();

    assert_eq!(engine.view(), 1);
    assert_eq!(engine.phase(), RoundPhase::Prepare);
    match &step.outbound[..] {
        [ConsensusMessage::Prepare(vote)] => {
            assert_eq!(vote.view, 1);
            assert_eq!(vote.block_hash, pre_prepare.block.hash());
        }
        other => panic!("unexpected outbound {other:?}"),
    }
}

#[test]
fn test_stale_messages_rejected() {
    let fx = Fixture::new(4);
    let now = Instant::now();
    let mut engine = fx.engine(3, small_config(), Arc::new(Mempool::with_capacity(10)), now);
    let hash = Hash([7; 32]);

    let err = engine
        .handle_message(fx.vote(0, Phase::Prepare, 5, 0, hash), now)
        .unwrap_err();
    assert!(matches!(err, BallotError::Validation(ValidationError::Stale(_))));

    engine.view_change(now);
    let err = engine
        .handle_message(fx.vote(0, Phase::Prepare, 1, 0, hash), now)
        .unwrap_err();
    assert!(matches!(err, BallotError::Validation(ValidationError::Stale(_))));

    // Next height is held, not rejected
    assert!(engine
        .handle_message(fx.vote(0, Phase::Prepare, 2, 0, hash), now)
        .unwrap()
        .is_empty());
}

#[test]
fn test_wrong_proposer_rejected() {
    let fx = Fixture::new(4);
    let now = Instant::now();
    let mut engine = fx.engine(3, small_config(), Arc::new(Mempool::with_capacity(10)), now);

    let pre_prepare = signed_pre_prepare(&fx.keys[0], 1, 0, Hash::ZERO, vec![]);
    let err = engine
        .handle_message(ConsensusMessage::PrePrepare(pre_prepare), now)
        .unwrap_err();

    match err {
        BallotError::Validation(ValidationError::WrongProposer { expected, actual }) => {
            assert_eq!(expected, fx.key(1));
            assert_eq!(actual, fx.key(0));
        }
        other => panic!("expected WrongProposer, got {other:?}"),
    }
    assert_eq!(engine.phase(), RoundPhase::New);
}

#[test]
fn test_invalid_blocks_rejected() {
    let fx = Fixture::new(4);
    let now = Instant::now();
    let mut engine = fx.engine(3, small_config(), Arc::new(Mempool::with_capacity(10)), now);

    // Transactions swapped after signing
    let mut tampered = signed_pre_prepare(&fx.keys[1], 1, 0, Hash::ZERO, vec![ballot("a")]);
    tampered.block.transactions = vec![ballot("b")];
    assert!(matches!(
        engine.handle_message(ConsensusMessage::PrePrepare(tampered), now),
        Err(BallotError::Validation(ValidationError::MerkleMismatch { .. }))
    ));

    // Wrong parent
    let orphan = signed_pre_prepare(&fx.keys[1], 1, 0, Hash([9; 32]), vec![]);
    assert!(matches!(
        engine.handle_message(ConsensusMessage::PrePrepare(orphan), now),
        Err(BallotError::Validation(ValidationError::BadLinkage(_)))
    ));

    // Same voter twice in one election
    let voter = Ed25519Authenticator::generate();
    let first = VoteTransaction::new_signed(&voter, "VOTETOKEN_x", "gov-2027", "a", 1);
    let second = VoteTransaction::new_signed(&voter, "VOTETOKEN_x", "gov-2027", "b", 2);
    let double = signed_pre_prepare(&fx.keys[1], 1, 0, Hash::ZERO, vec![first.clone(), second]);
    assert!(matches!(
        engine.handle_message(ConsensusMessage::PrePrepare(double), now),
        Err(BallotError::Validation(ValidationError::DoubleVote { .. }))
    ));

    let duplicate = signed_pre_prepare(&fx.keys[1], 1, 0, Hash::ZERO, vec![first.clone(), first]);
    assert!(matches!(
        engine.handle_message(ConsensusMessage::PrePrepare(duplicate), now),
        Err(BallotError::Validation(ValidationError::DuplicateInBlock(_)))
    ));

    // Signed by the right key for the wrong view
    let mut forged = signed_pre_prepare(&fx.keys[1], 1, 0, Hash::ZERO, vec![]);
    let hash = forged.block.hash();
    forged.block.header.pre_prepare_signatures[0].signature =
        fx.keys[1].sign(&phase_signing_bytes(Phase::PrePrepare, 1, 3, &hash));
    assert!(matches!(
        engine.handle_message(ConsensusMessage::PrePrepare(forged), now),
        Err(BallotError::Validation(ValidationError::InvalidSignature(_)))
    ));

    assert_eq!(engine.phase(), RoundPhase::New);
}

#[test]
fn test_votes_checked_and_counted_once() {
    let fx = Fixture::new(4);
    let now = Instant::now();
    let mut engine = fx.engine(3, small_config(), Arc::new(Mempool::with_capacity(10)), now);
    let pre_prepare = signed_pre_prepare(&fx.keys[1], 1, 0, Hash::ZERO, vec![]);
    let hash = pre_prepare.block.hash();
    engine
        .handle_message(ConsensusMessage::PrePrepare(pre_prepare), now)
        .unwrap();

    // Outsider
    let outsider = Ed25519Authenticator::generate();
    let vote = PhaseVote::signed(&outsider, Phase::Prepare, 1, 0, hash);
    assert!(matches!(
        engine.handle_message(ConsensusMessage::Prepare(vote), now),
        Err(BallotError::Validation(ValidationError::NotInCommittee(_)))
    ));

    // Commit signature replayed as a prepare
    let commit = PhaseVote::signed(fx.keys[0].as_ref(), Phase::Commit, 1, 0, hash);
    assert!(matches!(
        engine.handle_message(ConsensusMessage::Prepare(commit), now),
        Err(BallotError::Validation(ValidationError::InvalidSignature(_)))
    ));

    // Same signer twice
    engine.handle_message(fx.vote(0, Phase::Prepare, 1, 0, hash), now).unwrap();
    engine.handle_message(fx.vote(0, Phase::Prepare, 1, 0, hash), now).unwrap();
    assert_eq!(engine.round().signatures.count(Phase::Prepare, 0, &hash), 2);
    assert_eq!(engine.phase(), RoundPhase::Prepare);

    // Equivocation keeps only the first
    engine
        .handle_message(fx.vote(0, Phase::Prepare, 1, 0, Hash([1; 32])), now)
        .unwrap();
    assert_eq!(engine.evidence().len(), 1);
    assert_eq!(engine.evidence()[0].offender, fx.key(0));
    assert_eq!(engine.round().signatures.count(Phase::Prepare, 0, &hash), 2);
}

#[test]
fn test_votes_before_proposal_are_buffered() {
    let fx = Fixture::new(4);
    let now = Instant::now();
    let mut engine = fx.engine(3, small_config(), Arc::new(Mempool::with_capacity(10)), now);
    let pre_prepare = signed_pre_prepare(&fx.keys[1], 1, 0, Hash::ZERO, vec![]);
    let hash = pre_prepare.block.hash();

    for i in [0, 1] {
        engine.handle_message(fx.vote(i, Phase::Prepare, 1, 0, hash), now).unwrap();
    }
    assert_eq!(engine.phase(), RoundPhase::New);

    // Own prepare completes the quorum of 3 and a commit goes out at once
    let step = engine
        .handle_message(ConsensusMessage::PrePrepare(pre_prepare), now)
        .unwrap();
    assert_eq!(engine.phase(), RoundPhase::Commit);
    assert!(matches!(step.outbound.last(), Some(ConsensusMessage::Commit(_))));
}

#[test]
fn test_epoch_boundary_halts_on_insufficient_validators() {
    let fx = Fixture::new(4);
    let now = Instant::now();
    let config = ConsensusConfig {
        epoch_length: 1,
        ..small_config()
    };
    let mut engine = fx.engine(1, config, Arc::new(Mempool::with_capacity(10)), now);

    let removed = engine.remove_validator(&fx.key(3)).unwrap();

    let step = engine.propose(now).unwrap();
    let hash = proposed_hash(&step.outbound[0]);
    for i in [0, 2] {
        engine.handle_message(fx.vote(i, Phase::Prepare, 1, 0, hash), now).unwrap();
    }
    let mut finalized = Vec::new();
    for i in [0, 2] {
        finalized.extend(engine.handle_message(fx.vote(i, Phase::Commit, 1, 0, hash), now).unwrap().finalized);
    }
    assert_eq!(finalized.len(), 1);
    assert_eq!(engine.height(), 1);
    assert!(engine.is_halted());

    let err = engine.propose(now).unwrap_err();
    assert!(matches!(
        err,
        BallotError::InsufficientValidators { available: 3, required: 4 }
    ));
    assert!(err.is_fatal());
    assert!(engine.tick(now + Duration::from_secs(60)).unwrap().is_empty());

    engine.register_validator(removed);
    engine.reconfigure().unwrap();
    assert!(!engine.is_halted());
    assert_eq!(engine.committee().epoch, 1);
    assert_eq!(engine.committee().len(), 4);
}

/// Delivers every outbound message to every other engine until no engine
/// has anything left to say.
fn run_until_quiet(engines: &mut [ConsensusEngine], from: usize, initial: Vec<ConsensusMessage>, now: Instant) -> Vec<Vec<Block>> {
    let mut finalized = vec![Vec::new(); engines.len()];
    let mut queue: VecDeque<(usize, ConsensusMessage)> = initial.into_iter().map(|m| (from, m)).collect();

    while let Some((sender, message)) = queue.pop_front() {
        for (i, engine) in engines.iter_mut().enumerate() {
            if i == sender {
                continue;
            }
            if let Ok(step) = engine.handle_message(message.clone(), now) {
                queue.extend(step.outbound.into_iter().map(|m| (i, m)));
                finalized[i].extend(step.finalized);
            }
        }
    }
    finalized
}

#[test]
fn test_honest_cluster_agrees() {
    let fx = Fixture::new(4);
    let now = Instant::now();
    let tx = ballot("candidate-a");

    let mut engines: Vec<_> = (0..4)
        .map(|i| {
            let mempool = Arc::new(Mempool::with_capacity(10));
            mempool.submit(tx.clone()).unwrap();
            fx.engine(i, small_config(), mempool, now)
        })
        .collect();

    let step = engines[1].propose(now).unwrap();
    let finalized = run_until_quiet(&mut engines, 1, step.outbound, now);

    let hash = finalized[0][0].hash();
    for (i, blocks) in finalized.iter().enumerate() {
        assert_eq!(blocks.len(), 1, "engine {i}");
        assert_eq!(blocks[0].hash(), hash);
        assert_eq!(engines[i].height(), 1);
        assert!(engines[i].chain().contains_tx(&tx.hash()));
    }
}

fn cluster(fx: &Fixture, tx: &VoteTransaction, now: Instant) -> Vec<ConsensusEngine> {
    (0..4)
        .map(|i| {
            let mempool = Arc::new(Mempool::with_capacity(10));
            mempool.submit(tx.clone()).unwrap();
            fx.engine(i, small_config(), mempool, now)
        })
        .collect()
}

#[test]
fn test_lost_commits_do_not_fork_the_height() {
    let fx = Fixture::new(4);
    let now = Instant::now();
    let mut engines = cluster(&fx, &ballot("candidate-a"), now);

    // View 0: everyone prepares engine 1's block and sends a commit
    let proposal = engines[1].propose(now).unwrap();
    let hash = proposed_hash(&proposal.outbound[0]);
    let mut prepares = vec![(1, proposal.outbound[1].clone())];
    for i in [0, 2, 3] {
        let step = engines[i].handle_message(proposal.outbound[0].clone(), now).unwrap();
        prepares.extend(step.outbound.into_iter().map(|m| (i, m)));
    }
    let mut commits = Vec::new();
    for (sender, prepare) in &prepares {
        for i in (0..4).filter(|i| i != sender) {
            let step = engines[i].handle_message(prepare.clone(), now).unwrap();
            commits.extend(step.outbound.into_iter().map(|m| (i, m)));
        }
    }
    assert_eq!(commits.len(), 4);

    // Only engine 0 hears the commits; the last one arrives after it moved on
    for (sender, commit) in &commits {
        if *sender != 0 {
            let _ = engines[0].handle_message(commit.clone(), now);
        }
    }
    assert_eq!(engines[0].chain().tip_hash(), hash);

    // The rest time out; the lock carries the block into view 1
    let later = now + Duration::from_secs(10);
    for engine in engines.iter_mut().skip(1) {
        assert_eq!(engine.locked().map(|l| l.hash()), Some(hash));
        assert_eq!(engine.view_change(later), 1);
        assert_eq!(engine.locked().map(|l| l.hash()), Some(hash));
    }

    let step = engines[2].propose(later).unwrap();
    match &step.outbound[0] {
        ConsensusMessage::PrePrepare(p) => {
            assert_eq!(p.block.hash(), hash);
            assert_eq!(p.justification.as_ref().map(|c| c.view), Some(0));
        }
        other => panic!("expected pre-prepare, got {other:?}"),
    }
    run_until_quiet(&mut engines, 2, step.outbound, later);

    for (i, engine) in engines.iter().enumerate() {
        assert_eq!(engine.height(), 1, "engine {i}");
        assert_eq!(engine.chain().tip_hash(), hash, "engine {i}");
        assert!(engine.locked().is_none());
    }
    let tip = engines[1].chain().tip().unwrap();
    assert_eq!(tip.header.view, 0);
    assert_eq!(tip.header.commit_view, 1);
}

#[test]
fn test_lock_rejects_conflicting_proposal() {
    let fx = Fixture::new(4);
    let now = Instant::now();
    let mut engine = fx.engine(0, small_config(), Arc::new(Mempool::with_capacity(10)), now);

    let locked = signed_pre_prepare(&fx.keys[1], 1, 0, Hash::ZERO, vec![ballot("candidate-a")]);
    let hash = locked.block.hash();
    engine
        .handle_message(ConsensusMessage::PrePrepare(locked.clone()), now)
        .unwrap();
    engine.handle_message(fx.vote(1, Phase::Prepare, 1, 0, hash), now).unwrap();
    engine.handle_message(fx.vote(2, Phase::Prepare, 1, 0, hash), now).unwrap();
    assert_eq!(engine.locked().map(|l| l.view), Some(0));

    engine.view_change(now);

    // A fresh block from the view-1 proposer is refused
    let fresh = signed_pre_prepare(&fx.keys[2], 1, 1, Hash::ZERO, vec![ballot("candidate-b")]);
    assert!(matches!(
        engine.handle_message(ConsensusMessage::PrePrepare(fresh), now),
        Err(BallotError::Validation(ValidationError::ConflictsWithLock { locked, .. })) if locked == hash
    ));

    // A certificate short of quorum does not justify a re-proposal
    let weak = reproposal(&fx, 2, 1, locked.block.clone(), 0, &[1, 2]);
    assert!(matches!(
        engine.handle_message(ConsensusMessage::PrePrepare(weak), now),
        Err(BallotError::Validation(ValidationError::InvalidCertificate(_)))
    ));

    // The locked block itself is prepared again at view 1
    let again = reproposal(&fx, 2, 1, locked.block, 0, &[0, 1, 2]);
    let step = engine
        .handle_message(ConsensusMessage::PrePrepare(again), now)
        .unwrap();
    match &step.outbound[..] {
        [ConsensusMessage::Prepare(vote)] => {
            assert_eq!(vote.view, 1);
            assert_eq!(vote.block_hash, hash);
        }
        other => panic!("unexpected outbound {other:?}"),
    }
}

#[test]
fn test_newer_certificate_releases_lock() {
    let fx = Fixture::new(4);
    let now = Instant::now();
    let mut engine = fx.engine(0, small_config(), Arc::new(Mempool::with_capacity(10)), now);

    let first = signed_pre_prepare(&fx.keys[1], 1, 0, Hash::ZERO, vec![ballot("candidate-a")]);
    let first_hash = first.block.hash();
    engine.handle_message(ConsensusMessage::PrePrepare(first), now).unwrap();
    for i in [1, 2] {
        engine.handle_message(fx.vote(i, Phase::Prepare, 1, 0, first_hash), now).unwrap();
    }
    assert_eq!(engine.locked().map(|l| l.hash()), Some(first_hash));

    // Another block gathered a prepare quorum at view 1 without us and is
    // re-proposed at view 2
    let second = signed_pre_prepare(&fx.keys[2], 1, 1, Hash::ZERO, vec![ballot("candidate-b")]);
    let second_hash = second.block.hash();
    let newer = reproposal(&fx, 3, 2, second.block, 1, &[1, 2, 3]);
    let step = engine
        .handle_message(ConsensusMessage::PrePrepare(newer), now)
        .unwrap();

    assert_eq!(engine.view(), 2);
    assert!(engine.locked().is_none());
    assert_eq!(engine.round().proposal_hash(), Some(second_hash));
    assert!(matches!(&step.outbound[..], [ConsensusMessage::Prepare(v)] if v.block_hash == second_hash && v.view == 2));
}

#[test]
fn test_next_height_buffer_checks_signers() {
    let fx = Fixture::new(4);
    let now = Instant::now();
    let mut engine = fx.engine(3, small_config(), Arc::new(Mempool::with_capacity(10)), now);

    let outsider = Ed25519Authenticator::generate();
    for i in 0..1_024u32 {
        let mut junk = [0u8; 32];
        junk[..4].copy_from_slice(&i.to_be_bytes());
        let vote = PhaseVote::signed(&outsider, Phase::Prepare, 2, 0, Hash(junk));
        assert!(matches!(
            engine.handle_message(ConsensusMessage::Prepare(vote), now),
            Err(BallotError::Validation(ValidationError::NotInCommittee(_)))
        ));
    }

    let mut forged = PhaseVote::signed(fx.keys[0].as_ref(), Phase::Prepare, 2, 0, Hash([1; 32]));
    forged.block_hash = Hash([2; 32]);
    assert!(matches!(
        engine.handle_message(ConsensusMessage::Prepare(forged), now),
        Err(BallotError::Validation(ValidationError::InvalidSignature(_)))
    ));

    assert!(matches!(
        engine.handle_message(fx.vote(0, Phase::Prepare, 2, MAX_VIEW_LOOKAHEAD + 1, Hash([1; 32])), now),
        Err(BallotError::Validation(ValidationError::Stale(_)))
    ));

    let unsigned = signed_pre_prepare(&fx.keys[0], 2, 0, Hash([3; 32]), vec![]);
    assert!(matches!(
        engine.handle_message(ConsensusMessage::PrePrepare(unsigned), now),
        Err(BallotError::Validation(ValidationError::InvalidSignature(_)))
    ));
    assert_eq!(engine.pending_len(), 0);

    // A member flooding the buffer only fills its own share
    let share = 3 * (MAX_VIEW_LOOKAHEAD as usize + 1);
    for i in 0..(share as u8 + 10) {
        engine
            .handle_message(fx.vote(0, Phase::Prepare, 2, 0, Hash([i; 32])), now)
            .unwrap();
    }
    assert_eq!(engine.pending_len(), share);

    // Finalize height 1; the honest early vote for height 2 is replayed
    let pre_prepare = signed_pre_prepare(&fx.keys[1], 1, 0, Hash::ZERO, vec![]);
    let hash = pre_prepare.block.hash();
    let next_hash = Hash([200; 32]);
    engine.handle_message(fx.vote(1, Phase::Prepare, 2, 0, next_hash), now).unwrap();
    assert_eq!(engine.pending_len(), share + 1);

    engine.handle_message(ConsensusMessage::PrePrepare(pre_prepare), now).unwrap();
    for i in [0, 1] {
        engine.handle_message(fx.vote(i, Phase::Prepare, 1, 0, hash), now).unwrap();
    }
    let mut finalized = Vec::new();
    for i in [0, 1] {
        finalized.extend(engine.handle_message(fx.vote(i, Phase::Commit, 1, 0, hash), now).unwrap().finalized);
    }
    assert_eq!(finalized.len(), 1);
    assert_eq!(engine.current_height(), 2);
    assert_eq!(engine.pending_len(), 0);
    assert_eq!(engine.round().signatures.count(Phase::Prepare, 0, &next_hash), 1);
}

#[test]
fn test_observer_follows_without_voting() {
    let fx = Fixture::new(5);
    let now = Instant::now();
    let mut observer = fx.engine(4, small_config(), Arc::new(Mempool::with_capacity(10)), now);
    assert!(!observer.committee().contains(&fx.key(4)));

    let pre_prepare = signed_pre_prepare(&fx.keys[1], 1, 0, Hash::ZERO, vec![ballot("candidate-a")]);
    let hash = pre_prepare.block.hash();
    let step = observer
        .handle_message(ConsensusMessage::PrePrepare(pre_prepare), now)
        .unwrap();
    assert!(step.outbound.is_empty());
    assert_eq!(observer.phase(), RoundPhase::PrePrepare);
    assert_eq!(observer.status().phase, "PRE_PREPARE");

    for i in 0..3 {
        assert!(observer
            .handle_message(fx.vote(i, Phase::Prepare, 1, 0, hash), now)
            .unwrap()
            .outbound
            .is_empty());
    }
    assert_eq!(observer.phase(), RoundPhase::Commit);

    let mut finalized = Vec::new();
    for i in 0..3 {
        finalized.extend(observer.handle_message(fx.vote(i, Phase::Commit, 1, 0, hash), now).unwrap().finalized);
    }
    assert_eq!(finalized.len(), 1);
    assert_eq!(observer.height(), 1);
}

#[test]
fn test_apply_finalized_checks_commit_certificate() {
    let fx = Fixture::new(4);
    let now = Instant::now();
    let tx = ballot("candidate-a");
    let mut engines = cluster(&fx, &tx, now);
    let step = engines[1].propose(now).unwrap();
    run_until_quiet(&mut engines, 1, step.outbound, now);
    let block = engines[1].chain().tip().unwrap().clone();

    let mempool = Arc::new(Mempool::with_capacity(10));
    mempool.submit(tx.clone()).unwrap();
    let mut lagging = fx.engine(3, small_config(), mempool.clone(), now);

    // Too few commits
    let mut weak = block.clone();
    weak.header.commit_signatures.truncate(2);
    assert!(matches!(
        lagging.apply_finalized(weak, now),
        Err(BallotError::Validation(ValidationError::InvalidCertificate(_)))
    ));

    // Signatures for another view
    let mut moved = block.clone();
    moved.header.commit_view = 5;
    assert!(matches!(
        lagging.apply_finalized(moved, now),
        Err(BallotError::Validation(ValidationError::InvalidCertificate(_)))
    ));

    let step = lagging.apply_finalized(block.clone(), now).unwrap();
    assert_eq!(step.finalized.len(), 1);
    assert_eq!(lagging.height(), 1);
    assert_eq!(lagging.current_height(), 2);
    assert_eq!(lagging.chain().tip_hash(), block.hash());
    assert!(mempool.is_finalized(&tx.hash()));
    assert!(mempool.is_empty());

    assert!(matches!(
        lagging.apply_finalized(block, now),
        Err(BallotError::Validation(ValidationError::Stale(_)))
    ));
}

#[test]
fn test_apply_finalized_requires_linkage() {
    let fx = Fixture::new(4);
    let now = Instant::now();
    let mut engine = fx.engine(0, small_config(), Arc::new(Mempool::with_capacity(10)), now);

    let mut block = signed_pre_prepare(&fx.keys[2], 2, 0, Hash([4; 32]), vec![]).block;
    let hash = block.hash();
    block.header.commit_signatures = signatures(&fx, &[0, 1, 2], Phase::Commit, 2, 0, hash);
    assert!(matches!(
        engine.apply_finalized(block, now),
        Err(BallotError::Validation(ValidationError::BadLinkage(_)))
    ));
    assert_eq!(engine.height(), 0);
}
