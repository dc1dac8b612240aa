use thiserror::Error;

use crate::{auth::PublicKey, crypto::hash::Hash};

/// Reasons a transaction, block or consensus message is rejected locally.
/// A validation failure only ever affects the offending message.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("invalid signature: {0}")]
    InvalidSignature(String),

    #[error("malformed voter token")]
    MalformedToken,

    #[error("voter {voter} already cast a ballot in election {election}")]
    DoubleVote { voter: PublicKey, election: String },

    #[error("unexpected proposer {actual} (expected {expected})")]
    WrongProposer { expected: PublicKey, actual: PublicKey },

    #[error("block does not extend the chain tip: {0}")]
    BadLinkage(String),

    #[error("merkle root mismatch (header {header}, computed {computed})")]
    MerkleMismatch { header: Hash, computed: Hash },

    #[error("stale message: {0}")]
    Stale(String),

    #[error("signer {0} is not a committee member")]
    NotInCommittee(PublicKey),

    #[error("transaction {0} appears more than once in the block")]
    DuplicateInBlock(Hash),

    #[error("transaction {0} is already finalized")]
    AlreadyFinalized(Hash),

    #[error("unsupported protocol version {0}")]
    UnsupportedVersion(u8),

    #[error("content hash does not match payload")]
    HashMismatch,

    #[error("invalid certificate: {0}")]
    InvalidCertificate(String),

    #[error("proposal {proposed} conflicts with locked block {locked}")]
    ConflictsWithLock { locked: Hash, proposed: Hash },
}

#[derive(Debug, Error)]
pub enum BallotError {
    #[error("validation failed: {0}")]
    Validation(#[from] ValidationError),

    #[error(
        "quorum not reached at height {height} view {view} \
         (prepares {prepares}/{quorum}, commits {commits}/{quorum})"
    )]
    QuorumTimeout {
        height: u64,
        view: u64,
        prepares: usize,
        commits: usize,
        quorum: usize,
    },

    #[error("duplicate transaction {0}")]
    DuplicateTransaction(Hash),

    #[error("peer {address} unreachable: {reason}")]
    PeerUnreachable { address: String, reason: String },

    #[error("capacity exceeded (max {capacity})")]
    CapacityExceeded { capacity: usize },

    #[error("insufficient validators: {available} available, {required} required")]
    InsufficientValidators { available: usize, required: usize },

    #[error("codec error: {0}")]
    Codec(String),

    #[error("invalid config: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl BallotError {
    /// Committee formation failure is the only error that halts block production.
    pub fn is_fatal(&self) -> bool {
        matches!(self, BallotError::InsufficientValidators { .. })
    }
}

impl From<bincode::Error> for BallotError {
    fn from(e: bincode::Error) -> Self {
        BallotError::Codec(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, BallotError>;
