use thiserror::Error;

use ballot_common::{BallotError, ValidationError};

#[derive(Debug, Error)]
pub enum P2pError {
    #[error("peer {0} timed out")]
    Timeout(String),

    #[error("peer {0} refused the connection")]
    Refused(String),

    #[error("peer {0} inbox full")]
    Overflow(String),

    #[error("peer {address} answered with an error: {reason}")]
    Remote { address: String, reason: String },

    #[error("unexpected response from {0}")]
    UnexpectedResponse(String),

    #[error("frame of {0} bytes exceeds limit")]
    FrameTooLarge(usize),

    #[error("invalid message: {0}")]
    Invalid(#[from] ValidationError),

    #[error("serialization error: {0}")]
    Serialization(#[from] bincode::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<P2pError> for BallotError {
    fn from(e: P2pError) -> Self {
        match e {
            P2pError::Invalid(v) => BallotError::Validation(v),
            P2pError::Serialization(e) => BallotError::Codec(e.to_string()),
            P2pError::Io(e) => BallotError::Io(e),
            P2pError::Timeout(address) => peer_unreachable(address, "timed out"),
            P2pError::Refused(address) => peer_unreachable(address, "connection refused"),
            P2pError::Overflow(address) => peer_unreachable(address, "inbox full"),
            P2pError::UnexpectedResponse(address) => peer_unreachable(address, "unexpected response"),
            P2pError::Remote { address, reason } => BallotError::PeerUnreachable { address, reason },
            P2pError::FrameTooLarge(size) => BallotError::Codec(format!("frame of {size} bytes exceeds limit")),
        }
    }
}

fn peer_unreachable(address: String, reason: &str) -> BallotError {
    BallotError::PeerUnreachable {
        address,
        reason: reason.to_string(),
    }
}
