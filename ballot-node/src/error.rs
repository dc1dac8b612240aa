use thiserror::Error;

use ballot_common::BallotError;
use ballot_p2p::P2pError;

#[derive(Debug, Error)]
pub enum NodeError {
    #[error(transparent)]
    Ballot(#[from] BallotError),

    #[error(transparent)]
    P2p(#[from] P2pError),

    #[error("config error: {0}")]
    Config(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, NodeError>;
