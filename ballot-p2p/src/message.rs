use serde::{Deserialize, Serialize};

use ballot_common::{
    crypto::{digest, Hash},
    types::{Block, ConsensusMessage, NodeStatus, VoteTransaction},
    ValidationError,
};

pub const PROTOCOL_VERSION: u8 = 1;

/// Cap on blocks returned by one `GetBlocks` request.
pub const MAX_BLOCKS_PER_REQUEST: usize = 64;

/// Content carried by gossip. The envelope id is the hash of this value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum GossipPayload {
    Transaction(VoteTransaction),
    Consensus(ConsensusMessage),
    /// A finalized block with its commit certificate.
    Block(Block),
}

impl GossipPayload {
    pub fn content_hash(&self) -> Result<Hash, bincode::Error> {
        Ok(digest(&bincode::serialize(self)?))
    }

    pub fn kind(&self) -> &'static str {
        match self {
            GossipPayload::Transaction(_) => "tx",
            GossipPayload::Consensus(ConsensusMessage::PrePrepare(_)) => "pre-prepare",
            GossipPayload::Consensus(ConsensusMessage::Prepare(_)) => "prepare",
            GossipPayload::Consensus(ConsensusMessage::Commit(_)) => "commit",
            GossipPayload::Block(_) => "block",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GossipMessage {
    pub version: u8,
    pub id: Hash,
    /// Listen address of the node that first published the message.
    pub origin: String,
    /// Listen address of the node that delivered this copy. Rewritten on
    /// every hop and not covered by `id`.
    #[serde(default)]
    pub sender: String,
    pub payload: GossipPayload,
}

impl GossipMessage {
    pub fn new(origin: impl Into<String>, payload: GossipPayload) -> Result<Self, bincode::Error> {
        let origin = origin.into();
        Ok(Self {
            version: PROTOCOL_VERSION,
            id: payload.content_hash()?,
            sender: origin.clone(),
            origin,
            payload,
        })
    }

    /// The sender's address, if the envelope carries one.
    pub fn sender(&self) -> Option<&str> {
        (!self.sender.is_empty()).then_some(self.sender.as_str())
    }

    /// Checks the protocol version and that `id` commits to the payload.
    pub fn verify(&self) -> Result<(), ValidationError> {
        if self.version != PROTOCOL_VERSION {
            return Err(ValidationError::UnsupportedVersion(self.version));
        }
        match self.payload.content_hash() {
            Ok(hash) if hash == self.id => Ok(()),
            _ => Err(ValidationError::HashMismatch),
        }
    }
}

/// Requests accepted on the node's TCP port.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum WireRequest {
    /// Connection handshake; `from` is the caller's listen address.
    Ping { version: u8, from: String },
    GetKnownPeers,
    Gossip(GossipMessage),
    SubmitTransaction(VoteTransaction),
    GetStatus,
    /// Finalized blocks from `from_height` onwards, for catch-up.
    GetBlocks { from_height: u64 },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum WireResponse {
    Pong { version: u8 },
    KnownPeers(Vec<String>),
    Accepted,
    Submitted { hash: Hash, duplicate: bool },
    Status(NodeStatus),
    Blocks(Vec<Block>),
    Error(String),
}
