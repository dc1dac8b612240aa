use async_trait::async_trait;
use tokio::net::TcpStream;
use tracing::debug;

use ballot_common::{
    crypto::Hash,
    types::{Block, NodeStatus, VoteTransaction},
};

use crate::{
    codec::{read_frame, write_frame},
    error::P2pError,
    message::{GossipMessage, WireRequest, WireResponse, PROTOCOL_VERSION},
    transport::PeerTransport,
};

/// One request per connection over the length-prefixed framing.
#[derive(Debug, Clone)]
pub struct TcpTransport {
    local_address: String,
    max_frame_bytes: usize,
}

impl TcpTransport {
    pub fn new(local_address: impl Into<String>, max_frame_bytes: usize) -> Self {
        Self {
            local_address: local_address.into(),
            max_frame_bytes,
        }
    }

    pub async fn request(&self, address: &str, req: &WireRequest) -> Result<WireResponse, P2pError> {
        let mut stream = TcpStream::connect(address).await?;
        stream.set_nodelay(true)?;
        write_frame(&mut stream, req).await?;

        match read_frame::<_, WireResponse>(&mut stream, self.max_frame_bytes).await? {
            Some(WireResponse::Error(reason)) => Err(P2pError::Remote {
                address: address.to_string(),
                reason,
            }),
            Some(resp) => Ok(resp),
            None => Err(P2pError::Refused(address.to_string())),
        }
    }

    /// Client call used by the CLI and external API layer.
    pub async fn submit_transaction(&self, address: &str, tx: VoteTransaction) -> Result<(Hash, bool), P2pError> {
        match self.request(address, &WireRequest::SubmitTransaction(tx)).await? {
            WireResponse::Submitted { hash, duplicate } => Ok((hash, duplicate)),
            _ => Err(P2pError::UnexpectedResponse(address.to_string())),
        }
    }

    pub async fn get_status(&self, address: &str) -> Result<NodeStatus, P2pError> {
        match self.request(address, &WireRequest::GetStatus).await? {
            WireResponse::Status(status) => Ok(status),
            _ => Err(P2pError::UnexpectedResponse(address.to_string())),
        }
    }
}

#[async_trait]
impl PeerTransport for TcpTransport {
    async fn ping(&self, address: &str) -> Result<(), P2pError> {
        let req = WireRequest::Ping {
            version: PROTOCOL_VERSION,
            from: self.local_address.clone(),
        };
        match self.request(address, &req).await? {
            WireResponse::Pong { version } if version == PROTOCOL_VERSION => Ok(()),
            WireResponse::Pong { version } => Err(P2pError::Remote {
                address: address.to_string(),
                reason: format!("protocol version {version}"),
            }),
            _ => Err(P2pError::UnexpectedResponse(address.to_string())),
        }
    }

    async fn get_known_peers(&self, address: &str) -> Result<Vec<String>, P2pError> {
        match self.request(address, &WireRequest::GetKnownPeers).await? {
            WireResponse::KnownPeers(peers) => Ok(peers),
            _ => Err(P2pError::UnexpectedResponse(address.to_string())),
        }
    }

    async fn deliver(&self, address: &str, message: GossipMessage) -> Result<(), P2pError> {
        debug!("📤 {} {} -> {}", message.payload.kind(), message.id.short(), address);
        match self.request(address, &WireRequest::Gossip(message)).await? {
            WireResponse::Accepted => Ok(()),
            _ => Err(P2pError::UnexpectedResponse(address.to_string())),
        }
    }

    async fn get_blocks(&self, address: &str, from_height: u64) -> Result<Vec<Block>, P2pError> {
        match self.request(address, &WireRequest::GetBlocks { from_height }).await? {
            WireResponse::Blocks(blocks) => Ok(blocks),
            _ => Err(P2pError::UnexpectedResponse(address.to_string())),
        }
    }
}
