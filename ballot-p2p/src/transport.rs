use async_trait::async_trait;

use ballot_common::types::Block;

use crate::{error::P2pError, message::GossipMessage};

/// Outbound side of the peer protocol. Implementations do not apply
/// timeouts; `GossipNetwork` bounds every call.
#[async_trait]
pub trait PeerTransport: Send + Sync + 'static {
    /// Handshake used when connecting to a newly learned address.
    async fn ping(&self, address: &str) -> Result<(), P2pError>;

    async fn get_known_peers(&self, address: &str) -> Result<Vec<String>, P2pError>;

    async fn deliver(&self, address: &str, message: GossipMessage) -> Result<(), P2pError>;

    /// Finalized blocks starting at `from_height`, in height order.
    async fn get_blocks(&self, address: &str, from_height: u64) -> Result<Vec<Block>, P2pError>;
}

/// Read access to finalized blocks, used to answer catch-up requests.
#[async_trait]
pub trait BlockSource: Send + Sync + 'static {
    async fn blocks_from(&self, from_height: u64, limit: usize) -> Vec<Block>;
}
