use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info};

use ballot_mempool::Ack;
use ballot_p2p::{
    server::RequestHandler, PeerTransport, WireRequest, WireResponse, MAX_BLOCKS_PER_REQUEST, PROTOCOL_VERSION,
};

use crate::runtime::node::Node;

/// Serves the peer protocol and the external submit/status calls.
pub struct NodeService<T: PeerTransport> {
    node: Arc<Node<T>>,
}

impl<T: PeerTransport> NodeService<T> {
    pub fn new(node: Arc<Node<T>>) -> Self {
        Self { node }
    }
}

#[async_trait]
impl<T: PeerTransport> RequestHandler for NodeService<T> {
    async fn handle(&self, from: SocketAddr, req: WireRequest) -> WireResponse {
        match req {
            WireRequest::Ping { version, from: listen_addr } => {
                if version != PROTOCOL_VERSION {
                    return WireResponse::Error(format!("unsupported protocol version {version}"));
                }
                if !listen_addr.is_empty() && listen_addr != self.node.gossip.local_address() {
                    self.node.gossip.register_peer(listen_addr).await;
                }
                WireResponse::Pong {
                    version: PROTOCOL_VERSION,
                }
            }
            WireRequest::GetKnownPeers => WireResponse::KnownPeers(self.node.gossip.known_peers().await),
            WireRequest::Gossip(message) => match self.node.receive_gossip(message).await {
                Ok(()) => WireResponse::Accepted,
                Err(e) => {
                    debug!("Rejected gossip from {}: {}", from, e);
                    WireResponse::Error(e.to_string())
                }
            },
            WireRequest::SubmitTransaction(tx) => match self.node.submit_transaction(tx).await {
                Ok(ack) => {
                    info!("🗳️ Ballot {} submitted via {}", ack.hash().short(), from);
                    WireResponse::Submitted {
                        hash: ack.hash(),
                        duplicate: matches!(ack, Ack::Duplicate(_)),
                    }
                }
                Err(e) => WireResponse::Error(e.to_string()),
            },
            WireRequest::GetStatus => WireResponse::Status(self.node.status().await),
            WireRequest::GetBlocks { from_height } => {
                WireResponse::Blocks(self.node.blocks_from(from_height, MAX_BLOCKS_PER_REQUEST).await)
            }
        }
    }
}
