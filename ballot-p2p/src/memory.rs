use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc::{self, Receiver, Sender};

use ballot_common::types::Block;

use crate::{
    error::P2pError,
    message::{GossipMessage, MAX_BLOCKS_PER_REQUEST},
    transport::{BlockSource, PeerTransport},
};

struct Endpoint {
    inbox: Sender<GossipMessage>,
    known_peers: Vec<String>,
    blocks: Option<Arc<dyn BlockSource>>,
}

#[derive(Default)]
struct HubState {
    nodes: HashMap<String, Endpoint>,
    // Addresses that never answer
    hanging: HashSet<String>,
}

/// In-process network for simulations and tests. Every registered address
/// gets an inbox; transports created from the hub deliver into them.
#[derive(Clone, Default)]
pub struct InMemoryHub {
    state: Arc<Mutex<HubState>>,
}

impl InMemoryHub {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, address: impl Into<String>, buffer: usize) -> Receiver<GossipMessage> {
        let (tx, rx) = mpsc::channel(buffer);
        self.state.lock().nodes.insert(
            address.into(),
            Endpoint {
                inbox: tx,
                known_peers: Vec::new(),
                blocks: None,
            },
        );
        rx
    }

    /// Sets what `address` answers to `GetKnownPeers`.
    pub fn set_known_peers(&self, address: &str, peers: Vec<String>) {
        if let Some(endpoint) = self.state.lock().nodes.get_mut(address) {
            endpoint.known_peers = peers;
        }
    }

    /// Answers `get_blocks` calls to `address` from `source`.
    pub fn serve_blocks(&self, address: &str, source: Arc<dyn BlockSource>) {
        if let Some(endpoint) = self.state.lock().nodes.get_mut(address) {
            endpoint.blocks = Some(source);
        }
    }

    /// Makes every call to `address` hang until the caller's timeout fires.
    pub fn set_unreachable(&self, address: impl Into<String>) {
        self.state.lock().hanging.insert(address.into());
    }

    pub fn set_reachable(&self, address: &str) {
        self.state.lock().hanging.remove(address);
    }

    pub fn transport(&self) -> InMemoryTransport {
        InMemoryTransport { hub: self.clone() }
    }

    async fn reach(&self, address: &str) -> Result<(), P2pError> {
        let (hanging, registered) = {
            let state = self.state.lock();
            (state.hanging.contains(address), state.nodes.contains_key(address))
        };
        if hanging {
            std::future::pending::<()>().await;
        }
        if !registered {
            return Err(P2pError::Refused(address.to_string()));
        }
        Ok(())
    }
}

#[derive(Clone)]
pub struct InMemoryTransport {
    hub: InMemoryHub,
}

#[async_trait]
impl PeerTransport for InMemoryTransport {
    async fn ping(&self, address: &str) -> Result<(), P2pError> {
        self.hub.reach(address).await
    }

    async fn get_known_peers(&self, address: &str) -> Result<Vec<String>, P2pError> {
        self.hub.reach(address).await?;
        let state = self.hub.state.lock();
        state
            .nodes
            .get(address)
            .map(|e| e.known_peers.clone())
            .ok_or_else(|| P2pError::Refused(address.to_string()))
    }

    async fn deliver(&self, address: &str, message: GossipMessage) -> Result<(), P2pError> {
        self.hub.reach(address).await?;
        let inbox = {
            let state = self.hub.state.lock();
            state
                .nodes
                .get(address)
                .map(|e| e.inbox.clone())
                .ok_or_else(|| P2pError::Refused(address.to_string()))?
        };
        inbox
            .try_send(message)
            .map_err(|_| P2pError::Overflow(address.to_string()))
    }

    async fn get_blocks(&self, address: &str, from_height: u64) -> Result<Vec<Block>, P2pError> {
        self.hub.reach(address).await?;
        let source = {
            let state = self.hub.state.lock();
            state.nodes.get(address).and_then(|e| e.blocks.clone())
        };
        match source {
            Some(source) => Ok(source.blocks_from(from_height, MAX_BLOCKS_PER_REQUEST).await),
            None => Err(P2pError::UnexpectedResponse(address.to_string())),
        }
    }
}
