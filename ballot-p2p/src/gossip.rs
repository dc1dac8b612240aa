use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use tokio::sync::RwLock;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use ballot_common::types::Block;

use crate::{
    config::P2pConfig,
    error::P2pError,
    message::{GossipMessage, GossipPayload},
    peer::{PeerCommand, PeerEvent, PeerRecord, PeerTable},
    seen::SeenCache,
    transport::PeerTransport,
};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BroadcastReport {
    pub delivered: Vec<String>,
    pub failed: Vec<String>,
    pub evicted: Vec<String>,
    /// The message id was already in the seen cache; nothing was sent.
    pub suppressed: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DiscoveryReport {
    pub queried: usize,
    pub learned: Vec<String>,
    pub connected: Vec<String>,
}

/// Peer discovery, connection lifecycle and gossip fan-out over a
/// `PeerTransport`.
pub struct GossipNetwork<T: PeerTransport> {
    local_address: String,
    transport: Arc<T>,
    peers: RwLock<PeerTable>,
    seen: SeenCache,
    config: P2pConfig,
}

impl<T: PeerTransport> GossipNetwork<T> {
    pub fn new(local_address: impl Into<String>, transport: Arc<T>, config: P2pConfig) -> Self {
        let local_address = local_address.into();
        Self {
            peers: RwLock::new(PeerTable::new(local_address.clone(), config.failure_threshold)),
            seen: SeenCache::new(config.seen_cache_capacity, config.seen_cache_ttl()),
            local_address,
            transport,
            config,
        }
    }

    pub fn local_address(&self) -> &str {
        &self.local_address
    }

    pub fn config(&self) -> &P2pConfig {
        &self.config
    }

    pub async fn connected_peers(&self) -> Vec<String> {
        self.peers.read().await.connected()
    }

    pub async fn known_peers(&self) -> Vec<String> {
        self.peers.read().await.known_addresses()
    }

    pub async fn peer(&self, address: &str) -> Option<PeerRecord> {
        self.peers.read().await.get(address).cloned()
    }

    pub async fn peer_count(&self) -> usize {
        self.peers.read().await.len()
    }

    /// Registers an inbound peer after a successful handshake.
    pub async fn register_peer(&self, address: String) -> PeerEvent {
        self.peers.write().await.handle_command(PeerCommand::Register(address))
    }

    /// Dials configured seed addresses. Returns the ones that answered.
    pub async fn bootstrap(&self, seeds: &[String]) -> Vec<String> {
        let fresh = self.peers.write().await.learn(seeds.iter().cloned());
        let connected = self.connect_all(fresh).await;
        info!("🌱 Bootstrap: {}/{} seeds reachable", connected.len(), seeds.len());
        connected
    }

    /// Handshakes with `address` under the connect timeout and registers it.
    pub async fn connect(&self, address: &str) -> Result<(), P2pError> {
        let res = timeout(self.config.connect_timeout(), self.transport.ping(address)).await;
        match res {
            Ok(Ok(())) => {
                self.peers
                    .write()
                    .await
                    .handle_command(PeerCommand::Register(address.to_string()));
                Ok(())
            }
            Ok(Err(e)) => {
                debug!("❌ Connect to {} failed: {}", address, e);
                self.peers.write().await.forget(address);
                Err(e)
            }
            Err(_) => {
                debug!("⏰ Connect to {} timed out", address);
                self.peers.write().await.forget(address);
                Err(P2pError::Timeout(address.to_string()))
            }
        }
    }

    async fn connect_all(&self, addresses: Vec<String>) -> Vec<String> {
        let attempts = addresses.into_iter().map(|address| async move {
            let ok = self.connect(&address).await.is_ok();
            (address, ok)
        });
        join_all(attempts)
            .await
            .into_iter()
            .filter_map(|(address, ok)| ok.then_some(address))
            .collect()
    }

    /// One discovery round: ask every connected peer for its peer list,
    /// merge unseen addresses and dial them. Every query is time-bounded.
    pub async fn discover(&self) -> DiscoveryReport {
        let targets = self.connected_peers().await;
        let query_timeout = self.config.discovery_timeout();

        let queries = targets.iter().map(|address| {
            let transport = Arc::clone(&self.transport);
            async move {
                let res = timeout(query_timeout, transport.get_known_peers(address)).await;
                (address.clone(), res)
            }
        });
        let results = join_all(queries).await;

        let mut candidates = Vec::new();
        {
            let mut table = self.peers.write().await;
            for (address, res) in results {
                match res {
                    Ok(Ok(list)) => {
                        table.handle_command(PeerCommand::RecordSuccess(address));
                        candidates.extend(list);
                    }
                    Ok(Err(e)) => {
                        debug!("Discovery query to {} failed: {}", address, e);
                        table.handle_command(PeerCommand::RecordFailure(address));
                    }
                    Err(_) => {
                        debug!("Discovery query to {} timed out", address);
                        table.handle_command(PeerCommand::RecordFailure(address));
                    }
                }
            }
        }

        let learned = self.peers.write().await.learn(candidates);
        let connected = self.connect_all(learned.clone()).await;

        if !learned.is_empty() {
            info!(
                "🔭 Discovery: queried {}, learned {}, connected {}",
                targets.len(),
                learned.len(),
                connected.len()
            );
        }

        DiscoveryReport {
            queried: targets.len(),
            learned,
            connected,
        }
    }

    /// Wraps a locally produced payload and broadcasts it.
    pub async fn broadcast(&self, payload: GossipPayload) -> Result<BroadcastReport, P2pError> {
        let message = GossipMessage::new(self.local_address.clone(), payload)?;
        Ok(self.publish(message).await)
    }

    /// Sends `message` to every connected peer unless its id was already seen.
    pub async fn publish(&self, message: GossipMessage) -> BroadcastReport {
        if !self.seen.check_and_mark(message.id) {
            debug!("🔁 Suppressing already-seen {} {}", message.payload.kind(), message.id.short());
            return BroadcastReport {
                suppressed: true,
                ..Default::default()
            };
        }
        self.fan_out(message, None).await
    }

    /// Accepts a message received from a peer.
    ///
    /// Returns `Ok(None)` for messages already seen. New messages are relayed
    /// to everyone except the sender and the origin on a background task,
    /// and the payload is returned for local processing.
    pub async fn handle_incoming(self: &Arc<Self>, message: GossipMessage) -> Result<Option<GossipPayload>, P2pError> {
        message.verify()?;

        let sender = message.sender().map(str::to_string);
        if let Some(sender) = &sender {
            self.peers
                .write()
                .await
                .handle_command(PeerCommand::RecordSuccess(sender.clone()));
        }

        if !self.seen.check_and_mark(message.id) {
            debug!("🔁 Dropping already-seen {} {}", message.payload.kind(), message.id.short());
            return Ok(None);
        }

        let payload = message.payload.clone();
        let network = Arc::clone(self);
        tokio::spawn(async move {
            network.fan_out(message, sender).await;
        });

        Ok(Some(payload))
    }

    /// Fetches finalized blocks from `address`, bounded by the discovery
    /// timeout.
    pub async fn request_blocks(&self, address: &str, from_height: u64) -> Result<Vec<Block>, P2pError> {
        let res = timeout(self.config.discovery_timeout(), self.transport.get_blocks(address, from_height)).await;
        let mut table = self.peers.write().await;
        match res {
            Ok(Ok(blocks)) => {
                table.handle_command(PeerCommand::RecordSuccess(address.to_string()));
                Ok(blocks)
            }
            Ok(Err(e)) => {
                table.handle_command(PeerCommand::RecordFailure(address.to_string()));
                Err(e)
            }
            Err(_) => {
                table.handle_command(PeerCommand::RecordFailure(address.to_string()));
                Err(P2pError::Timeout(address.to_string()))
            }
        }
    }

    async fn fan_out(&self, mut message: GossipMessage, exclude: Option<String>) -> BroadcastReport {
        message.sender = self.local_address.clone();
        let targets: Vec<String> = self
            .connected_peers()
            .await
            .into_iter()
            .filter(|a| Some(a) != exclude.as_ref() && *a != message.origin)
            .collect();

        let per_peer = self.send_timeout(&message.payload);
        let kind = message.payload.kind();
        let id = message.id;

        let sends = targets.into_iter().map(|address| {
            let transport = Arc::clone(&self.transport);
            let message = message.clone();
            async move {
                let res = timeout(per_peer, transport.deliver(&address, message)).await;
                (address, res)
            }
        });
        let results = join_all(sends).await;

        let mut report = BroadcastReport::default();
        let mut table = self.peers.write().await;
        for (address, res) in results {
            match res {
                Ok(Ok(())) => {
                    table.handle_command(PeerCommand::RecordSuccess(address.clone()));
                    report.delivered.push(address);
                }
                Ok(Err(e)) => {
                    warn!("❌ {} {} to {} failed: {}", kind, id.short(), address, e);
                    Self::record_failure(&mut table, &mut report, address);
                }
                Err(_) => {
                    warn!("⏰ {} {} to {} timed out after {:?}", kind, id.short(), address, per_peer);
                    Self::record_failure(&mut table, &mut report, address);
                }
            }
        }

        debug!(
            "📣 {} {} delivered to {}, failed {}",
            kind,
            id.short(),
            report.delivered.len(),
            report.failed.len()
        );
        report
    }

    fn record_failure(table: &mut PeerTable, report: &mut BroadcastReport, address: String) {
        if let PeerEvent::Evicted(record) = table.handle_command(PeerCommand::RecordFailure(address.clone())) {
            report.evicted.push(record.address);
        }
        report.failed.push(address);
    }

    fn send_timeout(&self, payload: &GossipPayload) -> Duration {
        match payload {
            GossipPayload::Transaction(_) => self.config.tx_broadcast_timeout(),
            GossipPayload::Consensus(_) => self.config.consensus_broadcast_timeout(),
            GossipPayload::Block(_) => self.config.block_broadcast_timeout(),
        }
    }
}
