use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use async_trait::async_trait;
use tokio::sync::{
    mpsc::{self, error::TrySendError},
    Mutex, Notify,
};
use tracing::{debug, info, warn};

use ballot_common::{
    types::{Block, ConsensusMessage, NodeStatus, VoteTransaction},
    BallotError,
};
use ballot_consensus::ConsensusEngine;
use ballot_mempool::{Ack, Mempool};
use ballot_p2p::{BlockSource, GossipMessage, GossipNetwork, GossipPayload, P2pError, PeerTransport};

use super::maestro::Maestro;

pub const TX_CHANNEL_CAPACITY: usize = 1_000;
pub const CONSENSUS_CHANNEL_CAPACITY: usize = 100;
pub const BLOCK_CHANNEL_CAPACITY: usize = 256;

/// State shared between the RPC service, the event loop and tests.
pub struct Node<T: PeerTransport> {
    pub engine: Arc<Mutex<ConsensusEngine>>,
    pub mempool: Arc<Mempool>,
    pub gossip: Arc<GossipNetwork<T>>,
    tx_inbound: mpsc::Sender<VoteTransaction>,
    consensus_inbound: mpsc::Sender<ConsensusMessage>,
    block_inbound: mpsc::Sender<Block>,
    wake: Arc<Notify>,
    syncing: AtomicBool,
}

impl<T: PeerTransport> Node<T> {
    /// Wires the shared state and returns the event loop that owns the
    /// inbound channels. Spawn `Maestro::run` to start processing.
    pub fn assemble(engine: ConsensusEngine, mempool: Arc<Mempool>, gossip: Arc<GossipNetwork<T>>) -> (Arc<Self>, Maestro<T>) {
        let (tx_inbound, tx_rx) = mpsc::channel(TX_CHANNEL_CAPACITY);
        let (consensus_inbound, consensus_rx) = mpsc::channel(CONSENSUS_CHANNEL_CAPACITY);
        let (block_inbound, block_rx) = mpsc::channel(BLOCK_CHANNEL_CAPACITY);
        let wake = Arc::new(Notify::new());

        let node = Arc::new(Self {
            engine: Arc::new(Mutex::new(engine)),
            mempool,
            gossip,
            tx_inbound,
            consensus_inbound,
            block_inbound,
            wake,
            syncing: AtomicBool::new(false),
        });
        let maestro = Maestro::new(Arc::clone(&node), tx_rx, consensus_rx, block_rx);
        (node, maestro)
    }

    pub(crate) fn wake(&self) -> Arc<Notify> {
        Arc::clone(&self.wake)
    }

    /// Entry point for every gossip envelope received from a peer.
    ///
    /// Verified, unseen payloads are queued for the event loop; a full
    /// queue drops the payload.
    pub async fn receive_gossip(&self, message: GossipMessage) -> Result<(), P2pError> {
        let Some(payload) = self.gossip.handle_incoming(message).await? else {
            return Ok(());
        };

        match payload {
            GossipPayload::Transaction(tx) => {
                if let Err(e) = self.tx_inbound.try_send(tx) {
                    Self::log_dropped("transaction", e);
                }
            }
            GossipPayload::Consensus(msg) => {
                if let Err(e) = self.consensus_inbound.try_send(msg) {
                    Self::log_dropped("consensus", e);
                }
            }
            GossipPayload::Block(block) => {
                if let Err(e) = self.block_inbound.try_send(block) {
                    Self::log_dropped("block", e);
                }
            }
        }
        Ok(())
    }

    /// Fetches finalized blocks above the local tip from connected peers
    /// and queues them for the event loop. At most one catch-up runs at a
    /// time.
    pub async fn catch_up(&self) {
        if self.syncing.swap(true, Ordering::AcqRel) {
            return;
        }

        let start = self.engine.lock().await.height() + 1;
        let mut next = start;
        'peers: for peer in self.gossip.connected_peers().await {
            loop {
                let blocks = match self.gossip.request_blocks(&peer, next).await {
                    Ok(blocks) if blocks.is_empty() => break,
                    Ok(blocks) => blocks,
                    Err(e) => {
                        debug!("Block request to {} failed: {}", peer, e);
                        break;
                    }
                };
                for block in blocks {
                    if block.height() != next {
                        warn!("⚠️ {} sent block {} while syncing from {}", peer, block.height(), next);
                        continue 'peers;
                    }
                    if self.block_inbound.send(block).await.is_err() {
                        break 'peers;
                    }
                    next += 1;
                }
            }
        }

        if next > start {
            info!("🔄 Queued blocks {}..{} from peers", start, next - 1);
        }
        self.syncing.store(false, Ordering::Release);
    }

    pub async fn blocks_from(&self, from_height: u64, limit: usize) -> Vec<Block> {
        self.engine.lock().await.chain().blocks_from(from_height, limit)
    }

    fn log_dropped<M>(queue: &str, e: TrySendError<M>) {
        match e {
            TrySendError::Full(_) => warn!("⚠️ {} queue full, dropping message", queue),
            TrySendError::Closed(_) => debug!("{} queue closed, dropping message", queue),
        }
    }

    /// External submission: admit to the mempool, gossip new ballots and
    /// wake the event loop.
    pub async fn submit_transaction(&self, tx: VoteTransaction) -> Result<Ack, BallotError> {
        let ack = self.mempool.submit(tx.clone())?;
        if let Ack::Admitted(hash) = ack {
            let gossip = Arc::clone(&self.gossip);
            tokio::spawn(async move {
                match gossip.broadcast(GossipPayload::Transaction(tx)).await {
                    Ok(report) => debug!(
                        "📣 Ballot {} gossiped to {} peers ({} failed)",
                        hash.short(),
                        report.delivered.len(),
                        report.failed.len()
                    ),
                    Err(e) => warn!("❌ Failed to gossip ballot {}: {}", hash.short(), e),
                }
            });
            self.wake.notify_one();
        }
        Ok(ack)
    }

    pub async fn status(&self) -> NodeStatus {
        self.engine.lock().await.status()
    }
}

#[async_trait]
impl<T: PeerTransport> BlockSource for Node<T> {
    async fn blocks_from(&self, from_height: u64, limit: usize) -> Vec<Block> {
        Node::blocks_from(self, from_height, limit).await
    }
}
