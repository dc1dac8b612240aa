use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::time::{self, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use ballot_common::types::{Block, ConsensusMessage, VoteTransaction};
use ballot_consensus::Step;
use ballot_mempool::Ack;
use ballot_p2p::{GossipPayload, PeerTransport};

use super::node::Node;

fn now() -> std::time::Instant {
    time::Instant::now().into_std()
}

/// Event loop driving the consensus engine from inbound queues, round
/// deadlines and the discovery timer.
pub struct Maestro<T: PeerTransport> {
    node: Arc<Node<T>>,
    tx_rx: mpsc::Receiver<VoteTransaction>,
    consensus_rx: mpsc::Receiver<ConsensusMessage>,
    block_rx: mpsc::Receiver<Block>,
}

impl<T: PeerTransport> Maestro<T> {
    pub(crate) fn new(
        node: Arc<Node<T>>,
        tx_rx: mpsc::Receiver<VoteTransaction>,
        consensus_rx: mpsc::Receiver<ConsensusMessage>,
        block_rx: mpsc::Receiver<Block>,
    ) -> Self {
        Self {
            node,
            tx_rx,
            consensus_rx,
            block_rx,
        }
    }

    pub async fn run(mut self) {
        info!("🎼 Maestro started for {}", self.node.gossip.local_address());
        let wake = self.node.wake();

        let mut discovery = time::interval(self.node.gossip.config().discovery_interval());
        discovery.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick fires immediately; bootstrap already covered it
        discovery.tick().await;
        self.spawn_catch_up();

        loop {
            let deadline = time::Instant::from_std(self.node.engine.lock().await.deadline());

            tokio::select! {
                maybe_tx = self.tx_rx.recv() => match maybe_tx {
                    Some(tx) => self.on_transaction(tx).await,
                    None => break,
                },
                maybe_msg = self.consensus_rx.recv() => match maybe_msg {
                    Some(msg) => self.on_consensus(msg).await,
                    None => break,
                },
                maybe_block = self.block_rx.recv() => match maybe_block {
                    Some(block) => self.on_block(block).await,
                    None => break,
                },
                _ = time::sleep_until(deadline) => self.on_tick().await,
                _ = wake.notified() => self.on_tick().await,
                _ = discovery.tick() => {
                    let gossip = Arc::clone(&self.node.gossip);
                    tokio::spawn(async move {
                        gossip.discover().await;
                    });
                }
            }
        }

        info!("🛑 Maestro stopped");
    }

    async fn on_transaction(&self, tx: VoteTransaction) {
        match self.node.mempool.submit(tx) {
            Ok(Ack::Admitted(_)) => self.on_tick().await,
            Ok(Ack::Duplicate(_)) => {}
            Err(e) => debug!("Gossiped ballot rejected: {}", e),
        }
    }

    async fn on_consensus(&self, msg: ConsensusMessage) {
        let phase = msg.phase();
        let height = msg.height();
        let (result, current) = {
            let mut engine = self.node.engine.lock().await;
            (engine.handle_message(msg, now()), engine.current_height())
        };
        if height > current + 1 {
            debug!("Peers are deciding height {} while this node is at {}", height, current);
            self.spawn_catch_up();
        }
        match result {
            Ok(step) => self.dispatch(step),
            Err(e) if e.is_fatal() => error!("🛑 {}", e),
            Err(e) => debug!("Rejected {} message: {}", phase, e),
        }
        self.on_tick().await;
    }

    /// Applies a block finalized elsewhere. A gap below it starts a
    /// catch-up.
    async fn on_block(&self, block: Block) {
        let height = block.height();
        let (result, tip) = {
            let mut engine = self.node.engine.lock().await;
            let tip = engine.height();
            if height > tip + 1 {
                (None, tip)
            } else {
                (Some(engine.apply_finalized(block, now())), tip)
            }
        };
        match result {
            Some(Ok(step)) => self.dispatch(step),
            Some(Err(e)) => debug!("Ignored block {}: {}", height, e),
            None => {
                debug!("Block {} is ahead of tip {}", height, tip);
                self.spawn_catch_up();
            }
        }
        self.on_tick().await;
    }

    fn spawn_catch_up(&self) {
        let node = Arc::clone(&self.node);
        tokio::spawn(async move {
            node.catch_up().await;
        });
    }

    async fn on_tick(&self) {
        let result = self.node.engine.lock().await.tick(now());
        match result {
            Ok(step) => self.dispatch(step),
            Err(e) => warn!("⚠️ Round tick failed: {}", e),
        }
    }

    /// Announces finalized blocks and broadcasts each outbound message on
    /// its own task. Receivers buffer votes that overtake their proposal.
    fn dispatch(&self, step: Step) {
        for block in step.finalized {
            info!(
                "🎉 Block {} finalized at height {} ({} ballots)",
                block.hash().short(),
                block.height(),
                block.transactions.len()
            );
            let gossip = Arc::clone(&self.node.gossip);
            tokio::spawn(async move {
                let height = block.height();
                if let Err(e) = gossip.broadcast(GossipPayload::Block(block)).await {
                    warn!("❌ Failed to announce block {}: {}", height, e);
                }
            });
        }

        for msg in step.outbound {
            let gossip = Arc::clone(&self.node.gossip);
            tokio::spawn(async move {
                let kind = msg.phase();
                match gossip.broadcast(GossipPayload::Consensus(msg)).await {
                    Ok(report) if !report.failed.is_empty() => warn!(
                        "⚠️ {} reached {} peers, {} failed",
                        kind,
                        report.delivered.len(),
                        report.failed.len()
                    ),
                    Ok(_) => {}
                    Err(e) => warn!("❌ Failed to broadcast {}: {}", kind, e),
                }
            });
        }
    }
}
