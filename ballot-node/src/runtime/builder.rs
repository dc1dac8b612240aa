use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tracing::{error, info};

use ballot_common::auth::Authenticator;
use ballot_consensus::ConsensusEngine;
use ballot_mempool::Mempool;
use ballot_p2p::{server::serve, tcp::TcpTransport, GossipNetwork};

use crate::{config::NodeConfig, error::Result, rpc::service::NodeService};

use super::node::Node;

pub struct NodeRuntime {
    pub node: Arc<Node<TcpTransport>>,
    /// Bound listen address (resolves port 0).
    pub local_addr: SocketAddr,
    tasks: Vec<JoinHandle<()>>,
}

impl NodeRuntime {
    pub fn shutdown(self) {
        for task in self.tasks {
            task.abort();
        }
        info!("👋 Node {} shut down", self.local_addr);
    }
}

/// Binds the listener, builds the engine from the genesis validators, dials
/// the seeds and spawns the RPC server and the event loop.
pub async fn build_runtime(config: NodeConfig, auth: Arc<dyn Authenticator>) -> Result<NodeRuntime> {
    let listener = TcpListener::bind(&config.p2p.listen_addr).await?;
    let local_addr = listener.local_addr()?;
    let max_frame = config.p2p.max_frame_bytes;
    info!("🔄 Starting node {} ({}) on {}", config.node_name, auth.public_key(), local_addr);

    let mempool = Arc::new(Mempool::new(config.mempool.clone()));
    let transport = Arc::new(TcpTransport::new(local_addr.to_string(), max_frame));
    let gossip = Arc::new(GossipNetwork::new(local_addr.to_string(), transport, config.p2p.clone()));

    let engine = ConsensusEngine::new(
        config.consensus.clone(),
        auth,
        Arc::clone(&mempool),
        config.genesis.clone(),
        tokio::time::Instant::now().into_std(),
    )?;
    info!(
        "🏛️ Genesis committee: {} validators, quorum {}",
        engine.committee().len(),
        engine.quorum()
    );

    let (node, maestro) = Node::assemble(engine, mempool, Arc::clone(&gossip));

    let service = Arc::new(NodeService::new(Arc::clone(&node)));
    let server = tokio::spawn(async move {
        if let Err(e) = serve(listener, service, max_frame).await {
            error!("❌ RPC server stopped: {}", e);
        }
    });

    gossip.bootstrap(&config.p2p.seeds).await;
    let event_loop = tokio::spawn(maestro.run());

    Ok(NodeRuntime {
        node,
        local_addr,
        tasks: vec![server, event_loop],
    })
}
