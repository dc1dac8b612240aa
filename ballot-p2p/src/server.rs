use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, info, warn};

use crate::{
    codec::{read_frame, write_frame},
    error::P2pError,
    message::{WireRequest, WireResponse},
};

/// Inbound side of the peer protocol, implemented by the node runtime.
#[async_trait]
pub trait RequestHandler: Send + Sync + 'static {
    async fn handle(&self, from: SocketAddr, req: WireRequest) -> WireResponse;
}

/// Accepts connections until the listener fails. Each connection is served
/// on its own task.
pub async fn serve(
    listener: TcpListener,
    handler: Arc<dyn RequestHandler>,
    max_frame_bytes: usize,
) -> Result<(), P2pError> {
    info!("📡 Listening on {}", listener.local_addr()?);
    loop {
        let (stream, peer) = listener.accept().await?;
        let handler = Arc::clone(&handler);
        tokio::spawn(async move {
            if let Err(e) = serve_connection(stream, peer, handler, max_frame_bytes).await {
                debug!("Connection from {} closed: {}", peer, e);
            }
        });
    }
}

async fn serve_connection(
    mut stream: TcpStream,
    peer: SocketAddr,
    handler: Arc<dyn RequestHandler>,
    max_frame_bytes: usize,
) -> Result<(), P2pError> {
    loop {
        let req = match read_frame::<_, WireRequest>(&mut stream, max_frame_bytes).await {
            Ok(Some(req)) => req,
            Ok(None) => return Ok(()),
            Err(e) => {
                warn!("⚠️ Bad frame from {}: {}", peer, e);
                let _ = write_frame(&mut stream, &WireResponse::Error(e.to_string())).await;
                return Err(e);
            }
        };
        let resp = handler.handle(peer, req).await;
        write_frame(&mut stream, &resp).await?;
    }
}
