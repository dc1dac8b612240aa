//! Gossip propagation layer: peer table, discovery, time-bounded broadcast
//! with loop suppression, and the TCP wire transport.

pub mod codec;
pub mod config;
pub mod error;
pub mod gossip;
pub mod memory;
pub mod message;
pub mod peer;
pub mod seen;
pub mod server;
pub mod tcp;
pub mod transport;

pub use config::P2pConfig;
pub use error::P2pError;
pub use gossip::{BroadcastReport, DiscoveryReport, GossipNetwork};
pub use message::{GossipMessage, GossipPayload, WireRequest, WireResponse, MAX_BLOCKS_PER_REQUEST, PROTOCOL_VERSION};
pub use peer::{PeerRecord, PeerState, PeerTable};
pub use transport::{BlockSource, PeerTransport};
