//! Validator node: configuration, key handling, the peer RPC service and the
//! event loop connecting the mempool, gossip network and consensus engine.

pub mod cli;
pub mod config;
pub mod error;
pub mod keys;
pub mod logging;
pub mod rpc;
pub mod runtime;

pub use config::NodeConfig;
pub use error::{NodeError, Result};
pub use runtime::builder::{build_runtime, NodeRuntime};
pub use runtime::maestro::Maestro;
pub use runtime::node::Node;
