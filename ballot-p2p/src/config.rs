use std::time::Duration;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct P2pConfig {
    pub listen_addr: String,
    /// Addresses dialed at startup.
    pub seeds: Vec<String>,
    pub discovery_interval_secs: u64,
    pub discovery_timeout_ms: u64,
    pub connect_timeout_ms: u64,
    pub tx_broadcast_timeout_ms: u64,
    pub consensus_broadcast_timeout_ms: u64,
    pub block_broadcast_timeout_ms: u64,
    /// Consecutive failures after which a peer is evicted.
    pub failure_threshold: u32,
    pub seen_cache_capacity: usize,
    pub seen_cache_ttl_secs: u64,
    pub max_frame_bytes: usize,
}

impl Default for P2pConfig {
    fn default() -> Self {
        Self {
            listen_addr: "127.0.0.1:50051".into(),
            seeds: Vec::new(),
            discovery_interval_secs: 30,
            discovery_timeout_ms: 5_000,
            connect_timeout_ms: 5_000,
            tx_broadcast_timeout_ms: 2_000,
            consensus_broadcast_timeout_ms: 5_000,
            block_broadcast_timeout_ms: 5_000,
            failure_threshold: 3,
            seen_cache_capacity: 10_000,
            seen_cache_ttl_secs: 120,
            max_frame_bytes: 8 * 1024 * 1024,
        }
    }
}

impl P2pConfig {
    pub fn discovery_interval(&self) -> Duration {
        Duration::from_secs(self.discovery_interval_secs)
    }

    pub fn discovery_timeout(&self) -> Duration {
        Duration::from_millis(self.discovery_timeout_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn tx_broadcast_timeout(&self) -> Duration {
        Duration::from_millis(self.tx_broadcast_timeout_ms)
    }

    pub fn consensus_broadcast_timeout(&self) -> Duration {
        Duration::from_millis(self.consensus_broadcast_timeout_ms)
    }

    pub fn block_broadcast_timeout(&self) -> Duration {
        Duration::from_millis(self.block_broadcast_timeout_ms)
    }

    pub fn seen_cache_ttl(&self) -> Duration {
        Duration::from_secs(self.seen_cache_ttl_secs)
    }
}
