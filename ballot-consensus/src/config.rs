use std::time::Duration;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsensusConfig {
    pub committee_size: usize,
    pub max_batch: usize,
    pub round_timeout_ms: u64,
    /// Blocks per epoch; the committee is recomputed after each epoch.
    pub epoch_length: u64,
    pub max_reputation: u64,
}

impl Default for ConsensusConfig {
    fn default() -> Self {
        Self {
            committee_size: 21,
            max_batch: 500,
            round_timeout_ms: 4_000,
            epoch_length: 100,
            max_reputation: 100,
        }
    }
}

impl ConsensusConfig {
    pub fn round_timeout(&self) -> Duration {
        Duration::from_millis(self.round_timeout_ms)
    }
}
