use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::crypto::Hash;

/// Read-only node status served by `GetStatus`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeStatus {
    pub height: u64,
    pub latest_block_hash: Hash,
    /// Finalized ballots per candidate id.
    pub tally: BTreeMap<String, u64>,
    pub total_votes: u64,
    pub active_validator_count: usize,
    pub view: u64,
    /// Round phase name, e.g. `PREPARE`.
    #[serde(default)]
    pub phase: String,
    pub epoch: u64,
}
