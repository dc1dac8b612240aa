use std::{fs, path::Path};

use serde::{Deserialize, Serialize};

use ballot_common::types::Validator;
use ballot_consensus::ConsensusConfig;
use ballot_mempool::MempoolConfig;
use ballot_p2p::P2pConfig;

use crate::error::{NodeError, Result};

/// Node configuration file. Every section falls back to its defaults when
/// omitted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// Used for the audit log file name.
    pub node_name: String,
    /// Hex Ed25519 seed of the node's validator key.
    pub key_path: String,
    pub consensus: ConsensusConfig,
    pub mempool: MempoolConfig,
    pub p2p: P2pConfig,
    /// Validators registered at height 0. Must be identical on every node.
    pub genesis: Vec<Validator>,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            node_name: "node".into(),
            key_path: "keys/validator.key".into(),
            consensus: ConsensusConfig::default(),
            mempool: MempoolConfig::default(),
            p2p: P2pConfig::default(),
            genesis: Vec::new(),
        }
    }
}

impl NodeConfig {
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        let config: NodeConfig = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        if let Some(parent) = path.as_ref().parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.consensus.max_batch == 0 {
            return Err(NodeError::Config("consensus.max_batch must be positive".into()));
        }
        if self.consensus.round_timeout_ms == 0 {
            return Err(NodeError::Config("consensus.round_timeout_ms must be positive".into()));
        }
        if self.mempool.capacity == 0 {
            return Err(NodeError::Config("mempool.capacity must be positive".into()));
        }
        if self.p2p.failure_threshold == 0 {
            return Err(NodeError::Config("p2p.failure_threshold must be positive".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ballot_common::{auth::PublicKey, types::Zone};

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.json");

        let mut config = NodeConfig::default();
        config.node_name = "node-a".into();
        config.p2p.seeds = vec!["127.0.0.1:7001".into()];
        config.genesis.push(Validator::new(PublicKey([4; 32]), 1_000, 50, Zone::SouthSouth));
        config.save_to_file(&path).unwrap();

        let loaded = NodeConfig::load_from_file(&path).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_missing_sections_use_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, r#"{ "node_name": "lean", "consensus": { "committee_size": 7 } }"#).unwrap();

        let loaded = NodeConfig::load_from_file(&path).unwrap();
        assert_eq!(loaded.node_name, "lean");
        assert_eq!(loaded.consensus.committee_size, 7);
        assert_eq!(loaded.consensus.max_batch, 500);
        assert_eq!(loaded.mempool.capacity, 10_000);
        assert_eq!(loaded.p2p.failure_threshold, 3);
        assert!(loaded.genesis.is_empty());
    }

    #[test]
    fn test_invalid_values_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, r#"{ "mempool": { "capacity": 0 } }"#).unwrap();

        assert!(matches!(NodeConfig::load_from_file(&path), Err(NodeError::Config(_))));
    }
}
