use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use ballot_common::utils::current_time;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PeerState {
    Connected,
    /// At least one recent failure, still below the eviction threshold.
    Degraded,
    /// Crossed the failure threshold; no longer in the active set.
    Unhealthy,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerRecord {
    pub address: String,
    pub state: PeerState,
    pub consecutive_failures: u32,
    /// Unix seconds of the last successful exchange.
    pub last_seen: u64,
}

impl PeerRecord {
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            state: PeerState::Connected,
            consecutive_failures: 0,
            last_seen: current_time(),
        }
    }
}

pub enum PeerCommand {
    Register(String),
    RecordSuccess(String),
    RecordFailure(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PeerEvent {
    Registered(String),
    AlreadyRegistered(String),
    Updated(String),
    Degraded { address: String, failures: u32 },
    Evicted(PeerRecord),
    NoChange,
}

/// Owned peer table: the known address set plus the active records.
/// Callers hold it behind a single `RwLock`.
#[derive(Debug, Clone)]
pub struct PeerTable {
    local_address: String,
    known: BTreeSet<String>,
    active: BTreeMap<String, PeerRecord>,
    failure_threshold: u32,
}

impl PeerTable {
    pub fn new(local_address: impl Into<String>, failure_threshold: u32) -> Self {
        Self {
            local_address: local_address.into(),
            known: BTreeSet::new(),
            active: BTreeMap::new(),
            failure_threshold: failure_threshold.max(1),
        }
    }

    pub fn handle_command(&mut self, cmd: PeerCommand) -> PeerEvent {
        match cmd {
            PeerCommand::Register(address) => self.register(address),
            PeerCommand::RecordSuccess(address) => self.record_success(&address),
            PeerCommand::RecordFailure(address) => self.record_failure(&address),
        }
    }

    fn register(&mut self, address: String) -> PeerEvent {
        if address == self.local_address {
            return PeerEvent::NoChange;
        }
        self.known.insert(address.clone());
        if self.active.contains_key(&address) {
            return PeerEvent::AlreadyRegistered(address);
        }
        self.active.insert(address.clone(), PeerRecord::new(address.clone()));
        info!("🤝 Peer {} connected ({} active)", address, self.active.len());
        PeerEvent::Registered(address)
    }

    fn record_success(&mut self, address: &str) -> PeerEvent {
        match self.active.get_mut(address) {
            Some(record) => {
                record.consecutive_failures = 0;
                record.state = PeerState::Connected;
                record.last_seen = current_time();
                PeerEvent::Updated(address.to_string())
            }
            None => PeerEvent::NoChange,
        }
    }

    fn record_failure(&mut self, address: &str) -> PeerEvent {
        let Some(record) = self.active.get_mut(address) else {
            return PeerEvent::NoChange;
        };
        record.consecutive_failures += 1;

        if record.consecutive_failures < self.failure_threshold {
            record.state = PeerState::Degraded;
            debug!("⚠️ Peer {} failure {}/{}", address, record.consecutive_failures, self.failure_threshold);
            return PeerEvent::Degraded {
                address: address.to_string(),
                failures: record.consecutive_failures,
            };
        }

        // Forget the address too, so a later discovery round can bring it back
        let mut record = match self.active.remove(address) {
            Some(record) => record,
            None => return PeerEvent::NoChange,
        };
        self.known.remove(address);
        record.state = PeerState::Unhealthy;
        warn!(
            "🚫 Peer {} evicted after {} consecutive failures",
            address, record.consecutive_failures
        );
        PeerEvent::Evicted(record)
    }

    /// Merges addresses learned from other peers into the known set.
    /// Returns the ones not seen before, in input order.
    pub fn learn<I>(&mut self, addresses: I) -> Vec<String>
    where
        I: IntoIterator<Item = String>,
    {
        let mut fresh = Vec::new();
        for address in addresses {
            if address.is_empty() || address == self.local_address {
                continue;
            }
            if self.known.insert(address.clone()) {
                fresh.push(address);
            }
        }
        fresh
    }

    /// Removes an address that was learned but could not be reached.
    pub fn forget(&mut self, address: &str) {
        if !self.active.contains_key(address) {
            self.known.remove(address);
        }
    }

    pub fn connected(&self) -> Vec<String> {
        self.active.keys().cloned().collect()
    }

    pub fn known_addresses(&self) -> Vec<String> {
        self.known.iter().cloned().collect()
    }

    pub fn get(&self, address: &str) -> Option<&PeerRecord> {
        self.active.get(address)
    }

    pub fn len(&self) -> usize {
        self.active.len()
    }

    pub fn is_empty(&self) -> bool {
        self.active.is_empty()
    }

    pub fn local_address(&self) -> &str {
        &self.local_address
    }
}
