use std::collections::{HashMap, HashSet, VecDeque};

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use ballot_common::{
    auth::PublicKey,
    crypto::Hash,
    types::VoteTransaction,
    BallotError, Result, ValidationError,
};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MempoolConfig {
    pub capacity: usize,
}

impl Default for MempoolConfig {
    fn default() -> Self {
        Self { capacity: 10_000 }
    }
}

/// Successful admission outcome. Resubmitting a known ballot is not an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Ack {
    Admitted(Hash),
    Duplicate(Hash),
}

impl Ack {
    pub fn hash(&self) -> Hash {
        match self {
            Ack::Admitted(h) | Ack::Duplicate(h) => *h,
        }
    }

    pub fn is_duplicate(&self) -> bool {
        matches!(self, Ack::Duplicate(_))
    }
}

type BallotKey = (PublicKey, String);

#[derive(Debug, Default)]
struct PoolState {
    transactions: HashMap<Hash, VoteTransaction>,
    // Arrival order of pooled hashes
    arrival: VecDeque<Hash>,
    // Hashes already finalized on chain
    committed: HashSet<Hash>,
    // (voter, election) -> ballot hash, pooled or finalized
    ballots: HashMap<BallotKey, Hash>,
}

/// Pending ballot pool. One lock guards all indexes so admission checks and
/// insertion happen atomically.
#[derive(Debug)]
pub struct Mempool {
    state: RwLock<PoolState>,
    capacity: usize,
}

impl Default for Mempool {
    fn default() -> Self {
        Self::new(MempoolConfig::default())
    }
}

impl Mempool {
    pub fn new(config: MempoolConfig) -> Self {
        Self {
            state: RwLock::new(PoolState::default()),
            capacity: config.capacity,
        }
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self::new(MempoolConfig { capacity })
    }

    /// Admits a signed ballot.
    ///
    /// Known ballots (pooled or finalized) return `Ack::Duplicate` without
    /// touching the pool. A full pool rejects the new ballot.
    pub fn submit(&self, tx: VoteTransaction) -> Result<Ack> {
        // 1. Stateless checks (token shape, signature)
        tx.validate_stateless()?;

        let hash = tx.hash();
        let key = (tx.voter_public_key, tx.election_id.clone());

        let mut state = self.state.write();

        // 2. Idempotency
        if state.committed.contains(&hash) || state.transactions.contains_key(&hash) {
            debug!("🔁 Ballot {} already known, ignoring resubmission", hash.short());
            return Ok(Ack::Duplicate(hash));
        }

        // 3. One ballot per voter per election
        if let Some(existing) = state.ballots.get(&key) {
            if *existing != hash {
                warn!(
                    "⚠️ Voter {} already has ballot {} in election {}",
                    tx.voter_public_key,
                    existing.short(),
                    tx.election_id
                );
                return Err(ValidationError::DoubleVote {
                    voter: tx.voter_public_key,
                    election: tx.election_id,
                }
                .into());
            }
        }

        // 4. Backpressure
        if state.transactions.len() >= self.capacity {
            warn!("⚠️ Mempool full ({}), rejecting ballot {}", self.capacity, hash.short());
            return Err(BallotError::CapacityExceeded { capacity: self.capacity });
        }

        state.ballots.insert(key, hash);
        state.arrival.push_back(hash);
        state.transactions.insert(hash, tx);
        debug!("📥 Ballot {} admitted (pool size {})", hash.short(), state.transactions.len());

        Ok(Ack::Admitted(hash))
    }

    /// Up to `max` ballots in arrival order. Nothing is removed, so a failed
    /// round can retry with the same batch.
    pub fn drain(&self, max: usize) -> Vec<VoteTransaction> {
        let state = self.state.read();
        state
            .arrival
            .iter()
            .take(max)
            .filter_map(|h| state.transactions.get(h))
            .cloned()
            .collect()
    }

    /// Removes finalized ballots from the pool and remembers their hashes.
    /// Returns how many were actually pooled.
    pub fn evict(&self, tx_hashes: &[Hash]) -> usize {
        let mut state = self.state.write();
        Self::evict_locked(&mut state, tx_hashes)
    }

    fn evict_locked(state: &mut PoolState, tx_hashes: &[Hash]) -> usize {
        let mut removed = HashSet::new();
        for hash in tx_hashes {
            if state.transactions.remove(hash).is_some() {
                removed.insert(*hash);
            }
            state.committed.insert(*hash);
        }
        if !removed.is_empty() {
            state.arrival.retain(|h| !removed.contains(h));
        }
        removed.len()
    }

    /// Records a finalized block's ballots: evicts them, indexes their voters
    /// and drops pooled ballots that now conflict with a finalized one.
    pub fn record_finalized(&self, transactions: &[VoteTransaction]) {
        let hashes: Vec<Hash> = transactions.iter().map(VoteTransaction::hash).collect();

        let mut state = self.state.write();
        let evicted = Self::evict_locked(&mut state, &hashes);

        let mut conflicting = Vec::new();
        for (tx, hash) in transactions.iter().zip(&hashes) {
            let key = (tx.voter_public_key, tx.election_id.clone());
            if let Some(previous) = state.ballots.insert(key, *hash) {
                if previous != *hash {
                    conflicting.push(previous);
                }
            }
        }
        for hash in &conflicting {
            state.transactions.remove(hash);
        }
        if !conflicting.is_empty() {
            let dropped: HashSet<Hash> = conflicting.iter().copied().collect();
            state.arrival.retain(|h| !dropped.contains(h));
        }

        info!(
            "🧹 Mempool evicted {} finalized ballots, dropped {} conflicting (remaining {})",
            evicted,
            conflicting.len(),
            state.transactions.len()
        );
    }

    pub fn contains(&self, hash: &Hash) -> bool {
        self.state.read().transactions.contains_key(hash)
    }

    pub fn is_finalized(&self, hash: &Hash) -> bool {
        self.state.read().committed.contains(hash)
    }

    pub fn len(&self) -> usize {
        self.state.read().transactions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
