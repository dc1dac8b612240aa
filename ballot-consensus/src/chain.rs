use std::collections::{BTreeMap, HashSet};

use tracing::info;

use ballot_common::{
    auth::PublicKey,
    crypto::Hash,
    types::{Block, VoteTransaction},
    ValidationError,
};

/// Finalized blocks plus the indexes needed for admission checks and
/// tallies. Heights start at 1; an empty chain has tip `Hash::ZERO`.
#[derive(Debug, Clone, Default)]
pub struct Chain {
    blocks: Vec<Block>,
    tx_index: HashSet<Hash>,
    ballots: HashSet<(PublicKey, String)>,
    tally: BTreeMap<String, u64>,
    election_tally: BTreeMap<String, BTreeMap<String, u64>>,
}

impl Chain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn height(&self) -> u64 {
        self.blocks.len() as u64
    }

    pub fn tip_hash(&self) -> Hash {
        self.blocks.last().map(Block::hash).unwrap_or(Hash::ZERO)
    }

    pub fn tip(&self) -> Option<&Block> {
        self.blocks.last()
    }

    pub fn get(&self, height: u64) -> Option<&Block> {
        let index = usize::try_from(height.checked_sub(1)?).ok()?;
        self.blocks.get(index)
    }

    pub fn contains_tx(&self, hash: &Hash) -> bool {
        self.tx_index.contains(hash)
    }

    pub fn has_voted(&self, voter: &PublicKey, election_id: &str) -> bool {
        self.ballots.contains(&(*voter, election_id.to_string()))
    }

    /// Appends the next block. Heights and linkage must line up.
    pub fn append(&mut self, block: Block) -> Result<(), ValidationError> {
        if block.height() != self.height() + 1 {
            return Err(ValidationError::BadLinkage(format!(
                "height {} after {}",
                block.height(),
                self.height()
            )));
        }
        if block.header.prev_hash != self.tip_hash() {
            return Err(ValidationError::BadLinkage(format!(
                "prev hash {} does not match tip {}",
                block.header.prev_hash.short(),
                self.tip_hash().short()
            )));
        }

        for tx in &block.transactions {
            self.index(tx);
        }
        info!(
            "⛓️ Block {} appended at height {} ({} ballots)",
            block.hash().short(),
            block.height(),
            block.transactions.len()
        );
        self.blocks.push(block);
        Ok(())
    }

    fn index(&mut self, tx: &VoteTransaction) {
        self.tx_index.insert(tx.hash());
        self.ballots.insert((tx.voter_public_key, tx.election_id.clone()));
        *self.tally.entry(tx.candidate_id.clone()).or_default() += 1;
        *self
            .election_tally
            .entry(tx.election_id.clone())
            .or_default()
            .entry(tx.candidate_id.clone())
            .or_default() += 1;
    }

    /// Finalized ballots per candidate id, across all elections.
    pub fn tally(&self) -> &BTreeMap<String, u64> {
        &self.tally
    }

    pub fn tally_for(&self, election_id: &str) -> BTreeMap<String, u64> {
        self.election_tally.get(election_id).cloned().unwrap_or_default()
    }

    pub fn total_votes(&self) -> u64 {
        self.tx_index.len() as u64
    }

    pub fn blocks(&self) -> &[Block] {
        &self.blocks
    }

    /// Up to `limit` blocks starting at `from_height`.
    pub fn blocks_from(&self, from_height: u64, limit: usize) -> Vec<Block> {
        let start = usize::try_from(from_height.max(1) - 1).unwrap_or(usize::MAX);
        self.blocks.iter().skip(start).take(limit).cloned().collect()
    }
}
