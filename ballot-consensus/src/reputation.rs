use std::collections::BTreeMap;

use tracing::{debug, info};

use ballot_common::{
    auth::PublicKey,
    types::{Block, Committee, Validator},
};

pub const REWARD: u64 = 1;
pub const PENALTY: u64 = 5;

/// Stake and reputation of every registered validator.
#[derive(Debug, Clone)]
pub struct ReputationLedger {
    validators: BTreeMap<PublicKey, Validator>,
    max_reputation: u64,
}

impl ReputationLedger {
    pub fn new(max_reputation: u64) -> Self {
        Self {
            validators: BTreeMap::new(),
            max_reputation,
        }
    }

    pub fn from_validators(validators: impl IntoIterator<Item = Validator>, max_reputation: u64) -> Self {
        let mut ledger = Self::new(max_reputation);
        for validator in validators {
            ledger.register(validator);
        }
        ledger
    }

    /// Adds or replaces a validator. Reputation is clamped to the maximum.
    pub fn register(&mut self, mut validator: Validator) {
        validator.reputation = validator.reputation.min(self.max_reputation);
        self.validators.insert(validator.public_key, validator);
    }

    /// Rewards committee members that signed the block's commit set and
    /// penalizes the rest. Stake is never touched.
    pub fn update(&mut self, committee: &Committee, block: &Block) {
        let height = block.height();
        let mut rewarded = 0;
        let mut penalized = 0;

        for member in committee.members() {
            // Unregistered since the committee was formed
            let Some(entry) = self.validators.get_mut(&member.public_key) else {
                continue;
            };

            if block.has_commit_from(&member.public_key) {
                entry.reputation = entry.reputation.saturating_add(REWARD).min(self.max_reputation);
                entry.last_active_height = height;
                rewarded += 1;
            } else {
                entry.reputation = entry.reputation.saturating_sub(PENALTY);
                penalized += 1;
                debug!(
                    "📉 Validator {} missed commit at height {} (reputation {})",
                    member.public_key, height, entry.reputation
                );
            }
        }

        info!(
            "⚖️ Reputation updated at height {}: +{} rewarded, -{} penalized",
            height, rewarded, penalized
        );
    }

    pub fn remove(&mut self, key: &PublicKey) -> Option<Validator> {
        self.validators.remove(key)
    }

    pub fn get(&self, key: &PublicKey) -> Option<&Validator> {
        self.validators.get(key)
    }

    pub fn reputation(&self, key: &PublicKey) -> Option<u64> {
        self.validators.get(key).map(|v| v.reputation)
    }

    /// Read-only copy consumed by committee selection.
    pub fn snapshot(&self) -> Vec<Validator> {
        self.validators.values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.validators.len()
    }

    pub fn is_empty(&self) -> bool {
        self.validators.is_empty()
    }

    pub fn max_reputation(&self) -> u64 {
        self.max_reputation
    }
}
