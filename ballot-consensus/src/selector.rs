use std::collections::HashSet;

use tracing::info;

use ballot_common::{
    types::{Committee, Validator, Zone},
    BallotError, Result,
};

use crate::evaluator::MIN_COMMITTEE_SIZE;

/// Deterministic, zone-aware committee selection.
///
/// Candidates are ranked by `stake * reputation` (public key ascending on
/// ties). The first pass gives each zone, in the order of `zones`, up to
/// `floor(committee_size / zones.len())` seats; the second pass fills the
/// remaining seats by rank. The result is ordered by rank.
pub fn select(all_validators: &[Validator], committee_size: usize, zones: &[Zone]) -> Result<Vec<Validator>> {
    if committee_size < MIN_COMMITTEE_SIZE {
        return Err(BallotError::Config(format!(
            "committee size {committee_size} is below the BFT minimum {MIN_COMMITTEE_SIZE}"
        )));
    }

    // 1. Rank, keeping the best entry per public key
    let mut ranked: Vec<&Validator> = all_validators.iter().collect();
    ranked.sort_by(|a, b| {
        b.score()
            .cmp(&a.score())
            .then_with(|| a.public_key.cmp(&b.public_key))
    });
    let mut seen_keys = HashSet::new();
    ranked.retain(|v| seen_keys.insert(v.public_key));

    if ranked.len() < MIN_COMMITTEE_SIZE {
        return Err(BallotError::InsufficientValidators {
            available: ranked.len(),
            required: MIN_COMMITTEE_SIZE,
        });
    }

    let mut selected = vec![false; ranked.len()];
    let mut seats = 0;

    // 2. Zone quotas
    let quota = if zones.is_empty() { 0 } else { committee_size / zones.len() };
    for zone in zones {
        let picks: Vec<usize> = ranked
            .iter()
            .enumerate()
            .filter(|(i, v)| v.zone == *zone && !selected[*i])
            .take(quota)
            .map(|(i, _)| i)
            .collect();
        for i in picks {
            selected[i] = true;
            seats += 1;
        }
    }

    // 3. Fill by rank
    for flag in selected.iter_mut() {
        if seats >= committee_size {
            break;
        }
        if !*flag {
            *flag = true;
            seats += 1;
        }
    }

    Ok(ranked
        .into_iter()
        .zip(selected)
        .filter_map(|(v, chosen)| chosen.then(|| v.clone()))
        .collect())
}

#[derive(Debug, Clone)]
pub struct ValidatorSelector {
    committee_size: usize,
    zones: Vec<Zone>,
}

impl ValidatorSelector {
    pub fn new(committee_size: usize) -> Self {
        Self {
            committee_size,
            zones: Zone::ALL.to_vec(),
        }
    }

    pub fn with_zones(committee_size: usize, zones: Vec<Zone>) -> Self {
        Self { committee_size, zones }
    }

    pub fn committee_size(&self) -> usize {
        self.committee_size
    }

    pub fn select_committee(&self, all_validators: &[Validator], epoch: u64) -> Result<Committee> {
        let members = select(all_validators, self.committee_size, &self.zones)?;
        info!(
            "🏛️ Committee for epoch {}: {} members from {} candidates",
            epoch,
            members.len(),
            all_validators.len()
        );
        Ok(Committee::new(epoch, members))
    }
}
