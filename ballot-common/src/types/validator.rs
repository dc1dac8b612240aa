use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::{auth::PublicKey, error::BallotError};

/// Geopolitical zone of a validator. `ALL` is the canonical order used by
/// the first selection pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Zone {
    SouthWest,
    NorthCentral,
    SouthSouth,
    NorthWest,
    SouthEast,
    NorthEast,
}

impl Zone {
    pub const ALL: [Zone; 6] = [
        Zone::SouthWest,
        Zone::NorthCentral,
        Zone::SouthSouth,
        Zone::NorthWest,
        Zone::SouthEast,
        Zone::NorthEast,
    ];
}

impl fmt::Display for Zone {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Zone::SouthWest => "South-West",
            Zone::NorthCentral => "North-Central",
            Zone::SouthSouth => "South-South",
            Zone::NorthWest => "North-West",
            Zone::SouthEast => "South-East",
            Zone::NorthEast => "North-East",
        };
        f.write_str(name)
    }
}

/// Accepts the display form (`South-West`) or the variant name (`SouthWest`),
/// case-insensitively.
impl FromStr for Zone {
    type Err = BallotError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted: String = s.chars().filter(|c| *c != '-' && *c != '_').collect();
        Zone::ALL
            .into_iter()
            .find(|zone| format!("{zone:?}").eq_ignore_ascii_case(&wanted))
            .ok_or_else(|| BallotError::Config(format!("unknown zone '{s}'")))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Validator {
    pub public_key: PublicKey,
    pub stake: u64,
    pub reputation: u64,
    pub zone: Zone,
    /// Last height at which this validator signed a commit.
    #[serde(default)]
    pub last_active_height: u64,
}

impl Validator {
    pub fn new(public_key: PublicKey, stake: u64, reputation: u64, zone: Zone) -> Self {
        Self {
            public_key,
            stake,
            reputation,
            zone,
            last_active_height: 0,
        }
    }

    /// Selection weight. Widened so `u64::MAX * u64::MAX` cannot overflow.
    pub fn score(&self) -> u128 {
        self.stake as u128 * self.reputation as u128
    }
}

/// Ordered validator set for one epoch.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Committee {
    pub epoch: u64,
    members: Vec<Validator>,
}

impl Committee {
    pub fn new(epoch: u64, members: Vec<Validator>) -> Self {
        Self { epoch, members }
    }

    pub fn members(&self) -> &[Validator] {
        &self.members
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Validator> {
        self.members.get(index)
    }

    pub fn position(&self, key: &PublicKey) -> Option<usize> {
        self.members.iter().position(|v| &v.public_key == key)
    }

    pub fn contains(&self, key: &PublicKey) -> bool {
        self.position(key).is_some()
    }

    pub fn public_keys(&self) -> impl Iterator<Item = &PublicKey> {
        self.members.iter().map(|v| &v.public_key)
    }
}
