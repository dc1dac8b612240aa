//! Hybrid PoS/BFT consensus: committee selection, reputation accounting,
//! and the per-height pre-prepare/prepare/commit state machine.

pub mod chain;
pub mod config;
pub mod engine;
pub mod evaluator;
pub mod registry;
pub mod reputation;
pub mod round;
pub mod selector;

pub use chain::Chain;
pub use config::ConsensusConfig;
pub use engine::{ConsensusEngine, Step, MAX_VIEW_LOOKAHEAD};
pub use reputation::ReputationLedger;
pub use round::{ConsensusRound, LockedBlock, RoundPhase};
pub use selector::ValidatorSelector;
