pub mod block;
pub mod consensus;
pub mod status;
pub mod transaction;
pub mod validator;

pub use block::{Block, BlockHeader, PhaseSignature};
pub use consensus::{phase_signing_bytes, ConsensusMessage, Phase, PhaseVote, PrePrepare, PreparedCertificate};
pub use status::NodeStatus;
pub use transaction::{is_well_formed_token, VoteTransaction};
pub use validator::{Committee, Validator, Zone};
