pub mod hash;
pub mod merkle;

pub use hash::{digest, Hash};
pub use merkle::calculate_merkle_root;
