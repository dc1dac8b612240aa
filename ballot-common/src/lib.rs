//! Shared data model for the ballot consensus workspace.
//!
//! Hashes, keys and signatures, the vote/block/committee types, the
//! consensus wire messages and the error taxonomy used by every other crate.

pub mod auth;
pub mod codec;
pub mod crypto;
pub mod error;
pub mod types;
pub mod utils;

pub use error::{BallotError, Result, ValidationError};
