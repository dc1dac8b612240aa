use serde::{Deserialize, Serialize};

use crate::{
    auth::{verify_signature, Authenticator, PublicKey, Signature},
    crypto::hash::{digest, Hash},
    error::ValidationError,
};

pub const MAX_TOKEN_LEN: usize = 128;

/// A signed ballot. Identified by the hash of its signed fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoteTransaction {
    /// Opaque token issued by the identity service, bound to `voter_public_key`.
    pub voter_token: String,
    pub voter_public_key: PublicKey,
    pub election_id: String,
    pub candidate_id: String,
    pub timestamp: u64,
    pub signature: Signature,
}

#[derive(Serialize)]
struct VoteSignView<'a> {
    domain: &'static str,
    voter_token: &'a str,
    voter_public_key: &'a [u8; 32],
    election_id: &'a str,
    candidate_id: &'a str,
    timestamp: u64,
}

/// Canonical bytes covered by the voter's signature.
pub fn signing_bytes(tx: &VoteTransaction) -> Vec<u8> {
    bincode::serialize(&VoteSignView {
        domain: "ballot/vote/v1",
        voter_token: &tx.voter_token,
        voter_public_key: &tx.voter_public_key.0,
        election_id: &tx.election_id,
        candidate_id: &tx.candidate_id,
        timestamp: tx.timestamp,
    })
    .expect("serialize vote sign view")
}

/// Tokens are 1..=128 ASCII characters from `[A-Za-z0-9._-]`.
pub fn is_well_formed_token(token: &str) -> bool {
    !token.is_empty()
        && token.len() <= MAX_TOKEN_LEN
        && token
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'-' | b'_' | b'.'))
}

impl VoteTransaction {
    /// Builds and signs a ballot with the voter's key.
    pub fn new_signed(
        voter: &dyn Authenticator,
        voter_token: impl Into<String>,
        election_id: impl Into<String>,
        candidate_id: impl Into<String>,
        timestamp: u64,
    ) -> Self {
        let mut tx = Self {
            voter_token: voter_token.into(),
            voter_public_key: voter.public_key(),
            election_id: election_id.into(),
            candidate_id: candidate_id.into(),
            timestamp,
            signature: Signature([0u8; 64]),
        };
        tx.signature = voter.sign(&signing_bytes(&tx));
        tx
    }

    /// Content hash over the signed fields.
    pub fn hash(&self) -> Hash {
        digest(&signing_bytes(self))
    }

    /// Checks token shape and the voter signature. No chain state involved.
    pub fn validate_stateless(&self) -> Result<(), ValidationError> {
        if !is_well_formed_token(&self.voter_token) {
            return Err(ValidationError::MalformedToken);
        }
        if !verify_signature(&self.voter_public_key, &signing_bytes(self), &self.signature) {
            return Err(ValidationError::InvalidSignature(format!(
                "ballot from voter {}",
                self.voter_public_key
            )));
        }
        Ok(())
    }
}
