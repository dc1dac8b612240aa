use ed25519_dalek::{Signer, SigningKey};
use rand::rngs::OsRng;

use super::{Authenticator, PublicKey, Signature};
use crate::error::{BallotError, Result};

pub struct Ed25519Authenticator {
    keypair: SigningKey,
}

impl Ed25519Authenticator {
    pub fn new(keypair: SigningKey) -> Self {
        Self { keypair }
    }

    pub fn generate() -> Self {
        Self::new(SigningKey::generate(&mut OsRng))
    }

    /// Builds an authenticator from a 32-byte Ed25519 seed.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let seed: &[u8; 32] = bytes
            .try_into()
            .map_err(|_| BallotError::Config(format!("invalid key length {}", bytes.len())))?;
        Ok(Self::new(SigningKey::from_bytes(seed)))
    }

    pub fn from_hex(seed_hex: &str) -> Result<Self> {
        let bytes = hex::decode(seed_hex.trim())
            .map_err(|e| BallotError::Config(format!("invalid key hex: {e}")))?;
        Self::from_bytes(&bytes)
    }

    pub fn seed_hex(&self) -> String {
        hex::encode(self.keypair.to_bytes())
    }
}

impl Authenticator for Ed25519Authenticator {
    fn sign(&self, message: &[u8]) -> Signature {
        Signature(self.keypair.sign(message).to_bytes())
    }

    fn public_key(&self) -> PublicKey {
        PublicKey(self.keypair.verifying_key().to_bytes())
    }
}
