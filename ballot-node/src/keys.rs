use std::{fs, path::Path};

use tracing::info;

use ballot_common::auth::{Authenticator, Ed25519Authenticator};

use crate::error::Result;

/// Loads the hex seed at `path`, generating and saving a new key when the
/// file does not exist.
pub fn load_or_generate<P: AsRef<Path>>(path: P) -> Result<Ed25519Authenticator> {
    let path = path.as_ref();
    if path.exists() {
        let seed = fs::read_to_string(path)?;
        return Ok(Ed25519Authenticator::from_hex(&seed)?);
    }

    let auth = Ed25519Authenticator::generate();
    write_key(path, &auth)?;
    info!("🔑 Generated new key {} at {}", auth.public_key().to_hex(), path.display());
    Ok(auth)
}

pub fn write_key<P: AsRef<Path>>(path: P, auth: &Ed25519Authenticator) -> Result<()> {
    let path = path.as_ref();
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    fs::write(path, auth.seed_hex())?;
    Ok(())
}
