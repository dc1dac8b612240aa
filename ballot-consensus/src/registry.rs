use std::collections::{BTreeMap, HashMap};

use ballot_common::{
    auth::{PublicKey, Signature},
    crypto::Hash,
    types::{Phase, PhaseSignature},
};

/// A signer produced two different block hashes for the same phase and view.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EquivocationEvidence {
    pub offender: PublicKey,
    pub view: u64,
    pub phase: Phase,
    pub first: Hash,
    pub second: Hash,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Registration {
    Added,
    /// Same signer, same hash: counted once.
    Duplicate,
    Equivocation(EquivocationEvidence),
}

/// Prepare/commit signatures for one height, keyed by view, phase, block
/// hash and signer. Signatures for a later view are kept until that view
/// becomes current.
#[derive(Debug, Default, Clone)]
pub struct SignatureRegistry {
    // (view, phase) -> block hash -> signer -> signature
    signatures: HashMap<(u64, Phase), HashMap<Hash, BTreeMap<PublicKey, Signature>>>,
    // (view, phase) -> signer -> first hash signed
    by_signer: HashMap<(u64, Phase), HashMap<PublicKey, Hash>>,
}

impl SignatureRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a verified signature. Only the first hash per signer, phase
    /// and view counts.
    pub fn register(
        &mut self,
        phase: Phase,
        view: u64,
        block_hash: Hash,
        signer: PublicKey,
        signature: Signature,
    ) -> Registration {
        let first = self.by_signer.entry((view, phase)).or_default();
        if let Some(existing) = first.get(&signer) {
            if *existing != block_hash {
                return Registration::Equivocation(EquivocationEvidence {
                    offender: signer,
                    view,
                    phase,
                    first: *existing,
                    second: block_hash,
                });
            }
            return Registration::Duplicate;
        }
        first.insert(signer, block_hash);

        self.signatures
            .entry((view, phase))
            .or_default()
            .entry(block_hash)
            .or_default()
            .insert(signer, signature);
        Registration::Added
    }

    /// Distinct signers for `block_hash` in a phase and view.
    pub fn count(&self, phase: Phase, view: u64, block_hash: &Hash) -> usize {
        self.signatures
            .get(&(view, phase))
            .and_then(|by_hash| by_hash.get(block_hash))
            .map(|signers| signers.len())
            .unwrap_or(0)
    }

    /// Signatures for `block_hash`, ordered by signer key.
    pub fn signatures(&self, phase: Phase, view: u64, block_hash: &Hash) -> Vec<PhaseSignature> {
        self.signatures
            .get(&(view, phase))
            .and_then(|by_hash| by_hash.get(block_hash))
            .map(|signers| {
                signers
                    .iter()
                    .map(|(signer, signature)| PhaseSignature {
                        signer: *signer,
                        signature: *signature,
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Drops everything recorded for views before `view`.
    pub fn prune_below(&mut self, view: u64) {
        self.signatures.retain(|(v, _), _| *v >= view);
        self.by_signer.retain(|(v, _), _| *v >= view);
    }
}
