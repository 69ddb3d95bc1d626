use std::collections::HashSet;
use std::sync::Arc;

use sha2::{Digest, Sha256};
use tracing::warn;

use crate::draw::TraitValuePair;
use crate::storage::{CompositeScope, CompositeStore};

/// Canonical fingerprint of a combination.
///
/// Slots are keyed by trait id and sorted, so the order in which traits were
/// drawn or stacked does not affect the hash. Empty slots are encoded
/// explicitly so that "no value" differs from an absent trait.
pub fn fingerprint(pairs: &[TraitValuePair]) -> String {
    let mut slots: Vec<(&str, Option<&str>)> = pairs
        .iter()
        .map(|pair| (pair.trait_def.id.as_str(), pair.value_id()))
        .collect();
    slots.sort();

    let mut hasher = Sha256::new();
    for (trait_id, value_id) in slots {
        hasher.update((trait_id.len() as u64).to_le_bytes());
        hasher.update(trait_id.as_bytes());
        match value_id {
            Some(value_id) => {
                hasher.update([1u8]);
                hasher.update((value_id.len() as u64).to_le_bytes());
                hasher.update(value_id.as_bytes());
            }
            None => hasher.update([0u8]),
        }
    }
    hex::encode(hasher.finalize())
}

/// Tracks fingerprints used within a composite group.
///
/// Fingerprints of the current batch live in memory; earlier batches are
/// consulted through the composite store.
pub struct UniquenessRegistry {
    store: Arc<dyn CompositeStore>,
    scope: CompositeScope,
    committed: HashSet<String>,
}

impl UniquenessRegistry {
    pub fn new(store: Arc<dyn CompositeStore>, scope: CompositeScope) -> Self {
        Self {
            store,
            scope,
            committed: HashSet::new(),
        }
    }

    /// Whether the fingerprint is still unused in the run.
    ///
    /// A store failure is treated as "used" so a duplicate is never produced.
    pub async fn is_available(&self, hash: &str) -> bool {
        if self.committed.contains(hash) {
            return false;
        }
        match self.store.is_unique_hash(hash, &self.scope).await {
            Ok(unique) => unique,
            Err(err) => {
                warn!(hash, error = %err, "uniqueness lookup failed");
                false
            }
        }
    }

    /// Mark fingerprints as consumed once their composite is persisted.
    pub fn commit<'a>(&mut self, hashes: impl IntoIterator<Item = &'a str>) {
        for hash in hashes {
            self.committed.insert(hash.to_string());
        }
    }

    pub fn committed_len(&self) -> usize {
        self.committed.len()
    }
}
