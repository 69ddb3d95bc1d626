use std::collections::{BTreeSet, HashMap};

use mintforge_core::{Catalog, CompositeTrait, ImageLayer, Trait, TraitValue};

/// One slot of a combination: a trait, its drawn value, and the layer depicting it.
#[derive(Debug, Clone, PartialEq)]
pub struct TraitValuePair {
    pub trait_def: Trait,
    /// `None` when the trait contributes nothing to the item.
    pub value: Option<TraitValue>,
    pub layer: Option<ImageLayer>,
}

impl TraitValuePair {
    pub fn new(trait_def: Trait, value: Option<TraitValue>) -> Self {
        Self {
            trait_def,
            value,
            layer: None,
        }
    }

    pub fn value_id(&self) -> Option<&str> {
        self.value.as_ref().map(|value| value.id.as_str())
    }

    pub fn value_name(&self) -> Option<&str> {
        self.value.as_ref().map(|value| value.name.as_str())
    }

    /// Replace the value; the previously attached layer no longer applies.
    pub fn set_value(&mut self, value: Option<TraitValue>) {
        self.value = value;
        self.layer = None;
    }

    pub fn to_composite_trait(&self) -> CompositeTrait {
        CompositeTrait {
            trait_id: self.trait_def.id.clone(),
            trait_name: self.trait_def.name.clone(),
            trait_value_id: self.value.as_ref().map(|value| value.id.clone()),
            trait_value_name: self.value.as_ref().map(|value| value.name.clone()),
            image_layer_id: self.layer.as_ref().map(|layer| layer.id.clone()),
        }
    }
}

/// A full combination, one slot per trait, mutated in place by conflict resolution.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Draw {
    pairs: Vec<TraitValuePair>,
}

impl Draw {
    pub fn new(pairs: Vec<TraitValuePair>) -> Self {
        Self { pairs }
    }

    pub fn pairs(&self) -> &[TraitValuePair] {
        &self.pairs
    }

    pub fn pairs_mut(&mut self) -> &mut [TraitValuePair] {
        &mut self.pairs
    }

    pub fn position(&self, trait_id: &str) -> Option<usize> {
        self.pairs
            .iter()
            .position(|pair| pair.trait_def.id == trait_id)
    }

    pub fn get(&self, trait_id: &str) -> Option<&TraitValuePair> {
        self.pairs.iter().find(|pair| pair.trait_def.id == trait_id)
    }
}

/// Candidate values per trait for the current batch.
///
/// Always-unique traits lose a value each time an item consuming it is
/// persisted, so later draws in the batch cannot pick it again.
#[derive(Debug, Clone, Default)]
pub struct ValuePools {
    pools: HashMap<String, Vec<TraitValue>>,
}

impl ValuePools {
    pub fn from_catalog(catalog: &Catalog) -> Self {
        let pools = catalog
            .traits
            .iter()
            .map(|trait_def| (trait_def.id.clone(), catalog.values_for_trait(&trait_def.id)))
            .collect();
        Self { pools }
    }

    pub fn pool(&self, trait_id: &str) -> &[TraitValue] {
        self.pools
            .get(trait_id)
            .map(|values| values.as_slice())
            .unwrap_or(&[])
    }

    /// Remove a value from a trait's pool. Returns whether it was present.
    pub fn deplete(&mut self, trait_id: &str, value_id: &str) -> bool {
        let Some(values) = self.pools.get_mut(trait_id) else {
            return false;
        };
        let before = values.len();
        values.retain(|value| value.id != value_id);
        values.len() != before
    }

    /// Drop values already consumed by earlier batches from always-unique traits.
    pub fn exclude_consumed<'a>(
        &mut self,
        traits: impl IntoIterator<Item = &'a Trait>,
        consumed: &BTreeSet<String>,
    ) -> usize {
        let mut removed = 0;
        for trait_def in traits {
            if !trait_def.is_always_unique {
                continue;
            }
            if let Some(values) = self.pools.get_mut(&trait_def.id) {
                let before = values.len();
                values.retain(|value| !consumed.contains(&value.id));
                removed += before - values.len();
            }
        }
        removed
    }

    /// Consume the always-unique values used by a persisted draw.
    pub fn consume(&mut self, draw: &Draw) {
        for pair in draw.pairs() {
            if pair.trait_def.is_always_unique
                && let Some(value_id) = pair.value_id()
            {
                self.deplete(&pair.trait_def.id, value_id);
            }
        }
    }
}
