use std::collections::BTreeSet;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::conflict::Conflict;
use crate::error::{Error, Result};

/// Full authoring snapshot for one collection.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct Catalog {
    /// Contract version for this catalog format.
    pub catalog_version: String,
    /// Project owning the collection; keys the staging area.
    pub project_id: String,
    pub collection: Collection,
    #[serde(default)]
    pub traits: Vec<Trait>,
    #[serde(default)]
    pub trait_values: Vec<TraitValue>,
    #[serde(default)]
    pub image_layers: Vec<ImageLayer>,
    /// Conflicts in evaluation order.
    #[serde(default)]
    pub conflicts: Vec<Conflict>,
}

/// A collection and its target supply.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct Collection {
    pub id: String,
    pub name: String,
    /// Total number of items to generate.
    pub supply: u64,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub trait_sets: Vec<TraitSet>,
}

/// Named subset of traits active for `[start_index, end_index)` of the supply.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct TraitSet {
    pub id: String,
    pub name: String,
    pub start_index: u64,
    pub end_index: u64,
}

/// Categorical attribute of a generated item.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
pub struct Trait {
    pub id: String,
    pub name: String,
    /// Stacking order; lower values are composited first.
    pub z_index: i32,
    /// Each value may be used by at most one item and is drawn uniformly.
    #[serde(default)]
    pub is_always_unique: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trait_set_id: Option<String>,
}

/// One possible setting of a trait.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
pub struct TraitValue {
    pub id: String,
    pub trait_id: String,
    pub name: String,
    /// Relative weight in `[0, 1]`. Weights of one trait are expected to sum to at most 1.
    #[serde(default)]
    pub rarity: f64,
}

/// Source raster asset, optionally bound to the trait value it depicts.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
pub struct ImageLayer {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trait_value_id: Option<String>,
    /// Blob store path of the source asset.
    pub bucket_filename: String,
    /// Layer always co-rendered with this one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub companion_layer_id: Option<String>,
    /// Stacking position of the companion, independent of this layer's trait.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub companion_layer_z_index: Option<i32>,
}

impl Catalog {
    pub fn trait_by_id(&self, id: &str) -> Option<&Trait> {
        self.traits.iter().find(|trait_def| trait_def.id == id)
    }

    pub fn trait_set(&self, id: &str) -> Option<&TraitSet> {
        self.collection.trait_sets.iter().find(|set| set.id == id)
    }

    /// Values of a trait in catalog order.
    pub fn values_for_trait(&self, trait_id: &str) -> Vec<TraitValue> {
        self.trait_values
            .iter()
            .filter(|value| value.trait_id == trait_id)
            .cloned()
            .collect()
    }

    pub fn layer_by_id(&self, id: &str) -> Option<&ImageLayer> {
        self.image_layers.iter().find(|layer| layer.id == id)
    }

    /// First layer associated with the given trait value.
    pub fn layer_for_value(&self, value_id: &str) -> Option<&ImageLayer> {
        self.image_layers
            .iter()
            .find(|layer| layer.trait_value_id.as_deref() == Some(value_id))
    }

    /// Restrict the catalog to one trait set, or to the traits without a set.
    ///
    /// Layers are kept when they depict an in-scope value or are the companion
    /// of such a layer. Conflicts are kept, in stored order, when both traits
    /// are in scope.
    pub fn scoped(&self, trait_set_id: Option<&str>) -> Result<Catalog> {
        if let Some(id) = trait_set_id
            && self.trait_set(id).is_none()
        {
            return Err(Error::InvalidCatalog(format!("unknown trait set '{id}'")));
        }

        let traits: Vec<Trait> = self
            .traits
            .iter()
            .filter(|trait_def| trait_def.trait_set_id.as_deref() == trait_set_id)
            .cloned()
            .collect();
        let trait_ids: BTreeSet<&str> = traits.iter().map(|t| t.id.as_str()).collect();

        let trait_values: Vec<TraitValue> = self
            .trait_values
            .iter()
            .filter(|value| trait_ids.contains(value.trait_id.as_str()))
            .cloned()
            .collect();
        let value_ids: BTreeSet<&str> = trait_values.iter().map(|v| v.id.as_str()).collect();

        let mut layer_ids = BTreeSet::new();
        for layer in &self.image_layers {
            if let Some(value_id) = layer.trait_value_id.as_deref()
                && value_ids.contains(value_id)
            {
                layer_ids.insert(layer.id.as_str());
                if let Some(companion) = layer.companion_layer_id.as_deref() {
                    layer_ids.insert(companion);
                }
            }
        }
        let image_layers = self
            .image_layers
            .iter()
            .filter(|layer| layer_ids.contains(layer.id.as_str()))
            .cloned()
            .collect();

        let conflicts = self
            .conflicts
            .iter()
            .filter(|conflict| {
                trait_ids.contains(conflict.trait1_id.as_str())
                    && trait_ids.contains(conflict.trait2_id.as_str())
            })
            .cloned()
            .collect();

        Ok(Catalog {
            catalog_version: self.catalog_version.clone(),
            project_id: self.project_id.clone(),
            collection: self.collection.clone(),
            traits,
            trait_values,
            image_layers,
            conflicts,
        })
    }
}
