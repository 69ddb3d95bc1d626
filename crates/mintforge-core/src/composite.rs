use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// One persisted slot of a generated combination.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
pub struct CompositeTrait {
    pub trait_id: String,
    pub trait_name: String,
    /// `None` when the trait contributes nothing to the item.
    pub trait_value_id: Option<String>,
    pub trait_value_name: Option<String>,
    pub image_layer_id: Option<String>,
}

/// Generated artifact for one item of a composite group. Immutable once created.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
pub struct ImageComposite {
    pub id: String,
    pub project_id: String,
    pub collection_id: String,
    /// Generation run this composite belongs to; the uniqueness scope.
    pub composite_group_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trait_set_id: Option<String>,
    /// Position of the item within the collection supply.
    pub index: u64,
    pub traits: Vec<CompositeTrait>,
    pub traits_hash: String,
    /// Public URL of the rendered image; `None` when the upload failed.
    pub image_url: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl ImageComposite {
    /// Trait value ids referenced by this composite.
    pub fn trait_value_ids(&self) -> impl Iterator<Item = &str> {
        self.traits
            .iter()
            .filter_map(|slot| slot.trait_value_id.as_deref())
    }
}
