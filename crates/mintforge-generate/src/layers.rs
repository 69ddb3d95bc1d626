use std::collections::HashMap;

use tracing::warn;

use mintforge_core::{Catalog, ImageLayer};

use crate::draw::{Draw, TraitValuePair};

/// One entry of the bottom-to-top compositing order.
#[derive(Debug, Clone, PartialEq)]
pub struct PlannedLayer {
    /// Effective stacking position.
    pub z_index: i32,
    /// Trait whose slot produced this entry.
    pub trait_id: String,
    /// `None` when the trait contributes no image to the item.
    pub layer: Option<ImageLayer>,
    /// Whether this entry was injected as another layer's companion.
    pub companion: bool,
}

/// Bind each drawn value to the image layer depicting it.
///
/// A slot only ever receives a layer whose `trait_value_id` is its own value.
pub fn attach_layers(draw: &mut Draw, catalog: &Catalog) {
    for pair in draw.pairs_mut() {
        pair.layer = pair
            .value_id()
            .and_then(|value_id| catalog.layer_for_value(value_id))
            .cloned();
    }
}

/// Orders trait layers for compositing and injects companion layers.
pub struct LayerPlanner<'a> {
    layers: HashMap<&'a str, &'a ImageLayer>,
}

impl<'a> LayerPlanner<'a> {
    pub fn new(catalog_layers: &'a [ImageLayer]) -> Self {
        Self {
            layers: catalog_layers
                .iter()
                .map(|layer| (layer.id.as_str(), layer))
                .collect(),
        }
    }

    /// Produce the stacking order for a set of slots.
    ///
    /// Slots are ordered by trait z-index; a companion is emitted right after
    /// its parent, tagged with its own z-index, and the combined list is then
    /// stably re-sorted so companions land wherever their z-index places them.
    pub fn plan(&self, pairs: &[TraitValuePair]) -> Vec<PlannedLayer> {
        let mut ordered: Vec<&TraitValuePair> = pairs.iter().collect();
        ordered.sort_by_key(|pair| pair.trait_def.z_index);

        let mut planned = Vec::with_capacity(ordered.len());
        for pair in ordered {
            let z_index = pair.trait_def.z_index;
            planned.push(PlannedLayer {
                z_index,
                trait_id: pair.trait_def.id.clone(),
                layer: pair.layer.clone(),
                companion: false,
            });

            let Some(layer) = pair.layer.as_ref() else {
                continue;
            };
            let Some(companion_id) = layer.companion_layer_id.as_deref() else {
                continue;
            };
            match self.layers.get(companion_id) {
                Some(companion) => planned.push(PlannedLayer {
                    z_index: layer.companion_layer_z_index.unwrap_or(z_index),
                    trait_id: pair.trait_def.id.clone(),
                    layer: Some((*companion).clone()),
                    companion: true,
                }),
                None => warn!(
                    layer_id = %layer.id,
                    companion_id,
                    "companion layer not found"
                ),
            }
        }

        planned.sort_by_key(|entry| entry.z_index);
        planned
    }
}
