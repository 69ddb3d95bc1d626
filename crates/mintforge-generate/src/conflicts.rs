use rand::Rng;
use tracing::debug;

use mintforge_core::{Conflict, ConflictResolutionType};

use crate::draw::{Draw, ValuePools};
use crate::sampler::RaritySampler;

/// Record of one rewrite applied to a draw.
#[derive(Debug, Clone, PartialEq)]
pub struct ConflictResolution {
    pub resolution_type: ConflictResolutionType,
    pub trait_name: String,
    pub old_value: Option<String>,
    pub new_value: Option<String>,
    /// The trait on the other side of the conflict.
    pub against_trait: String,
    pub against_value: Option<String>,
}

/// Applies configured pairwise incompatibilities to a drawn combination.
///
/// Conflicts run in stored order and mutate the draw in place, so a later
/// conflict sees the effect of earlier ones. There is no cycle detection.
#[derive(Debug, Clone)]
pub struct ConflictResolver<'a> {
    conflicts: &'a [Conflict],
    sampler: RaritySampler,
}

impl<'a> ConflictResolver<'a> {
    pub fn new(conflicts: &'a [Conflict], sampler: RaritySampler) -> Self {
        Self { conflicts, sampler }
    }

    pub fn resolve<R: Rng>(
        &self,
        draw: &mut Draw,
        pools: &ValuePools,
        rng: &mut R,
    ) -> Vec<ConflictResolution> {
        let mut resolutions = Vec::new();
        for conflict in self.conflicts {
            let (Some(first), Some(second)) = (
                draw.position(&conflict.trait1_id),
                draw.position(&conflict.trait2_id),
            ) else {
                continue;
            };

            let pairs = draw.pairs();
            if !slot_matches(pairs[first].value_id(), conflict.trait1_value_id.as_deref())
                || !slot_matches(pairs[second].value_id(), conflict.trait2_value_id.as_deref())
            {
                continue;
            }

            let (target, other) = match conflict.resolution_type {
                ConflictResolutionType::DropFirst | ConflictResolutionType::RandomizeFirst => {
                    (first, second)
                }
                ConflictResolutionType::DropSecond | ConflictResolutionType::RandomizeSecond => {
                    (second, first)
                }
            };
            let against_trait = pairs[other].trait_def.name.clone();
            let against_value = pairs[other].value_name().map(str::to_string);

            let slot = &mut draw.pairs_mut()[target];
            let old = slot.value.clone();
            let replacement = match conflict.resolution_type {
                ConflictResolutionType::DropFirst | ConflictResolutionType::DropSecond => None,
                ConflictResolutionType::RandomizeFirst
                | ConflictResolutionType::RandomizeSecond => self
                    .sampler
                    .random_value(
                        pools.pool(&slot.trait_def.id),
                        slot.trait_def.is_always_unique,
                        old.as_ref().map(|value| value.id.as_str()),
                        rng,
                    )
                    .cloned(),
            };
            slot.set_value(replacement);

            let resolution = ConflictResolution {
                resolution_type: conflict.resolution_type,
                trait_name: slot.trait_def.name.clone(),
                old_value: old.map(|value| value.name),
                new_value: slot.value_name().map(str::to_string),
                against_trait,
                against_value,
            };
            debug!(
                trait_name = %resolution.trait_name,
                old_value = ?resolution.old_value,
                new_value = ?resolution.new_value,
                against = %resolution.against_trait,
                resolution = ?resolution.resolution_type,
                "conflict resolved"
            );
            resolutions.push(resolution);
        }
        resolutions
    }
}

/// A trait without a value never takes part in a conflict.
fn slot_matches(current: Option<&str>, required: Option<&str>) -> bool {
    match (current, required) {
        (None, _) => false,
        (Some(_), None) => true,
        (Some(current), Some(required)) => current == required,
    }
}
