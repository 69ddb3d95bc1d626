use rand::Rng;

use mintforge_core::TraitValue;

/// Draws one trait value by rarity weight, or uniformly for always-unique traits.
///
/// The sampler does not validate weights. When a trait's rarities sum to more
/// than 1 the first value whose cumulative weight reaches the draw wins; when
/// they sum to less than 1 a draw beyond the total yields `None`.
#[derive(Debug, Clone, Copy)]
pub struct RaritySampler {
    scale: u32,
    max_exclusion_attempts: u32,
}

impl RaritySampler {
    pub fn new(rarity_precision: u32, max_exclusion_attempts: u32) -> Self {
        Self {
            scale: 10_u32.saturating_pow(rarity_precision.min(9)),
            max_exclusion_attempts: max_exclusion_attempts.max(1),
        }
    }

    /// Pick a value from `values`.
    ///
    /// With `exclude` set, a draw landing on that id is retried up to the
    /// exclusion budget, after which `None` is returned.
    pub fn random_value<'a, R: Rng>(
        &self,
        values: &'a [TraitValue],
        always_unique: bool,
        exclude: Option<&str>,
        rng: &mut R,
    ) -> Option<&'a TraitValue> {
        for _ in 0..self.max_exclusion_attempts {
            let candidate = if always_unique {
                self.uniform(values, rng)
            } else {
                self.weighted(values, rng)
            };
            match (candidate, exclude) {
                (Some(value), Some(excluded)) if value.id == excluded => continue,
                (candidate, _) => return candidate,
            }
        }
        None
    }

    fn uniform<'a, R: Rng>(&self, values: &'a [TraitValue], rng: &mut R) -> Option<&'a TraitValue> {
        if values.is_empty() {
            return None;
        }
        values.get(rng.random_range(0..values.len()))
    }

    fn weighted<'a, R: Rng>(&self, values: &'a [TraitValue], rng: &mut R) -> Option<&'a TraitValue> {
        let fraction = self.fraction(rng);
        let mut cumulative = 0.0;
        for value in values {
            cumulative += value.rarity;
            if cumulative >= fraction {
                return Some(value);
            }
        }
        None
    }

    /// Uniform fraction in `[0, 1)` quantized to the configured precision.
    fn fraction<R: Rng>(&self, rng: &mut R) -> f64 {
        f64::from(rng.random_range(0..self.scale)) / f64::from(self.scale)
    }
}

impl Default for RaritySampler {
    fn default() -> Self {
        Self::new(4, 10)
    }
}
