use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;

use crate::catalog::Catalog;

/// Tolerance applied when comparing accumulated rarities against 1.
const RARITY_EPSILON: f64 = 1e-9;

/// Severity level for validation issues.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueSeverity {
    Error,
    Warning,
}

/// Structured validation issue with location and hint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ValidationIssue {
    pub severity: IssueSeverity,
    pub code: String,
    pub path: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hint: Option<String>,
}

impl ValidationIssue {
    /// Create a new validation issue.
    pub fn new(
        severity: IssueSeverity,
        code: impl Into<String>,
        path: impl Into<String>,
        message: impl Into<String>,
        hint: Option<String>,
    ) -> Self {
        Self {
            severity,
            code: code.into(),
            path: path.into(),
            message: message.into(),
            hint,
        }
    }
}

/// Aggregated validation report with errors and warnings.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct ValidationReport {
    pub errors: Vec<ValidationIssue>,
    pub warnings: Vec<ValidationIssue>,
}

impl ValidationReport {
    /// Returns true when there are no errors.
    pub fn is_ok(&self) -> bool {
        self.errors.is_empty()
    }

    fn error(&mut self, code: &str, path: String, message: String) {
        self.errors.push(ValidationIssue::new(
            IssueSeverity::Error,
            code,
            path,
            message,
            None,
        ));
    }

    fn warning(&mut self, code: &str, path: String, message: String, hint: Option<String>) {
        self.warnings.push(ValidationIssue::new(
            IssueSeverity::Warning,
            code,
            path,
            message,
            hint,
        ));
    }
}

/// Check a catalog for configuration mistakes before generating.
///
/// The engine never rejects a catalog on its own; sampling is defensive, so
/// rarity sums above or below 1 are reported as warnings only.
pub fn validate_catalog(catalog: &Catalog) -> ValidationReport {
    let mut report = ValidationReport::default();

    let trait_ids = unique_ids(
        catalog.traits.iter().map(|t| t.id.as_str()),
        "/traits",
        &mut report,
    );
    let value_ids = unique_ids(
        catalog.trait_values.iter().map(|v| v.id.as_str()),
        "/trait_values",
        &mut report,
    );
    let layer_ids = unique_ids(
        catalog.image_layers.iter().map(|l| l.id.as_str()),
        "/image_layers",
        &mut report,
    );
    let set_ids = unique_ids(
        catalog.collection.trait_sets.iter().map(|s| s.id.as_str()),
        "/collection/trait_sets",
        &mut report,
    );

    for (idx, set) in catalog.collection.trait_sets.iter().enumerate() {
        if set.start_index >= set.end_index || set.end_index > catalog.collection.supply {
            report.error(
                "trait_set_range",
                format!("/collection/trait_sets/{idx}"),
                format!(
                    "trait set '{}' range [{}, {}) is empty or exceeds supply {}",
                    set.id, set.start_index, set.end_index, catalog.collection.supply
                ),
            );
        }
    }

    for (idx, trait_def) in catalog.traits.iter().enumerate() {
        if let Some(set_id) = trait_def.trait_set_id.as_deref()
            && !set_ids.contains(set_id)
        {
            report.error(
                "unknown_trait_set",
                format!("/traits/{idx}/trait_set_id"),
                format!("trait '{}' references unknown trait set '{set_id}'", trait_def.name),
            );
        }
    }

    let mut rarity_sums: BTreeMap<&str, f64> = BTreeMap::new();
    let mut value_counts: BTreeMap<&str, u64> = BTreeMap::new();
    for (idx, value) in catalog.trait_values.iter().enumerate() {
        if !trait_ids.contains(value.trait_id.as_str()) {
            report.error(
                "unknown_trait",
                format!("/trait_values/{idx}/trait_id"),
                format!("value '{}' references unknown trait '{}'", value.name, value.trait_id),
            );
        }
        if !(0.0..=1.0).contains(&value.rarity) {
            report.error(
                "rarity_out_of_range",
                format!("/trait_values/{idx}/rarity"),
                format!("value '{}' has rarity {} outside [0, 1]", value.name, value.rarity),
            );
        }
        *rarity_sums.entry(value.trait_id.as_str()).or_insert(0.0) += value.rarity;
        *value_counts.entry(value.trait_id.as_str()).or_insert(0) += 1;
    }

    for (idx, trait_def) in catalog.traits.iter().enumerate() {
        let count = value_counts.get(trait_def.id.as_str()).copied().unwrap_or(0);
        if trait_def.is_always_unique {
            let supply = trait_supply(catalog, trait_def.trait_set_id.as_deref());
            if count < supply {
                report.warning(
                    "always_unique_short",
                    format!("/traits/{idx}"),
                    format!(
                        "always-unique trait '{}' has {count} values for {supply} items",
                        trait_def.name
                    ),
                    Some("items beyond the value count will be abandoned".to_string()),
                );
            }
            continue;
        }
        let sum = rarity_sums.get(trait_def.id.as_str()).copied().unwrap_or(0.0);
        if sum > 1.0 + RARITY_EPSILON {
            report.warning(
                "rarity_sum_above_one",
                format!("/traits/{idx}"),
                format!("rarities of trait '{}' sum to {sum:.4}", trait_def.name),
                Some("the first value whose cumulative rarity is reached wins".to_string()),
            );
        } else if sum < 1.0 - RARITY_EPSILON {
            report.warning(
                "rarity_sum_below_one",
                format!("/traits/{idx}"),
                format!("rarities of trait '{}' sum to {sum:.4}", trait_def.name),
                Some("some draws will leave this trait without a value".to_string()),
            );
        }
    }

    for (idx, layer) in catalog.image_layers.iter().enumerate() {
        if let Some(value_id) = layer.trait_value_id.as_deref()
            && !value_ids.contains(value_id)
        {
            report.error(
                "unknown_trait_value",
                format!("/image_layers/{idx}/trait_value_id"),
                format!("layer '{}' references unknown value '{value_id}'", layer.id),
            );
        }
        if let Some(companion) = layer.companion_layer_id.as_deref() {
            if !layer_ids.contains(companion) {
                report.error(
                    "unknown_companion_layer",
                    format!("/image_layers/{idx}/companion_layer_id"),
                    format!("layer '{}' references unknown companion '{companion}'", layer.id),
                );
            }
            if layer.companion_layer_z_index.is_none() {
                report.warning(
                    "companion_without_z_index",
                    format!("/image_layers/{idx}/companion_layer_z_index"),
                    format!("companion of layer '{}' has no z-index", layer.id),
                    Some("the companion is stacked at its parent's z-index".to_string()),
                );
            }
        }
    }

    for (idx, conflict) in catalog.conflicts.iter().enumerate() {
        for (field, trait_id) in [
            ("trait1_id", &conflict.trait1_id),
            ("trait2_id", &conflict.trait2_id),
        ] {
            if !trait_ids.contains(trait_id.as_str()) {
                report.error(
                    "unknown_trait",
                    format!("/conflicts/{idx}/{field}"),
                    format!("conflict references unknown trait '{trait_id}'"),
                );
            }
        }
        for (field, value_id) in [
            ("trait1_value_id", &conflict.trait1_value_id),
            ("trait2_value_id", &conflict.trait2_value_id),
        ] {
            if let Some(value_id) = value_id
                && !value_ids.contains(value_id.as_str())
            {
                report.error(
                    "unknown_trait_value",
                    format!("/conflicts/{idx}/{field}"),
                    format!("conflict references unknown value '{value_id}'"),
                );
            }
        }
    }

    report
}

fn unique_ids<'a>(
    ids: impl Iterator<Item = &'a str>,
    path: &str,
    report: &mut ValidationReport,
) -> BTreeSet<&'a str> {
    let mut seen = BTreeSet::new();
    for (idx, id) in ids.enumerate() {
        if !seen.insert(id) {
            report.error(
                "duplicate_id",
                format!("{path}/{idx}/id"),
                format!("duplicate id '{id}'"),
            );
        }
    }
    seen
}

fn trait_supply(catalog: &Catalog, trait_set_id: Option<&str>) -> u64 {
    trait_set_id
        .and_then(|id| catalog.trait_set(id))
        .map(|set| set.end_index.saturating_sub(set.start_index))
        .unwrap_or(catalog.collection.supply)
}
