use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Options for the generation engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerateOptions {
    /// Directory holding per-project staging areas.
    pub staging_root: PathBuf,
    /// Maximum draws per item before the index is abandoned.
    pub max_draw_attempts: u32,
    /// Maximum re-draws when steering away from an excluded value.
    pub max_exclusion_attempts: u32,
    /// Decimal digits of the uniform fraction used for weighted draws.
    pub rarity_precision: u32,
    /// Fixed seed for reproducible runs. Leave unset in production so the
    /// random stream is seeded from OS entropy.
    pub seed: Option<u64>,
    /// Extension of rendered composites.
    pub output_extension: String,
    /// Content type sent with uploaded composites.
    pub content_type: String,
}

impl Default for GenerateOptions {
    fn default() -> Self {
        Self {
            staging_root: PathBuf::from("staging"),
            max_draw_attempts: 20,
            max_exclusion_attempts: 10,
            rarity_precision: 4,
            seed: None,
            output_extension: "png".to_string(),
            content_type: "image/png".to_string(),
        }
    }
}

/// Structured generation issue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationIssue {
    pub level: String,
    pub code: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub index: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub layer_id: Option<String>,
}

impl GenerationIssue {
    pub fn warning(code: &str, message: impl Into<String>) -> Self {
        Self {
            level: "warning".to_string(),
            code: code.to_string(),
            message: message.into(),
            index: None,
            layer_id: None,
        }
    }

    pub fn at_index(mut self, index: u64) -> Self {
        self.index = Some(index);
        self
    }

    pub fn for_layer(mut self, layer_id: &str) -> Self {
        self.layer_id = Some(layer_id.to_string());
        self
    }
}

/// Report for one batch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationReport {
    pub run_id: String,
    pub composite_group_id: String,
    pub start_index: u64,
    pub end_index: u64,
    pub requested: u64,
    pub generated: u64,
    pub abandoned: u64,
    pub composite_failures: u64,
    pub upload_failures: u64,
    pub persist_failures: u64,
    pub asset_failures: u64,
    pub conflicts_resolved: u64,
    pub draw_attempts: u64,
    pub duration_ms: u64,
    pub issues_by_code: BTreeMap<String, u64>,
    pub issues: Vec<GenerationIssue>,
}

impl GenerationReport {
    pub fn new(
        run_id: String,
        composite_group_id: String,
        start_index: u64,
        end_index: u64,
    ) -> Self {
        Self {
            run_id,
            composite_group_id,
            start_index,
            end_index,
            requested: end_index.saturating_sub(start_index),
            generated: 0,
            abandoned: 0,
            composite_failures: 0,
            upload_failures: 0,
            persist_failures: 0,
            asset_failures: 0,
            conflicts_resolved: 0,
            draw_attempts: 0,
            duration_ms: 0,
            issues_by_code: BTreeMap::new(),
            issues: Vec::new(),
        }
    }

    pub fn record_issue(&mut self, issue: GenerationIssue) {
        *self.issues_by_code.entry(issue.code.clone()).or_insert(0) += 1;
        self.issues.push(issue);
    }

    /// Merge a later batch of the same run into this report.
    pub fn absorb(&mut self, other: GenerationReport) {
        self.start_index = self.start_index.min(other.start_index);
        self.end_index = self.end_index.max(other.end_index);
        self.requested += other.requested;
        self.generated += other.generated;
        self.abandoned += other.abandoned;
        self.composite_failures += other.composite_failures;
        self.upload_failures += other.upload_failures;
        self.persist_failures += other.persist_failures;
        self.asset_failures += other.asset_failures;
        self.conflicts_resolved += other.conflicts_resolved;
        self.draw_attempts += other.draw_attempts;
        self.duration_ms += other.duration_ms;
        for issue in other.issues {
            self.record_issue(issue);
        }
    }
}
