use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// How a matched conflict rewrites the draw.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ConflictResolutionType {
    /// Clear the first trait's value.
    DropFirst,
    /// Clear the second trait's value.
    DropSecond,
    /// Re-draw the first trait, excluding the conflicting value.
    RandomizeFirst,
    /// Re-draw the second trait, excluding the conflicting value.
    RandomizeSecond,
}

/// Declared incompatibility between two (trait, optional value) selections.
///
/// A missing value id matches any value of that trait.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
pub struct Conflict {
    pub trait1_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trait1_value_id: Option<String>,
    pub trait2_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trait2_value_id: Option<String>,
    pub resolution_type: ConflictResolutionType,
}
