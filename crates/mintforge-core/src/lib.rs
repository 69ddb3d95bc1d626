//! Core contracts for Mintforge.
//!
//! This crate defines the collection catalog (traits, values, image layers,
//! conflicts), the generated composite records, and configuration-time
//! validation shared by the engine and the CLI.

pub mod catalog;
pub mod composite;
pub mod conflict;
pub mod error;
pub mod validation;

pub use catalog::{Catalog, Collection, ImageLayer, Trait, TraitSet, TraitValue};
pub use composite::{CompositeTrait, ImageComposite};
pub use conflict::{Conflict, ConflictResolutionType};
pub use error::{Error, Result};
pub use validation::{IssueSeverity, ValidationIssue, ValidationReport, validate_catalog};

/// Current contract version for catalog JSON files.
pub const CATALOG_VERSION: &str = "0.1";
