//! Generation engine for Mintforge collections.
//!
//! This crate draws rarity-weighted trait combinations, keeps them unique per
//! composite group, resolves configured conflicts, plans layer stacking, and
//! renders each item through pluggable storage and compositor adapters.

pub mod compositor;
pub mod conflicts;
pub mod draw;
pub mod engine;
pub mod errors;
pub mod layers;
pub mod model;
pub mod sampler;
pub mod staging;
pub mod storage;
pub mod uniqueness;

pub use compositor::{Compositor, ImageCompositor};
pub use conflicts::{ConflictResolution, ConflictResolver};
pub use draw::{Draw, TraitValuePair, ValuePools};
pub use engine::{BatchResult, GenerationEngine, RunDescriptor};
pub use errors::{CompositeError, GenerationError, StorageError};
pub use layers::{LayerPlanner, PlannedLayer, attach_layers};
pub use model::{GenerateOptions, GenerationIssue, GenerationReport};
pub use sampler::RaritySampler;
pub use staging::StagingArea;
pub use storage::{
    BlobStore, CatalogReader, CompositeScope, CompositeStore, FsBlobStore, InMemoryBlobStore,
    InMemoryCatalogReader, InMemoryCompositeStore,
};
pub use uniqueness::{UniquenessRegistry, fingerprint};
