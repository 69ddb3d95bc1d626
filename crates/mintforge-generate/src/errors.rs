use thiserror::Error;

/// Errors that prevent a batch from producing anything.
#[derive(Debug, Error)]
pub enum GenerationError {
    #[error("invalid run: {0}")]
    InvalidRun(String),
    #[error("catalog error: {0}")]
    Catalog(#[from] mintforge_core::Error),
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
    #[error("entropy source unavailable: {0}")]
    Entropy(String),
}

/// Errors raised by blob and composite stores.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("blob not found: {0}")]
    NotFound(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("storage backend error: {0}")]
    Backend(String),
}

/// Errors raised while rendering a composite.
#[derive(Debug, Error)]
pub enum CompositeError {
    #[error("no layers to composite")]
    NoLayers,
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("image error: {0}")]
    Image(#[from] image::ImageError),
    #[error("compositor task failed: {0}")]
    Task(String),
}
