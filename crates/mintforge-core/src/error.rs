use thiserror::Error;

/// Core error type shared across Mintforge crates.
#[derive(Debug, Error)]
pub enum Error {
    /// The catalog violates internal invariants.
    #[error("invalid catalog: {0}")]
    InvalidCatalog(String),
    /// A requested feature or format version is not supported.
    #[error("unsupported: {0}")]
    Unsupported(String),
}

/// Convenience alias for results returned by Mintforge crates.
pub type Result<T> = std::result::Result<T, Error>;
