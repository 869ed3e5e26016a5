//! Error types for dictfact.

use thiserror::Error;

/// Errors surfaced by the factorization engine.
#[derive(Error, Debug)]
pub enum DictFactError {
    /// Configuration could not be parsed from JSON
    #[error("Config parse error: {0}")]
    ConfigParse(#[from] serde_json::Error),

    /// Feature count (or another dimension) inconsistent with prior calls
    #[error("Dimension mismatch: expected {expected}, got {got}")]
    DimensionMismatch { expected: usize, got: usize },

    /// `prepare` was given neither data nor an explicit shape
    #[error("Either provide a shape or data to prepare")]
    MissingShape,

    /// Fitting or inference was requested before `prepare`/`fit`
    #[error("Engine is not prepared: call prepare or fit first")]
    NotPrepared,

    /// Rejected configuration value
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// A row id passed to `partial_fit` does not address a prepared sample
    #[error("Sample index {index} out of range for {n_samples} samples")]
    SampleIndexOutOfRange { index: usize, n_samples: usize },

    /// Empty input where non-empty was required
    #[error("Empty input: {0}")]
    EmptyInput(String),

    /// A linear solve could not proceed
    #[error("Numerical failure: {0}")]
    Numerical(String),

    /// Worker pool could not be built
    #[error("Thread pool error: {0}")]
    ThreadPool(String),
}

impl From<rayon::ThreadPoolBuildError> for DictFactError {
    fn from(err: rayon::ThreadPoolBuildError) -> Self {
        DictFactError::ThreadPool(err.to_string())
    }
}

/// Result type alias for dictfact operations.
pub type Result<T> = std::result::Result<T, DictFactError>;
