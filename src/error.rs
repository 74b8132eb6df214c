//! Error types for the memo cache
//!
//! Provides unified error handling using thiserror. Loader failures are kept
//! verbatim inside an `Arc` so a single rejection can be handed to every
//! waiter and subscriber that observed it.

use std::sync::Arc;

use thiserror::Error;

// == Cache Error Enum ==
/// Unified error type surfaced by `Memo` and `KeyCache`.
#[derive(Error, Debug, Clone)]
pub enum CacheError {
    /// The loader failed; the original error is kept untouched
    #[error("{0}")]
    Load(Arc<anyhow::Error>),

    /// A batch loader returned no value for a key it was asked for
    #[error("batch loader returned no value for key {key}")]
    MissingFromBatch { key: String },

    /// The backing store went away while a caller was waiting on it
    #[error("cache store closed while waiting for a load to settle")]
    Closed,
}

impl CacheError {
    // == Constructors ==
    /// Wraps a loader error.
    pub fn load(err: anyhow::Error) -> Self {
        CacheError::Load(Arc::new(err))
    }

    // == Accessors ==
    /// Returns the loader error if this is a load failure.
    pub fn load_error(&self) -> Option<&anyhow::Error> {
        match self {
            CacheError::Load(err) => Some(err),
            _ => None,
        }
    }

    /// Identity comparison: true if both values describe the same rejection.
    ///
    /// Load failures compare by pointer, so two distinct failures with the
    /// same message are still different rejections.
    pub fn same(&self, other: &CacheError) -> bool {
        match (self, other) {
            (CacheError::Load(a), CacheError::Load(b)) => Arc::ptr_eq(a, b),
            (CacheError::MissingFromBatch { key: a }, CacheError::MissingFromBatch { key: b }) => {
                a == b
            }
            (CacheError::Closed, CacheError::Closed) => true,
            _ => false,
        }
    }
}

impl From<anyhow::Error> for CacheError {
    fn from(err: anyhow::Error) -> Self {
        CacheError::load(err)
    }
}

// == Result Type Alias ==
/// Convenience Result type for cache operations.
pub type Result<T> = std::result::Result<T, CacheError>;
