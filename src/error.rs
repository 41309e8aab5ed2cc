/// Error type for cache operations.
#[derive(Debug, Clone, thiserror::Error)]
pub enum CacheError {
    /// The builder was given an invalid configuration.
    #[error("invalid cache config: {0}")]
    Config(String),

    /// A single backing store operation failed.
    #[error("[{tier}] cache error for key '{key}': {message}")]
    Operation {
        tier: String,
        key: String,
        message: String,
    },

    /// A write or delete fan-out failed on one or both layers.
    /// Both underlying errors are preserved for diagnostics.
    #[error("cache store error, l1: {l1:?}, l2: {l2:?}")]
    Store {
        l1: Option<String>,
        l2: Option<String>,
    },

    /// The source loader failed (or panicked inside a coalesced load).
    #[error("loader error: {0}")]
    Loader(String),

    /// A batch operation was given slices of different lengths, or a batch
    /// loader returned a result of the wrong length.
    #[error("keys and values length mismatch: expected {expected}, got {got}")]
    LengthMismatch { expected: usize, got: usize },

    /// Value (de)serialization failed.
    #[error("codec error: {0}")]
    Codec(String),
}

impl CacheError {
    /// Create a new configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        CacheError::Config(message.into())
    }

    /// Create a new store operation error.
    pub fn operation(
        tier: impl Into<String>,
        key: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        CacheError::Operation {
            tier: tier.into(),
            key: key.into(),
            message: message.into(),
        }
    }

    /// Combine per-layer failures into a composite store error.
    pub(crate) fn store(l1: Option<CacheError>, l2: Option<CacheError>) -> Self {
        CacheError::Store {
            l1: l1.map(|e| e.to_string()),
            l2: l2.map(|e| e.to_string()),
        }
    }

    /// Create a new loader error.
    pub fn loader(message: impl Into<String>) -> Self {
        CacheError::Loader(message.into())
    }

    /// Create a new codec error.
    pub fn codec(message: impl Into<String>) -> Self {
        CacheError::Codec(message.into())
    }
}
