use thiserror::Error;

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Storage-layer errors.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("record not found: {0}")]
    NotFound(String),

    /// Optimistic version mismatch or uniqueness violation. Safe to retry after re-reading.
    #[error("conflict: {0}")]
    Conflict(String),

    #[error("invariant violation: {0}")]
    InvariantViolation(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    /// The backend could not be reached (pool exhausted, connection refused, timeout).
    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("backend error: {0}")]
    Backend(String),
}

impl StorageError {
    /// Transient failures that may succeed on a later attempt.
    pub fn is_transient(&self) -> bool {
        matches!(self, StorageError::Conflict(_) | StorageError::Unavailable(_))
    }
}
