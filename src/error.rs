//! Error types for Stowage.

use thiserror::Error;

/// Common error type for Stowage.
#[derive(Error, Debug)]
pub enum StowageError {
    /// Node or account missing, or owned by another account.
    #[error("{0} not found")]
    NotFound(String),

    /// Name collides with a sibling or is not a valid node name.
    #[error("bad name: {0}")]
    BadName(String),

    /// Operation applied to the wrong kind of node.
    #[error("invalid target: {0}")]
    InvalidTarget(String),

    /// Ingestion would exceed the remaining storage quota.
    #[error("storage quota exceeded: {requested} bytes requested, {remaining} bytes remaining")]
    QuotaExceeded {
        /// Bytes the transfer needed at the point it was rejected.
        requested: u64,
        /// Bytes that were still available to the account.
        remaining: u64,
    },

    /// Physical storage I/O failure.
    #[error("filesystem error: {0}")]
    Filesystem(#[from] std::io::Error),

    /// Physical storage and metadata diverged; the node needs reconciliation.
    #[error("integrity error: {0}")]
    Integrity(String),

    /// Database error.
    ///
    /// Database errors from sqlx are automatically converted.
    #[error("database error: {0}")]
    Database(String),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),

    /// Validation error for caller input.
    #[error("validation error: {0}")]
    Validation(String),
}

impl StowageError {
    /// Whether the operation may succeed if retried after reconciliation.
    pub fn is_retryable(&self) -> bool {
        matches!(self, StowageError::Integrity(_))
    }
}

impl From<sqlx::Error> for StowageError {
    fn from(e: sqlx::Error) -> Self {
        StowageError::Database(e.to_string())
    }
}

/// Returns true if the sqlx error is a UNIQUE constraint violation.
pub(crate) fn is_unique_violation(e: &sqlx::Error) -> bool {
    match e {
        sqlx::Error::Database(db_err) => db_err.is_unique_violation(),
        _ => false,
    }
}

/// Result type alias for Stowage operations.
pub type Result<T> = std::result::Result<T, StowageError>;
