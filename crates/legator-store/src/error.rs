//! Error types for store operations.

use thiserror::Error;

/// Result alias for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors from record persistence.
#[derive(Debug, Error)]
pub enum StoreError {
    /// No record with the requested id.
    #[error("record not found: {id}")]
    NotFound {
        /// The missing id.
        id: String,
    },

    /// A record with the id already exists.
    #[error("record already exists: {id}")]
    AlreadyExists {
        /// The conflicting id.
        id: String,
    },

    /// The write was computed against a stale version.
    #[error("version conflict on record: {id}")]
    Conflict {
        /// The contested id.
        id: String,
    },

    /// The backend failed.
    #[error("store backend error: {0}")]
    Backend(String),
}
