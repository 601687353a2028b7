//! Shared error types for foundation operations.

use thiserror::Error;

/// Result alias for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors from foundation parsing and validation.
#[derive(Debug, Error)]
pub enum CoreError {
    /// A tier string did not name a known tier.
    #[error("unknown action tier: {value}")]
    UnknownTier {
        /// The rejected value.
        value: String,
    },

    /// A duration string could not be parsed.
    #[error("invalid duration: {value:?}")]
    InvalidDuration {
        /// The rejected value.
        value: String,
    },

    /// A record failed structural validation.
    #[error("invalid record: {0}")]
    InvalidRecord(String),
}
