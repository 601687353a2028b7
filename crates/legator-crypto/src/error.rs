//! Error types for signing operations.

use thiserror::Error;

/// Result alias for crypto operations.
pub type CryptoResult<T> = Result<T, CryptoError>;

/// Errors from envelope signing and verification.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CryptoError {
    /// The signing key was empty.
    #[error("signing key must not be empty")]
    EmptyKey,

    /// A signature string was not valid hex.
    #[error("signature is not valid hex")]
    InvalidHex,

    /// The signature did not match the signed content.
    #[error("signature mismatch")]
    SignatureMismatch,
}
