//! Probe error types.

use thiserror::Error;

/// Result alias for probe operations.
pub type ProbeResult<T> = Result<T, ProbeError>;

/// Errors from the probe runtime.
#[derive(Debug, Error)]
pub enum ProbeError {
    /// Configuration could not be read or written.
    #[error("config error: {0}")]
    Config(String),

    /// Registration with the control plane failed.
    #[error("registration failed: {0}")]
    Registration(String),

    /// The channel to the control plane failed.
    #[error("connection error: {0}")]
    Connection(String),

    /// A wire frame failed to encode or decode.
    #[error(transparent)]
    Wire(#[from] legator_wire::WireError),

    /// Self-update failed.
    #[error("update failed: {0}")]
    Update(String),

    /// The agent loop was cancelled.
    #[error("shutting down")]
    Shutdown,

    /// Underlying I/O failure.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}
