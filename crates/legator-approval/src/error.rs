//! Error types for the approval workflow.

use thiserror::Error;

use crate::record::ApprovalPhase;

/// Result alias for approval operations.
pub type ApprovalResult<T> = Result<T, ApprovalError>;

/// Errors from approval creation, polling, and decisions.
#[derive(Debug, Error)]
pub enum ApprovalError {
    /// The request parameters failed validation.
    #[error("invalid approval request: {0}")]
    InvalidParams(String),

    /// The tier requires typed confirmation and none was provided.
    #[error("typed confirmation required")]
    ConfirmationRequired,

    /// The provided confirmation token did not match the stored token.
    #[error("typed confirmation mismatch")]
    ConfirmationMismatch,

    /// The confirmation token expired before the decision arrived.
    #[error("typed confirmation expired")]
    ConfirmationExpired,

    /// The request already reached a terminal phase.
    #[error("approval already decided: {phase}")]
    AlreadyDecided {
        /// The terminal phase observed.
        phase: ApprovalPhase,
    },

    /// The caller cancelled while waiting for a decision.
    #[error("approval wait cancelled")]
    Cancelled,

    /// The backing store failed.
    #[error(transparent)]
    Store(#[from] legator_store::StoreError),

    /// An approval record failed to encode or decode.
    #[error("approval record codec error: {0}")]
    Codec(#[from] serde_json::Error),
}
