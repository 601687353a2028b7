//! Error types for scheduling.

use thiserror::Error;

/// Result alias for scheduler operations.
pub type SchedResult<T> = Result<T, SchedError>;

/// Errors from trigger handling and run admission.
#[derive(Debug, Error)]
pub enum SchedError {
    /// The agent is not registered with the scheduler.
    #[error("unknown agent: {agent}")]
    UnknownAgent {
        /// The missing agent key.
        agent: String,
    },

    /// The agent is paused.
    #[error("agent is paused: {agent}")]
    AgentPaused {
        /// The paused agent key.
        agent: String,
    },

    /// Admission was denied by the rate limiter.
    #[error("run denied: {reason}")]
    Denied {
        /// The limiter's reason.
        reason: String,
    },

    /// A cron expression failed to parse.
    #[error("invalid schedule {schedule:?}: {source}")]
    InvalidSchedule {
        /// The rejected expression.
        schedule: String,
        /// Parser error.
        #[source]
        source: cron::error::Error,
    },

    /// The run-config factory failed.
    #[error("run config factory failed: {0}")]
    Factory(String),

    /// The scheduler is shutting down and no longer admits runs.
    #[error("scheduler is draining")]
    Draining,

    /// The backing store failed.
    #[error(transparent)]
    Store(#[from] legator_store::StoreError),

    /// A run record failed to encode or decode.
    #[error("run record codec error: {0}")]
    Codec(#[from] serde_json::Error),
}
