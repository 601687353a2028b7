//! The tool contract between the run executor and tool implementations.

use async_trait::async_trait;
use thiserror::Error;

use crate::tier::ActionTier;

/// Errors surfaced by tool invocations.
#[derive(Debug, Error)]
pub enum ToolError {
    /// The arguments did not match the tool's contract.
    #[error("invalid tool arguments: {0}")]
    InvalidArgs(String),

    /// The tool executed and failed.
    #[error("tool failed: {0}")]
    Failed(String),

    /// The tool was refused by policy or a denied approval.
    #[error("tool blocked: {0}")]
    Blocked(String),
}

/// One callable tool in a run's registry.
///
/// Implementations declare a tier; the run executor computes the executed
/// tier as `max(declared, classified)` and routes calls above the agent's
/// autonomy ceiling through approval before invoking.
#[async_trait]
pub trait AgentTool: Send + Sync {
    /// Registry name, e.g. `probe.exec` or `a2a.delegate`.
    fn name(&self) -> &str;

    /// Declared tier of this tool's actions.
    fn tier(&self) -> ActionTier;

    /// Invoke the tool with JSON arguments, returning text for the model.
    async fn call(&self, args: serde_json::Value) -> Result<String, ToolError>;
}
