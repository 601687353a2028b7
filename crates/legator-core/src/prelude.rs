//! Convenience re-exports for downstream crates.

pub use crate::agent::{AgentSpec, Guardrails};
pub use crate::duration::parse_duration;
pub use crate::error::{CoreError, CoreResult};
pub use crate::run::{ActionRecord, ActionStatus, RunPhase, RunRecord, Trigger};
pub use crate::tier::{ActionTier, AutonomyCeiling, PolicyLevel};
pub use crate::tool::{AgentTool, ToolError};
pub use crate::types::{AgentKey, ProbeId, RunId, Timestamp};
