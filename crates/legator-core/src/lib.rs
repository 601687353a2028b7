//! Legator Core - Foundation types for the Legator control plane.
//!
//! This crate provides:
//! - The action tier lattice and autonomy ceilings
//! - Agent, run, and trigger records
//! - Identity newtypes used throughout the control plane
//! - Duration-string parsing for timeouts and retention windows
//! - Shared error types

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

pub mod prelude;

pub mod agent;
pub mod duration;
pub mod error;
pub mod run;
pub mod tier;
pub mod tool;
pub mod types;

pub use agent::{AgentSpec, Guardrails};
pub use duration::parse_duration;
pub use error::{CoreError, CoreResult};
pub use run::{ActionRecord, ActionStatus, RunPhase, RunRecord, Trigger};
pub use tier::{ActionTier, AutonomyCeiling, PolicyLevel};
pub use tool::{AgentTool, ToolError};
pub use types::{AgentKey, ProbeId, RunId, Timestamp};
