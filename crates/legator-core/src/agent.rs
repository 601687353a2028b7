//! Agent records: what a configured agent is allowed to do and when it runs.

use serde::{Deserialize, Serialize};

use crate::tier::AutonomyCeiling;
use crate::types::AgentKey;

/// Per-agent execution guardrails.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Guardrails {
    /// Maximum think/act/observe iterations per run.
    pub max_iterations: u32,
    /// Token budget per run.
    pub token_budget: u64,
    /// Whether actions above the autonomy ceiling route through approval
    /// instead of being blocked outright.
    pub approval_mode: bool,
}

impl Default for Guardrails {
    fn default() -> Self {
        Self {
            max_iterations: 20,
            token_budget: 200_000,
            approval_mode: true,
        }
    }
}

/// A configured agent: model, schedule, environment, and autonomy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentSpec {
    /// Agent identity.
    pub key: AgentKey,
    /// Maximum tier of action the agent may perform without approval.
    pub autonomy: AutonomyCeiling,
    /// Cron schedule, if the agent runs on a timer.
    pub schedule: Option<String>,
    /// Model tier label resolved by the run-config factory.
    pub model_tier: String,
    /// Name of the environment record (credentials, endpoints).
    pub environment: String,
    /// Paused agents are never admitted, regardless of trigger.
    pub paused: bool,
    /// Execution guardrails.
    pub guardrails: Guardrails,
}

impl AgentSpec {
    /// Create a spec with defaults for everything but the identity.
    #[must_use]
    pub fn new(key: AgentKey) -> Self {
        Self {
            key,
            autonomy: AutonomyCeiling::default(),
            schedule: None,
            model_tier: "standard".to_string(),
            environment: "default".to_string(),
            paused: false,
            guardrails: Guardrails::default(),
        }
    }

    /// Set the autonomy ceiling.
    #[must_use]
    pub fn with_autonomy(mut self, autonomy: AutonomyCeiling) -> Self {
        self.autonomy = autonomy;
        self
    }

    /// Set the cron schedule.
    #[must_use]
    pub fn with_schedule(mut self, schedule: impl Into<String>) -> Self {
        self.schedule = Some(schedule.into());
        self
    }

    /// Set the paused flag.
    #[must_use]
    pub fn with_paused(mut self, paused: bool) -> Self {
        self.paused = paused;
        self
    }
}
