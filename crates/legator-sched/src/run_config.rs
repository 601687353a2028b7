//! The contract between the scheduler, the run-config factory, and the
//! run executor.
//!
//! The factory is injected so the scheduler never owns provider clients,
//! credential stores, or the approval manager directly; it is a pure
//! function from an agent plus trigger context to the dependencies one run
//! needs.

use async_trait::async_trait;
use legator_approval::ApprovalManager;
use legator_core::{ActionRecord, AgentSpec, AgentTool, RunPhase, Trigger};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::error::SchedResult;

/// Trigger metadata handed to the factory and the executor.
#[derive(Debug, Clone, Default)]
pub struct TriggerContext {
    /// Ad-hoc task text, from manual and annotation triggers.
    pub task: Option<String>,
    /// Ad-hoc target, from manual and annotation triggers.
    pub target: Option<String>,
    /// Extra key/value context, e.g. webhook metadata.
    pub extra: BTreeMap<String, String>,
}

/// Everything one run needs, assembled per admission.
pub struct RunConfig {
    /// The agent being run.
    pub agent: AgentSpec,
    /// What admitted the run.
    pub trigger: Trigger,
    /// Trigger metadata.
    pub context: TriggerContext,
    /// Model identifier resolved from the agent's model tier.
    pub model: String,
    /// Tool registry for this run.
    pub tools: Vec<Arc<dyn AgentTool>>,
    /// Approval manager, present when the agent's approval mode is active.
    pub approval: Option<Arc<ApprovalManager>>,
}

impl std::fmt::Debug for RunConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunConfig")
            .field("agent", &self.agent.key)
            .field("trigger", &self.trigger)
            .field("model", &self.model)
            .field("tools", &self.tools.len())
            .field("approval", &self.approval.is_some())
            .finish()
    }
}

/// Builds a [`RunConfig`] for an admitted trigger.
///
/// Implementations resolve the environment (credentials, ephemeral
/// credentials, endpoints), assemble the tool registry, and attach the
/// approval manager when the agent's approval mode is active.
#[async_trait]
pub trait RunConfigFactory: Send + Sync {
    /// Build the run dependencies.
    ///
    /// # Errors
    ///
    /// Returns [`crate::SchedError::Factory`] when the environment cannot be
    /// resolved; the scheduler records a skipped trigger.
    async fn build(
        &self,
        agent: &AgentSpec,
        trigger: Trigger,
        context: &TriggerContext,
    ) -> SchedResult<RunConfig>;
}

/// The result the executor reports back to the scheduler.
#[derive(Debug, Clone)]
pub struct RunOutcome {
    /// Terminal phase; the scheduler rejects non-terminal values.
    pub phase: RunPhase,
    /// Final report text.
    pub report: String,
    /// Iterations consumed.
    pub iterations: u32,
    /// Tokens consumed.
    pub tokens_used: u64,
    /// Actions taken during the run.
    pub actions: Vec<ActionRecord>,
}

impl RunOutcome {
    /// A failed outcome with a reason.
    #[must_use]
    pub fn failed(report: impl Into<String>) -> Self {
        Self {
            phase: RunPhase::Failed,
            report: report.into(),
            iterations: 0,
            tokens_used: 0,
            actions: Vec::new(),
        }
    }
}

/// Executes one run: the think → act → observe loop lives behind this seam.
#[async_trait]
pub trait RunExecutor: Send + Sync {
    /// Execute the run to a terminal outcome.
    ///
    /// Cancellation must terminate the run promptly with a `Failed` outcome;
    /// the scheduler uses it for drain deadlines.
    async fn execute(&self, config: RunConfig, cancel: CancellationToken) -> RunOutcome;
}
