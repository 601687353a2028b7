//! LLM-facing tools over the task router.
//!
//! Both tools classify as observe: delegation writes only internal
//! coordination records and never touches managed infrastructure.

use async_trait::async_trait;
use legator_core::{ActionTier, AgentTool, ToolError};
use serde::Deserialize;
use std::collections::BTreeMap;

use crate::router::TaskRouter;
use crate::task::{DelegationRequest, TaskPriority};

/// Arguments accepted by `a2a.delegate`.
#[derive(Debug, Deserialize)]
struct DelegateArgs {
    target: String,
    description: String,
    #[serde(default)]
    task_type: Option<String>,
    #[serde(default)]
    priority: Option<TaskPriority>,
    #[serde(default)]
    context: BTreeMap<String, String>,
}

/// `a2a.delegate` - hand a task to another agent.
pub struct A2aDelegateTool {
    router: TaskRouter,
    source_agent: String,
}

impl A2aDelegateTool {
    /// Create the tool for the delegating agent.
    #[must_use]
    pub fn new(router: TaskRouter, source_agent: impl Into<String>) -> Self {
        Self {
            router,
            source_agent: source_agent.into(),
        }
    }
}

#[async_trait]
impl AgentTool for A2aDelegateTool {
    fn name(&self) -> &str {
        "a2a.delegate"
    }

    fn tier(&self) -> ActionTier {
        ActionTier::Observe
    }

    async fn call(&self, args: serde_json::Value) -> Result<String, ToolError> {
        let args: DelegateArgs =
            serde_json::from_value(args).map_err(|e| ToolError::InvalidArgs(e.to_string()))?;
        let task = self
            .router
            .delegate(DelegationRequest {
                source: self.source_agent.clone(),
                target: args.target,
                task_type: args.task_type,
                priority: args.priority,
                description: args.description,
                context: args.context,
                expires_at: None,
            })
            .await
            .map_err(|e| ToolError::Failed(e.to_string()))?;
        Ok(format!(
            "delegated task {} to {} at priority {}",
            task.id, task.target, task.priority
        ))
    }
}

/// `a2a.check_tasks` - list tasks pending for this agent.
pub struct A2aCheckTasksTool {
    router: TaskRouter,
    agent: String,
}

impl A2aCheckTasksTool {
    /// Create the tool for the polling agent.
    #[must_use]
    pub fn new(router: TaskRouter, agent: impl Into<String>) -> Self {
        Self {
            router,
            agent: agent.into(),
        }
    }
}

#[async_trait]
impl AgentTool for A2aCheckTasksTool {
    fn name(&self) -> &str {
        "a2a.check_tasks"
    }

    fn tier(&self) -> ActionTier {
        ActionTier::Observe
    }

    async fn call(&self, _args: serde_json::Value) -> Result<String, ToolError> {
        let pending = self
            .router
            .get_pending(&self.agent)
            .await
            .map_err(|e| ToolError::Failed(e.to_string()))?;
        serde_json::to_string(&pending).map_err(|e| ToolError::Failed(e.to_string()))
    }
}
