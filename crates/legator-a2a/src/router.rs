//! The task router: delegate, poll, transition, expire.

use legator_store::{EventStore, LabelSelector, Record, StatusPatch, StoreError};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info};

use crate::task::{A2aTask, DelegationRequest, TaskPriority, TaskStatus};

/// Result alias for router operations.
pub type A2aResult<T> = Result<T, A2aError>;

/// Errors from task routing.
#[derive(Debug, Error)]
pub enum A2aError {
    /// The delegation request failed validation.
    #[error("invalid delegation: {0}")]
    InvalidDelegation(String),

    /// A status change violated the monotonic transition set.
    #[error("illegal task transition: {from} -> {to}")]
    IllegalTransition {
        /// Current status.
        from: TaskStatus,
        /// Requested status.
        to: TaskStatus,
    },

    /// The backing store failed.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// A task record failed to encode or decode.
    #[error("task codec error: {0}")]
    Codec(#[from] serde_json::Error),
}

/// Label keys used to index task events.
const LABEL_EVENT_TYPE: &str = "event-type";
const LABEL_SOURCE: &str = "a2a-source";
const LABEL_TARGET: &str = "a2a-target";
const LABEL_TASK_TYPE: &str = "a2a-type";
const LABEL_PRIORITY: &str = "a2a-priority";
const LABEL_STATUS: &str = "a2a-status";

/// Annotation carrying the reported result.
const ANNOTATION_RESULT: &str = "a2a-result";

/// How many optimistic-concurrency conflicts a transition absorbs.
const TRANSITION_RETRIES: usize = 3;

/// Routes delegation tasks between agents through the event store.
#[derive(Clone)]
pub struct TaskRouter {
    store: Arc<dyn EventStore>,
}

impl TaskRouter {
    /// Create a router over a record store.
    #[must_use]
    pub fn new(store: Arc<dyn EventStore>) -> Self {
        Self { store }
    }

    /// Persist a delegation as a pending task event.
    ///
    /// Defaults `priority` to normal and `task_type` to `general`. The task
    /// id incorporates both agent names and a millisecond timestamp.
    ///
    /// # Errors
    ///
    /// Returns [`A2aError::InvalidDelegation`] for empty source, target, or
    /// description, or a self-delegation; plus store failures.
    pub async fn delegate(&self, request: DelegationRequest) -> A2aResult<A2aTask> {
        if request.source.is_empty() || request.target.is_empty() {
            return Err(A2aError::InvalidDelegation(
                "source and target must be set".into(),
            ));
        }
        if request.description.is_empty() {
            return Err(A2aError::InvalidDelegation("description must be set".into()));
        }
        if request.source == request.target {
            return Err(A2aError::InvalidDelegation(
                "an agent cannot delegate to itself".into(),
            ));
        }

        let priority = request.priority.unwrap_or_default();
        let task_type = request
            .task_type
            .clone()
            .filter(|t| !t.is_empty())
            .unwrap_or_else(|| "general".into());
        let millis = chrono::Utc::now().timestamp_millis();
        let id = format!(
            "a2a-{}-{}-{millis}",
            request.source.replace('/', "-"),
            request.target.replace('/', "-")
        );

        let task = A2aTask {
            id: id.clone(),
            source: request.source.clone(),
            target: request.target.clone(),
            task_type: task_type.clone(),
            priority,
            status: TaskStatus::Pending,
            description: request.description,
            context: request.context,
            result: None,
            created_at: legator_core::Timestamp::now(),
            expires_at: request.expires_at,
        };

        let record = Record::new(id.clone(), serde_json::to_string(&task)?)
            .with_label(LABEL_EVENT_TYPE, "a2a-task")
            .with_label(LABEL_SOURCE, &request.source)
            .with_label(LABEL_TARGET, &request.target)
            .with_label(LABEL_TASK_TYPE, task_type)
            .with_label(LABEL_PRIORITY, priority.to_string())
            .with_label(LABEL_STATUS, TaskStatus::Pending.to_string());
        self.store.create(record).await?;
        info!(id, source = %request.source, target = %request.target, %priority, "task delegated");
        Ok(task)
    }

    /// Pending tasks for an agent, highest priority first, then oldest.
    ///
    /// # Errors
    ///
    /// Returns store and codec failures.
    pub async fn get_pending(&self, agent: &str) -> A2aResult<Vec<A2aTask>> {
        let selector = LabelSelector::all()
            .eq(LABEL_EVENT_TYPE, "a2a-task")
            .eq(LABEL_TARGET, agent)
            .eq(LABEL_STATUS, TaskStatus::Pending.to_string());
        let records = self.store.list(&selector).await?;
        let mut tasks = Vec::with_capacity(records.len());
        for record in records {
            tasks.push(self.decode(&record)?);
        }
        tasks.sort_by(|a, b| {
            b.priority
                .rank()
                .cmp(&a.priority.rank())
                .then_with(|| a.created_at.cmp(&b.created_at))
        });
        Ok(tasks)
    }

    /// Mark a task accepted.
    ///
    /// # Errors
    ///
    /// Returns [`A2aError::IllegalTransition`] when the task is not pending.
    pub async fn accept(&self, id: &str) -> A2aResult<A2aTask> {
        self.transition(id, TaskStatus::Accepted, None).await
    }

    /// Mark a task in progress.
    ///
    /// # Errors
    ///
    /// Returns [`A2aError::IllegalTransition`] out of order.
    pub async fn start(&self, id: &str) -> A2aResult<A2aTask> {
        self.transition(id, TaskStatus::InProgress, None).await
    }

    /// Mark a task completed with a result.
    ///
    /// # Errors
    ///
    /// Returns [`A2aError::IllegalTransition`] when already terminal.
    pub async fn complete(&self, id: &str, result: impl Into<String>) -> A2aResult<A2aTask> {
        self.transition(id, TaskStatus::Completed, Some(result.into()))
            .await
    }

    /// Mark a task failed with a result.
    ///
    /// # Errors
    ///
    /// Returns [`A2aError::IllegalTransition`] when already terminal.
    pub async fn fail(&self, id: &str, result: impl Into<String>) -> A2aResult<A2aTask> {
        self.transition(id, TaskStatus::Failed, Some(result.into()))
            .await
    }

    /// Reject a pending task.
    ///
    /// # Errors
    ///
    /// Returns [`A2aError::IllegalTransition`] when not pending.
    pub async fn reject(&self, id: &str, result: impl Into<String>) -> A2aResult<A2aTask> {
        self.transition(id, TaskStatus::Rejected, Some(result.into()))
            .await
    }

    /// Expire every pending task older than `max_age`.
    ///
    /// Cuts on server-assigned creation time. Returns the expired tasks.
    ///
    /// # Errors
    ///
    /// Returns store and codec failures; individual conflicts are retried.
    pub async fn expire_old(&self, max_age: Duration) -> A2aResult<Vec<A2aTask>> {
        let cutoff = chrono::Utc::now()
            - chrono::Duration::from_std(max_age).unwrap_or_else(|_| chrono::Duration::zero());
        let selector = LabelSelector::all()
            .eq(LABEL_EVENT_TYPE, "a2a-task")
            .eq(LABEL_STATUS, TaskStatus::Pending.to_string());
        let records = self.store.list(&selector).await?;

        let mut expired = Vec::new();
        for record in records {
            if record.created_at.into_inner() >= cutoff {
                continue;
            }
            match self.transition(&record.id, TaskStatus::Expired, None).await {
                Ok(task) => expired.push(task),
                // Raced with a consumer; the task is no longer pending.
                Err(A2aError::IllegalTransition { .. }) => {}
                Err(e) => return Err(e),
            }
        }
        if !expired.is_empty() {
            info!(count = expired.len(), "expired stale tasks");
        }
        Ok(expired)
    }

    /// Load one task.
    ///
    /// # Errors
    ///
    /// Returns store and codec failures.
    pub async fn get(&self, id: &str) -> A2aResult<A2aTask> {
        let record = self.store.get(id).await?;
        self.decode(&record)
    }

    async fn transition(
        &self,
        id: &str,
        next: TaskStatus,
        result: Option<String>,
    ) -> A2aResult<A2aTask> {
        for _ in 0..TRANSITION_RETRIES {
            let record = self.store.get(id).await?;
            let mut task = self.decode(&record)?;

            if !task.status.can_transition_to(next) {
                return Err(A2aError::IllegalTransition {
                    from: task.status,
                    to: next,
                });
            }
            task.status = next;
            if let Some(result) = &result {
                task.result = Some(result.clone());
            }

            let mut patch = StatusPatch::against(&record)
                .set_label(LABEL_STATUS, next.to_string())
                .set_detail(serde_json::to_string(&task)?);
            if let Some(result) = &result {
                patch = patch.set_annotation(ANNOTATION_RESULT, result);
            }
            match self.store.update_status(id, patch).await {
                Ok(_) => {
                    debug!(id, status = %next, "task transitioned");
                    return Ok(task);
                }
                Err(StoreError::Conflict { .. }) => {
                    debug!(id, "task transition conflicted, retrying");
                }
                Err(e) => return Err(e.into()),
            }
        }
        Err(A2aError::Store(StoreError::Conflict { id: id.to_string() }))
    }

    fn decode(&self, record: &Record) -> A2aResult<A2aTask> {
        let mut task: A2aTask = serde_json::from_str(&record.detail)?;
        // Labels are authoritative for status and priority; the detail is a
        // snapshot from the last writer.
        if let Some(status) = record.label(LABEL_STATUS).and_then(TaskStatus::from_label) {
            task.status = status;
        }
        if let Some(priority) = record.label(LABEL_PRIORITY) {
            task.priority = TaskPriority::from_label(priority);
        }
        task.created_at = record.created_at;
        if let Some(result) = record.annotation(ANNOTATION_RESULT) {
            task.result = Some(result.to_string());
        }
        Ok(task)
    }
}

impl std::fmt::Debug for TaskRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskRouter").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use legator_store::MemoryStore;

    fn router() -> TaskRouter {
        TaskRouter::new(Arc::new(MemoryStore::new()))
    }

    fn delegation(priority: Option<TaskPriority>) -> DelegationRequest {
        DelegationRequest {
            source: "ops/triager".into(),
            target: "ops/remediator".into(),
            task_type: None,
            priority,
            description: "restart the stuck worker".into(),
            context: BTreeMap::from([("host".into(), "web-3".into())]),
            expires_at: None,
        }
    }

    #[tokio::test]
    async fn test_delegate_defaults() {
        let router = router();
        let task = router.delegate(delegation(None)).await.unwrap();
        assert_eq!(task.priority, TaskPriority::Normal);
        assert_eq!(task.task_type, "general");
        assert_eq!(task.status, TaskStatus::Pending);
        assert!(task.id.starts_with("a2a-ops-triager-ops-remediator-"));
    }

    #[tokio::test]
    async fn test_delegate_validation() {
        let router = router();
        let mut bad = delegation(None);
        bad.description = String::new();
        assert!(matches!(
            router.delegate(bad).await,
            Err(A2aError::InvalidDelegation(_))
        ));

        let mut own = delegation(None);
        own.target = own.source.clone();
        assert!(matches!(
            router.delegate(own).await,
            Err(A2aError::InvalidDelegation(_))
        ));
    }

    #[tokio::test]
    async fn test_pending_priority_order() {
        let router = router();
        for priority in [
            TaskPriority::Low,
            TaskPriority::Normal,
            TaskPriority::High,
            TaskPriority::Critical,
        ] {
            router.delegate(delegation(Some(priority))).await.unwrap();
            // Distinct creation instants keep the tiebreak observable.
            tokio::time::sleep(Duration::from_millis(2)).await;
        }

        let pending = router.get_pending("ops/remediator").await.unwrap();
        let priorities: Vec<_> = pending.iter().map(|t| t.priority).collect();
        assert_eq!(
            priorities,
            vec![
                TaskPriority::Critical,
                TaskPriority::High,
                TaskPriority::Normal,
                TaskPriority::Low
            ]
        );
    }

    #[tokio::test]
    async fn test_same_priority_oldest_first() {
        let router = router();
        let first = router.delegate(delegation(None)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(2)).await;
        let second = router.delegate(delegation(None)).await.unwrap();

        let pending = router.get_pending("ops/remediator").await.unwrap();
        assert_eq!(pending[0].id, first.id);
        assert_eq!(pending[1].id, second.id);
    }

    #[tokio::test]
    async fn test_lifecycle_transitions() {
        let router = router();
        let task = router.delegate(delegation(None)).await.unwrap();

        router.accept(&task.id).await.unwrap();
        router.start(&task.id).await.unwrap();
        let done = router.complete(&task.id, "worker restarted").await.unwrap();
        assert_eq!(done.status, TaskStatus::Completed);
        assert_eq!(done.result.as_deref(), Some("worker restarted"));

        // Terminal status refuses further writes.
        assert!(matches!(
            router.fail(&task.id, "late").await,
            Err(A2aError::IllegalTransition { .. })
        ));

        // No longer pending.
        assert!(router.get_pending("ops/remediator").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_reject_from_pending_only() {
        let router = router();
        let task = router.delegate(delegation(None)).await.unwrap();
        router.accept(&task.id).await.unwrap();
        assert!(matches!(
            router.reject(&task.id, "busy").await,
            Err(A2aError::IllegalTransition { .. })
        ));
    }

    #[tokio::test]
    async fn test_expire_old_cuts_on_creation_time() {
        let router = router();
        let task = router.delegate(delegation(None)).await.unwrap();

        // Nothing is older than an hour yet.
        assert!(router
            .expire_old(Duration::from_secs(3600))
            .await
            .unwrap()
            .is_empty());

        // Everything is older than zero.
        tokio::time::sleep(Duration::from_millis(5)).await;
        let expired = router.expire_old(Duration::ZERO).await.unwrap();
        assert_eq!(expired.len(), 1);
        assert_eq!(expired[0].id, task.id);
        assert_eq!(router.get(&task.id).await.unwrap().status, TaskStatus::Expired);
    }
}
