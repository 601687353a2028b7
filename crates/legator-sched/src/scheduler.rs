//! The scheduler and run tracker.

use chrono::{DateTime, Utc};
use cron::Schedule;
use legator_core::{AgentKey, AgentSpec, RunId, RunPhase, RunRecord, Timestamp, Trigger};
use legator_notify::{NotificationMessage, NotificationRouter, Severity};
use legator_store::{EventStore, Record, StatusPatch};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::error::{SchedError, SchedResult};
use crate::limits::{RateLimitConfig, RateLimiter};
use crate::run_config::{RunConfigFactory, RunExecutor, TriggerContext};

/// Label keys used to index run records.
const LABEL_RECORD_TYPE: &str = "record-type";
const LABEL_AGENT: &str = "run-agent";
const LABEL_TRIGGER: &str = "run-trigger";
const LABEL_PHASE: &str = "run-phase";

/// Scheduler configuration.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// How often cron schedules are checked.
    pub tick_interval: Duration,
    /// How long shutdown waits for in-flight runs.
    pub drain_timeout: Duration,
    /// Consecutive failures before a failure notification escalates to
    /// critical.
    pub critical_failure_threshold: u32,
    /// Admission limits.
    pub rate_limits: RateLimitConfig,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_secs(1),
            drain_timeout: Duration::from_secs(30),
            critical_failure_threshold: 3,
            rate_limits: RateLimitConfig::default(),
        }
    }
}

struct AgentEntry {
    spec: AgentSpec,
    schedule: Option<Schedule>,
    next_fire: Option<DateTime<Utc>>,
}

#[derive(Default)]
struct RunTracker {
    running: HashMap<AgentKey, usize>,
    handles: Vec<JoinHandle<()>>,
}

/// Admits triggers, launches runs, and tracks them to completion.
pub struct Scheduler {
    config: SchedulerConfig,
    limiter: RateLimiter,
    factory: Arc<dyn RunConfigFactory>,
    executor: Arc<dyn RunExecutor>,
    store: Arc<dyn EventStore>,
    notifier: Option<Arc<NotificationRouter>>,
    agents: RwLock<HashMap<AgentKey, AgentEntry>>,
    tracker: Mutex<RunTracker>,
    failures: Mutex<HashMap<AgentKey, u32>>,
    draining: AtomicBool,
    cancel_runs: CancellationToken,
}

impl Scheduler {
    /// Create a scheduler; wrap it in an [`Arc`] before firing triggers.
    #[must_use]
    pub fn new(
        config: SchedulerConfig,
        factory: Arc<dyn RunConfigFactory>,
        executor: Arc<dyn RunExecutor>,
        store: Arc<dyn EventStore>,
    ) -> Self {
        let limiter = RateLimiter::new(config.rate_limits.clone());
        Self {
            config,
            limiter,
            factory,
            executor,
            store,
            notifier: None,
            agents: RwLock::new(HashMap::new()),
            tracker: Mutex::new(RunTracker::default()),
            failures: Mutex::new(HashMap::new()),
            draining: AtomicBool::new(false),
            cancel_runs: CancellationToken::new(),
        }
    }

    /// Attach a notification router for post-run messages.
    #[must_use]
    pub fn with_notifier(mut self, notifier: Arc<NotificationRouter>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    /// Register or replace an agent.
    ///
    /// # Errors
    ///
    /// Returns [`SchedError::InvalidSchedule`] for an unparsable cron
    /// expression.
    pub fn register_agent(&self, spec: AgentSpec) -> SchedResult<()> {
        let schedule = match &spec.schedule {
            Some(expr) => Some(Schedule::from_str(expr).map_err(|source| {
                SchedError::InvalidSchedule {
                    schedule: expr.clone(),
                    source,
                }
            })?),
            None => None,
        };
        let next_fire = schedule.as_ref().and_then(|s| s.upcoming(Utc).next());
        info!(agent = %spec.key, schedule = ?spec.schedule, "agent registered");
        self.agents.write().insert(
            spec.key.clone(),
            AgentEntry {
                spec,
                schedule,
                next_fire,
            },
        );
        Ok(())
    }

    /// Remove an agent; in-flight runs finish normally.
    pub fn deregister_agent(&self, key: &AgentKey) {
        self.agents.write().remove(key);
    }

    /// Registered agent specs.
    #[must_use]
    pub fn agents(&self) -> Vec<AgentSpec> {
        self.agents.read().values().map(|e| e.spec.clone()).collect()
    }

    /// Look up one agent spec.
    #[must_use]
    pub fn agent(&self, key: &AgentKey) -> Option<AgentSpec> {
        self.agents.read().get(key).map(|e| e.spec.clone())
    }

    /// Runs currently in flight for an agent.
    #[must_use]
    pub fn running_count(&self, key: &AgentKey) -> usize {
        self.tracker.lock().running.get(key).copied().unwrap_or(0)
    }

    /// Fire a webhook trigger.
    ///
    /// # Errors
    ///
    /// Propagates admission errors; denials carry the limiter's reason.
    pub async fn trigger_webhook(self: &Arc<Self>, key: &AgentKey) -> SchedResult<RunId> {
        self.fire(key, Trigger::Webhook, TriggerContext::default())
            .await
    }

    /// Fire a manual trigger with optional task and target.
    ///
    /// # Errors
    ///
    /// Propagates admission errors.
    pub async fn trigger_manual(
        self: &Arc<Self>,
        key: &AgentKey,
        task: Option<String>,
        target: Option<String>,
    ) -> SchedResult<RunId> {
        self.fire(
            key,
            Trigger::Manual,
            TriggerContext {
                task,
                target,
                ..TriggerContext::default()
            },
        )
        .await
    }

    /// Fire a consumed annotation trigger.
    ///
    /// The caller is responsible for clearing the annotation *before*
    /// invoking this, so a re-read never re-triggers.
    ///
    /// # Errors
    ///
    /// Propagates admission errors.
    pub async fn trigger_annotation(
        self: &Arc<Self>,
        key: &AgentKey,
        task: Option<String>,
        target: Option<String>,
    ) -> SchedResult<RunId> {
        self.fire(
            key,
            Trigger::Annotation,
            TriggerContext {
                task,
                target,
                ..TriggerContext::default()
            },
        )
        .await
    }

    /// Fire a delegation-driven trigger.
    ///
    /// # Errors
    ///
    /// Propagates admission errors.
    pub async fn trigger_a2a(self: &Arc<Self>, key: &AgentKey) -> SchedResult<RunId> {
        self.fire(key, Trigger::A2a, TriggerContext::default()).await
    }

    /// Drive cron schedules until `cancel` fires, then drain.
    pub async fn run(self: Arc<Self>, cancel: CancellationToken) {
        info!("scheduler started");
        loop {
            tokio::select! {
                () = cancel.cancelled() => break,
                () = tokio::time::sleep(self.config.tick_interval) => {}
            }

            for key in self.due_agents() {
                let scheduler = Arc::clone(&self);
                match scheduler
                    .fire(&key, Trigger::Scheduled, TriggerContext::default())
                    .await
                {
                    Ok(run) => debug!(agent = %key, %run, "cron run admitted"),
                    Err(SchedError::Denied { reason }) => {
                        debug!(agent = %key, reason, "cron run denied");
                    }
                    Err(e) => warn!(agent = %key, error = %e, "cron trigger failed"),
                }
            }
        }
        self.shutdown().await;
    }

    /// Stop admitting runs and wait for in-flight runs up to the drain
    /// deadline; past the deadline, cancel them.
    pub async fn shutdown(&self) {
        self.draining.store(true, Ordering::SeqCst);
        info!("scheduler draining");

        if tokio::time::timeout(self.config.drain_timeout, self.wait_for_runs())
            .await
            .is_err()
        {
            warn!("drain deadline reached, cancelling runs");
            self.cancel_runs.cancel();
            let _ = tokio::time::timeout(Duration::from_secs(5), self.wait_for_runs()).await;
        }
        info!("scheduler drained");
    }

    /// Await every tracked run handle until none remain.
    async fn wait_for_runs(&self) {
        loop {
            let handles: Vec<JoinHandle<()>> = {
                let mut tracker = self.tracker.lock();
                tracker.handles.retain(|h| !h.is_finished());
                if tracker.handles.is_empty() {
                    return;
                }
                tracker.handles.drain(..).collect()
            };
            for handle in handles {
                let _ = handle.await;
            }
        }
    }

    /// Agents whose cron schedule is due; advances their next-fire time.
    fn due_agents(&self) -> Vec<AgentKey> {
        let now = Utc::now();
        let mut due = Vec::new();
        let mut agents = self.agents.write();
        for (key, entry) in agents.iter_mut() {
            let Some(next) = entry.next_fire else { continue };
            if next <= now {
                entry.next_fire = entry.schedule.as_ref().and_then(|s| s.upcoming(Utc).next());
                if !entry.spec.paused {
                    due.push(key.clone());
                }
            }
        }
        due
    }

    /// Admit and launch one run.
    async fn fire(
        self: &Arc<Self>,
        key: &AgentKey,
        trigger: Trigger,
        context: TriggerContext,
    ) -> SchedResult<RunId> {
        if self.draining.load(Ordering::SeqCst) {
            return Err(SchedError::Draining);
        }

        let spec = self
            .agent(key)
            .ok_or_else(|| SchedError::UnknownAgent {
                agent: key.to_string(),
            })?;
        if spec.paused {
            return Err(SchedError::AgentPaused {
                agent: key.to_string(),
            });
        }

        // Admission and slot reservation are one atomic step.
        let decision = self.limiter.allow_and_start(key, trigger.is_webhook());
        if !decision.allowed {
            self.record_skip(key, trigger, &decision.reason).await;
            return Err(SchedError::Denied {
                reason: decision.reason,
            });
        }

        let config = match self.factory.build(&spec, trigger, &context).await {
            Ok(config) => config,
            Err(e) => {
                self.limiter.record_complete(key);
                self.record_skip(key, trigger, &e.to_string()).await;
                return Err(e);
            }
        };

        let run = RunRecord::admitted(key.clone(), trigger, config.model.clone());
        let run_id = run.id.clone();
        let stored = Record::new(run_id.to_string(), serde_json::to_string(&run)?)
            .with_label(LABEL_RECORD_TYPE, "run")
            .with_label(LABEL_AGENT, key.to_string())
            .with_label(LABEL_TRIGGER, trigger.to_string())
            .with_label(LABEL_PHASE, RunPhase::Pending.to_string());
        if let Err(e) = self.store.create(stored).await {
            self.limiter.record_complete(key);
            return Err(e.into());
        }
        info!(agent = %key, %run_id, %trigger, "run admitted");

        {
            let mut tracker = self.tracker.lock();
            *tracker.running.entry(key.clone()).or_insert(0) += 1;
            tracker.handles.retain(|h| !h.is_finished());
        }
        let scheduler = Arc::clone(self);
        let key = key.clone();
        let handle = tokio::spawn(async move {
            scheduler.execute_run(key, run, config).await;
        });
        self.tracker.lock().handles.push(handle);
        Ok(run_id)
    }

    async fn execute_run(
        self: Arc<Self>,
        key: AgentKey,
        mut run: RunRecord,
        config: crate::run_config::RunConfig,
    ) {
        run.phase = RunPhase::Running;
        self.persist_run(&run).await;

        let outcome = self
            .executor
            .execute(config, self.cancel_runs.child_token())
            .await;

        // Runs always end in a terminal phase, whatever the executor said.
        let phase = if outcome.phase.is_terminal() {
            outcome.phase
        } else {
            warn!(agent = %key, phase = %outcome.phase, "executor returned non-terminal phase");
            RunPhase::Failed
        };
        run.phase = phase;
        run.report = outcome.report;
        run.iterations = outcome.iterations;
        run.tokens_used = outcome.tokens_used;
        run.actions = outcome.actions;
        run.completed_at = Some(Timestamp::now());
        self.persist_run(&run).await;

        let streak = {
            let mut failures = self.failures.lock();
            match phase {
                RunPhase::Failed => {
                    let streak = failures.entry(key.clone()).or_insert(0);
                    *streak += 1;
                    *streak
                }
                _ => {
                    failures.remove(&key);
                    0
                }
            }
        };
        self.notify_run_complete(&key, &run, streak).await;

        self.limiter.record_complete(&key);
        let mut tracker = self.tracker.lock();
        if let Some(count) = tracker.running.get_mut(&key) {
            *count = count.saturating_sub(1);
            if *count == 0 {
                tracker.running.remove(&key);
            }
        }
        info!(agent = %key, run = %run.id, %phase, "run finished");
    }

    async fn notify_run_complete(&self, key: &AgentKey, run: &RunRecord, streak: u32) {
        let Some(notifier) = &self.notifier else { return };
        let severity = match run.phase {
            RunPhase::Failed if streak >= self.config.critical_failure_threshold => {
                Severity::Critical
            }
            RunPhase::Failed => Severity::Warning,
            _ => Severity::Info,
        };
        let message = NotificationMessage {
            agent: key.to_string(),
            severity,
            title: format!("run {} {}", run.id, run.phase),
            body: run.report.clone(),
        };
        for failure in notifier.notify(&message).await {
            warn!(agent = %key, error = %failure, "notification delivery failed");
        }
    }

    async fn persist_run(&self, run: &RunRecord) {
        let id = run.id.to_string();
        let detail = match serde_json::to_string(run) {
            Ok(detail) => detail,
            Err(e) => {
                error!(run = %run.id, error = %e, "run record encode failed");
                return;
            }
        };
        let phase = run.phase.to_string();
        let result = legator_store::retry_status_update(self.store.as_ref(), &id, 3, |stored| {
            StatusPatch::against(stored)
                .set_label(LABEL_PHASE, phase.clone())
                .set_detail(detail.clone())
        })
        .await;
        if let Err(e) = result {
            error!(run = %run.id, error = %e, "run record update failed");
        }
    }

    async fn record_skip(&self, key: &AgentKey, trigger: Trigger, reason: &str) {
        let id = format!(
            "skip-{}-{}",
            key.to_string().replace('/', "-"),
            Utc::now().timestamp_millis()
        );
        let record = Record::new(id, format!("{{\"reason\":{}}}", json_string(reason)))
            .with_label(LABEL_RECORD_TYPE, "run-skip")
            .with_label(LABEL_AGENT, key.to_string())
            .with_label(LABEL_TRIGGER, trigger.to_string());
        if let Err(e) = self.store.create(record).await {
            warn!(agent = %key, error = %e, "failed to record skipped trigger");
        }
    }
}

fn json_string(s: &str) -> String {
    serde_json::to_string(s).unwrap_or_else(|_| "\"\"".to_string())
}

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler")
            .field("agents", &self.agents.read().len())
            .field("draining", &self.draining.load(Ordering::SeqCst))
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::run_config::{RunConfig, RunOutcome};
    use async_trait::async_trait;
    use legator_notify::{NotificationChannel, RouteConfig};
    use legator_store::{LabelSelector, MemoryStore};
    use tokio::sync::Semaphore;

    struct StubFactory;

    #[async_trait]
    impl RunConfigFactory for StubFactory {
        async fn build(
            &self,
            agent: &AgentSpec,
            trigger: Trigger,
            context: &TriggerContext,
        ) -> SchedResult<RunConfig> {
            Ok(RunConfig {
                agent: agent.clone(),
                trigger,
                context: context.clone(),
                model: "test-model".into(),
                tools: Vec::new(),
                approval: None,
            })
        }
    }

    struct FailingFactory;

    #[async_trait]
    impl RunConfigFactory for FailingFactory {
        async fn build(
            &self,
            _agent: &AgentSpec,
            _trigger: Trigger,
            _context: &TriggerContext,
        ) -> SchedResult<RunConfig> {
            Err(SchedError::Factory("vault unreachable".into()))
        }
    }

    /// Holds every run until a permit is released; respects cancellation.
    struct GatedExecutor {
        gate: Semaphore,
    }

    impl GatedExecutor {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                gate: Semaphore::new(0),
            })
        }

        fn release(&self, count: usize) {
            self.gate.add_permits(count);
        }
    }

    #[async_trait]
    impl crate::run_config::RunExecutor for GatedExecutor {
        async fn execute(&self, _config: RunConfig, cancel: CancellationToken) -> RunOutcome {
            tokio::select! {
                permit = self.gate.acquire() => {
                    permit.map(tokio::sync::SemaphorePermit::forget).ok();
                    RunOutcome {
                        phase: RunPhase::Succeeded,
                        report: "done".into(),
                        iterations: 1,
                        tokens_used: 10,
                        actions: Vec::new(),
                    }
                }
                () = cancel.cancelled() => RunOutcome::failed("cancelled"),
            }
        }
    }

    struct FixedExecutor {
        phase: RunPhase,
    }

    #[async_trait]
    impl crate::run_config::RunExecutor for FixedExecutor {
        async fn execute(&self, _config: RunConfig, _cancel: CancellationToken) -> RunOutcome {
            RunOutcome {
                phase: self.phase,
                report: "report text".into(),
                iterations: 2,
                tokens_used: 42,
                actions: Vec::new(),
            }
        }
    }

    struct SeverityRecorder {
        seen: Mutex<Vec<Severity>>,
    }

    #[async_trait]
    impl NotificationChannel for SeverityRecorder {
        fn name(&self) -> &str {
            "recorder"
        }

        async fn send(&self, message: &NotificationMessage) -> Result<(), String> {
            self.seen.lock().push(message.severity);
            Ok(())
        }
    }

    fn key(name: &str) -> AgentKey {
        AgentKey::new("default", name)
    }

    fn config(cluster: usize, per_agent: usize, burst: usize) -> SchedulerConfig {
        SchedulerConfig {
            tick_interval: Duration::from_millis(20),
            drain_timeout: Duration::from_millis(300),
            critical_failure_threshold: 2,
            rate_limits: RateLimitConfig {
                max_concurrent_per_agent: per_agent,
                max_concurrent_cluster: cluster,
                max_runs_per_hour_per_agent: 1000,
                max_runs_per_hour_cluster: 10_000,
                webhook_burst_allowance: burst,
            },
        }
    }

    async fn wait_until<F: Fn() -> bool>(cond: F) {
        for _ in 0..200 {
            if cond() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("condition never became true");
    }

    #[tokio::test]
    async fn test_webhook_burst_admission() {
        let store = Arc::new(MemoryStore::new());
        let executor = GatedExecutor::new();
        let scheduler = Arc::new(Scheduler::new(
            config(2, 5, 1),
            Arc::new(StubFactory),
            Arc::clone(&executor) as Arc<dyn crate::run_config::RunExecutor>,
            Arc::clone(&store) as Arc<dyn EventStore>,
        ));
        let a = key("a");
        let b = key("b");
        scheduler.register_agent(AgentSpec::new(a.clone())).unwrap();
        scheduler.register_agent(AgentSpec::new(b.clone())).unwrap();

        // Fill the cluster with two runs on agent A.
        scheduler.trigger_manual(&a, None, None).await.unwrap();
        scheduler.trigger_manual(&a, None, None).await.unwrap();

        // A third non-webhook trigger is denied.
        let denied = scheduler.trigger_manual(&b, None, None).await.unwrap_err();
        assert!(matches!(denied, SchedError::Denied { .. }));

        // A webhook trigger rides the burst allowance.
        scheduler.trigger_webhook(&b).await.unwrap();

        // Release everything and wait for completion.
        executor.release(16);
        wait_until(|| scheduler.limiter.concurrent_total() == 0).await;

        // Capacity is back for regular triggers.
        scheduler.trigger_manual(&b, None, None).await.unwrap();
        executor.release(16);
        wait_until(|| scheduler.limiter.concurrent_total() == 0).await;
    }

    #[tokio::test]
    async fn test_run_record_reaches_terminal_phase() {
        let store = Arc::new(MemoryStore::new());
        let scheduler = Arc::new(Scheduler::new(
            config(10, 5, 0),
            Arc::new(StubFactory),
            Arc::new(FixedExecutor {
                phase: RunPhase::Succeeded,
            }),
            Arc::clone(&store) as Arc<dyn EventStore>,
        ));
        let a = key("a");
        scheduler.register_agent(AgentSpec::new(a.clone())).unwrap();

        let run_id = scheduler.trigger_manual(&a, None, None).await.unwrap();
        wait_until(|| scheduler.running_count(&a) == 0).await;

        let stored = store.get(&run_id.to_string()).await.unwrap();
        let run: RunRecord = serde_json::from_str(&stored.detail).unwrap();
        assert_eq!(run.phase, RunPhase::Succeeded);
        assert_eq!(run.report, "report text");
        assert_eq!(run.tokens_used, 42);
        assert!(run.completed_at.is_some());
        assert_eq!(stored.label("run-phase"), Some("Succeeded"));
    }

    #[tokio::test]
    async fn test_non_terminal_outcome_coerced_to_failed() {
        let store = Arc::new(MemoryStore::new());
        let scheduler = Arc::new(Scheduler::new(
            config(10, 5, 0),
            Arc::new(StubFactory),
            Arc::new(FixedExecutor {
                phase: RunPhase::Running,
            }),
            Arc::clone(&store) as Arc<dyn EventStore>,
        ));
        let a = key("a");
        scheduler.register_agent(AgentSpec::new(a.clone())).unwrap();

        let run_id = scheduler.trigger_manual(&a, None, None).await.unwrap();
        wait_until(|| scheduler.running_count(&a) == 0).await;

        let stored = store.get(&run_id.to_string()).await.unwrap();
        let run: RunRecord = serde_json::from_str(&stored.detail).unwrap();
        assert_eq!(run.phase, RunPhase::Failed);
    }

    #[tokio::test]
    async fn test_denied_trigger_records_skip() {
        let store = Arc::new(MemoryStore::new());
        let executor = GatedExecutor::new();
        let scheduler = Arc::new(Scheduler::new(
            config(1, 1, 0),
            Arc::new(StubFactory),
            Arc::clone(&executor) as Arc<dyn crate::run_config::RunExecutor>,
            Arc::clone(&store) as Arc<dyn EventStore>,
        ));
        let a = key("a");
        scheduler.register_agent(AgentSpec::new(a.clone())).unwrap();

        scheduler.trigger_manual(&a, None, None).await.unwrap();
        let _ = scheduler.trigger_manual(&a, None, None).await.unwrap_err();

        let skips = store
            .list(&LabelSelector::all().eq("record-type", "run-skip"))
            .await
            .unwrap();
        assert_eq!(skips.len(), 1);
        assert!(skips[0].detail.contains("concurrent"));

        executor.release(16);
        wait_until(|| scheduler.limiter.concurrent_total() == 0).await;
    }

    #[tokio::test]
    async fn test_factory_failure_releases_slot() {
        let store = Arc::new(MemoryStore::new());
        let scheduler = Arc::new(Scheduler::new(
            config(1, 1, 0),
            Arc::new(FailingFactory),
            Arc::new(FixedExecutor {
                phase: RunPhase::Succeeded,
            }),
            Arc::clone(&store) as Arc<dyn EventStore>,
        ));
        let a = key("a");
        scheduler.register_agent(AgentSpec::new(a.clone())).unwrap();

        let err = scheduler.trigger_manual(&a, None, None).await.unwrap_err();
        assert!(matches!(err, SchedError::Factory(_)));
        // The reserved slot was released despite the failure.
        assert_eq!(scheduler.limiter.concurrent_total(), 0);
    }

    #[tokio::test]
    async fn test_paused_agent_never_admitted() {
        let store = Arc::new(MemoryStore::new());
        let scheduler = Arc::new(Scheduler::new(
            config(10, 5, 0),
            Arc::new(StubFactory),
            Arc::new(FixedExecutor {
                phase: RunPhase::Succeeded,
            }),
            store as Arc<dyn EventStore>,
        ));
        let a = key("a");
        scheduler
            .register_agent(AgentSpec::new(a.clone()).with_paused(true))
            .unwrap();
        assert!(matches!(
            scheduler.trigger_manual(&a, None, None).await,
            Err(SchedError::AgentPaused { .. })
        ));
    }

    #[tokio::test]
    async fn test_invalid_schedule_rejected() {
        let store = Arc::new(MemoryStore::new());
        let scheduler = Scheduler::new(
            config(10, 5, 0),
            Arc::new(StubFactory),
            Arc::new(FixedExecutor {
                phase: RunPhase::Succeeded,
            }),
            store as Arc<dyn EventStore>,
        );
        let err = scheduler
            .register_agent(AgentSpec::new(key("a")).with_schedule("not a cron"))
            .unwrap_err();
        assert!(matches!(err, SchedError::InvalidSchedule { .. }));
    }

    #[tokio::test]
    async fn test_cron_schedule_fires() {
        let store = Arc::new(MemoryStore::new());
        let scheduler = Arc::new(Scheduler::new(
            config(10, 5, 0),
            Arc::new(StubFactory),
            Arc::new(FixedExecutor {
                phase: RunPhase::Succeeded,
            }),
            Arc::clone(&store) as Arc<dyn EventStore>,
        ));
        // Every second.
        scheduler
            .register_agent(AgentSpec::new(key("cronner")).with_schedule("* * * * * *"))
            .unwrap();

        let cancel = CancellationToken::new();
        let loop_handle = tokio::spawn(Arc::clone(&scheduler).run(cancel.clone()));
        tokio::time::sleep(Duration::from_millis(2500)).await;
        cancel.cancel();
        loop_handle.await.unwrap();

        let runs = store
            .list(&LabelSelector::all().eq("record-type", "run"))
            .await
            .unwrap();
        assert!(!runs.is_empty(), "cron never fired");
        assert_eq!(runs[0].label("run-trigger"), Some("scheduled"));
    }

    #[tokio::test]
    async fn test_drain_cancels_stuck_runs() {
        let store = Arc::new(MemoryStore::new());
        let executor = GatedExecutor::new();
        let scheduler = Arc::new(Scheduler::new(
            config(10, 5, 0),
            Arc::new(StubFactory),
            Arc::clone(&executor) as Arc<dyn crate::run_config::RunExecutor>,
            Arc::clone(&store) as Arc<dyn EventStore>,
        ));
        let a = key("a");
        scheduler.register_agent(AgentSpec::new(a.clone())).unwrap();
        let run_id = scheduler.trigger_manual(&a, None, None).await.unwrap();

        // Never released: drain must cancel it within the deadline.
        scheduler.shutdown().await;

        assert!(matches!(
            scheduler.trigger_manual(&a, None, None).await,
            Err(SchedError::Draining)
        ));
        let stored = store.get(&run_id.to_string()).await.unwrap();
        let run: RunRecord = serde_json::from_str(&stored.detail).unwrap();
        assert_eq!(run.phase, RunPhase::Failed);
    }

    #[tokio::test]
    async fn test_failure_streak_escalates_severity() {
        let recorder = Arc::new(SeverityRecorder {
            seen: Mutex::new(Vec::new()),
        });
        let notifier = Arc::new(NotificationRouter::new(
            RouteConfig {
                info: vec!["recorder".into()],
                warning: vec!["recorder".into()],
                critical: vec!["recorder".into()],
                per_agent_hourly_cap: 100,
            },
            vec![Arc::clone(&recorder) as Arc<dyn NotificationChannel>],
        ));
        let store = Arc::new(MemoryStore::new());
        let scheduler = Arc::new(
            Scheduler::new(
                config(10, 5, 0),
                Arc::new(StubFactory),
                Arc::new(FixedExecutor {
                    phase: RunPhase::Failed,
                }),
                store as Arc<dyn EventStore>,
            )
            .with_notifier(notifier),
        );
        let a = key("a");
        scheduler.register_agent(AgentSpec::new(a.clone())).unwrap();

        for _ in 0..2 {
            scheduler.trigger_manual(&a, None, None).await.unwrap();
            wait_until(|| scheduler.running_count(&a) == 0).await;
        }
        wait_until(|| recorder.seen.lock().len() == 2).await;
        let seen = recorder.seen.lock().clone();
        // First failure warns; the second hits the threshold and escalates.
        assert_eq!(seen, vec![Severity::Warning, Severity::Critical]);
    }
}
