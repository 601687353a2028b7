//! Control-plane entry point.

use anyhow::Context;
use clap::Parser;
use legator_a2a::{A2aCheckTasksTool, A2aDelegateTool, TaskRouter};
use legator_approval::ApprovalManager;
use legator_gateway::auth::StaticTokenValidator;
use legator_gateway::rate_limit::{RateLimitConfig as UserLimits, UserRateLimiter};
use legator_gateway::{router, AppState, ProbeRegistry};
use legator_notify::{NotificationRouter, RouteConfig};
use legator_rbac::{RbacPolicy, Role, Scope, SubjectMatch, UserIdentity};
use legator_sched::{
    RunConfig, RunConfigFactory, RunExecutor, RunOutcome, Scheduler, SchedulerConfig,
    TriggerContext,
};
use legator_store::{EventStore, MemoryStore};
use legator_wire::ProbePolicy;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "legatord", version, about = "Legator control plane")]
struct Args {
    /// Listen address.
    #[arg(long, env = "LEGATOR_LISTEN", default_value = "0.0.0.0:8420")]
    listen: SocketAddr,

    /// Probe registration token.
    #[arg(long, env = "LEGATOR_REGISTER_TOKEN")]
    register_token: String,

    /// Master secret for probe command signing, hex-encoded.
    #[arg(long, env = "LEGATOR_MASTER_SECRET")]
    master_secret: String,

    /// Bootstrap admin bearer token.
    #[arg(long, env = "LEGATOR_ADMIN_TOKEN")]
    admin_token: String,

    /// Bootstrap admin subject.
    #[arg(long, env = "LEGATOR_ADMIN_SUBJECT", default_value = "admin")]
    admin_subject: String,
}

/// Bootstrap factory: delegation tools plus approval gating; environment
/// resolution stays with the external declarative layer.
struct BootstrapFactory {
    tasks: TaskRouter,
    approvals: Arc<ApprovalManager>,
}

#[async_trait::async_trait]
impl RunConfigFactory for BootstrapFactory {
    async fn build(
        &self,
        agent: &legator_core::AgentSpec,
        trigger: legator_core::Trigger,
        context: &TriggerContext,
    ) -> legator_sched::SchedResult<RunConfig> {
        let agent_name = agent.key.to_string();
        let tools: Vec<Arc<dyn legator_core::AgentTool>> = vec![
            Arc::new(A2aDelegateTool::new(self.tasks.clone(), agent_name.clone())),
            Arc::new(A2aCheckTasksTool::new(self.tasks.clone(), agent_name)),
        ];
        Ok(RunConfig {
            agent: agent.clone(),
            trigger,
            context: context.clone(),
            model: agent.model_tier.clone(),
            tools,
            approval: agent
                .guardrails
                .approval_mode
                .then(|| Arc::clone(&self.approvals)),
        })
    }
}

/// Placeholder executor; the run loop is provided by the executor service.
struct NoopExecutor;

#[async_trait::async_trait]
impl RunExecutor for NoopExecutor {
    async fn execute(
        &self,
        config: RunConfig,
        _cancel: CancellationToken,
    ) -> RunOutcome {
        RunOutcome {
            phase: legator_core::RunPhase::Succeeded,
            report: format!("no executor attached for {}", config.agent.key),
            iterations: 0,
            tokens_used: 0,
            actions: Vec::new(),
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let args = Args::parse();
    let master_secret =
        hex::decode(&args.master_secret).context("master secret must be hex-encoded")?;

    let store: Arc<dyn EventStore> = Arc::new(MemoryStore::new());
    let approvals = Arc::new(ApprovalManager::new(Arc::clone(&store)));
    let notifier = Arc::new(NotificationRouter::new(RouteConfig::default(), Vec::new()));
    let scheduler = Arc::new(
        Scheduler::new(
            SchedulerConfig::default(),
            Arc::new(BootstrapFactory {
                tasks: TaskRouter::new(Arc::clone(&store)),
                approvals: Arc::clone(&approvals),
            }),
            Arc::new(NoopExecutor),
            Arc::clone(&store),
        )
        .with_notifier(notifier),
    );

    let policies = vec![RbacPolicy {
        name: "bootstrap-admin".into(),
        subjects: vec![SubjectMatch::new("sub", args.admin_subject.clone())],
        role: Role::Admin,
        scope: Scope::default(),
    }];
    let validator = StaticTokenValidator::new()
        .with_token(&args.admin_token, UserIdentity::new(args.admin_subject));

    let state = AppState {
        scheduler: Arc::clone(&scheduler),
        approvals,
        store,
        policies: Arc::new(policies),
        validator: Arc::new(validator),
        limiter: Arc::new(UserRateLimiter::new(UserLimits::default())),
        probes: Arc::new(ProbeRegistry::new(
            args.register_token,
            master_secret,
            ProbePolicy::with_level("default", legator_core::PolicyLevel::Observe),
        )),
        inventory: None,
    };

    let cancel = CancellationToken::new();
    let scheduler_loop = tokio::spawn(Arc::clone(&scheduler).run(cancel.clone()));

    let listener = tokio::net::TcpListener::bind(args.listen)
        .await
        .with_context(|| format!("binding {}", args.listen))?;
    info!(listen = %args.listen, "control plane listening");

    let signal_cancel = cancel.clone();
    let shutdown = async move {
        let _ = tokio::signal::ctrl_c().await;
        info!("interrupt received");
        signal_cancel.cancel();
    };

    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown)
        .await
        .context("serving")?;

    cancel.cancel();
    let _ = scheduler_loop.await;
    Ok(())
}
