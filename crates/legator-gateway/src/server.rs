//! Route table and request handlers.

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{Path, Query, State, WebSocketUpgrade};
use axum::http::header::AUTHORIZATION;
use axum::http::{HeaderMap, StatusCode};
use axum::middleware;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post, put};
use axum::{Extension, Json, Router};
use futures::{SinkExt, StreamExt};
use legator_approval::DecisionKind;
use legator_core::{parse_duration, AgentKey, RunRecord};
use legator_rbac::{authorize, resolve_policy, Action, RbacPolicy, UserIdentity, ALL_ACTIONS};
use legator_store::LabelSelector;
use legator_wire::Envelope;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use crate::audit;
use crate::auth;
use crate::error::ApiError;
use crate::probes::RegisterRequest;
use crate::rate_limit;
use crate::state::AppState;

/// Maximum records returned by run and audit listings.
const LIST_CAP: usize = 50;

/// Characters kept of each report in audit summaries.
const REPORT_TRUNCATE: usize = 500;

/// Build the full gateway router.
#[must_use]
pub fn router(state: AppState) -> Router {
    let protected = Router::new()
        .route("/api/v1/me", get(me))
        .route("/api/v1/agents", get(list_agents))
        .route("/api/v1/agents/:name", get(get_agent))
        .route("/api/v1/agents/:name/run", post(run_agent))
        .route("/api/v1/runs", get(list_runs))
        .route("/api/v1/runs/:id", get(get_run))
        .route("/api/v1/inventory", get(inventory))
        .route("/api/v1/approvals", get(list_approvals))
        .route("/api/v1/approvals/:id", post(decide_approval))
        .route("/api/v1/audit", get(audit_log))
        .route("/api/v1/policy/simulate", post(simulate_policy))
        .route("/api/v1/probes", get(list_probes))
        .route("/api/v1/probes/:id", get(get_probe))
        .route("/api/v1/probes/:id/health", get(probe_health))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            rate_limit::middleware,
        ))
        .layer(middleware::from_fn_with_state(state.clone(), auth::middleware));

    let open = Router::new()
        .route("/healthz", get(healthz))
        .route("/webhook/:agent", post(webhook))
        .route("/api/v1/register", post(register_probe))
        .route("/api/v1/probes/:id/tags", put(set_probe_tags))
        .route("/api/v1/probes/connect", get(probe_connect));

    Router::new()
        .merge(protected)
        .merge(open)
        .layer(middleware::from_fn(audit::middleware))
        .layer(tower_http::trace::TraceLayer::new_for_http())
        .with_state(state)
}

fn check(
    state: &AppState,
    user: &UserIdentity,
    action: Action,
    resource: &str,
) -> Result<(), ApiError> {
    let decision = authorize(user, action, resource, &state.policies);
    if decision.allowed {
        Ok(())
    } else {
        Err(ApiError::Forbidden(decision.reason))
    }
}

// ---------------------------------------------------------------------------
// Identity
// ---------------------------------------------------------------------------

async fn me(
    State(state): State<AppState>,
    Extension(user): Extension<UserIdentity>,
) -> Json<Value> {
    let effective_role = resolve_policy(&user, &state.policies).map(|p| p.role.to_string());
    let mut permissions = serde_json::Map::new();
    for action in ALL_ACTIONS {
        let decision = authorize(&user, *action, "", &state.policies);
        permissions.insert(
            action.to_string(),
            json!({"allowed": decision.allowed, "reason": decision.reason}),
        );
    }
    Json(json!({
        "subject": user.subject,
        "email": user.email,
        "name": user.name,
        "groups": user.groups,
        "effectiveRole": effective_role,
        "permissions": permissions,
    }))
}

// ---------------------------------------------------------------------------
// Agents and runs
// ---------------------------------------------------------------------------

async fn list_agents(
    State(state): State<AppState>,
    Extension(user): Extension<UserIdentity>,
) -> Result<Json<Value>, ApiError> {
    check(&state, &user, Action::ViewAgents, "")?;
    let agents = state.scheduler.agents();
    Ok(Json(json!({"agents": agents, "total": agents.len()})))
}

async fn get_agent(
    State(state): State<AppState>,
    Extension(user): Extension<UserIdentity>,
    Path(name): Path<String>,
) -> Result<Json<Value>, ApiError> {
    check(&state, &user, Action::ViewAgents, &name)?;
    let agent = state
        .scheduler
        .agent(&AgentKey::parse(&name))
        .ok_or_else(|| ApiError::NotFound(name))?;
    Ok(Json(serde_json::to_value(agent).map_err(|e| ApiError::Internal(e.to_string()))?))
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RunBody {
    task: Option<String>,
    target: Option<String>,
    #[allow(dead_code)]
    autonomy: Option<String>,
}

async fn run_agent(
    State(state): State<AppState>,
    Extension(user): Extension<UserIdentity>,
    Path(name): Path<String>,
    body: Option<Json<RunBody>>,
) -> Result<Response, ApiError> {
    check(&state, &user, Action::RunAgent, &name)?;
    let body = body.map(|Json(b)| b).unwrap_or_default();
    let run = state
        .scheduler
        .trigger_manual(&AgentKey::parse(&name), body.task, body.target)
        .await?;
    info!(agent = %name, run = %run, subject = %user.subject, "manual run admitted");
    Ok((StatusCode::ACCEPTED, Json(json!({"run": run.to_string()}))).into_response())
}

#[derive(Debug, Deserialize)]
struct RunsQuery {
    agent: Option<String>,
}

async fn list_runs(
    State(state): State<AppState>,
    Extension(user): Extension<UserIdentity>,
    Query(query): Query<RunsQuery>,
) -> Result<Json<Value>, ApiError> {
    check(&state, &user, Action::ViewRuns, "")?;
    let runs = load_runs(&state, query.agent.as_deref()).await?;
    Ok(Json(json!({"runs": runs, "total": runs.len()})))
}

async fn get_run(
    State(state): State<AppState>,
    Extension(user): Extension<UserIdentity>,
    Path(id): Path<String>,
) -> Result<Json<RunRecord>, ApiError> {
    check(&state, &user, Action::ViewRuns, "")?;
    let record = state.store.get(&id).await?;
    let run: RunRecord =
        serde_json::from_str(&record.detail).map_err(|e| ApiError::Internal(e.to_string()))?;
    Ok(Json(run))
}

async fn load_runs(state: &AppState, agent: Option<&str>) -> Result<Vec<RunRecord>, ApiError> {
    let mut selector = LabelSelector::all().eq("record-type", "run");
    if let Some(agent) = agent {
        selector = selector.eq("run-agent", agent);
    }
    let records = state.store.list(&selector).await?;
    let mut runs = Vec::with_capacity(records.len());
    for record in records {
        match serde_json::from_str::<RunRecord>(&record.detail) {
            Ok(run) => runs.push(run),
            Err(e) => warn!(record = record.id, error = %e, "undecodable run record"),
        }
    }
    runs.sort_by(|a, b| b.started_at.cmp(&a.started_at));
    runs.truncate(LIST_CAP);
    Ok(runs)
}

// ---------------------------------------------------------------------------
// Inventory
// ---------------------------------------------------------------------------

async fn inventory(
    State(state): State<AppState>,
    Extension(user): Extension<UserIdentity>,
) -> Result<Json<Value>, ApiError> {
    check(&state, &user, Action::ViewInventory, "")?;
    if let Some(provider) = &state.inventory {
        let devices = provider.devices().await;
        let sync = provider.inventory_status().await;
        return Ok(Json(json!({
            "devices": devices,
            "total": devices.len(),
            "source": "inventory-provider",
            "sync": sync,
        })));
    }
    let probes = state.probes.list();
    Ok(Json(json!({
        "devices": probes,
        "total": probes.len(),
        "source": "environment-endpoints",
    })))
}

// ---------------------------------------------------------------------------
// Approvals
// ---------------------------------------------------------------------------

async fn list_approvals(
    State(state): State<AppState>,
    Extension(user): Extension<UserIdentity>,
) -> Result<Json<Value>, ApiError> {
    check(&state, &user, Action::Approve, "")?;
    let approvals = state.approvals.list(None).await?;
    Ok(Json(json!({"approvals": approvals, "total": approvals.len()})))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DecisionBody {
    decision: String,
    reason: Option<String>,
    typed_confirmation: Option<String>,
}

async fn decide_approval(
    State(state): State<AppState>,
    Extension(user): Extension<UserIdentity>,
    Path(id): Path<String>,
    Json(body): Json<DecisionBody>,
) -> Result<Json<Value>, ApiError> {
    check(&state, &user, Action::Approve, "")?;
    let kind = match body.decision.as_str() {
        "approve" => DecisionKind::Approve,
        "deny" => DecisionKind::Deny,
        other => {
            return Err(ApiError::BadRequest(format!(
                "decision must be approve or deny, got {other:?}"
            )))
        }
    };
    let decided_by = if user.email.is_empty() {
        user.subject.clone()
    } else {
        user.email.clone()
    };
    let record = state
        .approvals
        .decide(
            &id,
            kind,
            &decided_by,
            body.reason,
            body.typed_confirmation.as_deref(),
        )
        .await?;
    Ok(Json(json!({"id": record.id, "phase": record.phase.to_string()})))
}

// ---------------------------------------------------------------------------
// Audit
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct AuditQuery {
    agent: Option<String>,
    since: Option<String>,
}

async fn audit_log(
    State(state): State<AppState>,
    Extension(user): Extension<UserIdentity>,
    Query(query): Query<AuditQuery>,
) -> Result<Json<Value>, ApiError> {
    check(&state, &user, Action::ViewAudit, "")?;
    let since = match query.since.as_deref() {
        Some(s) => parse_duration(s).map_err(|e| ApiError::BadRequest(e.to_string()))?,
        None => std::time::Duration::from_secs(24 * 3600),
    };
    let cutoff = chrono::Utc::now()
        - chrono::Duration::from_std(since).unwrap_or_else(|_| chrono::Duration::hours(24));

    let runs = load_runs(&state, query.agent.as_deref()).await?;
    let entries: Vec<Value> = runs
        .into_iter()
        .filter(|run| run.started_at.into_inner() >= cutoff)
        .map(|run| {
            let mut report = run.report;
            if report.len() > REPORT_TRUNCATE {
                let mut cut = REPORT_TRUNCATE;
                while !report.is_char_boundary(cut) {
                    cut -= 1;
                }
                report.truncate(cut);
                report.push_str("...");
            }
            json!({
                "run": run.id.to_string(),
                "agent": run.agent.to_string(),
                "trigger": run.trigger.to_string(),
                "phase": run.phase.to_string(),
                "started_at": run.started_at,
                "completed_at": run.completed_at,
                "report": report,
            })
        })
        .collect();
    Ok(Json(json!({"entries": entries, "total": entries.len()})))
}

// ---------------------------------------------------------------------------
// Policy simulation
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct SimulateCheck {
    action: Action,
    #[serde(default)]
    resource: String,
}

#[derive(Debug, Deserialize)]
struct SimulateBody {
    proposed: RbacPolicy,
    checks: Vec<SimulateCheck>,
}

async fn simulate_policy(
    State(state): State<AppState>,
    Extension(user): Extension<UserIdentity>,
    Json(body): Json<SimulateBody>,
) -> Result<Json<Value>, ApiError> {
    check(&state, &user, Action::Configure, "")?;
    let proposed_set = vec![body.proposed];
    let results: Vec<Value> = body
        .checks
        .iter()
        .map(|check| {
            let current = authorize(&user, check.action, &check.resource, &state.policies);
            let proposed = authorize(&user, check.action, &check.resource, &proposed_set);
            json!({
                "action": check.action.to_string(),
                "resource": check.resource,
                "current": {"allowed": current.allowed, "reason": current.reason},
                "proposed": {"allowed": proposed.allowed, "reason": proposed.reason},
            })
        })
        .collect();
    Ok(Json(json!({"results": results})))
}

// ---------------------------------------------------------------------------
// Probe lifecycle
// ---------------------------------------------------------------------------

async fn list_probes(
    State(state): State<AppState>,
    Extension(user): Extension<UserIdentity>,
) -> Result<Json<Value>, ApiError> {
    check(&state, &user, Action::ViewInventory, "")?;
    let probes = state.probes.list();
    Ok(Json(json!({"probes": probes, "total": probes.len()})))
}

async fn get_probe(
    State(state): State<AppState>,
    Extension(user): Extension<UserIdentity>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    check(&state, &user, Action::ViewInventory, &id)?;
    let probe = state
        .probes
        .get(&id)
        .ok_or_else(|| ApiError::NotFound(id))?;
    Ok(Json(serde_json::to_value(probe).map_err(|e| ApiError::Internal(e.to_string()))?))
}

async fn probe_health(
    State(state): State<AppState>,
    Extension(user): Extension<UserIdentity>,
    Path(id): Path<String>,
) -> Result<Json<crate::probes::HealthReport>, ApiError> {
    check(&state, &user, Action::ViewInventory, &id)?;
    state
        .probes
        .health(&id)
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(id))
}

async fn register_probe(
    State(state): State<AppState>,
    Json(request): Json<RegisterRequest>,
) -> Result<Response, ApiError> {
    let (probe_id, api_key, policy_id) = state
        .probes
        .register(&request)
        .ok_or_else(|| ApiError::Forbidden("invalid registration token".into()))?;
    Ok((
        StatusCode::CREATED,
        Json(json!({
            "probe_id": probe_id,
            "api_key": api_key,
            "policy_id": policy_id,
        })),
    )
        .into_response())
}

#[derive(Debug, Deserialize)]
struct TagsBody {
    tags: Vec<String>,
}

async fn set_probe_tags(
    State(state): State<AppState>,
    Path(id): Path<String>,
    headers: HeaderMap,
    Json(body): Json<TagsBody>,
) -> Result<Json<Value>, ApiError> {
    let api_key = headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(auth::bearer_token)
        .ok_or(ApiError::Unauthorized)?;
    if !state.probes.authenticate(&id, api_key) {
        return Err(ApiError::Unauthorized);
    }
    if !state.probes.set_tags(&id, body.tags) {
        return Err(ApiError::NotFound(id));
    }
    Ok(Json(json!({"ok": true})))
}

async fn probe_connect(
    State(state): State<AppState>,
    headers: HeaderMap,
    upgrade: WebSocketUpgrade,
) -> Result<Response, ApiError> {
    let api_key = headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(auth::bearer_token)
        .ok_or(ApiError::Unauthorized)?
        .to_string();
    let probe_id = headers
        .get("x-legator-probe-id")
        .and_then(|v| v.to_str().ok())
        .ok_or(ApiError::Unauthorized)?
        .to_string();
    if !state.probes.authenticate(&probe_id, &api_key) {
        return Err(ApiError::Unauthorized);
    }
    Ok(upgrade.on_upgrade(move |socket| probe_session(state, probe_id, socket)))
}

/// Pump envelopes between the socket and the registry until either side
/// closes.
async fn probe_session(state: AppState, probe_id: String, socket: WebSocket) {
    let mut outbox = state.probes.attach(&probe_id);
    let (mut sink, mut stream) = socket.split();

    loop {
        tokio::select! {
            envelope = outbox.recv() => {
                let Some(envelope) = envelope else { break };
                let Ok(text) = serde_json::to_string(&envelope) else { continue };
                if sink.send(Message::Text(text)).await.is_err() {
                    break;
                }
            }
            frame = stream.next() => {
                match frame {
                    Some(Ok(Message::Text(text))) => {
                        match serde_json::from_str::<Envelope>(&text) {
                            Ok(envelope) => state.probes.handle_inbound(&probe_id, &envelope),
                            Err(e) => debug!(probe = probe_id, error = %e, "undecodable frame"),
                        }
                    }
                    Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                    Some(Ok(_)) => {}
                }
            }
        }
    }
    state.probes.detach(&probe_id);
}

// ---------------------------------------------------------------------------
// Webhook and health
// ---------------------------------------------------------------------------

async fn webhook(
    State(state): State<AppState>,
    Path(agent): Path<String>,
) -> Result<Response, ApiError> {
    let run = state
        .scheduler
        .trigger_webhook(&AgentKey::parse(&agent))
        .await?;
    Ok((StatusCode::ACCEPTED, Json(json!({"run": run.to_string()}))).into_response())
}

async fn healthz() -> Json<Value> {
    Json(json!({"status": "ok"}))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::StaticTokenValidator;
    use crate::probes::ProbeRegistry;
    use crate::rate_limit::{RateLimitConfig as UserLimits, RoleLimits, UserRateLimiter};
    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::Request;
    use http_body_util::BodyExt;
    use legator_approval::{ApprovalManager, ApprovalParams, ProposedAction};
    use legator_core::{ActionTier, AgentSpec, PolicyLevel, RunPhase};
    use legator_rbac::{Role, Scope, SubjectMatch};
    use legator_sched::{
        RateLimitConfig, RunConfig, RunConfigFactory, RunExecutor, RunOutcome, Scheduler,
        SchedulerConfig, TriggerContext,
    };
    use legator_store::{EventStore, MemoryStore};
    use legator_wire::ProbePolicy;
    use std::collections::BTreeMap;
    use std::sync::Arc;
    use std::time::Duration;
    use tokio_util::sync::CancellationToken;
    use tower::ServiceExt;

    struct StubFactory;

    #[async_trait]
    impl RunConfigFactory for StubFactory {
        async fn build(
            &self,
            agent: &AgentSpec,
            trigger: legator_core::Trigger,
            context: &TriggerContext,
        ) -> legator_sched::SchedResult<RunConfig> {
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

    struct InstantExecutor;

    #[async_trait]
    impl RunExecutor for InstantExecutor {
        async fn execute(&self, _config: RunConfig, _cancel: CancellationToken) -> RunOutcome {
            RunOutcome {
                phase: RunPhase::Succeeded,
                report: "ok".into(),
                iterations: 1,
                tokens_used: 1,
                actions: Vec::new(),
            }
        }
    }

    fn policies() -> Vec<RbacPolicy> {
        vec![
            RbacPolicy {
                name: "admins".into(),
                subjects: vec![SubjectMatch::new("groups", "platform-admins")],
                role: Role::Admin,
                scope: Scope::default(),
            },
            RbacPolicy {
                name: "operators".into(),
                subjects: vec![SubjectMatch::new("groups", "sre")],
                role: Role::Operator,
                scope: Scope::default(),
            },
            RbacPolicy {
                name: "viewers".into(),
                subjects: vec![SubjectMatch::new("email", "*@example.com")],
                role: Role::Viewer,
                scope: Scope::default(),
            },
        ]
    }

    fn build_state(per_agent_cap: usize) -> AppState {
        let store: Arc<dyn EventStore> = Arc::new(MemoryStore::new());
        let scheduler = Arc::new(Scheduler::new(
            SchedulerConfig {
                rate_limits: RateLimitConfig {
                    max_concurrent_per_agent: per_agent_cap,
                    max_concurrent_cluster: 100,
                    max_runs_per_hour_per_agent: 1000,
                    max_runs_per_hour_cluster: 10_000,
                    webhook_burst_allowance: 0,
                },
                ..SchedulerConfig::default()
            },
            Arc::new(StubFactory),
            Arc::new(InstantExecutor),
            Arc::clone(&store),
        ));
        scheduler
            .register_agent(AgentSpec::new(AgentKey::parse("default/auditor")))
            .unwrap();

        let approvals = Arc::new(
            ApprovalManager::new(Arc::clone(&store)).with_poll_interval(Duration::from_millis(20)),
        );
        let validator = StaticTokenValidator::new()
            .with_token(
                "admin-token",
                UserIdentity::new("alice")
                    .with_email("alice@example.com")
                    .with_groups(vec!["platform-admins".into()]),
            )
            .with_token(
                "operator-token",
                UserIdentity::new("olga")
                    .with_email("olga@example.com")
                    .with_groups(vec!["sre".into()]),
            )
            .with_token(
                "viewer-token",
                UserIdentity::new("vera").with_email("vera@example.com"),
            );

        AppState {
            scheduler,
            approvals,
            store,
            policies: Arc::new(policies()),
            validator: Arc::new(validator),
            limiter: Arc::new(UserRateLimiter::new(UserLimits::default())),
            probes: Arc::new(ProbeRegistry::new(
                "reg-token",
                b"master".to_vec(),
                ProbePolicy::with_level("default", PolicyLevel::Observe),
            )),
            inventory: None,
        }
    }

    fn request(method: &str, path: &str, token: Option<&str>, body: Option<Value>) -> Request<Body> {
        let mut builder = Request::builder().method(method).uri(path);
        if let Some(token) = token {
            builder = builder.header("authorization", format!("Bearer {token}"));
        }
        match body {
            Some(body) => builder
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        }
    }

    async fn body_json(response: Response) -> Value {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap_or(Value::Null)
    }

    #[tokio::test]
    async fn test_healthz_bypasses_auth() {
        let app = router(build_state(1));
        let response = app
            .oneshot(request("GET", "/healthz", None, None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_missing_token_is_401() {
        let app = router(build_state(1));
        let response = app
            .oneshot(request("GET", "/api/v1/agents", None, None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_me_reports_effective_role_and_permissions() {
        let app = router(build_state(1));
        let response = app
            .oneshot(request("GET", "/api/v1/me", Some("admin-token"), None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["effectiveRole"], "admin");
        assert_eq!(body["permissions"]["configure"]["allowed"], true);
        assert_eq!(body["subject"], "alice");
    }

    #[tokio::test]
    async fn test_viewer_cannot_run_agent() {
        let app = router(build_state(1));
        let response = app
            .oneshot(request(
                "POST",
                "/api/v1/agents/auditor/run",
                Some("viewer-token"),
                Some(json!({})),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
        let body = body_json(response).await;
        assert!(body["reason"].as_str().unwrap().contains("does not permit"));
    }

    #[tokio::test]
    async fn test_operator_run_agent_202() {
        let state = build_state(5);
        let app = router(state.clone());
        let response = app
            .oneshot(request(
                "POST",
                "/api/v1/agents/auditor/run",
                Some("operator-token"),
                Some(json!({"task": "check disks"})),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::ACCEPTED);
        let body = body_json(response).await;
        assert!(body["run"].as_str().unwrap().starts_with("run:"));
    }

    #[tokio::test]
    async fn test_webhook_admits_and_denies() {
        // Per-agent cap of zero denies everything.
        let state = build_state(0);
        let app = router(state);
        let response = app
            .oneshot(request("POST", "/webhook/auditor", None, None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);

        let state = build_state(5);
        let app = router(state);
        let response = app
            .oneshot(request("POST", "/webhook/auditor", None, None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::ACCEPTED);
    }

    #[tokio::test]
    async fn test_unknown_agent_webhook_404() {
        let app = router(build_state(1));
        let response = app
            .oneshot(request("POST", "/webhook/nonexistent", None, None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_typed_confirmation_workflow() {
        let state = build_state(1);
        let approvals = Arc::clone(&state.approvals);
        let cancel = CancellationToken::new();

        // A destructive approval request lands in the store.
        let waiter = {
            let approvals = Arc::clone(&approvals);
            let cancel = cancel.clone();
            tokio::spawn(async move {
                approvals
                    .request_approval(
                        ApprovalParams {
                            agent: "default/db-maint".into(),
                            run: "run-1".into(),
                            action: ProposedAction {
                                tool: "probe.exec".into(),
                                tier: ActionTier::DestructiveMutation,
                                target: "db-1".into(),
                                description: "drop partitions".into(),
                                args: BTreeMap::new(),
                            },
                            context: "cleanup".into(),
                            timeout: Some("10m".into()),
                            channels: vec![],
                        },
                        &cancel,
                    )
                    .await
            })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        let pending = approvals.list(None).await.unwrap();
        let id = pending[0].id.clone();
        let token = pending[0].typed_confirmation.clone().unwrap().token;

        let app = router(state.clone());

        // Approve without the token: 400.
        let response = app
            .clone()
            .oneshot(request(
                "POST",
                &format!("/api/v1/approvals/{id}"),
                Some("operator-token"),
                Some(json!({"decision": "approve"})),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        // Wrong token: 403.
        let response = app
            .clone()
            .oneshot(request(
                "POST",
                &format!("/api/v1/approvals/{id}"),
                Some("operator-token"),
                Some(json!({"decision": "approve", "typedConfirmation": "CONFIRM-WRONG"})),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);

        // Stored token: 200, and the approval transitions.
        let response = app
            .clone()
            .oneshot(request(
                "POST",
                &format!("/api/v1/approvals/{id}"),
                Some("operator-token"),
                Some(json!({"decision": "approve", "typedConfirmation": token})),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["phase"], "Approved");

        let outcome = waiter.await.unwrap().unwrap();
        assert!(outcome.approved);
        assert_eq!(outcome.decided_by.as_deref(), Some("olga@example.com"));
    }

    #[tokio::test]
    async fn test_viewer_cannot_decide_approvals() {
        let app = router(build_state(1));
        let response = app
            .oneshot(request(
                "POST",
                "/api/v1/approvals/some-id",
                Some("viewer-token"),
                Some(json!({"decision": "approve"})),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn test_per_user_rate_limit_429() {
        let mut state = build_state(1);
        state.limiter = Arc::new(UserRateLimiter::new(UserLimits {
            viewer: RoleLimits {
                requests_per_minute: 60,
                burst: 2,
            },
            ..UserLimits::default()
        }));
        let app = router(state);

        for _ in 0..2 {
            let response = app
                .clone()
                .oneshot(request("GET", "/api/v1/agents", Some("viewer-token"), None))
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::OK);
        }
        let response = app
            .clone()
            .oneshot(request("GET", "/api/v1/agents", Some("viewer-token"), None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(
            response.headers().get("retry-after").unwrap().to_str().unwrap(),
            "1"
        );
        let body = body_json(response).await;
        assert_eq!(body["role"], "viewer");
        assert_eq!(body["surface"], "api");
        assert_eq!(body["subject"], "vera");
    }

    #[tokio::test]
    async fn test_probe_registration_and_tags() {
        let app = router(build_state(1));
        let response = app
            .clone()
            .oneshot(request(
                "POST",
                "/api/v1/register",
                None,
                Some(json!({
                    "token": "reg-token",
                    "hostname": "web-1",
                    "os": "linux",
                    "arch": "x86_64",
                    "version": "0.1.0",
                })),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);
        let body = body_json(response).await;
        let probe_id = body["probe_id"].as_str().unwrap().to_string();
        let api_key = body["api_key"].as_str().unwrap().to_string();

        // Tag update authenticates with the probe's API key.
        let response = app
            .clone()
            .oneshot(request(
                "PUT",
                &format!("/api/v1/probes/{probe_id}/tags"),
                Some(&api_key),
                Some(json!({"tags": ["edge", "eu-west"]})),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        // Wrong key is refused.
        let response = app
            .clone()
            .oneshot(request(
                "PUT",
                &format!("/api/v1/probes/{probe_id}/tags"),
                Some("wrong-key"),
                Some(json!({"tags": []})),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        // Probe detail and health are visible to users.
        let response = app
            .clone()
            .oneshot(request(
                "GET",
                &format!("/api/v1/probes/{probe_id}/health"),
                Some("viewer-token"),
                None,
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let health = body_json(response).await;
        assert!(health["score"].is_number());
        assert!(health["warnings"].is_array());
    }

    #[tokio::test]
    async fn test_bad_registration_token_403() {
        let app = router(build_state(1));
        let response = app
            .oneshot(request(
                "POST",
                "/api/v1/register",
                None,
                Some(json!({
                    "token": "wrong",
                    "hostname": "web-1",
                    "os": "linux",
                    "arch": "x86_64",
                    "version": "0.1.0",
                })),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn test_inventory_falls_back_to_probes() {
        let app = router(build_state(1));
        let response = app
            .oneshot(request("GET", "/api/v1/inventory", Some("viewer-token"), None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["source"], "environment-endpoints");
    }

    #[tokio::test]
    async fn test_policy_simulation() {
        let app = router(build_state(1));
        let response = app
            .oneshot(request(
                "POST",
                "/api/v1/policy/simulate",
                Some("admin-token"),
                Some(json!({
                    "proposed": {
                        "name": "proposed-viewer",
                        "subjects": [{"claim": "groups", "value": "platform-admins"}],
                        "role": "viewer",
                        "scope": {}
                    },
                    "checks": [
                        {"action": "configure"},
                        {"action": "view_agents"}
                    ]
                })),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        let results = body["results"].as_array().unwrap();
        // Configure: allowed today, denied under the proposed viewer policy.
        assert_eq!(results[0]["current"]["allowed"], true);
        assert_eq!(results[0]["proposed"]["allowed"], false);
        assert_eq!(results[1]["proposed"]["allowed"], true);
    }

    #[tokio::test]
    async fn test_runs_listing_caps_and_sorts() {
        let state = build_state(10);
        let app = router(state.clone());

        for _ in 0..3 {
            let response = app
                .clone()
                .oneshot(request(
                    "POST",
                    "/api/v1/agents/auditor/run",
                    Some("operator-token"),
                    Some(json!({})),
                ))
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::ACCEPTED);
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        // Let the instant executor finish.
        tokio::time::sleep(Duration::from_millis(100)).await;

        let response = app
            .clone()
            .oneshot(request(
                "GET",
                "/api/v1/runs?agent=default/auditor",
                Some("viewer-token"),
                None,
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        let runs = body["runs"].as_array().unwrap();
        assert_eq!(runs.len(), 3);
        // Newest first.
        let first = runs[0]["started_at"].as_str().unwrap().to_string();
        let last = runs[2]["started_at"].as_str().unwrap().to_string();
        assert!(first >= last);

        // Audit view carries summaries.
        let response = app
            .clone()
            .oneshot(request(
                "GET",
                "/api/v1/audit?since=1h",
                Some("viewer-token"),
                None,
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["total"], 3);
    }
}
