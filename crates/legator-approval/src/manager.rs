//! The approval manager: request, poll, decide.

use legator_core::{parse_duration, Timestamp};
use legator_store::{EventStore, LabelSelector, Record, StatusPatch};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{ApprovalError, ApprovalResult};
use crate::record::{ApprovalPhase, ApprovalRecord, ProposedAction, TypedConfirmation};

/// Default wait for a decision.
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30 * 60);

/// Default poll interval against the record store.
const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);

/// Label keys used to index approval records.
const LABEL_RECORD_TYPE: &str = "record-type";
const LABEL_AGENT: &str = "approval-agent";
const LABEL_RUN: &str = "approval-run";
const LABEL_PHASE: &str = "approval-phase";

/// Parameters for one approval request.
#[derive(Debug, Clone)]
pub struct ApprovalParams {
    /// Agent whose run proposes the action.
    pub agent: String,
    /// Run the request belongs to.
    pub run: String,
    /// The gated action.
    pub action: ProposedAction,
    /// Context text shown to approvers.
    pub context: String,
    /// Timeout as a duration string (`"30m"`); `None` uses the default.
    pub timeout: Option<String>,
    /// Notification channels for this request.
    pub channels: Vec<String>,
}

/// The resolution of one approval wait.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApprovalOutcome {
    /// Whether the action may proceed.
    pub approved: bool,
    /// Identity that decided, when a human did.
    pub decided_by: Option<String>,
    /// Reason attached to the decision or expiry.
    pub reason: Option<String>,
}

/// A decision a user can make on a pending request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecisionKind {
    /// Allow the action.
    Approve,
    /// Refuse the action.
    Deny,
}

/// Orchestrates approval records: creation, polling, and decisions.
///
/// The manager owns no UI; decisions arrive through [`ApprovalManager::decide`]
/// from whatever surface the operator uses.
pub struct ApprovalManager {
    store: Arc<dyn EventStore>,
    poll_interval: Duration,
}

impl ApprovalManager {
    /// Create a manager over a record store.
    #[must_use]
    pub fn new(store: Arc<dyn EventStore>) -> Self {
        Self {
            store,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    /// Override the poll interval (mainly for tests).
    #[must_use]
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Create an approval record and wait for its decision.
    ///
    /// Blocks until the record reaches a terminal phase, the deadline
    /// passes, or `cancel` fires. Deadline and cancellation both mark the
    /// record Expired (best-effort) before returning.
    ///
    /// # Errors
    ///
    /// Returns [`ApprovalError::Cancelled`] on cancellation, plus store and
    /// codec failures.
    pub async fn request_approval(
        &self,
        params: ApprovalParams,
        cancel: &CancellationToken,
    ) -> ApprovalResult<ApprovalOutcome> {
        if params.agent.is_empty() || params.run.is_empty() {
            return Err(ApprovalError::InvalidParams(
                "agent and run must be set".into(),
            ));
        }

        let timeout = match &params.timeout {
            Some(s) => parse_duration(s)
                .map_err(|e| ApprovalError::InvalidParams(e.to_string()))?,
            None => DEFAULT_TIMEOUT,
        };
        let deadline = Timestamp::from_datetime(
            chrono::Utc::now()
                + chrono::Duration::from_std(timeout).unwrap_or_else(|_| chrono::Duration::zero()),
        );

        let mut context = params.context.clone();
        let typed_confirmation = if params.action.tier.requires_typed_confirmation() {
            let token = mint_token();
            context.push_str(&format!(
                "\n\nThis is a {} action. To approve, re-enter the confirmation token: {token}",
                params.action.tier
            ));
            Some(TypedConfirmation {
                required: true,
                token,
                expires_at: deadline,
            })
        } else {
            None
        };

        let record = ApprovalRecord {
            id: approval_id(&params.agent, &params.run),
            agent: params.agent.clone(),
            run: params.run.clone(),
            action: params.action,
            context,
            channels: params.channels,
            phase: ApprovalPhase::Pending,
            deadline,
            typed_confirmation,
            decided_by: None,
            decided_at: None,
            reason: None,
        };

        let stored = Record::new(record.id.clone(), serde_json::to_string(&record)?)
            .with_label(LABEL_RECORD_TYPE, "approval")
            .with_label(LABEL_AGENT, &record.agent)
            .with_label(LABEL_RUN, &record.run)
            .with_label(LABEL_PHASE, ApprovalPhase::Pending.to_string());
        self.store.create(stored).await?;
        info!(id = %record.id, agent = %record.agent, tier = %record.action.tier, "approval requested");

        self.poll_until_decided(&record.id, deadline, cancel).await
    }

    async fn poll_until_decided(
        &self,
        id: &str,
        deadline: Timestamp,
        cancel: &CancellationToken,
    ) -> ApprovalResult<ApprovalOutcome> {
        loop {
            tokio::select! {
                () = cancel.cancelled() => {
                    debug!(id, "approval wait cancelled");
                    self.mark_expired(id).await;
                    return Err(ApprovalError::Cancelled);
                }
                () = tokio::time::sleep(self.poll_interval) => {}
            }

            let record = self.load(id).await?;
            match record.phase {
                ApprovalPhase::Pending => {
                    if deadline.is_past() {
                        self.mark_expired(id).await;
                        return Ok(ApprovalOutcome {
                            approved: false,
                            decided_by: None,
                            reason: Some("approval timed out".into()),
                        });
                    }
                }
                ApprovalPhase::Approved => {
                    return Ok(ApprovalOutcome {
                        approved: true,
                        decided_by: record.decided_by,
                        reason: record.reason,
                    });
                }
                ApprovalPhase::Denied => {
                    return Ok(ApprovalOutcome {
                        approved: false,
                        decided_by: record.decided_by,
                        reason: record.reason,
                    });
                }
                ApprovalPhase::Expired => {
                    return Ok(ApprovalOutcome {
                        approved: false,
                        decided_by: None,
                        reason: Some("approval expired".into()),
                    });
                }
            }
        }
    }

    /// Decide a pending request.
    ///
    /// Validates typed confirmation when the record requires it, then
    /// performs the one-shot Pending → Approved/Denied transition.
    ///
    /// # Errors
    ///
    /// Returns the specific confirmation error (`required`, `mismatch`,
    /// `expired`), [`ApprovalError::AlreadyDecided`] for terminal records,
    /// and store failures. The record stays Pending on every error.
    pub async fn decide(
        &self,
        id: &str,
        decision: DecisionKind,
        decided_by: &str,
        reason: Option<String>,
        typed_confirmation: Option<&str>,
    ) -> ApprovalResult<ApprovalRecord> {
        for _ in 0..3 {
            let stored = self.store.get(id).await?;
            let mut record: ApprovalRecord = serde_json::from_str(&stored.detail)?;

            if record.phase.is_terminal() {
                return Err(ApprovalError::AlreadyDecided {
                    phase: record.phase,
                });
            }

            if let Some(confirmation) = &record.typed_confirmation {
                if confirmation.required {
                    let provided =
                        typed_confirmation.ok_or(ApprovalError::ConfirmationRequired)?;
                    if provided.is_empty() {
                        return Err(ApprovalError::ConfirmationRequired);
                    }
                    if provided != confirmation.token {
                        return Err(ApprovalError::ConfirmationMismatch);
                    }
                    if confirmation.expires_at.is_past() {
                        return Err(ApprovalError::ConfirmationExpired);
                    }
                }
            }

            record.phase = match decision {
                DecisionKind::Approve => ApprovalPhase::Approved,
                DecisionKind::Deny => ApprovalPhase::Denied,
            };
            record.decided_by = Some(decided_by.to_string());
            record.decided_at = Some(Timestamp::now());
            record.reason = reason.clone();

            let patch = StatusPatch::against(&stored)
                .set_label(LABEL_PHASE, record.phase.to_string())
                .set_detail(serde_json::to_string(&record)?);
            match self.store.update_status(id, patch).await {
                Ok(_) => {
                    info!(id, decided_by, phase = %record.phase, "approval decided");
                    return Ok(record);
                }
                Err(legator_store::StoreError::Conflict { .. }) => {
                    debug!(id, "approval decision conflicted, re-reading");
                }
                Err(e) => return Err(e.into()),
            }
        }
        // Conflicts three times in a row: someone else decided.
        let record = self.load(id).await?;
        Err(ApprovalError::AlreadyDecided {
            phase: record.phase,
        })
    }

    /// Load and decode one approval record.
    ///
    /// # Errors
    ///
    /// Returns store and codec failures.
    pub async fn load(&self, id: &str) -> ApprovalResult<ApprovalRecord> {
        let stored = self.store.get(id).await?;
        Ok(serde_json::from_str(&stored.detail)?)
    }

    /// List approval records, optionally restricted to one agent.
    ///
    /// # Errors
    ///
    /// Returns store and codec failures.
    pub async fn list(&self, agent: Option<&str>) -> ApprovalResult<Vec<ApprovalRecord>> {
        let mut selector = LabelSelector::all().eq(LABEL_RECORD_TYPE, "approval");
        if let Some(agent) = agent {
            selector = selector.eq(LABEL_AGENT, agent);
        }
        let records = self.store.list(&selector).await?;
        let mut decoded = Vec::with_capacity(records.len());
        for record in records {
            decoded.push(serde_json::from_str(&record.detail)?);
        }
        Ok(decoded)
    }

    /// Best-effort transition to Expired; keeps terminal phases intact.
    async fn mark_expired(&self, id: &str) {
        let result = legator_store::retry_status_update(self.store.as_ref(), id, 3, |stored| {
            let patch = StatusPatch::against(stored);
            match serde_json::from_str::<ApprovalRecord>(&stored.detail) {
                Ok(mut record) if record.phase == ApprovalPhase::Pending => {
                    record.phase = ApprovalPhase::Expired;
                    match serde_json::to_string(&record) {
                        Ok(detail) => patch
                            .set_label(LABEL_PHASE, ApprovalPhase::Expired.to_string())
                            .set_detail(detail),
                        Err(_) => patch,
                    }
                }
                _ => patch,
            }
        })
        .await;
        if let Err(e) = result {
            warn!(id, error = %e, "failed to mark approval expired");
        }
    }
}

impl std::fmt::Debug for ApprovalManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApprovalManager")
            .field("poll_interval", &self.poll_interval)
            .finish_non_exhaustive()
    }
}

/// Mint a typed-confirmation token: `CONFIRM-` plus eight hex digits.
fn mint_token() -> String {
    format!("CONFIRM-{:08x}", rand::random::<u32>())
}

/// Approval ids incorporate agent, run, and a millisecond timestamp so they
/// sort and dedupe naturally in the store.
fn approval_id(agent: &str, run: &str) -> String {
    let millis = chrono::Utc::now().timestamp_millis();
    let agent = agent.replace('/', "-");
    format!("approval-{agent}-{run}-{millis}")
}
