//! Shared gateway state.

use legator_approval::ApprovalManager;
use legator_rbac::RbacPolicy;
use legator_sched::Scheduler;
use legator_store::EventStore;
use std::sync::Arc;

use crate::auth::TokenValidator;
use crate::inventory::InventoryProvider;
use crate::probes::ProbeRegistry;
use crate::rate_limit::UserRateLimiter;

/// Everything the request handlers share.
#[derive(Clone)]
pub struct AppState {
    /// The run scheduler.
    pub scheduler: Arc<Scheduler>,
    /// The approval manager.
    pub approvals: Arc<ApprovalManager>,
    /// Record store, for run and audit queries.
    pub store: Arc<dyn EventStore>,
    /// RBAC policies in effect.
    pub policies: Arc<Vec<RbacPolicy>>,
    /// Bearer-token validator.
    pub validator: Arc<dyn TokenValidator>,
    /// Per-user rate limiter.
    pub limiter: Arc<UserRateLimiter>,
    /// Probe registry and channels.
    pub probes: Arc<ProbeRegistry>,
    /// Optional external inventory provider.
    pub inventory: Option<Arc<dyn InventoryProvider>>,
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("policies", &self.policies.len())
            .field("inventory", &self.inventory.is_some())
            .finish_non_exhaustive()
    }
}
