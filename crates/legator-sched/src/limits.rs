//! Concurrency and run-rate limits.

use legator_core::AgentKey;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tracing::debug;

/// Limits applied to run admission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimitConfig {
    /// Concurrent runs per agent.
    pub max_concurrent_per_agent: usize,
    /// Concurrent runs across the cluster.
    pub max_concurrent_cluster: usize,
    /// Runs per agent per hour.
    pub max_runs_per_hour_per_agent: usize,
    /// Runs across the cluster per hour.
    pub max_runs_per_hour_cluster: usize,
    /// Extra headroom granted to webhook triggers: added once to the
    /// concurrency cap and ten-fold to the hourly cap.
    pub webhook_burst_allowance: usize,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_concurrent_per_agent: 1,
            max_concurrent_cluster: 10,
            max_runs_per_hour_per_agent: 12,
            max_runs_per_hour_cluster: 100,
            webhook_burst_allowance: 2,
        }
    }
}

/// The outcome of an admission check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Decision {
    /// Whether the run may start.
    pub allowed: bool,
    /// Reason, set on deny.
    pub reason: String,
}

impl Decision {
    fn allow() -> Self {
        Self {
            allowed: true,
            reason: String::new(),
        }
    }

    fn deny(reason: impl Into<String>) -> Self {
        Self {
            allowed: false,
            reason: reason.into(),
        }
    }
}

#[derive(Debug, Default)]
struct LimiterState {
    per_agent: HashMap<AgentKey, usize>,
    total: usize,
    history: Vec<(AgentKey, Instant)>,
}

/// Concurrency and hourly-rate limiter.
///
/// All checks and counter mutations run under one internal mutex so an
/// admission decision and its `record_start` are a single atomic step.
#[derive(Debug)]
pub struct RateLimiter {
    config: RateLimitConfig,
    state: Mutex<LimiterState>,
}

const HOUR: Duration = Duration::from_secs(3600);

impl RateLimiter {
    /// Create a limiter.
    #[must_use]
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            config,
            state: Mutex::new(LimiterState::default()),
        }
    }

    /// Check whether a run for `key` may start, without reserving a slot.
    #[must_use]
    pub fn allow(&self, key: &AgentKey, is_webhook: bool) -> Decision {
        let mut state = self.state.lock();
        self.check(&mut state, key, is_webhook)
    }

    /// Check admission and, when allowed, reserve the slot in the same
    /// critical section.
    #[must_use]
    pub fn allow_and_start(&self, key: &AgentKey, is_webhook: bool) -> Decision {
        let mut state = self.state.lock();
        let decision = self.check(&mut state, key, is_webhook);
        if decision.allowed {
            Self::start(&mut state, key);
        }
        decision
    }

    /// Reserve a slot without a check; used when admission was decided
    /// elsewhere under the same lock discipline.
    pub fn record_start(&self, key: &AgentKey) {
        let mut state = self.state.lock();
        Self::start(&mut state, key);
    }

    /// Release a slot. Never underflows.
    pub fn record_complete(&self, key: &AgentKey) {
        let mut state = self.state.lock();
        if let Some(count) = state.per_agent.get_mut(key) {
            *count = count.saturating_sub(1);
            if *count == 0 {
                state.per_agent.remove(key);
            }
        }
        state.total = state.total.saturating_sub(1);
    }

    /// Current cluster-wide concurrency, for introspection.
    #[must_use]
    pub fn concurrent_total(&self) -> usize {
        self.state.lock().total
    }

    fn check(&self, state: &mut LimiterState, key: &AgentKey, is_webhook: bool) -> Decision {
        // Prune the hour window lazily on every check.
        if let Some(cutoff) = Instant::now().checked_sub(HOUR) {
            state.history.retain(|(_, at)| *at > cutoff);
        }

        let agent_concurrent = state.per_agent.get(key).copied().unwrap_or(0);
        if agent_concurrent >= self.config.max_concurrent_per_agent {
            debug!(agent = %key, agent_concurrent, "denied: per-agent concurrency");
            return Decision::deny(format!(
                "agent {key} already has {agent_concurrent} concurrent runs (max {})",
                self.config.max_concurrent_per_agent
            ));
        }

        let burst = if is_webhook {
            self.config.webhook_burst_allowance
        } else {
            0
        };
        let cluster_cap = self.config.max_concurrent_cluster + burst;
        if state.total >= cluster_cap {
            debug!(total = state.total, cluster_cap, "denied: cluster concurrency");
            return Decision::deny(format!(
                "cluster has {} concurrent runs (cap {cluster_cap})",
                state.total
            ));
        }

        let agent_hour = state.history.iter().filter(|(k, _)| k == key).count();
        if agent_hour >= self.config.max_runs_per_hour_per_agent {
            return Decision::deny(format!(
                "agent {key} started {agent_hour} runs in the last hour (max {})",
                self.config.max_runs_per_hour_per_agent
            ));
        }

        let rate_cap = self.config.max_runs_per_hour_cluster + 10 * burst;
        if state.history.len() >= rate_cap {
            return Decision::deny(format!(
                "cluster started {} runs in the last hour (cap {rate_cap})",
                state.history.len()
            ));
        }

        Decision::allow()
    }

    fn start(state: &mut LimiterState, key: &AgentKey) {
        *state.per_agent.entry(key.clone()).or_insert(0) += 1;
        state.total += 1;
        state.history.push((key.clone(), Instant::now()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(name: &str) -> AgentKey {
        AgentKey::new("default", name)
    }

    fn limiter(per_agent: usize, cluster: usize, burst: usize) -> RateLimiter {
        RateLimiter::new(RateLimitConfig {
            max_concurrent_per_agent: per_agent,
            max_concurrent_cluster: cluster,
            max_runs_per_hour_per_agent: 1000,
            max_runs_per_hour_cluster: 10_000,
            webhook_burst_allowance: burst,
        })
    }

    #[test]
    fn test_per_agent_concurrency() {
        let limiter = limiter(2, 100, 0);
        let a = key("a");
        assert!(limiter.allow_and_start(&a, false).allowed);
        assert!(limiter.allow_and_start(&a, false).allowed);

        let denied = limiter.allow_and_start(&a, false);
        assert!(!denied.allowed);
        assert!(denied.reason.contains("concurrent runs"));

        limiter.record_complete(&a);
        assert!(limiter.allow_and_start(&a, false).allowed);
    }

    #[test]
    fn test_cluster_concurrency_and_webhook_burst() {
        // Cluster cap 2, burst 1, per-agent cap 5.
        let limiter = limiter(5, 2, 1);
        let a = key("a");
        let b = key("b");

        assert!(limiter.allow_and_start(&a, false).allowed);
        assert!(limiter.allow_and_start(&a, false).allowed);

        // Cluster full for cron traffic.
        let denied = limiter.allow(&b, false);
        assert!(!denied.allowed);
        assert!(denied.reason.contains("cluster"));

        // Webhook headroom admits one more.
        let webhook = limiter.allow_and_start(&b, true);
        assert!(webhook.allowed);
        assert!(webhook.reason.is_empty());

        // Burst slot used: even webhooks are out now.
        assert!(!limiter.allow(&b, true).allowed);

        // A completion frees a regular slot.
        limiter.record_complete(&a);
        assert!(limiter.allow_and_start(&b, false).allowed);
    }

    #[test]
    fn test_hourly_agent_cap() {
        let limiter = RateLimiter::new(RateLimitConfig {
            max_concurrent_per_agent: 100,
            max_concurrent_cluster: 100,
            max_runs_per_hour_per_agent: 3,
            max_runs_per_hour_cluster: 10_000,
            webhook_burst_allowance: 0,
        });
        let a = key("a");
        for _ in 0..3 {
            assert!(limiter.allow_and_start(&a, false).allowed);
            limiter.record_complete(&a);
        }
        let denied = limiter.allow(&a, false);
        assert!(!denied.allowed);
        assert!(denied.reason.contains("last hour"));

        // Other agents are unaffected.
        assert!(limiter.allow(&key("b"), false).allowed);
    }

    #[test]
    fn test_hourly_cluster_cap_with_webhook_headroom() {
        let limiter = RateLimiter::new(RateLimitConfig {
            max_concurrent_per_agent: 100,
            max_concurrent_cluster: 100,
            max_runs_per_hour_per_agent: 1000,
            max_runs_per_hour_cluster: 2,
            webhook_burst_allowance: 1,
        });
        let a = key("a");
        for _ in 0..2 {
            assert!(limiter.allow_and_start(&a, false).allowed);
            limiter.record_complete(&a);
        }
        assert!(!limiter.allow(&a, false).allowed);
        // Webhooks get ten-fold burst headroom on the hourly cap.
        assert!(limiter.allow(&a, true).allowed);
    }

    #[test]
    fn test_record_complete_never_underflows() {
        let limiter = limiter(1, 1, 0);
        let a = key("a");
        limiter.record_complete(&a);
        limiter.record_complete(&a);
        assert_eq!(limiter.concurrent_total(), 0);
        assert!(limiter.allow_and_start(&a, false).allowed);
    }

    #[test]
    fn test_interleaved_starts_never_exceed_caps() {
        let limiter = limiter(2, 3, 0);
        let keys: Vec<_> = (0..4).map(|i| key(&format!("agent-{i}"))).collect();

        let mut running: Vec<AgentKey> = Vec::new();
        for round in 0..50 {
            let k = &keys[round % keys.len()];
            if limiter.allow_and_start(k, false).allowed {
                running.push(k.clone());
            }
            // Cluster occupancy never exceeds the cap.
            assert!(running.len() <= 3);
            for k in &keys {
                assert!(running.iter().filter(|r| *r == k).count() <= 2);
            }
            if round % 3 == 0 {
                if let Some(done) = running.pop() {
                    limiter.record_complete(&done);
                }
            }
        }
    }
}
