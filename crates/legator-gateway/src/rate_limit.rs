//! Per-user token-bucket rate limiting.

use axum::extract::{Request, State};
use axum::middleware::Next;
use axum::response::Response;
use legator_rbac::{resolve_policy, Role, UserIdentity};
use parking_lot::Mutex;
use serde_json::json;
use std::collections::HashMap;
use std::fmt;
use std::time::{Duration, Instant};
use tracing::debug;

use crate::error::ApiError;
use crate::state::AppState;

/// Header carrying the client surface label.
pub const SURFACE_HEADER: &str = "x-legator-surface";

/// Client origin label; part of the limiter key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Surface {
    /// Plain API clients.
    Api,
    /// The CLI.
    Cli,
    /// The web UI.
    Web,
    /// ChatOps bots.
    Chatops,
    /// MCP connectors.
    Mcp,
}

impl Surface {
    /// Parse the header value; unknown or absent values read as `api`.
    #[must_use]
    pub fn parse(value: Option<&str>) -> Self {
        match value.unwrap_or("api") {
            "cli" => Self::Cli,
            "web" => Self::Web,
            "chatops" => Self::Chatops,
            "mcp" => Self::Mcp,
            _ => Self::Api,
        }
    }
}

impl fmt::Display for Surface {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Api => write!(f, "api"),
            Self::Cli => write!(f, "cli"),
            Self::Web => write!(f, "web"),
            Self::Chatops => write!(f, "chatops"),
            Self::Mcp => write!(f, "mcp"),
        }
    }
}

/// Limits for one role.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RoleLimits {
    /// Sustained requests per minute.
    pub requests_per_minute: u32,
    /// Bucket capacity.
    pub burst: u32,
}

/// Limiter configuration.
#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    /// Limits for viewers.
    pub viewer: RoleLimits,
    /// Limits for operators.
    pub operator: RoleLimits,
    /// Limits for admins.
    pub admin: RoleLimits,
    /// Paths that skip the limiter entirely.
    pub bypass_paths: Vec<String>,
    /// Idle buckets are evicted after this long.
    pub entry_ttl: Duration,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            viewer: RoleLimits {
                requests_per_minute: 60,
                burst: 10,
            },
            operator: RoleLimits {
                requests_per_minute: 120,
                burst: 20,
            },
            admin: RoleLimits {
                requests_per_minute: 240,
                burst: 40,
            },
            bypass_paths: vec!["/healthz".to_string()],
            entry_ttl: Duration::from_secs(600),
        }
    }
}

impl RateLimitConfig {
    fn limits_for(&self, role: Role) -> RoleLimits {
        match role {
            Role::Viewer => self.viewer,
            Role::Operator => self.operator,
            Role::Admin => self.admin,
        }
    }
}

struct Bucket {
    tokens: f64,
    refilled_at: Instant,
    used_at: Instant,
}

/// Token buckets keyed by `(subject, role, surface)`.
pub struct UserRateLimiter {
    config: RateLimitConfig,
    buckets: Mutex<HashMap<(String, Role, Surface), Bucket>>,
}

impl UserRateLimiter {
    /// Create a limiter.
    #[must_use]
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            config,
            buckets: Mutex::new(HashMap::new()),
        }
    }

    /// Whether a path bypasses the limiter.
    #[must_use]
    pub fn bypasses(&self, path: &str) -> bool {
        self.config.bypass_paths.iter().any(|p| p == path)
    }

    /// Take one token, or report the denial.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError::TooManyRequests`] with a structured body and a
    /// retry-after hint of `ceil(60 / rpm)` seconds.
    pub fn check(&self, subject: &str, role: Role, surface: Surface) -> Result<(), ApiError> {
        let limits = self.config.limits_for(role);
        let now = Instant::now();
        let mut buckets = self.buckets.lock();

        // Idle eviction rides along on every check.
        buckets.retain(|_, bucket| now.duration_since(bucket.used_at) < self.config.entry_ttl);

        let bucket = buckets
            .entry((subject.to_string(), role, surface))
            .or_insert(Bucket {
                tokens: f64::from(limits.burst),
                refilled_at: now,
                used_at: now,
            });

        let elapsed = now.duration_since(bucket.refilled_at).as_secs_f64();
        let rate_per_sec = f64::from(limits.requests_per_minute) / 60.0;
        bucket.tokens = (bucket.tokens + elapsed * rate_per_sec).min(f64::from(limits.burst));
        bucket.refilled_at = now;
        bucket.used_at = now;

        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            return Ok(());
        }

        let retry_after_secs =
            u64::from(60_u32.div_ceil(limits.requests_per_minute.max(1)));
        debug!(subject, %role, %surface, "request rate limited");
        Err(ApiError::TooManyRequests {
            retry_after_secs,
            body: json!({
                "error": "rate_limited",
                "subject": subject,
                "role": role.to_string(),
                "surface": surface.to_string(),
                "limits": {
                    "requests_per_minute": limits.requests_per_minute,
                    "burst": limits.burst,
                },
                "retry_after_secs": retry_after_secs,
            }),
        })
    }
}

impl fmt::Debug for UserRateLimiter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UserRateLimiter")
            .field("entries", &self.buckets.lock().len())
            .finish_non_exhaustive()
    }
}

/// Rate-limit middleware; runs after auth, so the identity is present.
pub async fn middleware(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    if state.limiter.bypasses(request.uri().path()) {
        return Ok(next.run(request).await);
    }

    let user = request
        .extensions()
        .get::<UserIdentity>()
        .cloned()
        .ok_or(ApiError::Unauthorized)?;
    let role = resolve_policy(&user, &state.policies)
        .map(|p| p.role)
        .unwrap_or(Role::Viewer);
    let surface = Surface::parse(
        request
            .headers()
            .get(SURFACE_HEADER)
            .and_then(|v| v.to_str().ok()),
    );

    state.limiter.check(&user.subject, role, surface)?;
    Ok(next.run(request).await)
}
