//! Bearer-token authentication.

use async_trait::async_trait;
use axum::extract::{Request, State};
use axum::http::header::AUTHORIZATION;
use axum::middleware::Next;
use axum::response::Response;
use legator_rbac::UserIdentity;
use std::collections::HashMap;

use crate::error::ApiError;
use crate::state::AppState;

/// Validates bearer tokens into user identities.
///
/// Production deployments plug an OIDC validator in here; tests and small
/// installations use [`StaticTokenValidator`].
#[async_trait]
pub trait TokenValidator: Send + Sync {
    /// Resolve a bearer token; `None` means the token is invalid.
    async fn validate(&self, token: &str) -> Option<UserIdentity>;
}

/// A fixed token → identity table.
#[derive(Debug, Default)]
pub struct StaticTokenValidator {
    tokens: HashMap<String, UserIdentity>,
}

impl StaticTokenValidator {
    /// Create an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a token.
    #[must_use]
    pub fn with_token(mut self, token: impl Into<String>, user: UserIdentity) -> Self {
        self.tokens.insert(token.into(), user);
        self
    }
}

#[async_trait]
impl TokenValidator for StaticTokenValidator {
    async fn validate(&self, token: &str) -> Option<UserIdentity> {
        self.tokens.get(token).cloned()
    }
}

/// Extract the bearer token from an Authorization header value.
#[must_use]
pub fn bearer_token(header: &str) -> Option<&str> {
    header
        .strip_prefix("Bearer ")
        .or_else(|| header.strip_prefix("bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty())
}

/// Authentication middleware: resolves the identity or fails with 401.
///
/// The resolved [`UserIdentity`] lands in request extensions for the rate
/// limiter and handlers downstream.
pub async fn middleware(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let token = request
        .headers()
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(bearer_token)
        .ok_or(ApiError::Unauthorized)?;

    let user = state
        .validator
        .validate(token)
        .await
        .ok_or(ApiError::Unauthorized)?;

    request.extensions_mut().insert(user);
    Ok(next.run(request).await)
}
