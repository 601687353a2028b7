//! Request audit logging, the outermost middleware.

use axum::extract::Request;
use axum::middleware::Next;
use axum::response::Response;
use std::time::Instant;
use tracing::info;

/// Log one line per request with method, path, status, and latency.
///
/// Runs outermost so denials from auth and the rate limiter are audited
/// too. Caller identity appears in handler-level logs once auth has
/// resolved it; this layer sees requests before that happens.
pub async fn middleware(request: Request, next: Next) -> Response {
    let method = request.method().clone();
    let path = request.uri().path().to_string();
    let start = Instant::now();

    let response = next.run(request).await;

    info!(
        %method,
        path,
        status = response.status().as_u16(),
        elapsed_ms = u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX),
        "request"
    );
    response
}
