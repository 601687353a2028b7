//! Legator Gateway - the authenticated front door of the control plane.
//!
//! Every external surface (CLI, web, ChatOps) talks to this axum server.
//! The middleware stack, outermost first: audit logger → bearer auth →
//! per-user rate limiter → handler; RBAC decisions happen inside handlers
//! with the resource in hand. Probe lifecycle endpoints authenticate with
//! probe API keys instead, and `/healthz` bypasses everything.

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

pub mod audit;
pub mod auth;
pub mod error;
pub mod inventory;
pub mod probes;
pub mod rate_limit;
pub mod server;
pub mod state;

pub use error::ApiError;
pub use probes::{HealthReport, ProbeRegistry};
pub use server::router;
pub use state::AppState;
