//! Legator Notify - severity-routed notification fan-out.
//!
//! The router maps each severity to a list of channels and escalates
//! upward: a critical message also reaches the warning and info channels, a
//! warning also reaches info. Fan-out never aborts on a failing channel;
//! failures are collected and returned to the caller. A per-agent hourly
//! sliding window caps notification volume; messages over the cap are
//! dropped silently apart from a log line.

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

mod router;

pub use router::{
    ChannelError, NotificationChannel, NotificationMessage, NotificationRouter, RouteConfig,
    Severity,
};
