//! The notification router.

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, warn};

/// Notification severity, ascending.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    /// Routine outcome.
    Info,
    /// Something needs attention soon.
    Warning,
    /// Something needs attention now.
    Critical,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Info => write!(f, "info"),
            Self::Warning => write!(f, "warning"),
            Self::Critical => write!(f, "critical"),
        }
    }
}

/// A message to fan out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotificationMessage {
    /// Agent the message concerns; also the rate-cap key.
    pub agent: String,
    /// Severity, which selects the channels.
    pub severity: Severity,
    /// Short title.
    pub title: String,
    /// Body text.
    pub body: String,
}

/// One delivery failure from the fan-out.
#[derive(Debug, Error)]
#[error("channel {channel} failed: {reason}")]
pub struct ChannelError {
    /// Channel that failed.
    pub channel: String,
    /// Failure description.
    pub reason: String,
}

/// A delivery backend: Slack, Telegram, email, webhook, ...
#[async_trait]
pub trait NotificationChannel: Send + Sync {
    /// Channel name, referenced by the route config.
    fn name(&self) -> &str;

    /// Deliver one message.
    ///
    /// # Errors
    ///
    /// Returns a human-readable reason; the router collects it and carries
    /// on with the remaining channels.
    async fn send(&self, message: &NotificationMessage) -> Result<(), String>;
}

/// Maps severities to channel names.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RouteConfig {
    /// Channels for info messages.
    #[serde(default)]
    pub info: Vec<String>,
    /// Channels for warnings.
    #[serde(default)]
    pub warning: Vec<String>,
    /// Channels for critical messages.
    #[serde(default)]
    pub critical: Vec<String>,
    /// Per-agent notifications per hour before dropping.
    #[serde(default = "default_hourly_cap")]
    pub per_agent_hourly_cap: usize,
}

fn default_hourly_cap() -> usize {
    20
}

impl RouteConfig {
    /// Channel names selected for a severity, after escalation.
    ///
    /// Critical unions all three lists, warning unions warning and info,
    /// info uses only its own list. Duplicates are dropped, order kept.
    #[must_use]
    pub fn channels_for(&self, severity: Severity) -> Vec<&str> {
        let lists: Vec<&[String]> = match severity {
            Severity::Critical => vec![&self.critical, &self.warning, &self.info],
            Severity::Warning => vec![&self.warning, &self.info],
            Severity::Info => vec![&self.info],
        };
        let mut seen = Vec::new();
        for list in lists {
            for name in list {
                if !seen.contains(&name.as_str()) {
                    seen.push(name.as_str());
                }
            }
        }
        seen
    }
}

/// Fan-out router with a per-agent hourly cap.
pub struct NotificationRouter {
    config: RouteConfig,
    channels: HashMap<String, Arc<dyn NotificationChannel>>,
    sent: Mutex<Vec<(String, DateTime<Utc>)>>,
}

impl NotificationRouter {
    /// Create a router from a route config and channel set.
    #[must_use]
    pub fn new(config: RouteConfig, channels: Vec<Arc<dyn NotificationChannel>>) -> Self {
        let channels = channels
            .into_iter()
            .map(|c| (c.name().to_string(), c))
            .collect();
        Self {
            config,
            channels,
            sent: Mutex::new(Vec::new()),
        }
    }

    /// Deliver a message to every channel its severity selects.
    ///
    /// Returns the failures; an empty vector means every delivery worked.
    /// Over-cap messages are dropped silently and return no failures.
    pub async fn notify(&self, message: &NotificationMessage) -> Vec<ChannelError> {
        if !self.admit(&message.agent) {
            warn!(agent = %message.agent, "notification rate cap hit, dropping");
            return Vec::new();
        }

        let mut failures = Vec::new();
        for name in self.config.channels_for(message.severity) {
            let Some(channel) = self.channels.get(name) else {
                failures.push(ChannelError {
                    channel: name.to_string(),
                    reason: "channel not configured".into(),
                });
                continue;
            };
            if let Err(reason) = channel.send(message).await {
                failures.push(ChannelError {
                    channel: name.to_string(),
                    reason,
                });
            } else {
                debug!(channel = name, severity = %message.severity, "notification sent");
            }
        }
        failures
    }

    /// Sliding-window admission for one agent.
    fn admit(&self, agent: &str) -> bool {
        let cutoff = Utc::now() - ChronoDuration::hours(1);
        let mut sent = self.sent.lock();
        sent.retain(|(_, at)| *at > cutoff);
        let recent = sent.iter().filter(|(a, _)| a == agent).count();
        if recent >= self.config.per_agent_hourly_cap {
            return false;
        }
        sent.push((agent.to_string(), Utc::now()));
        true
    }
}

impl fmt::Debug for NotificationRouter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NotificationRouter")
            .field("channels", &self.channels.keys().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}
