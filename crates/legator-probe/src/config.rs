//! Persisted probe configuration and registration.

use legator_wire::ProbePolicy;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::info;

use crate::error::{ProbeError, ProbeResult};

/// On-disk probe state, written after registration and on policy updates.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProbeConfig {
    /// Control-plane base URL.
    pub server_url: String,
    /// Server-assigned probe id.
    pub probe_id: String,
    /// Opaque API key for channel authentication.
    pub api_key: String,
    /// Id of the policy currently applied.
    pub policy_id: String,
    /// Hex-encoded signing key; empty disables signature checks.
    #[serde(default)]
    pub signing_key: String,
    /// Last applied policy, so restarts enforce it before reconnecting.
    #[serde(default)]
    pub policy: ProbePolicy,
}

impl ProbeConfig {
    /// Load a config from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns [`ProbeError::Config`] when the file is missing or invalid.
    pub fn load(path: &Path) -> ProbeResult<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| ProbeError::Config(format!("read {}: {e}", path.display())))?;
        toml::from_str(&text).map_err(|e| ProbeError::Config(format!("parse {}: {e}", path.display())))
    }

    /// Write the config as TOML, readable only by the owner.
    ///
    /// # Errors
    ///
    /// Returns [`ProbeError::Config`] on serialization or write failure.
    pub fn save(&self, path: &Path) -> ProbeResult<()> {
        let text = toml::to_string_pretty(self)
            .map_err(|e| ProbeError::Config(format!("encode config: {e}")))?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| ProbeError::Config(format!("create {}: {e}", parent.display())))?;
        }
        std::fs::write(path, text)
            .map_err(|e| ProbeError::Config(format!("write {}: {e}", path.display())))?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))
                .map_err(|e| ProbeError::Config(format!("chmod {}: {e}", path.display())))?;
        }
        Ok(())
    }

    /// The decoded signing key, when one is configured.
    #[must_use]
    pub fn signing_key_bytes(&self) -> Option<Vec<u8>> {
        if self.signing_key.is_empty() {
            return None;
        }
        hex::decode(&self.signing_key).ok()
    }
}

/// Request body for probe registration.
#[derive(Debug, Serialize)]
struct RegisterRequest<'a> {
    token: &'a str,
    hostname: String,
    os: &'static str,
    arch: &'static str,
    version: &'static str,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tags: Vec<String>,
}

/// Response body from probe registration.
#[derive(Debug, Deserialize)]
struct RegisterResponse {
    probe_id: String,
    api_key: String,
    policy_id: String,
}

/// Register this host with the control plane and build a config.
///
/// # Errors
///
/// Returns [`ProbeError::Registration`] on transport failure or a non-201
/// response.
pub async fn register(
    server_url: &str,
    token: &str,
    tags: Vec<String>,
) -> ProbeResult<ProbeConfig> {
    let url = format!("{}/api/v1/register", server_url.trim_end_matches('/'));
    let body = RegisterRequest {
        token,
        hostname: crate::inventory::hostname(),
        os: std::env::consts::OS,
        arch: std::env::consts::ARCH,
        version: env!("CARGO_PKG_VERSION"),
        tags,
    };

    let client = reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(10))
        .build()
        .map_err(|e| ProbeError::Registration(e.to_string()))?;
    let response = client
        .post(&url)
        .json(&body)
        .send()
        .await
        .map_err(|e| ProbeError::Registration(e.to_string()))?;

    if response.status().as_u16() != 201 {
        return Err(ProbeError::Registration(format!(
            "server returned {}",
            response.status()
        )));
    }
    let reply: RegisterResponse = response
        .json()
        .await
        .map_err(|e| ProbeError::Registration(e.to_string()))?;
    info!(probe_id = %reply.probe_id, "registered with control plane");

    Ok(ProbeConfig {
        server_url: server_url.trim_end_matches('/').to_string(),
        probe_id: reply.probe_id,
        api_key: reply.api_key,
        policy_id: reply.policy_id,
        signing_key: String::new(),
        policy: ProbePolicy::default(),
    })
}
