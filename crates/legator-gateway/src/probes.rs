//! Probe registry: lifecycle, channel attachment, and command dispatch.

use dashmap::DashMap;
use legator_core::{ProbeId, Timestamp};
use legator_crypto::{derive_probe_key, EnvelopeSigner};
use legator_wire::{
    canonical_payload, CommandPayload, CommandResult, Envelope, EnvelopeType, InventorySnapshot,
    OutputChunk, ProbePolicy,
};
use serde::Serialize;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

/// How long a dispatched command waits for its result.
const DISPATCH_TIMEOUT: Duration = Duration::from_secs(60);

/// A probe goes stale when it has not been seen for this long.
const STALE_AFTER: Duration = Duration::from_secs(30 * 60);

/// One registered probe, as the registry sees it.
#[derive(Debug, Clone, Serialize)]
pub struct ProbeEntry {
    /// Server-assigned id.
    pub id: String,
    /// API key; never serialized into listings.
    #[serde(skip)]
    pub api_key: String,
    /// Applied policy id.
    pub policy_id: String,
    /// Host name reported at registration.
    pub hostname: String,
    /// Operating system.
    pub os: String,
    /// CPU architecture.
    pub arch: String,
    /// Probe binary version.
    pub version: String,
    /// Operator tags.
    pub tags: Vec<String>,
    /// Whether a channel is currently attached.
    pub connected: bool,
    /// When the probe last sent anything.
    pub last_seen: Timestamp,
    /// Latest inventory snapshot.
    pub inventory: Option<InventorySnapshot>,
}

/// Health summary for one probe.
#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    /// 0-100, higher is better.
    pub score: u32,
    /// `healthy`, `degraded`, or `unhealthy`.
    pub status: String,
    /// Human-readable findings.
    pub warnings: Vec<String>,
}

/// Registration request fields.
#[derive(Debug, Clone, serde::Deserialize)]
pub struct RegisterRequest {
    /// Shared registration token.
    pub token: String,
    /// Host name.
    pub hostname: String,
    /// Operating system.
    pub os: String,
    /// CPU architecture.
    pub arch: String,
    /// Probe binary version.
    pub version: String,
    /// Optional tags.
    #[serde(default)]
    pub tags: Vec<String>,
}

/// Registry of probes and their live channels.
pub struct ProbeRegistry {
    registration_token: String,
    master_secret: Vec<u8>,
    default_policy: ProbePolicy,
    probes: DashMap<String, ProbeEntry>,
    channels: DashMap<String, mpsc::Sender<Envelope>>,
    pending_results: DashMap<String, oneshot::Sender<CommandResult>>,
    chunk_sinks: DashMap<String, mpsc::Sender<OutputChunk>>,
}

impl ProbeRegistry {
    /// Create a registry.
    #[must_use]
    pub fn new(
        registration_token: impl Into<String>,
        master_secret: Vec<u8>,
        default_policy: ProbePolicy,
    ) -> Self {
        Self {
            registration_token: registration_token.into(),
            master_secret,
            default_policy,
            probes: DashMap::new(),
            channels: DashMap::new(),
            pending_results: DashMap::new(),
            chunk_sinks: DashMap::new(),
        }
    }

    /// Register a new probe; `None` when the token is wrong.
    #[must_use]
    pub fn register(&self, request: &RegisterRequest) -> Option<(String, String, String)> {
        if request.token != self.registration_token {
            warn!(hostname = %request.hostname, "registration with bad token");
            return None;
        }
        let id = ProbeId::generate().to_string();
        let api_key = hex::encode(rand::random::<[u8; 24]>());
        let entry = ProbeEntry {
            id: id.clone(),
            api_key: api_key.clone(),
            policy_id: self.default_policy.id.clone(),
            hostname: request.hostname.clone(),
            os: request.os.clone(),
            arch: request.arch.clone(),
            version: request.version.clone(),
            tags: request.tags.clone(),
            connected: false,
            last_seen: Timestamp::now(),
            inventory: None,
        };
        info!(probe = %id, hostname = %entry.hostname, "probe registered");
        self.probes.insert(id.clone(), entry);
        Some((id, api_key, self.default_policy.id.clone()))
    }

    /// Authenticate a probe by id and API key.
    #[must_use]
    pub fn authenticate(&self, probe_id: &str, api_key: &str) -> bool {
        self.probes
            .get(probe_id)
            .is_some_and(|p| p.api_key == api_key)
    }

    /// Replace a probe's tags.
    #[must_use]
    pub fn set_tags(&self, probe_id: &str, tags: Vec<String>) -> bool {
        match self.probes.get_mut(probe_id) {
            Some(mut probe) => {
                probe.tags = tags;
                true
            }
            None => false,
        }
    }

    /// All probes, registration order not guaranteed.
    #[must_use]
    pub fn list(&self) -> Vec<ProbeEntry> {
        self.probes.iter().map(|p| p.clone()).collect()
    }

    /// One probe.
    #[must_use]
    pub fn get(&self, probe_id: &str) -> Option<ProbeEntry> {
        self.probes.get(probe_id).map(|p| p.clone())
    }

    /// Health score for one probe.
    #[must_use]
    pub fn health(&self, probe_id: &str) -> Option<HealthReport> {
        let probe = self.probes.get(probe_id)?;
        let mut score: u32 = 100;
        let mut warnings = Vec::new();

        if !probe.connected {
            score = score.saturating_sub(40);
            warnings.push("channel not connected".to_string());
        }
        let stale = probe.last_seen.elapsed().to_std().unwrap_or_default() > STALE_AFTER;
        if stale {
            score = score.saturating_sub(40);
            warnings.push(format!("not seen since {}", probe.last_seen));
        }
        if probe.inventory.is_none() {
            score = score.saturating_sub(10);
            warnings.push("no inventory received yet".to_string());
        }

        let status = match score {
            80..=100 => "healthy",
            50..=79 => "degraded",
            _ => "unhealthy",
        };
        Some(HealthReport {
            score,
            status: status.to_string(),
            warnings,
        })
    }

    /// Attach a live channel for a connected probe.
    ///
    /// Returns the outbox the socket writer drains. A previous channel for
    /// the same probe is replaced.
    #[must_use]
    pub fn attach(&self, probe_id: &str) -> mpsc::Receiver<Envelope> {
        let (tx, rx) = mpsc::channel(64);
        self.channels.insert(probe_id.to_string(), tx);
        if let Some(mut probe) = self.probes.get_mut(probe_id) {
            probe.connected = true;
            probe.last_seen = Timestamp::now();
        }
        info!(probe = probe_id, "channel attached");
        rx
    }

    /// Detach a probe's channel.
    pub fn detach(&self, probe_id: &str) {
        self.channels.remove(probe_id);
        if let Some(mut probe) = self.probes.get_mut(probe_id) {
            probe.connected = false;
        }
        info!(probe = probe_id, "channel detached");
    }

    /// Handle one envelope received from a probe.
    pub fn handle_inbound(&self, probe_id: &str, envelope: &Envelope) {
        if let Some(mut probe) = self.probes.get_mut(probe_id) {
            probe.last_seen = Timestamp::now();
        }
        match envelope.envelope_type {
            EnvelopeType::CommandResult => {
                if let Ok(result) = envelope.decode_payload::<CommandResult>(EnvelopeType::CommandResult)
                {
                    if let Some((_, waiter)) = self.pending_results.remove(&result.request_id) {
                        let _ = waiter.send(result);
                    }
                }
            }
            EnvelopeType::OutputChunk => {
                if let Ok(chunk) = envelope.decode_payload::<OutputChunk>(EnvelopeType::OutputChunk)
                {
                    let is_final = chunk.is_final;
                    let request_id = chunk.request_id.clone();
                    if let Some(sink) = self.chunk_sinks.get(&request_id) {
                        let _ = sink.try_send(chunk);
                    }
                    if is_final {
                        self.chunk_sinks.remove(&request_id);
                    }
                }
            }
            EnvelopeType::Inventory => {
                if let Ok(snapshot) =
                    envelope.decode_payload::<InventorySnapshot>(EnvelopeType::Inventory)
                {
                    if let Some(mut probe) = self.probes.get_mut(probe_id) {
                        probe.inventory = Some(snapshot);
                    }
                }
            }
            EnvelopeType::Pong => debug!(probe = probe_id, "pong"),
            other => debug!(probe = probe_id, envelope_type = %other, "ignoring inbound"),
        }
    }

    /// Dispatch a buffered command to a connected probe and await its
    /// result.
    ///
    /// The envelope is signed with the probe's derived key.
    ///
    /// # Errors
    ///
    /// Returns a descriptive error string when the probe is not connected,
    /// signing fails, or the result does not arrive in time.
    pub async fn dispatch_command(
        &self,
        probe_id: &str,
        payload: CommandPayload,
    ) -> Result<CommandResult, String> {
        let channel = self
            .channels
            .get(probe_id)
            .map(|c| c.clone())
            .ok_or_else(|| format!("probe {probe_id} is not connected"))?;

        let envelope = self.signed_command(probe_id, &payload)?;
        let (tx, rx) = oneshot::channel();
        self.pending_results.insert(payload.request_id.clone(), tx);

        if channel.send(envelope).await.is_err() {
            self.pending_results.remove(&payload.request_id);
            return Err(format!("probe {probe_id} channel closed"));
        }

        match tokio::time::timeout(DISPATCH_TIMEOUT, rx).await {
            Ok(Ok(result)) => Ok(result),
            Ok(Err(_)) => Err("result channel dropped".to_string()),
            Err(_) => {
                self.pending_results.remove(&payload.request_id);
                Err(format!("probe {probe_id} did not answer in time"))
            }
        }
    }

    /// Dispatch a streaming command; chunks arrive on the returned receiver
    /// until the final chunk.
    ///
    /// # Errors
    ///
    /// Returns a descriptive error string when the probe is not connected
    /// or signing fails.
    pub async fn dispatch_stream(
        &self,
        probe_id: &str,
        mut payload: CommandPayload,
    ) -> Result<mpsc::Receiver<OutputChunk>, String> {
        payload.stream = true;
        let channel = self
            .channels
            .get(probe_id)
            .map(|c| c.clone())
            .ok_or_else(|| format!("probe {probe_id} is not connected"))?;

        let envelope = self.signed_command(probe_id, &payload)?;
        let (tx, rx) = mpsc::channel(256);
        self.chunk_sinks.insert(payload.request_id.clone(), tx);

        if channel.send(envelope).await.is_err() {
            self.chunk_sinks.remove(&payload.request_id);
            return Err(format!("probe {probe_id} channel closed"));
        }
        Ok(rx)
    }

    /// Send a policy update to a connected probe.
    ///
    /// # Errors
    ///
    /// Returns a descriptive error string when the probe is not connected.
    pub async fn push_policy(&self, probe_id: &str, policy: &ProbePolicy) -> Result<(), String> {
        let channel = self
            .channels
            .get(probe_id)
            .map(|c| c.clone())
            .ok_or_else(|| format!("probe {probe_id} is not connected"))?;
        let envelope = Envelope::new(EnvelopeType::PolicyUpdate, policy)
            .map_err(|e| e.to_string())?;
        channel.send(envelope).await.map_err(|e| e.to_string())?;
        if let Some(mut probe) = self.probes.get_mut(probe_id) {
            probe.policy_id = policy.id.clone();
        }
        Ok(())
    }

    /// The signing key the control plane derives for a probe; handed to the
    /// host out-of-band when command signing is enabled.
    #[must_use]
    pub fn probe_signing_key(&self, probe_id: &str) -> Vec<u8> {
        derive_probe_key(&self.master_secret, probe_id)
    }

    fn signed_command(&self, probe_id: &str, payload: &CommandPayload) -> Result<Envelope, String> {
        let envelope =
            Envelope::new(EnvelopeType::Command, payload).map_err(|e| e.to_string())?;
        let signer = EnvelopeSigner::new(self.probe_signing_key(probe_id))
            .map_err(|e| e.to_string())?;
        let canonical = canonical_payload(payload).map_err(|e| e.to_string())?;
        let signature = signer.sign(&envelope.id, &canonical);
        Ok(envelope.with_signature(signature))
    }
}

impl std::fmt::Debug for ProbeRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProbeRegistry")
            .field("probes", &self.probes.len())
            .field("connected", &self.channels.len())
            .finish_non_exhaustive()
    }
}
