//! The probe agent loop: one channel, many concerns.

use legator_crypto::EnvelopeSigner;
use legator_wire::{
    canonical_payload, CommandPayload, CommandResult, Envelope, EnvelopeType, ProbePolicy,
    UpdatePayload,
};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::ProbeConfig;
use crate::connection::Connection;
use crate::error::{ProbeError, ProbeResult};
use crate::executor::ProbeExecutor;
use crate::updater::Updater;

/// Delay before the first inventory push, letting the host settle.
const INVENTORY_SETTLE: Duration = Duration::from_secs(10);

/// Interval between inventory pushes.
const INVENTORY_INTERVAL: Duration = Duration::from_secs(15 * 60);

/// The probe agent: multiplexes command handling, inventory pushes, policy
/// updates, and self-update over one connection.
pub struct ProbeAgent {
    config: Mutex<ProbeConfig>,
    config_path: PathBuf,
    executor: Arc<ProbeExecutor>,
    signer: Option<EnvelopeSigner>,
    updater: Updater,
    labels: BTreeMap<String, String>,
}

impl ProbeAgent {
    /// Build an agent from persisted config.
    ///
    /// # Errors
    ///
    /// Returns [`ProbeError::Config`] for an undecodable signing key.
    pub fn new(config: ProbeConfig, config_path: PathBuf) -> ProbeResult<Self> {
        let signer = match config.signing_key_bytes() {
            Some(key) => Some(
                EnvelopeSigner::new(key)
                    .map_err(|e| ProbeError::Config(format!("signing key: {e}")))?,
            ),
            None => {
                if !config.signing_key.is_empty() {
                    return Err(ProbeError::Config("signing key is not valid hex".into()));
                }
                None
            }
        };
        let executor = Arc::new(ProbeExecutor::new(config.policy.clone()));
        Ok(Self {
            config: Mutex::new(config),
            config_path,
            executor,
            signer,
            updater: Updater::new("legator-probe"),
            labels: BTreeMap::new(),
        })
    }

    /// Run until cancelled, reconnecting with backoff on channel loss.
    pub async fn run(&self, cancel: CancellationToken) {
        loop {
            let (server_url, probe_id, api_key) = {
                let config = lock(&self.config);
                (
                    config.server_url.clone(),
                    config.probe_id.clone(),
                    config.api_key.clone(),
                )
            };
            let Some(connection) =
                Connection::connect_with_backoff(&server_url, &probe_id, &api_key, &cancel).await
            else {
                info!("probe shutting down");
                return;
            };
            self.session(connection, &cancel).await;
            if cancel.is_cancelled() {
                info!("probe shutting down");
                return;
            }
            warn!("channel lost, reconnecting");
        }
    }

    /// Drive one connected session until the channel drops or cancellation.
    async fn session(&self, connection: Connection, cancel: &CancellationToken) {
        let Connection { mut inbox, outbox } = connection;
        let start = tokio::time::Instant::now() + INVENTORY_SETTLE;
        let mut inventory = tokio::time::interval_at(start, INVENTORY_INTERVAL);

        loop {
            tokio::select! {
                () = cancel.cancelled() => return,
                envelope = inbox.recv() => {
                    match envelope {
                        Some(envelope) => self.dispatch(envelope, &outbox).await,
                        None => return,
                    }
                }
                _ = inventory.tick() => self.push_inventory(&outbox).await,
            }
        }
    }

    /// Handle one inbound envelope.
    pub(crate) async fn dispatch(&self, envelope: Envelope, outbox: &mpsc::Sender<Envelope>) {
        match envelope.envelope_type {
            EnvelopeType::Command => self.handle_command(envelope, outbox).await,
            EnvelopeType::PolicyUpdate => self.handle_policy_update(&envelope),
            EnvelopeType::Update => self.handle_update(&envelope).await,
            EnvelopeType::Ping => {
                let _ = outbox.send(Envelope::heartbeat(EnvelopeType::Pong)).await;
            }
            EnvelopeType::Pong => {}
            other => debug!(envelope_type = %other, "ignoring unexpected envelope"),
        }
    }

    async fn handle_command(&self, envelope: Envelope, outbox: &mpsc::Sender<Envelope>) {
        let payload: CommandPayload = match envelope.decode_payload(EnvelopeType::Command) {
            Ok(payload) => payload,
            Err(e) => {
                warn!(error = %e, "undecodable command payload");
                return;
            }
        };

        // Signature check happens before anything else touches the command.
        if let Some(signer) = &self.signer {
            let canonical = match canonical_payload(&payload) {
                Ok(canonical) => canonical,
                Err(e) => {
                    warn!(error = %e, "payload canonicalization failed");
                    return;
                }
            };
            let verified = envelope
                .signature
                .as_deref()
                .ok_or(legator_crypto::CryptoError::SignatureMismatch)
                .and_then(|sig| signer.verify(&envelope.id, &canonical, sig));
            if let Err(e) = verified {
                warn!(request_id = %payload.request_id, error = %e, "command signature rejected");
                let result = CommandResult::rejected(
                    &payload.request_id,
                    format!("signature verification failed: {e}"),
                );
                send_result(outbox, &result).await;
                return;
            }
        }

        let executor = Arc::clone(&self.executor);
        let outbox = outbox.clone();
        tokio::spawn(async move {
            if payload.stream {
                let (tx, mut rx) = mpsc::channel(64);
                let request_id = payload.request_id.clone();
                let pump = tokio::spawn(async move {
                    while let Some(chunk) = rx.recv().await {
                        match Envelope::new(EnvelopeType::OutputChunk, &chunk) {
                            Ok(envelope) => {
                                if outbox.send(envelope).await.is_err() {
                                    return;
                                }
                            }
                            Err(e) => warn!(error = %e, "chunk encode failed"),
                        }
                    }
                });
                executor.execute_stream(&payload, tx).await;
                let _ = pump.await;
                debug!(request_id, "stream complete");
            } else {
                let result = executor.execute(&payload).await;
                send_result(&outbox, &result).await;
            }
        });
    }

    fn handle_policy_update(&self, envelope: &Envelope) {
        let policy: ProbePolicy = match envelope.decode_payload(EnvelopeType::PolicyUpdate) {
            Ok(policy) => policy,
            Err(e) => {
                warn!(error = %e, "undecodable policy update");
                return;
            }
        };
        info!(policy = %policy.id, "applying policy update");
        self.executor.replace_policy(policy.clone());

        let snapshot = {
            let mut config = lock(&self.config);
            config.policy_id = policy.id.clone();
            config.policy = policy;
            config.clone()
        };
        if let Err(e) = snapshot.save(&self.config_path) {
            warn!(error = %e, "failed to persist policy");
        }
    }

    async fn handle_update(&self, envelope: &Envelope) {
        let payload: UpdatePayload = match envelope.decode_payload(EnvelopeType::Update) {
            Ok(payload) => payload,
            Err(e) => {
                warn!(error = %e, "undecodable update request");
                return;
            }
        };
        match self
            .updater
            .apply(&payload.url, &payload.checksum, &payload.version)
            .await
        {
            Ok(report) if report.success => {
                info!(version = %payload.version, "update applied");
                if payload.restart {
                    self.updater.restart();
                }
            }
            Ok(report) => {
                warn!(error = ?report.error, "update rejected");
            }
            Err(e) => warn!(error = %e, "update failed"),
        }
    }

    async fn push_inventory(&self, outbox: &mpsc::Sender<Envelope>) {
        let snapshot = crate::inventory::collect(self.labels.clone());
        match Envelope::new(EnvelopeType::Inventory, &snapshot) {
            Ok(envelope) => {
                if outbox.send(envelope).await.is_err() {
                    warn!("inventory push failed: channel closed");
                }
            }
            Err(e) => warn!(error = %e, "inventory encode failed"),
        }
    }
}

async fn send_result(outbox: &mpsc::Sender<Envelope>, result: &CommandResult) {
    match Envelope::new(EnvelopeType::CommandResult, result) {
        Ok(envelope) => {
            let _ = outbox.send(envelope).await;
        }
        Err(e) => warn!(error = %e, "result encode failed"),
    }
}

fn lock(config: &Mutex<ProbeConfig>) -> std::sync::MutexGuard<'_, ProbeConfig> {
    match config.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

impl std::fmt::Debug for ProbeAgent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProbeAgent")
            .field("signed", &self.signer.is_some())
            .finish_non_exhaustive()
    }
}
