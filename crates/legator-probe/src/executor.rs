//! Local command execution under policy.

use arc_swap::ArcSwap;
use legator_classify::classify;
use legator_wire::{CommandPayload, CommandResult, OutputChunk, ProbePolicy, StreamKind};
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Default execution timeout.
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Hard cap on captured stdout/stderr, each side.
const MAX_CAPTURE_BYTES: usize = 1024 * 1024;

/// Marker appended to truncated captures.
const TRUNCATION_MARKER: &str = "\n... [truncated]";

/// Executes commands under the probe's local policy.
///
/// The policy is replaced whole on update; executions in flight keep the
/// policy snapshot they loaded at admission.
pub struct ProbeExecutor {
    policy: ArcSwap<ProbePolicy>,
}

impl ProbeExecutor {
    /// Create an executor with an initial policy.
    #[must_use]
    pub fn new(policy: ProbePolicy) -> Self {
        Self {
            policy: ArcSwap::from_pointee(policy),
        }
    }

    /// The current policy snapshot.
    #[must_use]
    pub fn policy(&self) -> Arc<ProbePolicy> {
        self.policy.load_full()
    }

    /// Atomically replace the policy.
    pub fn replace_policy(&self, policy: ProbePolicy) {
        debug!(policy = %policy.id, level = ?policy.level, "policy replaced");
        self.policy.store(Arc::new(policy));
    }

    /// Check a command against the policy; `Err` carries the refusal reason.
    fn admit(&self, cmd: &CommandPayload) -> Result<(), String> {
        let policy = self.policy.load();
        let classified = classify(&cmd.command, &cmd.args);
        let executed = cmd.declared_tier.max(classified);

        if !policy.level.admits(executed) {
            return Err(format!(
                "policy violation: command classified as {executed}, policy allows {}",
                policy.level
            ));
        }

        let full = cmd.full_command();
        if let Some(prefix) = policy.blocked.iter().find(|p| full.starts_with(p.as_str())) {
            return Err(format!("command blocked by policy prefix {prefix:?}"));
        }

        if !policy.allowed.is_empty() && !policy.allowed.iter().any(|a| a == &cmd.command) {
            return Err(format!(
                "command {:?} not in the policy allow-list",
                cmd.command
            ));
        }

        Ok(())
    }

    /// Execute a command and capture its output.
    ///
    /// Refusals and spawn failures return a synthetic result with exit code
    /// `-1` and zero or measured duration; no process is spawned for
    /// refusals.
    pub async fn execute(&self, cmd: &CommandPayload) -> CommandResult {
        if let Err(reason) = self.admit(cmd) {
            warn!(command = %cmd.command, reason, "command refused");
            return CommandResult::rejected(&cmd.request_id, reason);
        }

        let timeout = cmd
            .timeout_secs
            .map_or(DEFAULT_TIMEOUT, Duration::from_secs);
        let start = Instant::now();

        let mut command = Command::new(&cmd.command);
        command
            .args(&cmd.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let output = match tokio::time::timeout(timeout, command.output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => {
                return CommandResult {
                    request_id: cmd.request_id.clone(),
                    exit_code: -1,
                    stdout: String::new(),
                    stderr: format!("failed to spawn command: {e}"),
                    duration_ms: duration_ms(start),
                };
            }
            Err(_) => {
                // kill_on_drop reaps the process tree when the future drops.
                return CommandResult {
                    request_id: cmd.request_id.clone(),
                    exit_code: -1,
                    stdout: String::new(),
                    stderr: format!("command timed out after {}s", timeout.as_secs()),
                    duration_ms: duration_ms(start),
                };
            }
        };

        CommandResult {
            request_id: cmd.request_id.clone(),
            exit_code: output.status.code().unwrap_or(-1),
            stdout: capped(&output.stdout),
            stderr: capped(&output.stderr),
            duration_ms: duration_ms(start),
        }
    }

    /// Execute a command, streaming line chunks into `sink`.
    ///
    /// Chunks carry one monotonic sequence shared by both streams; the last
    /// chunk has `final = true` and the exit code. Refusals emit exactly one
    /// final chunk with exit code `-1` and the reason.
    pub async fn execute_stream(&self, cmd: &CommandPayload, sink: mpsc::Sender<OutputChunk>) {
        if let Err(reason) = self.admit(cmd) {
            warn!(command = %cmd.command, reason, "stream command refused");
            let _ = sink
                .send(OutputChunk {
                    request_id: cmd.request_id.clone(),
                    seq: 0,
                    stream: StreamKind::Stderr,
                    data: reason,
                    is_final: true,
                    exit_code: Some(-1),
                })
                .await;
            return;
        }

        let timeout = cmd
            .timeout_secs
            .map_or(DEFAULT_TIMEOUT, Duration::from_secs);

        let mut command = Command::new(&cmd.command);
        command
            .args(&cmd.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = match command.spawn() {
            Ok(child) => child,
            Err(e) => {
                let _ = sink
                    .send(OutputChunk {
                        request_id: cmd.request_id.clone(),
                        seq: 0,
                        stream: StreamKind::Stderr,
                        data: format!("failed to spawn command: {e}"),
                        is_final: true,
                        exit_code: Some(-1),
                    })
                    .await;
                return;
            }
        };

        let seq = Arc::new(AtomicU64::new(0));
        let mut readers = Vec::new();
        if let Some(stdout) = child.stdout.take() {
            readers.push(tokio::spawn(pump_lines(
                stdout,
                StreamKind::Stdout,
                cmd.request_id.clone(),
                Arc::clone(&seq),
                sink.clone(),
            )));
        }
        if let Some(stderr) = child.stderr.take() {
            readers.push(tokio::spawn(pump_lines(
                stderr,
                StreamKind::Stderr,
                cmd.request_id.clone(),
                Arc::clone(&seq),
                sink.clone(),
            )));
        }

        let exit_code = match tokio::time::timeout(timeout, child.wait()).await {
            Ok(Ok(status)) => status.code().unwrap_or(-1),
            Ok(Err(e)) => {
                warn!(command = %cmd.command, error = %e, "wait failed");
                -1
            }
            Err(_) => {
                let _ = child.kill().await;
                -1
            }
        };
        for reader in readers {
            let _ = reader.await;
        }

        let _ = sink
            .send(OutputChunk {
                request_id: cmd.request_id.clone(),
                seq: seq.fetch_add(1, Ordering::SeqCst),
                stream: StreamKind::Stdout,
                data: String::new(),
                is_final: true,
                exit_code: Some(exit_code),
            })
            .await;
    }
}

impl std::fmt::Debug for ProbeExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProbeExecutor")
            .field("policy", &self.policy.load().id)
            .finish()
    }
}

async fn pump_lines<R>(
    reader: R,
    stream: StreamKind,
    request_id: String,
    seq: Arc<AtomicU64>,
    sink: mpsc::Sender<OutputChunk>,
) where
    R: tokio::io::AsyncRead + Unpin,
{
    let mut lines = BufReader::new(reader).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        let chunk = OutputChunk {
            request_id: request_id.clone(),
            seq: seq.fetch_add(1, Ordering::SeqCst),
            stream,
            data: line,
            is_final: false,
            exit_code: None,
        };
        if sink.send(chunk).await.is_err() {
            return;
        }
    }
}

fn capped(bytes: &[u8]) -> String {
    let text = String::from_utf8_lossy(bytes);
    if text.len() <= MAX_CAPTURE_BYTES {
        return text.into_owned();
    }
    let mut cut = MAX_CAPTURE_BYTES;
    while !text.is_char_boundary(cut) {
        cut -= 1;
    }
    let mut out = text[..cut].to_string();
    out.push_str(TRUNCATION_MARKER);
    out
}

fn duration_ms(start: Instant) -> u64 {
    u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX)
}
