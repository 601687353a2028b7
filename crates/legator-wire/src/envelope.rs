//! Envelope and command payload types.

use legator_core::ActionTier;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use uuid::Uuid;

/// Result alias for wire operations.
pub type WireResult<T> = Result<T, WireError>;

/// Errors from envelope encoding and decoding.
#[derive(Debug, Error)]
pub enum WireError {
    /// Payload could not be serialized or deserialized.
    #[error("payload codec error: {0}")]
    Codec(#[from] serde_json::Error),

    /// Envelope type did not match the requested payload.
    #[error("unexpected envelope type: {0}")]
    UnexpectedType(EnvelopeType),
}

/// Frame type discriminator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnvelopeType {
    /// Control plane → probe: execute a command.
    Command,
    /// Probe → control plane: buffered command result.
    CommandResult,
    /// Probe → control plane: one streamed output chunk.
    OutputChunk,
    /// Probe → control plane: inventory snapshot.
    Inventory,
    /// Control plane → probe: replace the local policy.
    PolicyUpdate,
    /// Control plane → probe: self-update to a new binary.
    Update,
    /// Heartbeat request.
    Ping,
    /// Heartbeat response.
    Pong,
}

impl fmt::Display for EnvelopeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Command => "command",
            Self::CommandResult => "command_result",
            Self::OutputChunk => "output_chunk",
            Self::Inventory => "inventory",
            Self::PolicyUpdate => "policy_update",
            Self::Update => "update",
            Self::Ping => "ping",
            Self::Pong => "pong",
        };
        write!(f, "{s}")
    }
}

/// One frame on the probe channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    /// Envelope identifier, unique per frame.
    pub id: String,
    /// Frame type.
    #[serde(rename = "type")]
    pub envelope_type: EnvelopeType,
    /// Type-specific payload; `null` for ping/pong.
    #[serde(default)]
    pub payload: serde_json::Value,
    /// Hex-encoded HMAC-SHA256 over `id | canonical_payload`, when signed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,
}

impl Envelope {
    /// Create an envelope with a fresh id and a typed payload.
    ///
    /// # Errors
    ///
    /// Returns [`WireError::Codec`] when the payload cannot be serialized.
    pub fn new<P: Serialize>(envelope_type: EnvelopeType, payload: &P) -> WireResult<Self> {
        Ok(Self {
            id: Uuid::new_v4().to_string(),
            envelope_type,
            payload: serde_json::to_value(payload)?,
            signature: None,
        })
    }

    /// Create a payload-less heartbeat frame.
    #[must_use]
    pub fn heartbeat(envelope_type: EnvelopeType) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            envelope_type,
            payload: serde_json::Value::Null,
            signature: None,
        }
    }

    /// Attach a signature.
    #[must_use]
    pub fn with_signature(mut self, signature: String) -> Self {
        self.signature = Some(signature);
        self
    }

    /// Decode the payload as `P`, checking the envelope type first.
    ///
    /// # Errors
    ///
    /// Returns [`WireError::UnexpectedType`] on a type mismatch and
    /// [`WireError::Codec`] when the payload does not decode as `P`.
    pub fn decode_payload<P: DeserializeOwned>(&self, expected: EnvelopeType) -> WireResult<P> {
        if self.envelope_type != expected {
            return Err(WireError::UnexpectedType(self.envelope_type));
        }
        Ok(serde_json::from_value(self.payload.clone())?)
    }
}

/// Canonical JSON bytes of a payload, as used for signing.
///
/// Field order is the struct declaration order on both ends, which makes the
/// producer's serialization reproducible by the verifier.
///
/// # Errors
///
/// Returns [`WireError::Codec`] when the payload cannot be serialized.
pub fn canonical_payload<P: Serialize>(payload: &P) -> WireResult<Vec<u8>> {
    Ok(serde_json::to_vec(payload)?)
}

/// Payload of a `command` envelope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandPayload {
    /// Correlation id for results and chunks.
    pub request_id: String,
    /// Base command to execute.
    pub command: String,
    /// Arguments.
    #[serde(default)]
    pub args: Vec<String>,
    /// Tier the caller declared for this command.
    pub declared_tier: ActionTier,
    /// Execution timeout in seconds; probe default applies when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,
    /// Request `output_chunk` streaming instead of a buffered result.
    #[serde(default)]
    pub stream: bool,
}

impl CommandPayload {
    /// Create a payload with a fresh request id.
    #[must_use]
    pub fn new(command: impl Into<String>, args: Vec<String>, declared_tier: ActionTier) -> Self {
        Self {
            request_id: Uuid::new_v4().to_string(),
            command: command.into(),
            args,
            declared_tier,
            timeout_secs: None,
            stream: false,
        }
    }

    /// The full command line, used for classification.
    #[must_use]
    pub fn full_command(&self) -> String {
        if self.args.is_empty() {
            self.command.clone()
        } else {
            format!("{} {}", self.command, self.args.join(" "))
        }
    }
}

/// Payload of a `command_result` envelope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandResult {
    /// Correlates with the command's `request_id`.
    pub request_id: String,
    /// Process exit code; `-1` for synthetic failures.
    pub exit_code: i32,
    /// Captured stdout, possibly truncated.
    pub stdout: String,
    /// Captured stderr, possibly truncated.
    pub stderr: String,
    /// Wall-clock duration in milliseconds.
    pub duration_ms: u64,
}

impl CommandResult {
    /// A synthetic failure result that never ran a process.
    #[must_use]
    pub fn rejected(request_id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            request_id: request_id.into(),
            exit_code: -1,
            stdout: String::new(),
            stderr: reason.into(),
            duration_ms: 0,
        }
    }
}

/// Which output stream a chunk carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamKind {
    /// Standard output.
    Stdout,
    /// Standard error.
    Stderr,
}

/// Payload of an `output_chunk` envelope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputChunk {
    /// Correlates with the command's `request_id`.
    pub request_id: String,
    /// Monotonic sequence number within the request.
    pub seq: u64,
    /// Stream the data came from.
    pub stream: StreamKind,
    /// Chunk data.
    pub data: String,
    /// Set on the last chunk of the request.
    #[serde(rename = "final")]
    pub is_final: bool,
    /// Exit code, present in the final chunk.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
}

/// Payload of an `update` envelope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdatePayload {
    /// Where to download the new binary.
    pub url: String,
    /// Expected SHA-256 of the download, hex-encoded; empty skips the check.
    pub checksum: String,
    /// Version label of the new binary.
    pub version: String,
    /// Restart the service after a successful swap.
    #[serde(default)]
    pub restart: bool,
}
