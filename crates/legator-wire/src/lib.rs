//! Legator Wire - Frame types for the probe channel.
//!
//! The control plane and its probes exchange JSON envelopes over one
//! persistent bidirectional stream:
//!
//! ```text
//! envelope = { id, type, payload, signature? }
//! ```
//!
//! Command envelopes may be HMAC-signed; the signed bytes are the canonical
//! JSON serialization of the payload as produced by [`canonical_payload`].
//! Both ends serialize payload structs with the same field order, so the
//! verifier reproduces the producer's bytes exactly.

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

mod envelope;
mod inventory;
mod policy;

pub use envelope::{
    canonical_payload, CommandPayload, CommandResult, Envelope, EnvelopeType, OutputChunk,
    StreamKind, UpdatePayload, WireError, WireResult,
};
pub use inventory::{InventorySnapshot, NetworkInterface};
pub use policy::ProbePolicy;
