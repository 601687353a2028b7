//! Legator Crypto - Symmetric signing for probe command envelopes.
//!
//! This crate provides:
//! - HMAC-SHA256 signing and verification over `request_id | payload`
//! - Per-probe key derivation from a master secret
//! - Constant-time signature comparison
//!
//! # Security Model
//!
//! Probe commands are signed with a shared secret derived per probe from the
//! control plane's master key. A probe that is handed a signing key rejects
//! every unsigned or mis-signed command with a synthetic failure result, so a
//! compromised transport cannot inject commands.

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

mod error;
mod signer;

pub use error::{CryptoError, CryptoResult};
pub use signer::{derive_probe_key, EnvelopeSigner};
